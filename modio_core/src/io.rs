//! I/O points and their values.
//!
//! An [`IoPoint`] is a byte range (plus optional bit) inside its device's
//! buffer. Values are decoded from and encoded into a device buffer slice;
//! the point never holds data itself.

use modio_common::pictory::IoDescriptor;
use std::fmt;
use std::ops::Range;

// ─── IoValue ────────────────────────────────────────────────────────

/// Value of an I/O point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IoValue {
    /// Single bit.
    Bool(bool),
    /// Integer of up to 8 bytes. Unsigned 8 byte values above `i64::MAX` wrap.
    Int(i64),
    /// Raw bytes for points wider than 8 bytes.
    Bytes(Vec<u8>),
}

impl IoValue {
    /// Boolean view; integers are true when non-zero.
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(v) => *v != 0,
            Self::Bytes(bytes) => bytes.iter().any(|b| *b != 0),
        }
    }

    /// Integer view, `None` for byte values.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(v) => Some(*v),
            Self::Bytes(_) => None,
        }
    }
}

impl From<bool> for IoValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for IoValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

macro_rules! int_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for IoValue {
            fn from(value: $ty) -> Self {
                Self::Int(i64::from(value))
            }
        })*
    };
}

int_from!(u8, u16, u32, i8, i16, i32);

impl From<Vec<u8>> for IoValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl fmt::Display for IoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Bytes(bytes) => {
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

// ─── Point metadata ─────────────────────────────────────────────────

/// Byte order of multi-byte points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Least significant byte first (process image default).
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

/// Region a point lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    /// Read from the process image.
    Input,
    /// Written to the process image.
    Output,
    /// Device parameters, read only at runtime.
    Memory,
}

impl IoKind {
    /// Role after input and output are swapped for simulation.
    pub fn swapped(self) -> Self {
        match self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
            Self::Memory => Self::Memory,
        }
    }
}

/// Crate-wide identity of an I/O point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IoId(pub usize);

// ─── IoPoint ────────────────────────────────────────────────────────

/// One named value inside a device buffer.
#[derive(Debug, Clone)]
pub struct IoPoint {
    id: IoId,
    name: String,
    device: usize,
    kind: IoKind,
    bytes: Range<usize>,
    bit: Option<u8>,
    byteorder: ByteOrder,
    signed: bool,
    default: IoValue,
    exported: bool,
    bmk: String,
}

impl IoPoint {
    /// Create a point covering `bytes` of device `device`.
    pub fn new(id: IoId, name: impl Into<String>, device: usize, kind: IoKind, bytes: Range<usize>, bit: Option<u8>) -> Self {
        let default = zero_value(bytes.len(), bit);
        Self {
            id,
            name: name.into(),
            device,
            kind,
            bytes,
            bit,
            byteorder: ByteOrder::Little,
            signed: false,
            default,
            exported: false,
            bmk: String::new(),
        }
    }

    /// Build a point from its configuration entry.
    ///
    /// `device_offset` is the declared offset of the owning device; the
    /// entry's absolute byte offset is made relative to it.
    pub fn from_descriptor(id: IoId, desc: &IoDescriptor, device: usize, device_offset: usize, kind: IoKind) -> Result<Self, String> {
        let start = desc.byte_offset.checked_sub(device_offset).ok_or_else(|| {
            format!(
                "io '{}' at byte {} lies before device offset {device_offset}",
                desc.name, desc.byte_offset
            )
        })?;
        let mut point = Self::new(id, desc.name.clone(), device, kind, start..start + desc.byte_len(), desc.bit_index());
        point.default = default_value(desc.default, point.bytes.len(), point.bit);
        point.exported = desc.exported;
        point.bmk = desc.bmk.clone();
        Ok(point)
    }

    /// Use `order` for multi-byte values.
    pub fn with_byteorder(mut self, order: ByteOrder) -> Self {
        self.byteorder = order;
        self
    }

    /// Interpret integers as two's complement.
    pub fn with_signed(mut self, signed: bool) -> Self {
        self.signed = signed;
        self
    }

    /// Replace the default value.
    pub fn with_default(mut self, default: IoValue) -> Self {
        self.default = default;
        self
    }

    pub(crate) fn swap_role(&mut self) {
        self.kind = self.kind.swapped();
    }

    /// Crate-wide identity.
    pub fn id(&self) -> IoId {
        self.id
    }

    /// Point name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the owning device.
    pub fn device_index(&self) -> usize {
        self.device
    }

    /// Region role.
    pub fn kind(&self) -> IoKind {
        self.kind
    }

    /// Byte range inside the device buffer.
    pub fn byte_range(&self) -> Range<usize> {
        self.bytes.clone()
    }

    /// Bit index for boolean points.
    pub fn bit(&self) -> Option<u8> {
        self.bit
    }

    /// Byte order tag.
    pub fn byteorder(&self) -> ByteOrder {
        self.byteorder
    }

    /// Signedness of integer values.
    pub fn signed(&self) -> bool {
        self.signed
    }

    /// Configured default value.
    pub fn default_value(&self) -> &IoValue {
        &self.default
    }

    /// Exported flag from the configuration.
    pub fn exported(&self) -> bool {
        self.exported
    }

    /// Equipment identifier from the configuration.
    pub fn bmk(&self) -> &str {
        &self.bmk
    }

    /// Only outputs may be written by the program.
    pub fn writable(&self) -> bool {
        self.kind == IoKind::Output
    }

    /// Bit state in `buf`; whole-value points report non-zero.
    pub fn bit_in(&self, buf: &[u8]) -> bool {
        let raw = &buf[self.bytes.clone()];
        match self.bit {
            Some(bit) => read_uint(raw, self.byteorder) >> bit & 1 == 1,
            None => raw.iter().any(|b| *b != 0),
        }
    }

    /// Decode the value of this point from a device buffer.
    pub fn decode(&self, buf: &[u8]) -> IoValue {
        let raw = &buf[self.bytes.clone()];
        match self.bit {
            Some(_) => IoValue::Bool(self.bit_in(buf)),
            None if raw.len() <= 8 => {
                let unsigned = read_uint(raw, self.byteorder);
                let width = raw.len() as u32 * 8;
                if self.signed && width < 64 {
                    let shift = 64 - width;
                    IoValue::Int(((unsigned << shift) as i64) >> shift)
                } else {
                    IoValue::Int(unsigned as i64)
                }
            }
            None => IoValue::Bytes(raw.to_vec()),
        }
    }

    /// Encode `value` into a device buffer, touching only this point's bytes
    /// (and only its bit for boolean points).
    ///
    /// # Errors
    /// Returns the reason when the value does not fit the point.
    pub fn encode(&self, buf: &mut [u8], value: &IoValue) -> Result<(), String> {
        let order = self.byteorder;
        let raw = &mut buf[self.bytes.clone()];

        if let Some(bit) = self.bit {
            let state = match value {
                IoValue::Bool(b) => *b,
                IoValue::Int(0) => false,
                IoValue::Int(1) => true,
                other => return Err(format!("expected a boolean, got {other}")),
            };
            let word = read_uint(raw, order);
            let mask = 1u64 << bit;
            let word = if state { word | mask } else { word & !mask };
            write_uint(raw, order, word);
            return Ok(());
        }

        match value {
            IoValue::Int(v) if raw.len() <= 8 => {
                check_range(*v, raw.len(), self.signed)?;
                write_uint(raw, order, *v as u64);
                Ok(())
            }
            IoValue::Bytes(bytes) if bytes.len() == raw.len() => {
                raw.copy_from_slice(bytes);
                Ok(())
            }
            IoValue::Bytes(bytes) => Err(format!("expected {} bytes, got {}", raw.len(), bytes.len())),
            other => Err(format!("{other} does not fit {} bytes", raw.len())),
        }
    }
}

fn zero_value(len: usize, bit: Option<u8>) -> IoValue {
    default_value(0, len, bit)
}

fn default_value(default: i64, len: usize, bit: Option<u8>) -> IoValue {
    match bit {
        Some(_) => IoValue::Bool(default != 0),
        None if len <= 8 => IoValue::Int(default),
        None => {
            let mut bytes = vec![0u8; len];
            let le = default.to_le_bytes();
            bytes[..8].copy_from_slice(&le);
            IoValue::Bytes(bytes)
        }
    }
}

fn check_range(value: i64, len: usize, signed: bool) -> Result<(), String> {
    let width = len as u32 * 8;
    let fits = match (signed, width) {
        (_, 0) => false,
        (true, 64) => true,
        (false, 64) => value >= 0,
        (true, w) => {
            let half = 1i64 << (w - 1);
            (-half..half).contains(&value)
        }
        (false, w) => (0..1i64 << w).contains(&value),
    };
    if fits {
        Ok(())
    } else {
        Err(format!(
            "{value} out of range for {} {len} byte integer",
            if signed { "signed" } else { "unsigned" }
        ))
    }
}

fn read_uint(raw: &[u8], order: ByteOrder) -> u64 {
    let len = raw.len().min(8);
    let mut word = [0u8; 8];
    match order {
        ByteOrder::Little => {
            word[..len].copy_from_slice(&raw[..len]);
            u64::from_le_bytes(word)
        }
        ByteOrder::Big => {
            word[8 - len..].copy_from_slice(&raw[raw.len() - len..]);
            u64::from_be_bytes(word)
        }
    }
}

fn write_uint(raw: &mut [u8], order: ByteOrder, value: u64) {
    let len = raw.len().min(8);
    match order {
        ByteOrder::Little => raw[..len].copy_from_slice(&value.to_le_bytes()[..len]),
        ByteOrder::Big => {
            let end = raw.len();
            raw[end - len..].copy_from_slice(&value.to_be_bytes()[8 - len..]);
        }
    }
}
