//! Device and I/O descriptors as written by the configuration tool.
//!
//! I/O entries are positional JSON arrays:
//! `[name, default, bitLength, byteOffset, exported, sortPos, bmk, bitAddress]`.
//! Numeric fields appear either as JSON numbers or as decimal strings.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

// ─── DeviceKind ─────────────────────────────────────────────────────

/// Known device type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Base module (`BASE`).
    Core,
    /// Extension module left or right of the base (`LEFT_RIGHT`).
    Extension,
    /// Virtual device (`VIRTUAL`).
    Virtual,
    /// Fieldbus gateway (`EDGE`).
    Gateway,
}

impl DeviceKind {
    /// Map a raw type tag; `None` for unknown tags.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "BASE" => Some(Self::Core),
            "LEFT_RIGHT" => Some(Self::Extension),
            "VIRTUAL" => Some(Self::Virtual),
            "EDGE" => Some(Self::Gateway),
            _ => None,
        }
    }

    /// Raw type tag.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Core => "BASE",
            Self::Extension => "LEFT_RIGHT",
            Self::Virtual => "VIRTUAL",
            Self::Gateway => "EDGE",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ─── DevicePosition ─────────────────────────────────────────────────

/// Declared device position: a number, or a label such as the legacy `"adap."`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DevicePosition {
    /// Numeric position.
    Index(i64),
    /// Textual position (decimal string or legacy label).
    Label(String),
}

impl DevicePosition {
    /// Numeric value, parsing decimal labels.
    pub fn as_index(&self) -> Option<i64> {
        match self {
            Self::Index(idx) => Some(*idx),
            Self::Label(label) => label.trim().parse().ok(),
        }
    }

    /// Ordering key: numeric positions first (ascending), labels after.
    pub fn sort_key(&self) -> (u8, i64, String) {
        match self.as_index() {
            Some(idx) => (0, idx, String::new()),
            None => (1, 0, self.to_string()),
        }
    }
}

impl fmt::Display for DevicePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(idx) => write!(f, "{idx}"),
            Self::Label(label) => f.write_str(label),
        }
    }
}

// ─── IoDescriptor ───────────────────────────────────────────────────

/// One I/O entry of a device region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoDescriptor {
    /// Unique I/O name.
    pub name: String,
    /// Default value (integer interpretation).
    pub default: i64,
    /// Width in bits.
    pub bit_length: u32,
    /// Absolute byte offset in the process image.
    pub byte_offset: usize,
    /// Exported to other tools.
    pub exported: bool,
    /// Sort position in the configuration tool.
    pub sort_pos: u32,
    /// Free-form equipment identifier.
    pub bmk: String,
    /// Bit within the byte for single-bit entries.
    pub bit_address: Option<u8>,
}

impl IoDescriptor {
    /// Number of bytes covered by this entry.
    pub fn byte_len(&self) -> usize {
        if self.bit_length <= 1 {
            1
        } else {
            self.bit_length.div_ceil(8) as usize
        }
    }

    /// Bit index for boolean entries, `None` for whole-byte values.
    pub fn bit_index(&self) -> Option<u8> {
        if self.bit_length == 1 {
            Some(self.bit_address.unwrap_or(0))
        } else {
            None
        }
    }

    /// Absolute byte span in the process image.
    pub fn span(&self) -> Range<usize> {
        self.byte_offset..self.byte_offset + self.byte_len()
    }
}

fn number_field(value: Option<&Value>, field: &str) -> Result<i64, String> {
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| format!("{field}: {n} is not an integer")),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(0),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| format!("{field}: {s:?} is not an integer")),
        Some(Value::Bool(b)) => Ok(i64::from(*b)),
        Some(other) => Err(format!("{field}: unexpected value {other}")),
    }
}

fn string_field(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

impl TryFrom<Vec<Value>> for IoDescriptor {
    type Error = String;

    fn try_from(fields: Vec<Value>) -> Result<Self, Self::Error> {
        let name = string_field(fields.first());
        if name.is_empty() {
            return Err("I/O entry without name".to_string());
        }
        let bit_length = number_field(fields.get(2), "bitLength")?;
        let byte_offset = number_field(fields.get(3), "byteOffset")?;
        if bit_length < 0 || byte_offset < 0 {
            return Err(format!("I/O '{name}': negative length or offset"));
        }
        let bit_address = match fields.get(7) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            other => {
                let bit = number_field(other, "bitAddress")?;
                if !(0..8).contains(&bit) {
                    return Err(format!("I/O '{name}': bit address {bit} out of range"));
                }
                Some(bit as u8)
            }
        };
        let exported = match fields.get(4) {
            Some(Value::Bool(b)) => *b,
            other => number_field(other, "exported")? != 0,
        };

        Ok(Self {
            default: number_field(fields.get(1), "default")?,
            bit_length: bit_length as u32,
            byte_offset: byte_offset as usize,
            exported,
            sort_pos: number_field(fields.get(5), "sortPos")?.max(0) as u32,
            bmk: string_field(fields.get(6)),
            bit_address,
            name,
        })
    }
}

/// Region maps are keyed by decimal strings; keep them in numeric order.
fn region_entries<'de, D>(deserializer: D) -> Result<Vec<IoDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, Vec<Value>> = Option::deserialize(deserializer)?.unwrap_or_default();
    let mut keyed = Vec::with_capacity(raw.len());
    for (key, fields) in raw {
        let order: u64 = key.trim().parse().unwrap_or(u64::MAX);
        let io = IoDescriptor::try_from(fields).map_err(serde::de::Error::custom)?;
        keyed.push((order, key, io));
    }
    keyed.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
    Ok(keyed.into_iter().map(|(_, _, io)| io).collect())
}

// ─── DeviceDescriptor ───────────────────────────────────────────────

/// One device entry of the configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDescriptor {
    /// Raw type tag (`BASE`, `LEFT_RIGHT`, `VIRTUAL`, `EDGE`, ...).
    #[serde(rename = "type")]
    pub device_type: String,
    /// Device name (may be duplicated across devices).
    pub name: String,
    /// Declared position.
    pub position: DevicePosition,
    /// Declared absolute byte offset.
    #[serde(default)]
    pub offset: usize,
    /// Product type identifier.
    #[serde(default, rename = "productType")]
    pub product_type: Option<Value>,
    /// Input entries.
    #[serde(default, deserialize_with = "region_entries")]
    pub inp: Vec<IoDescriptor>,
    /// Output entries.
    #[serde(default, deserialize_with = "region_entries")]
    pub out: Vec<IoDescriptor>,
    /// Memory (parameter) entries.
    #[serde(default, deserialize_with = "region_entries")]
    pub mem: Vec<IoDescriptor>,
}

/// Half-open hull of the absolute spans of `entries`.
pub fn region_span(entries: &[IoDescriptor]) -> Option<Range<usize>> {
    let start = entries.iter().map(|io| io.byte_offset).min()?;
    let end = entries.iter().map(|io| io.span().end).max()?;
    Some(start..end)
}

impl DeviceDescriptor {
    /// Known device kind, `None` for unknown type tags.
    pub fn kind(&self) -> Option<DeviceKind> {
        DeviceKind::from_tag(&self.device_type)
    }

    /// Device-relative span of a region; empty at offset 0 when the region has no entries.
    ///
    /// # Errors
    /// Fails if an entry lies before the declared device offset.
    pub fn relative_span(&self, entries: &[IoDescriptor]) -> Result<Range<usize>, String> {
        match region_span(entries) {
            None => Ok(0..0),
            Some(span) if span.start < self.offset => Err(format!(
                "device '{}': I/O at byte {} lies before device offset {}",
                self.name, span.start, self.offset
            )),
            Some(span) => Ok(span.start - self.offset..span.end - self.offset),
        }
    }

    /// Device length: end of the furthest region.
    pub fn length(&self) -> Result<usize, String> {
        let mut length = 0;
        for region in [&self.inp, &self.out, &self.mem] {
            length = length.max(self.relative_span(region)?.end);
        }
        Ok(length)
    }
}
