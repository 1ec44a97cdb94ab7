//! Placement of devices inside the global process image.
//!
//! Devices are placed in position order. A device whose declared offset lies
//! below the bytes already placed is moved up to the running total, so
//! device ranges never overlap. The legacy adapter position label is mapped
//! to a negative position that does not collide with real ones.
//!
//! Name lookup is disabled for names shared by several devices; positional
//! lookup always works.

use modio_common::consts::ADAPTER_POSITION_LABEL;
use modio_common::config::ConfigError;
use modio_common::pictory::{DeviceDescriptor, DeviceKind, IoDescriptor};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;
use tracing::{debug, warn};

/// Where one device lives in the process image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePlacement {
    /// Index into the descriptor slice the map was built from.
    pub descriptor: usize,
    /// Device kind.
    pub kind: DeviceKind,
    /// Resolved position (negative for adapter placeholders).
    pub position: i64,
    /// Declared name.
    pub name: String,
    /// Offset declared in the configuration.
    pub declared_offset: usize,
    /// Effective absolute offset.
    pub offset: usize,
    /// Device length in bytes.
    pub length: usize,
    /// Device-relative input region.
    pub inp: Range<usize>,
    /// Device-relative output region.
    pub out: Range<usize>,
    /// Device-relative memory region.
    pub mem: Range<usize>,
}

impl DevicePlacement {
    /// Absolute byte range in the image.
    pub fn span(&self) -> Range<usize> {
        self.offset..self.offset + self.length
    }
}

/// Device placements with lookup tables.
#[derive(Debug, Clone, Default)]
pub struct DeviceAddressMap {
    placements: Vec<DevicePlacement>,
    by_position: BTreeMap<i64, usize>,
    by_name: HashMap<String, usize>,
    ambiguous: BTreeSet<String>,
    length: usize,
}

impl DeviceAddressMap {
    /// Place `descriptors` in the process image.
    ///
    /// Unknown device types are skipped with a warning.
    ///
    /// # Errors
    /// Fails on unparsable position labels, duplicate positions, or I/O
    /// entries located before their device's declared offset.
    pub fn build(descriptors: &[DeviceDescriptor]) -> Result<Self, ConfigError> {
        let mut order: Vec<usize> = (0..descriptors.len()).collect();
        order.sort_by_key(|&idx| descriptors[idx].position.sort_key());

        let mut map = Self::default();
        let mut adapter_position = -1i64;

        for idx in order {
            let desc = &descriptors[idx];
            let position = match desc.position.as_index() {
                Some(pos) => pos,
                None if desc.position.to_string() == ADAPTER_POSITION_LABEL => {
                    while map.by_position.contains_key(&adapter_position) {
                        adapter_position -= 1;
                    }
                    adapter_position
                }
                None => {
                    return Err(ConfigError::ValidationError(format!(
                        "device '{}': invalid position '{}'",
                        desc.name, desc.position
                    )));
                }
            };

            let Some(kind) = desc.kind() else {
                warn!(
                    "device type '{}' of device '{}' at position {} is unknown and will be ignored",
                    desc.device_type, desc.name, position
                );
                continue;
            };

            if map.by_position.contains_key(&position) {
                return Err(ConfigError::ValidationError(format!(
                    "device '{}': position {position} is used twice",
                    desc.name
                )));
            }

            let region = |entries: &[IoDescriptor]| desc.relative_span(entries).map_err(ConfigError::ValidationError);
            let (inp, out, mem) = (region(&desc.inp)?, region(&desc.out)?, region(&desc.mem)?);
            let length = inp.end.max(out.end).max(mem.end);

            let offset = desc.offset.max(map.length);
            if offset != desc.offset {
                debug!(
                    "device '{}' declared offset {} overlaps placed devices, using {}",
                    desc.name, desc.offset, offset
                );
            }

            let slot = map.placements.len();
            map.by_position.insert(position, slot);
            if map.by_name.insert(desc.name.clone(), slot).is_some() {
                map.ambiguous.insert(desc.name.clone());
            }
            map.length = offset + length;
            map.placements.push(DevicePlacement {
                descriptor: idx,
                kind,
                position,
                name: desc.name.clone(),
                declared_offset: desc.offset,
                offset,
                length,
                inp,
                out,
                mem,
            });
        }

        for name in &map.ambiguous {
            map.by_name.remove(name);
            warn!(
                "equal device name '{name}' in device configuration; access by name is not possible for these devices"
            );
        }

        Ok(map)
    }

    /// Placements in image order.
    pub fn placements(&self) -> &[DevicePlacement] {
        &self.placements
    }

    /// Total image length.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Slot of the device at `position`.
    pub fn slot_by_position(&self, position: i64) -> Option<usize> {
        self.by_position.get(&position).copied()
    }

    /// Slot of the device named `name`, unless the name is ambiguous.
    pub fn slot_by_name(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Names shared by several devices.
    pub fn ambiguous_names(&self) -> impl Iterator<Item = &str> {
        self.ambiguous.iter().map(String::as_str)
    }
}
