//! Devices and their buffers.
//!
//! Each device owns a live buffer (the current process image bytes of the
//! device) and a snapshot used by the event dispatcher for change detection.
//! Both buffers and the event registrations sit behind one mutex per device.

use modio_common::pictory::DeviceKind;
use parking_lot::{Mutex, MutexGuard};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::address_map::DevicePlacement;
use crate::event::{EventRegistration, RegistrationId};
use crate::io::{IoId, IoPoint, IoValue};

/// Registrations of one I/O point.
pub(crate) struct IoEvents {
    pub io: Arc<IoPoint>,
    pub registrations: Vec<Arc<EventRegistration>>,
}

/// Mutable state guarded by the device mutex.
pub(crate) struct DeviceData {
    pub live: Vec<u8>,
    pub snapshot: Vec<u8>,
    pub events: Vec<IoEvents>,
}

impl DeviceData {
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }
}

/// One device of the process image.
pub struct Device {
    index: usize,
    position: i64,
    name: String,
    kind: DeviceKind,
    offset: usize,
    length: usize,
    inp: Range<usize>,
    out: Range<usize>,
    mem: Range<usize>,
    ios: Vec<Arc<IoPoint>>,
    self_updating: AtomicBool,
    data: Mutex<DeviceData>,
}

impl Device {
    /// Create a device from its placement.
    ///
    /// With `simulator` set the input and output regions trade places, so
    /// the program writes what the hardware side would read.
    pub(crate) fn new(index: usize, placement: &DevicePlacement, mut ios: Vec<IoPoint>, simulator: bool) -> Self {
        let (inp, out) = if simulator {
            for io in &mut ios {
                io.swap_role();
            }
            (placement.out.clone(), placement.inp.clone())
        } else {
            (placement.inp.clone(), placement.out.clone())
        };

        let live = vec![0u8; placement.length];

        Self {
            index,
            position: placement.position,
            name: placement.name.clone(),
            kind: placement.kind,
            offset: placement.offset,
            length: placement.length,
            inp,
            out,
            mem: placement.mem.clone(),
            ios: ios.into_iter().map(Arc::new).collect(),
            self_updating: AtomicBool::new(false),
            data: Mutex::new(DeviceData {
                snapshot: live.clone(),
                live,
                events: Vec::new(),
            }),
        }
    }

    /// Index in the manager's device list.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Resolved position.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device kind.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Effective absolute offset in the process image.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Device-relative input region (program side).
    pub fn inp(&self) -> Range<usize> {
        self.inp.clone()
    }

    /// Device-relative output region (program side).
    pub fn out(&self) -> Range<usize> {
        self.out.clone()
    }

    /// Device-relative memory region.
    pub fn mem(&self) -> Range<usize> {
        self.mem.clone()
    }

    /// Absolute image range of a device-relative range.
    pub fn absolute(&self, range: &Range<usize>) -> Range<usize> {
        self.offset + range.start..self.offset + range.end
    }

    /// I/O points of this device in configuration order.
    pub fn ios(&self) -> &[Arc<IoPoint>] {
        &self.ios
    }

    /// True while the refresh coordinator owns this device.
    pub fn is_self_updating(&self) -> bool {
        self.self_updating.load(Ordering::SeqCst)
    }

    pub(crate) fn set_self_updating(&self, active: bool) {
        self.self_updating.store(active, Ordering::SeqCst);
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DeviceData> {
        self.data.lock()
    }

    /// Copy of the live buffer.
    pub fn live_bytes(&self) -> Vec<u8> {
        self.data.lock().live.clone()
    }

    /// Regions copied from the image on a read pass.
    pub(crate) fn read_regions(&self, monitoring: bool) -> Vec<Range<usize>> {
        if monitoring {
            vec![0..self.length]
        } else {
            vec![self.inp.clone(), self.mem.clone()]
        }
    }

    /// Copy `regions` of this device from a whole image into `live`.
    pub(crate) fn copy_from_image(&self, live: &mut [u8], image: &[u8], regions: &[Range<usize>]) {
        for region in regions.iter().filter(|r| !r.is_empty()) {
            if let Some(src) = image.get(self.absolute(region)) {
                live[region.clone()].copy_from_slice(src);
            }
        }
    }

    /// Current value of `io` from the live buffer.
    pub fn value(&self, io: &IoPoint) -> IoValue {
        io.decode(&self.data.lock().live)
    }

    /// Store `value` for `io` in the live buffer.
    pub(crate) fn set_value(&self, io: &IoPoint, value: &IoValue) -> Result<(), String> {
        io.encode(&mut self.data.lock().live, value)
    }

    /// Append a registration for `io`.
    pub(crate) fn register(&self, io: &Arc<IoPoint>, registration: Arc<EventRegistration>) {
        let mut data = self.data.lock();
        match data.events.iter().position(|entry| entry.io.id() == io.id()) {
            Some(slot) => data.events[slot].registrations.push(registration),
            None => data.events.push(IoEvents {
                io: Arc::clone(io),
                registrations: vec![registration],
            }),
        }
    }

    /// Remove one (`Some(id)`) or all registrations of `io`; returns how many were removed.
    pub(crate) fn unregister(&self, io: IoId, id: Option<RegistrationId>) -> usize {
        let mut data = self.data.lock();
        let mut removed = 0;
        for entry in data.events.iter_mut().filter(|entry| entry.io.id() == io) {
            let before = entry.registrations.len();
            entry.registrations.retain(|reg| id.is_some_and(|id| reg.id() != id));
            removed += before - entry.registrations.len();
        }
        data.events.retain(|entry| !entry.registrations.is_empty());
        removed
    }

    /// Number of registrations on `io`.
    pub fn registration_count(&self, io: IoId) -> usize {
        self.data
            .lock()
            .events
            .iter()
            .filter(|entry| entry.io.id() == io)
            .map(|entry| entry.registrations.len())
            .sum()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("position", &self.position)
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("self_updating", &self.is_self_updating())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event::EventOptions;
    use crate::io::IoKind;

    /// Device with two bit inputs in byte 0, a word input in bytes 1..3 and
    /// a bit output in byte 3.
    pub(crate) fn test_device(offset: usize) -> Device {
        let placement = DevicePlacement {
            descriptor: 0,
            kind: DeviceKind::Extension,
            position: 32,
            name: "dio01".into(),
            declared_offset: offset,
            offset,
            length: 4,
            inp: 0..3,
            out: 3..4,
            mem: 0..0,
        };
        let ios = vec![
            IoPoint::new(IoId(0), "I_1", 0, IoKind::Input, 0..1, Some(0)),
            IoPoint::new(IoId(1), "I_2", 0, IoKind::Input, 0..1, Some(1)),
            IoPoint::new(IoId(2), "AnalogIn", 0, IoKind::Input, 1..3, None),
            IoPoint::new(IoId(3), "O_1", 0, IoKind::Output, 3..4, Some(0)).with_default(IoValue::Bool(true)),
        ];
        Device::new(0, &placement, ios, false)
    }

    #[test]
    fn values_go_through_live_buffer() {
        let dev = test_device(0);
        assert_eq!(dev.live_bytes(), [0, 0, 0, 0]);
        let out = Arc::clone(&dev.ios()[3]);
        dev.set_value(&out, out.default_value()).unwrap();
        assert_eq!(dev.live_bytes(), [0, 0, 0, 1]);
        assert_eq!(dev.value(&out), IoValue::Bool(true));
    }

    #[test]
    fn image_copy_uses_absolute_offsets() {
        let dev = test_device(2);
        let image = [9, 9, 0b11, 0x34, 0x12, 0xFF];
        let mut data = dev.lock();
        let regions = dev.read_regions(false);
        let DeviceData { live, .. } = &mut *data;
        dev.copy_from_image(live, &image, &regions);
        assert_eq!(live.as_slice(), [0b11, 0x34, 0x12, 0]);
    }

    #[test]
    fn simulator_swaps_regions_and_roles() {
        let placement = DevicePlacement {
            descriptor: 0,
            kind: DeviceKind::Virtual,
            position: -1,
            name: "virt".into(),
            declared_offset: 0,
            offset: 0,
            length: 2,
            inp: 0..1,
            out: 1..2,
            mem: 0..0,
        };
        let ios = vec![IoPoint::new(IoId(0), "V_In", 0, IoKind::Input, 0..1, None)];
        let dev = Device::new(0, &placement, ios, true);
        assert_eq!(dev.inp(), 1..2);
        assert_eq!(dev.out(), 0..1);
        assert!(dev.ios()[0].writable());
    }

    #[test]
    fn register_and_unregister() {
        let dev = test_device(0);
        let io = Arc::clone(&dev.ios()[0]);
        let cb: crate::event::EventCallback = Arc::new(|_: &str, _: &IoValue| {});
        let first = Arc::new(EventRegistration::new(Arc::clone(&cb), EventOptions::default()));
        let second = Arc::new(EventRegistration::new(cb, EventOptions::default()));
        let first_id = first.id();
        dev.register(&io, first);
        dev.register(&io, second);
        assert_eq!(dev.registration_count(io.id()), 2);

        assert_eq!(dev.unregister(io.id(), Some(first_id)), 1);
        assert_eq!(dev.registration_count(io.id()), 1);
        assert_eq!(dev.unregister(io.id(), None), 1);
        assert!(!dev.lock().has_events());
    }
}
