//! Event dispatcher (main loop).
//!
//! Each refresh tick the dispatcher compares every refreshed device's live
//! buffer with the snapshot taken on the previous tick. Changed I/O points
//! with registrations produce firings, either immediately or after a delay
//! counted in refresh cycles.
//!
//! # Module Structure
//!
//! - [`Firing`] - one callback invocation with the detected value
//! - [`DelayTable`] - pending delayed firings keyed by registration, I/O and value
//! - [`EventDispatcher`] - diff pass, delay countdown and firing
//!
//! Callbacks dispatched with `as_thread` run on detached threads; their
//! order relative to each other is unspecified and the dispatcher never
//! waits for them.

use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use crate::cycle::await_fresh_data;
use crate::device::{Device, DeviceData};
use crate::error::Result;
use crate::event::{Edge, EventRegistration, RegistrationId};
use crate::io::{IoId, IoPoint, IoValue};
use crate::refresh::RefreshCoordinator;
use crate::state::{EngineState, LoopGuard};

// ─── Firing ─────────────────────────────────────────────────────────

/// A callback due for invocation.
#[derive(Debug, Clone)]
pub struct Firing {
    registration: Arc<EventRegistration>,
    io: Arc<IoPoint>,
    value: IoValue,
}

impl Firing {
    /// Name of the I/O point that triggered.
    pub fn io_name(&self) -> &str {
        self.io.name()
    }

    /// Value at detection time.
    pub fn value(&self) -> &IoValue {
        &self.value
    }

    /// Registration to invoke.
    pub fn registration(&self) -> RegistrationId {
        self.registration.id()
    }

    fn invoke(&self) {
        (self.registration.callback())(self.io.name(), &self.value);
    }

    /// Run inline or hand off to a detached thread.
    fn dispatch(self) {
        if !self.registration.options().as_thread {
            self.invoke();
            return;
        }
        let io_name = self.io.name().to_string();
        let spawned = thread::Builder::new()
            .name(format!("modio-ev-{io_name}"))
            .spawn(move || self.invoke());
        if let Err(e) = spawned {
            warn!("could not start event thread for '{io_name}': {e}");
        }
    }
}

// ─── DelayTable ─────────────────────────────────────────────────────

/// Identity of a pending delayed firing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DelayKey {
    /// Registration.
    pub registration: RegistrationId,
    /// I/O point.
    pub io: IoId,
    /// Value captured at detection.
    pub value: IoValue,
}

#[derive(Debug)]
struct DelayedEntry {
    key: DelayKey,
    firing: Firing,
    device: Arc<Device>,
    remaining: u32,
}

/// Pending delayed firings.
#[derive(Debug, Default)]
pub struct DelayTable {
    entries: Vec<DelayedEntry>,
}

/// Cycles to wait for `delay_ms`, at least one.
pub fn delay_cycles(delay_ms: u32, cycle_ms: u32) -> u32 {
    delay_ms.div_ceil(cycle_ms.max(1)).max(1)
}

impl DelayTable {
    /// Arm a delayed firing.
    ///
    /// A key already pending is left alone, unless the registration asks
    /// for overwrite, which restarts its countdown.
    pub fn arm(&mut self, firing: Firing, device: &Arc<Device>, cycles: u32) {
        let key = DelayKey {
            registration: firing.registration.id(),
            io: firing.io.id(),
            value: firing.value.clone(),
        };
        match self.entries.iter().position(|entry| entry.key == key) {
            Some(slot) => {
                if firing.registration.options().overwrite {
                    self.entries[slot].remaining = cycles;
                }
            }
            None => self.entries.push(DelayedEntry {
                key,
                firing,
                device: Arc::clone(device),
                remaining: cycles,
            }),
        }
    }

    /// Count down every pending entry, including those armed this cycle;
    /// due entries move to `due`.
    ///
    /// Overwrite entries whose I/O no longer shows the captured value are dropped.
    pub fn advance(&mut self, due: &mut Vec<Firing>) {
        self.entries.retain_mut(|entry| {
            if entry.firing.registration.options().overwrite && entry.device.value(&entry.firing.io) != entry.key.value {
                debug!(
                    "delayed event {} on '{}' cancelled, value changed",
                    entry.key.registration,
                    entry.firing.io.name()
                );
                return false;
            }
            entry.remaining = entry.remaining.saturating_sub(1);
            if entry.remaining == 0 {
                due.push(entry.firing.clone());
                return false;
            }
            true
        });
    }

    /// Remaining cycles of a pending key.
    pub fn remaining(&self, key: &DelayKey) -> Option<u32> {
        self.entries.iter().find(|entry| &entry.key == key).map(|entry| entry.remaining)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── EventDispatcher ────────────────────────────────────────────────

/// Change detection and firing for one main loop run.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    delays: DelayTable,
    queue: Vec<Firing>,
}

impl EventDispatcher {
    /// Empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the current live buffers as comparison baseline.
    pub fn capture_baseline(&self, devices: &[Arc<Device>]) {
        for dev in devices {
            let mut data = dev.lock();
            let data = &mut *data;
            data.snapshot.clone_from(&data.live);
        }
    }

    /// Diff pass over `devices`: queue immediate firings, arm delayed ones and
    /// move each changed device's baseline forward.
    pub fn scan(&mut self, devices: &[Arc<Device>], cycle_ms: u32) {
        for dev in devices {
            let mut guard = dev.lock();
            let data: &mut DeviceData = &mut guard;
            if !data.has_events() || data.live == data.snapshot {
                continue;
            }

            for entry in &data.events {
                let io = &entry.io;
                let range = io.byte_range();
                if data.snapshot[range.clone()] == data.live[range] {
                    continue;
                }

                let detected = match io.bit() {
                    Some(_) => match Edge::between(io.bit_in(&data.snapshot), io.bit_in(&data.live)) {
                        Some(edge) => Some(edge),
                        None => continue,
                    },
                    None => None,
                };
                let value = io.decode(&data.live);

                for registration in entry.registrations.iter().filter(|reg| reg.matches(detected)) {
                    let firing = Firing {
                        registration: Arc::clone(registration),
                        io: Arc::clone(io),
                        value: value.clone(),
                    };
                    match registration.options().delay_ms {
                        0 => self.queue.push(firing),
                        delay => self.delays.arm(firing, dev, delay_cycles(delay, cycle_ms)),
                    }
                }
            }

            data.snapshot.clone_from(&data.live);
        }
    }

    /// Count down delayed firings.
    pub fn advance_delays(&mut self) {
        self.delays.advance(&mut self.queue);
    }

    /// Invoke queued firings, most recently queued first.
    pub fn fire_pending(&mut self) {
        while let Some(firing) = self.queue.pop() {
            firing.dispatch();
        }
    }

    /// One full tick: scan, count down, fire.
    pub fn process_cycle(&mut self, devices: &[Arc<Device>], cycle_ms: u32) {
        self.scan(devices, cycle_ms);
        self.advance_delays();
        self.fire_pending();
    }

    /// Firings waiting for [`fire_pending`](Self::fire_pending).
    pub fn queued(&self) -> &[Firing] {
        &self.queue
    }

    /// Pending delayed firings.
    pub fn delays(&self) -> &DelayTable {
        &self.delays
    }
}

/// Run the dispatcher until an exit is requested.
///
/// In `freeze` mode the refresh lock is held until all callbacks of the
/// cycle returned, so outputs they set go out together on the next tick.
pub(crate) fn run_mainloop(
    state: &EngineState,
    refresh: &RefreshCoordinator,
    _running: LoopGuard,
    freeze: bool,
) -> Result<()> {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.capture_baseline(&refresh.devices());
    info!(
        "Main loop started (cycle_time={}ms, freeze={})",
        refresh.refresh_interval_ms(),
        freeze
    );

    while !state.exit_requested() {
        if !await_fresh_data(state, refresh)? {
            continue;
        }

        let frozen = refresh.lock_refresh();
        dispatcher.scan(&refresh.devices(), refresh.refresh_interval_ms());
        if !freeze {
            drop(frozen);
            dispatcher.advance_delays();
            dispatcher.fire_pending();
        } else {
            dispatcher.advance_delays();
            dispatcher.fire_pending();
            drop(frozen);
        }
    }

    info!("Main loop stopped ({} delayed events dropped)", dispatcher.delays().len());
    Ok(())
}
