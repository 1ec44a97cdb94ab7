//! Cyclic process image refresh.
//!
//! A dedicated thread reads the whole process image once per interval,
//! copies inputs (and memory) into every registered device, writes the
//! devices' outputs back and raises the data-ready signal. Foreground loops
//! hold the refresh lock to freeze buffer updates; the thread's own image
//! transfers happen outside that lock.
//!
//! # Tick
//!
//! ```text
//!   read_all ──► lock refresh ──► per device: copy in, snapshot outputs
//!                     │
//!                     ▼
//!               unlock ──► write outputs ──► data_ready.set() ──► sleep
//! ```

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::channel::{IoErrorCounter, ProcessImageChannel};
use crate::device::Device;
use crate::error::{ModIoError, Result};
use crate::ready::ReadySignal;

/// Timing statistics of the refresh thread.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    /// Number of ticks executed.
    pub cycle_count: u64,
    /// Ticks that took longer than the interval.
    pub timing_violations: u64,
    /// Longest observed tick.
    pub max_cycle_time_us: u64,
    /// Sum of tick times for the average.
    pub total_cycle_time_us: u64,
}

impl RefreshStats {
    fn record(&mut self, tick_us: u64, interval: Duration) {
        self.cycle_count += 1;
        self.total_cycle_time_us += tick_us;
        self.max_cycle_time_us = self.max_cycle_time_us.max(tick_us);

        if tick_us > interval.as_micros() as u64 {
            self.timing_violations += 1;
            if self.timing_violations <= 10 || self.timing_violations % 1000 == 0 {
                warn!(
                    "Refresh overrun #{}: tick took {}us (interval {}ms)",
                    self.timing_violations,
                    tick_us,
                    interval.as_millis()
                );
            }
        }

        if self.cycle_count % 1000 == 0 {
            debug!(
                "Refresh: {} ticks, avg={}us, max={}us, overruns={}",
                self.cycle_count,
                self.total_cycle_time_us / self.cycle_count,
                self.max_cycle_time_us,
                self.timing_violations
            );
        }
    }
}

struct Shared {
    channel: Arc<Mutex<ProcessImageChannel>>,
    devices: Mutex<Vec<Arc<Device>>>,
    refresh_lock: Mutex<()>,
    data_ready: ReadySignal,
    stop_request: ReadySignal,
    stopped: ReadySignal,
    stop: AtomicBool,
    alive: AtomicBool,
    interval_ms: AtomicU32,
    errors: IoErrorCounter,
    monitoring: bool,
    failure: Mutex<Option<String>>,
    stats: Mutex<RefreshStats>,
}

impl Shared {
    /// One refresh pass. `Ok(true)` when fresh inputs were loaded.
    fn tick(&self) -> Result<bool> {
        let devices = self.devices.lock().clone();
        if devices.is_empty() {
            return Ok(false);
        }

        let read = self.channel.lock().read_all();
        let image = match read {
            Ok(image) => image,
            Err(e) => {
                self.errors.record("autorefresh read", &e)?;
                return Ok(false);
            }
        };

        let mut pending = Vec::with_capacity(devices.len());
        {
            let _refresh = self.refresh_lock.lock();
            for dev in &devices {
                let mut data = dev.lock();
                dev.copy_from_image(&mut data.live, &image, &dev.read_regions(self.monitoring));
                let out = dev.out();
                if !self.monitoring && !out.is_empty() {
                    pending.push((dev.absolute(&out).start, data.live[out].to_vec()));
                }
            }
        }

        if !pending.is_empty() {
            let mut channel = self.channel.lock();
            let written = pending
                .iter()
                .try_for_each(|(start, bytes)| channel.write_region(*start, bytes))
                .and_then(|()| channel.flush());
            drop(channel);
            if let Err(e) = written {
                self.errors.record("autorefresh write", &e)?;
            }
        }
        Ok(true)
    }

    fn run(self: Arc<Self>) {
        let rt = detect_rt_mode();
        info!(
            "Cyclic refresh started (interval={}ms, {} mode)",
            self.interval_ms.load(Ordering::SeqCst),
            if rt { "real-time" } else { "standard" }
        );
        let finished = Finished(&self);

        while !self.stop.load(Ordering::SeqCst) {
            let tick_start = Instant::now();
            let interval = Duration::from_millis(u64::from(self.interval_ms.load(Ordering::SeqCst)));

            match self.tick() {
                Ok(true) => self.data_ready.set(),
                Ok(false) => {}
                Err(e) => {
                    error!("Cyclic refresh terminated: {e}");
                    *self.failure.lock() = Some(e.to_string());
                    break;
                }
            }

            let elapsed = tick_start.elapsed();
            self.stats.lock().record(elapsed.as_micros() as u64, interval);
            if elapsed < interval && self.stop_request.wait_timeout(interval - elapsed) {
                break;
            }
        }

        drop(finished);

        let stats = *self.stats.lock();
        info!(
            "Cyclic refresh stopped after {} ticks (overruns: {})",
            stats.cycle_count, stats.timing_violations
        );
    }
}

/// Marks the thread as ended when dropped, also on panic.
struct Finished<'a>(&'a Shared);

impl Drop for Finished<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            *self.0.failure.lock() = Some("refresh thread panicked".to_string());
        }
        self.0.alive.store(false, Ordering::SeqCst);
        self.0.stopped.set();
        // let foreground waiters notice the end right away
        self.0.data_ready.wake();
    }
}

/// Background refresh thread and its shared state.
pub struct RefreshCoordinator {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshCoordinator {
    /// New coordinator; the thread starts with [`start`](Self::start).
    pub fn new(channel: Arc<Mutex<ProcessImageChannel>>, interval_ms: u32, max_errors: u32, monitoring: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                channel,
                devices: Mutex::new(Vec::new()),
                refresh_lock: Mutex::new(()),
                data_ready: ReadySignal::new(),
                stop_request: ReadySignal::new(),
                stopped: ReadySignal::new(),
                stop: AtomicBool::new(false),
                alive: AtomicBool::new(false),
                interval_ms: AtomicU32::new(interval_ms),
                errors: IoErrorCounter::new(max_errors),
                monitoring,
                failure: Mutex::new(None),
                stats: Mutex::new(RefreshStats::default()),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the refresh thread unless it is already running.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if self.is_alive() {
            return Ok(());
        }
        if let Some(old) = handle.take() {
            reap(old);
        }

        let shared = &self.shared;
        shared.stop.store(false, Ordering::SeqCst);
        shared.stop_request.clear();
        shared.stopped.clear();
        shared.data_ready.clear();
        *shared.failure.lock() = None;
        shared.alive.store(true, Ordering::SeqCst);

        let worker = Arc::clone(shared);
        match thread::Builder::new()
            .name("modio-refresh".to_string())
            .spawn(move || worker.run())
        {
            Ok(spawned) => {
                *handle = Some(spawned);
                Ok(())
            }
            Err(e) => {
                shared.alive.store(false, Ordering::SeqCst);
                Err(ModIoError::Io(e))
            }
        }
    }

    /// Ask the thread to stop after the current tick.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.stop_request.set();
    }

    /// Wait up to `timeout` for the thread to end; true if it ended.
    pub fn join(&self, timeout: Duration) -> bool {
        let mut handle = self.handle.lock();
        if handle.is_none() {
            return true;
        }
        if !self.shared.stopped.wait_timeout(timeout) {
            warn!("Cyclic refresh did not stop within {}ms", timeout.as_millis());
            return false;
        }
        if let Some(finished) = handle.take() {
            reap(finished);
        }
        true
    }

    /// True while the thread runs.
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Why the thread ended on its own, if it did.
    pub fn failure(&self) -> Option<String> {
        self.shared.failure.lock().clone()
    }

    /// Refresh interval.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.refresh_interval_ms()))
    }

    /// Refresh interval in milliseconds.
    pub fn refresh_interval_ms(&self) -> u32 {
        self.shared.interval_ms.load(Ordering::SeqCst)
    }

    /// Change the refresh interval; takes effect on the next tick.
    pub fn set_refresh_interval_ms(&self, milliseconds: u32) {
        self.shared.interval_ms.store(milliseconds, Ordering::SeqCst);
    }

    /// Raised after every successful tick.
    pub fn data_ready(&self) -> &ReadySignal {
        &self.shared.data_ready
    }

    /// Freeze buffer updates while the guard lives.
    pub fn lock_refresh(&self) -> MutexGuard<'_, ()> {
        self.shared.refresh_lock.lock()
    }

    /// Error counter of the refresh thread.
    pub fn errors(&self) -> &IoErrorCounter {
        &self.shared.errors
    }

    /// Timing statistics.
    pub fn stats(&self) -> RefreshStats {
        *self.shared.stats.lock()
    }

    /// Put `device` under cyclic refresh.
    pub fn add_device(&self, device: Arc<Device>) {
        let mut devices = self.shared.devices.lock();
        if !devices.iter().any(|d| Arc::ptr_eq(d, &device)) {
            devices.push(device);
        }
    }

    /// Remove the device with manager index `index`.
    pub fn remove_device(&self, index: usize) -> Option<Arc<Device>> {
        let mut devices = self.shared.devices.lock();
        let slot = devices.iter().position(|d| d.index() == index)?;
        Some(devices.remove(slot))
    }

    /// Remove and return every refreshed device.
    pub fn take_devices(&self) -> Vec<Arc<Device>> {
        std::mem::take(&mut *self.shared.devices.lock())
    }

    /// Devices under cyclic refresh.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.shared.devices.lock().clone()
    }

    /// True if at least one device is refreshed.
    pub fn has_devices(&self) -> bool {
        !self.shared.devices.lock().is_empty()
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        self.stop();
        let interval = self.refresh_interval();
        self.join(interval);
    }
}

/// Join a finished refresh thread, logging a panic instead of dropping it.
fn reap(handle: JoinHandle<()>) {
    if let Err(panic) = handle.join() {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown cause".to_string());
        warn!("Cyclic refresh thread panicked: {reason}");
    }
}

/// Detect if running in real-time mode by checking scheduler policy.
fn detect_rt_mode() -> bool {
    #[cfg(target_os = "linux")]
    {
        use libc::{SCHED_FIFO, SCHED_RR, sched_getscheduler};
        // SAFETY: sched_getscheduler(0) only queries the calling thread's policy.
        let policy = unsafe { sched_getscheduler(0) };
        policy == SCHED_FIFO || policy == SCHED_RR
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::test_device;
    use std::io::Cursor;

    fn coordinator(image: Vec<u8>, monitoring: bool) -> RefreshCoordinator {
        let len = image.len();
        let channel = ProcessImageChannel::from_handle(Box::new(Cursor::new(image)), len, false);
        RefreshCoordinator::new(Arc::new(Mutex::new(channel)), 10, 0, monitoring)
    }

    #[test]
    fn tick_copies_inputs_and_writes_outputs() {
        let refresh = coordinator(vec![0b01, 0x10, 0x00, 0x00], false);
        let dev = Arc::new(test_device(0));
        dev.lock().live[3] = 1;
        refresh.add_device(Arc::clone(&dev));

        assert!(refresh.shared.tick().unwrap());
        assert_eq!(dev.live_bytes(), [0b01, 0x10, 0x00, 1]);
        assert_eq!(refresh.shared.channel.lock().read_all().unwrap(), [0b01, 0x10, 0x00, 1]);
    }

    #[test]
    fn monitoring_reads_whole_device_and_never_writes() {
        let refresh = coordinator(vec![0, 0, 0, 1], true);
        let dev = Arc::new(test_device(0));
        refresh.add_device(Arc::clone(&dev));
        assert!(refresh.shared.tick().unwrap());
        assert_eq!(dev.live_bytes(), [0, 0, 0, 1]);
    }

    #[test]
    fn empty_refresh_list_is_idle() {
        let refresh = coordinator(vec![0; 4], false);
        assert!(!refresh.shared.tick().unwrap());
    }

    #[test]
    fn thread_signals_data_and_stops() {
        let refresh = coordinator(vec![0; 4], false);
        refresh.add_device(Arc::new(test_device(0)));
        refresh.start().unwrap();
        assert!(refresh.is_alive());
        assert!(refresh.data_ready().wait_timeout(Duration::from_secs(2)));

        refresh.stop();
        assert!(refresh.join(Duration::from_secs(2)));
        assert!(!refresh.is_alive());
        assert!(refresh.stats().cycle_count >= 1);
        assert_eq!(refresh.failure(), None);
    }

    struct PanickingImage;

    impl std::io::Read for PanickingImage {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            panic!("image driver fault");
        }
    }

    impl std::io::Write for PanickingImage {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl std::io::Seek for PanickingImage {
        fn seek(&mut self, _: std::io::SeekFrom) -> std::io::Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn panicking_thread_is_reaped() {
        let channel = ProcessImageChannel::from_handle(Box::new(PanickingImage), 4, false);
        let refresh = RefreshCoordinator::new(Arc::new(Mutex::new(channel)), 10, 0, false);
        refresh.add_device(Arc::new(test_device(0)));
        refresh.start().unwrap();

        assert!(refresh.join(Duration::from_secs(2)));
        assert!(!refresh.is_alive());
        assert_eq!(refresh.failure().as_deref(), Some("refresh thread panicked"));

        // a later start joins nothing stale and runs again
        refresh.start().unwrap();
        assert!(refresh.join(Duration::from_secs(2)));
    }

    #[test]
    fn device_list_management() {
        let refresh = coordinator(vec![0; 4], false);
        let dev = Arc::new(test_device(0));
        refresh.add_device(Arc::clone(&dev));
        refresh.add_device(Arc::clone(&dev));
        assert_eq!(refresh.devices().len(), 1);
        assert!(refresh.remove_device(0).is_some());
        assert!(!refresh.has_devices());
    }
}
