//! Flags and counters shared by the manager and its loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::channel::IoErrorCounter;
use crate::error::{ModIoError, Result};
use crate::ready::ReadySignal;
use crate::refresh::RefreshCoordinator;

/// Engine state owned by the manager and lent to the cyclic loops.
#[derive(Debug, Default)]
pub struct EngineState {
    exit: AtomicBool,
    exit_wake: ReadySignal,
    loop_running: Arc<AtomicBool>,
    io_errors: IoErrorCounter,
}

impl EngineState {
    /// New state with a foreground error threshold.
    pub fn new(max_io_errors: u32) -> Self {
        Self {
            io_errors: IoErrorCounter::new(max_io_errors),
            ..Self::default()
        }
    }

    /// Ask the active loop to stop and release external waiters.
    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
        self.exit_wake.set();
    }

    /// Forget a previous loop exit request. External waiters stay released.
    pub fn clear_exit(&self) {
        self.exit.store(false, Ordering::SeqCst);
    }

    /// True once an exit was requested.
    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    /// Block until an exit was requested or `timeout` elapsed.
    pub fn wait_exit(&self, timeout: Duration) -> bool {
        self.exit_wake.wait_timeout(timeout)
    }

    /// True while a cycle loop or main loop runs.
    pub fn loop_running(&self) -> bool {
        self.loop_running.load(Ordering::SeqCst)
    }

    /// Mark a loop as running until the guard is dropped.
    ///
    /// # Errors
    /// [`ModIoError::LoopAlreadyRunning`] if another loop holds the guard.
    pub fn enter_loop(&self) -> Result<LoopGuard> {
        self.loop_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ModIoError::LoopAlreadyRunning)?;
        Ok(LoopGuard(Arc::clone(&self.loop_running)))
    }

    /// Claim the loop slot for a cycle loop or main loop.
    ///
    /// Fails unless no loop runs and at least one device is under cyclic
    /// refresh. A pending exit request is kept; the main loop drops it with
    /// [`clear_exit`](Self::clear_exit), a cycle loop returns on it.
    pub fn begin_loop(&self, refresh: &RefreshCoordinator) -> Result<LoopGuard> {
        let guard = self.enter_loop()?;
        if !refresh.has_devices() {
            return Err(ModIoError::NoAutoRefresh);
        }
        Ok(guard)
    }

    /// Foreground I/O error counter.
    pub fn io_errors(&self) -> &IoErrorCounter {
        &self.io_errors
    }
}

/// Clears the loop-running flag when dropped.
#[derive(Debug)]
pub struct LoopGuard(Arc<AtomicBool>);

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
