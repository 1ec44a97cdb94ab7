//! Data-ready signalling between the refresh thread and the foreground loops.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct ReadyState {
    set: bool,
    wakeups: u64,
}

/// Resettable event flag.
///
/// `wait_timeout` returns once the flag is set, the timeout elapses, or
/// [`wake`](Self::wake) is called; only the first case reports `true`.
#[derive(Debug, Default)]
pub struct ReadySignal {
    state: Mutex<ReadyState>,
    cond: Condvar,
}

impl ReadySignal {
    /// New cleared signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and release all waiters.
    pub fn set(&self) {
        self.state.lock().set = true;
        self.cond.notify_all();
    }

    /// Clear the flag.
    pub fn clear(&self) {
        self.state.lock().set = false;
    }

    /// Current flag state.
    pub fn is_set(&self) -> bool {
        self.state.lock().set
    }

    /// Release all waiters without setting the flag.
    pub fn wake(&self) {
        self.state.lock().wakeups += 1;
        self.cond.notify_all();
    }

    /// Block until set, woken or timed out.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let wakeups = state.wakeups;
        while !state.set && state.wakeups == wakeups {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn set_releases_waiter() {
        let signal = Arc::new(ReadySignal::new());
        let setter = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set();
        });
        assert!(signal.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
        signal.clear();
        assert!(!signal.is_set());
    }

    #[test]
    fn timeout_reports_false() {
        let signal = ReadySignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wake_releases_without_setting() {
        let signal = Arc::new(ReadySignal::new());
        let waker = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.wake();
        });
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
