//! Signal-driven shutdown.
//!
//! SIGINT and SIGTERM are caught once: the handler is installed with
//! `SA_RESETHAND`, so the kernel restores the default disposition on the
//! first delivery and a second signal terminates the process. The handler
//! itself only raises a process-wide token; a watcher thread polls the token
//! and runs the shutdown sequence on the manager.

use modio_common::consts::SIGNAL_POLL_INTERVAL_MS;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::io;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ModIoError, Result};
use crate::modio::ModIo;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_terminate(_signal: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Install the one-shot SIGINT/SIGTERM handlers.
pub fn install_handlers() -> Result<()> {
    let action = SigAction::new(SigHandler::Handler(on_terminate), SaFlags::SA_RESETHAND, SigSet::empty());
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to a static atomic, which is async-signal-safe.
        unsafe { sigaction(signal, &action) }.map_err(|e| ModIoError::Signal(format!("{signal}: {e}")))?;
    }
    debug!("Termination signal handlers installed");
    Ok(())
}

/// True once a termination signal arrived and was not yet consumed.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

fn take_shutdown_request() -> bool {
    SHUTDOWN_REQUESTED.swap(false, Ordering::SeqCst)
}

/// Watch the token on behalf of `target` until a signal arrives or the
/// manager is dropped.
pub(crate) fn spawn_watcher(target: Weak<ModIo>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("modio-signal".to_string())
        .spawn(move || {
            let poll = Duration::from_millis(SIGNAL_POLL_INTERVAL_MS);
            loop {
                if take_shutdown_request() {
                    if let Some(modio) = target.upgrade() {
                        info!("Termination signal received");
                        modio.shutdown_on_signal();
                    }
                    return;
                }
                if target.strong_count() == 0 {
                    return;
                }
                thread::sleep(poll);
            }
        })
}
