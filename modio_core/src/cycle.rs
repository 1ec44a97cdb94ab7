//! Cycle loop: hand every fresh process image to a user function.

use modio_common::consts::{DATA_READY_TIMEOUT_DEN, DATA_READY_TIMEOUT_NUM};
use tracing::{debug, info};

use crate::error::{ModIoError, Result};
use crate::refresh::RefreshCoordinator;
use crate::state::{EngineState, LoopGuard};

/// Per-cycle helper passed to the cycle loop function.
///
/// Flags toggle every n cycles; flanks are true for exactly one cycle
/// every n cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleTools {
    /// True during the first call only.
    pub first: bool,
    /// Completed cycles.
    pub cycle: u64,
    /// Toggles every cycle.
    pub flag1c: bool,
    /// Toggles every 5 cycles.
    pub flag5c: bool,
    /// Toggles every 10 cycles.
    pub flag10c: bool,
    /// Toggles every 20 cycles.
    pub flag20c: bool,
    /// Pulse every 5 cycles.
    pub flank5c: bool,
    /// Pulse every 10 cycles.
    pub flank10c: bool,
    /// Pulse every 20 cycles.
    pub flank20c: bool,
}

impl Default for CycleTools {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleTools {
    /// Tools for the first cycle.
    pub fn new() -> Self {
        Self {
            first: true,
            cycle: 0,
            flag1c: false,
            flag5c: false,
            flag10c: false,
            flag20c: false,
            flank5c: false,
            flank10c: false,
            flank20c: false,
        }
    }

    /// Step to the next cycle.
    pub fn advance(&mut self) {
        self.first = false;
        self.cycle += 1;
        self.flag1c = !self.flag1c;

        self.flank5c = self.cycle % 5 == 0;
        self.flank10c = self.cycle % 10 == 0;
        self.flank20c = self.cycle % 20 == 0;
        if self.flank5c {
            self.flag5c = !self.flag5c;
        }
        if self.flank10c {
            self.flag10c = !self.flag10c;
        }
        if self.flank20c {
            self.flag20c = !self.flag20c;
        }
    }
}

/// Wait for the next refresh tick.
///
/// `Ok(true)` with the data-ready flag consumed, `Ok(false)` on timeout or
/// wake-up.
///
/// # Errors
/// [`ModIoError::RefreshDied`] if the refresh thread ended without an exit request.
pub(crate) fn await_fresh_data(state: &EngineState, refresh: &RefreshCoordinator) -> Result<bool> {
    let timeout = refresh.refresh_interval() * DATA_READY_TIMEOUT_NUM / DATA_READY_TIMEOUT_DEN;
    if refresh.data_ready().wait_timeout(timeout) {
        refresh.data_ready().clear();
        return Ok(true);
    }
    if !state.exit_requested() && !refresh.is_alive() {
        let reason = refresh
            .failure()
            .unwrap_or_else(|| "stopped without exit request".to_string());
        return Err(ModIoError::RefreshDied(reason));
    }
    Ok(false)
}

/// Run `func` once per refresh tick until it returns `Some` or an exit is requested.
///
/// The refresh lock is held while `func` runs, so the buffers do not change
/// under it; outputs set by `func` go out with the next tick.
pub(crate) fn run_cycle_loop<T, F>(
    state: &EngineState,
    refresh: &RefreshCoordinator,
    _running: LoopGuard,
    mut func: F,
) -> Result<Option<T>>
where
    F: FnMut(&mut CycleTools) -> Option<T>,
{
    info!("Cycle loop started (cycle_time={}ms)", refresh.refresh_interval_ms());

    let mut tools = CycleTools::new();
    while !state.exit_requested() {
        if !await_fresh_data(state, refresh)? {
            continue;
        }

        let frozen = refresh.lock_refresh();
        let result = func(&mut tools);
        tools.advance();
        drop(frozen);

        if result.is_some() {
            debug!("Cycle function returned a result after {} cycles", tools.cycle);
            info!("Cycle loop finished");
            return Ok(result);
        }
    }

    info!("Cycle loop stopped on exit request after {} cycles", tools.cycle);
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_is_only_true_once() {
        let mut tools = CycleTools::new();
        assert!(tools.first);
        tools.advance();
        assert!(!tools.first);
        assert_eq!(tools.cycle, 1);
    }

    #[test]
    fn flags_and_flanks_follow_cycle_count() {
        let mut tools = CycleTools::new();
        let mut flank5 = 0;
        let mut flag10_changes = 0;
        let mut last_flag10 = tools.flag10c;
        for _ in 0..40 {
            tools.advance();
            if tools.flank5c {
                flank5 += 1;
            }
            if tools.flag10c != last_flag10 {
                flag10_changes += 1;
                last_flag10 = tools.flag10c;
            }
        }
        assert_eq!(flank5, 8);
        assert_eq!(flag10_changes, 4);
        assert!(!tools.flag1c);
        assert!(tools.flank20c);
        assert!(!tools.flag20c);
    }
}
