//! Tracing subscriber setup shared by every program embedding the engine.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::{LogLevel, SharedConfig};

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Install the global fmt subscriber from the `[shared]` settings section.
///
/// `RUST_LOG` directives are honoured and combined with the configured level.
/// Returns `false` if a global subscriber was already installed.
pub fn setup_tracing(shared: &SharedConfig) -> bool {
    let level: Level = shared.log_level.into();
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let result = if shared.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .try_init()
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_maps_to_tracing_level() {
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::default()), Level::INFO);
    }

    #[test]
    fn second_setup_reports_existing_subscriber() {
        let shared = SharedConfig::default();
        let _ = setup_tracing(&shared);
        assert!(!setup_tracing(&shared));
    }
}
