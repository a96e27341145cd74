//! Logging setup on top of the `tracing` ecosystem.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the embedding application (or to tests) through [`init_logging`].
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard filter directive (e.g. `"info,specfit=debug"`)
//! - `SPECFIT_LOG`: simple level used when `RUST_LOG` is unset

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

const LOG_LEVEL_ENV: &str = "SPECFIT_LOG";
const DEFAULT_LOG_LEVEL: &str = "warn";

/// Log verbosity accepted by `SPECFIT_LOG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Install a human-readable fmt subscriber once per process.
///
/// Idempotent; if another global subscriber is already installed this is a
/// no-op.
pub fn init_logging() {
    TRACING_INITIALIZED.get_or_init(|| {
        let filter = build_env_filter();
        let layer = fmt::layer().with_target(true);
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init();
    });
}

fn build_env_filter() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|s| LogLevel::parse(&s))
        .map(LogLevel::as_filter_str)
        .unwrap_or(DEFAULT_LOG_LEVEL);
    EnvFilter::new(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse(" warning "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("verbose"), None);
    }

    #[test]
    fn init_is_idempotent() {
        init_logging();
        init_logging();
        tracing::info!("logging initialised twice without panicking");
    }
}
