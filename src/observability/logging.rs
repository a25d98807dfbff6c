//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Map the command-line debug level onto a log filter
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` wins over configured level when set

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::ObservabilityConfig;

/// Log level implied by a `-d` debug level; `None` keeps the configured one.
pub fn level_for_debug(debug: u8) -> Option<&'static str> {
    match debug {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    }
}

/// Filter directive for this crate at `level`.
pub fn filter_directive(level: &str) -> String {
    format!("web_cache={},warn", level)
}

/// Install the global subscriber. Safe to call more than once; later calls are ignored.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter_directive(&config.log_level).into());

    let result = if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_levels() {
        assert_eq!(level_for_debug(0), None);
        assert_eq!(level_for_debug(1), Some("debug"));
        assert_eq!(level_for_debug(4), Some("trace"));
        assert_eq!(filter_directive("info"), "web_cache=info,warn");
    }
}
