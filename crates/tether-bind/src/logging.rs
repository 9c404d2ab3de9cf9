//! Logging setup
//!
//! The bridge emits `tracing` events with an `event` field:
//!
//! - `trace`: every native call crossing
//! - `debug`: binding application, object exposure, release and collection
//! - `warn`: translated native panics
//!
//! Nothing is printed unless the host installs a subscriber. [`init`] installs
//! a console subscriber configured from the environment, at most once per
//! process.

use once_cell::sync::OnceCell;
use std::io;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level for the tether crates
    pub level: Level,
    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,
    /// Show span enter/exit events
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Read `TETHER_LOG_LEVEL`, `TETHER_LOG_JSON` and `TETHER_LOG_SPANS`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("TETHER_LOG_LEVEL") {
            config.level = parse_level(&level);
        }
        config.json_format = std::env::var("TETHER_LOG_JSON").is_ok();
        config.show_spans = std::env::var("TETHER_LOG_SPANS").is_ok();

        config
    }

    /// Verbose config for debugging binding problems
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            json_format: false,
            show_spans: true,
        }
    }

    fn directive(&self) -> String {
        let level = self.level.as_str().to_lowercase();
        format!("tether_bind={level},tether_core={level}")
    }
}

fn parse_level(s: &str) -> Level {
    match s.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with `config`
///
/// Later calls are no-ops. `RUST_LOG` takes precedence over the configured
/// level. If another global subscriber is already installed, it is kept.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directive()));

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let json = config.json_format.then(|| {
            fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_span_events(span_events.clone())
        });
        let text = (!config.json_format).then(|| {
            fmt::layer()
                .with_writer(io::stderr)
                .with_span_events(span_events)
                .with_target(true)
                .with_line_number(cfg!(debug_assertions))
        });

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(json)
            .with(text)
            .try_init();
    });
}

/// Whether [`init`] or [`init_with_config`] has run
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.json_format);

        let debug = LogConfig::debug();
        assert_eq!(debug.level, Level::TRACE);
        assert!(debug.show_spans);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("TRACE"), Level::TRACE);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }

    #[test]
    fn test_directive_covers_both_crates() {
        let directive = LogConfig::debug().directive();
        assert_eq!(directive, "tether_bind=trace,tether_core=trace");
    }

    #[test]
    fn test_init_idempotent() {
        init();
        init();
        assert!(is_initialized());
    }
}
