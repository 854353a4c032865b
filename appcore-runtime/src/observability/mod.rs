//! Observability infrastructure for appcore.
//!
//! Structured logging through `tracing`, with the output format selected
//! at startup.
//!
//! # Configuration
//!
//! Logging format is controlled via `APPCORE_LOG_FORMAT` env var:
//! - `json` - Structured JSON output
//! - `pretty` - Human-readable colored output (default for TTY)
//! - `compact` - Compact single-line format
//!
//! Worker threads are named `module:<name>`, `device:<alias>` and
//! `trigger:<path>`, so thread names identify the emitting worker in every
//! format.

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig, TracingConfigBuilder};
pub use tracing_setup::{init_test_tracing, init_tracing};

/// Span for one iteration of a device session's recovery loop.
#[macro_export]
macro_rules! instrument_recovery {
    ($device:expr, $group:expr) => {
        tracing::info_span!(
            "device_recovery",
            device = %$device,
            group = %$group,
        )
    };
}

/// Span for a trigger fan-out worker.
#[macro_export]
macro_rules! instrument_trigger {
    ($trigger:expr, $device:expr) => {
        tracing::info_span!(
            "trigger_fanout",
            trigger = %$trigger,
            device = %$device,
        )
    };
}

/// Span for a module worker.
#[macro_export]
macro_rules! instrument_module {
    ($module_id:expr, $name:expr) => {
        tracing::info_span!(
            "module_worker",
            module_id = %$module_id,
            module = %$name,
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.application_name(), "appcore");
        assert_eq!(config.log_filter(), "info");
        assert!(config.include_thread_names());
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::builder()
            .application_name("llrf-server")
            .log_format(LogFormat::Json)
            .log_filter("debug")
            .include_thread_ids(true)
            .build();

        assert_eq!(config.application_name(), "llrf-server");
        assert_eq!(config.log_format(), LogFormat::Json);
        assert_eq!(config.log_filter(), "debug");
        assert!(config.include_thread_ids());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("bogus".parse::<LogFormat>().unwrap(), LogFormat::Compact);
    }

    #[test]
    fn test_config_from_env() {
        let config = TracingConfig::from_env();
        assert!(!config.log_filter().is_empty());
    }
}
