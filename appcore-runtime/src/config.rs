//! Runtime configuration.

use appcore_core::error::{AppCoreError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of an application runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Delay between failed attempts to open a device, in milliseconds.
    pub open_retry_interval_ms: u64,
    /// Capacity of each push-type input queue.
    pub queue_length: usize,
    /// How long `step_application()` may wait for the application to settle.
    pub stall_timeout_ms: u64,
    /// Interval at which blocking waits re-check for shutdown.
    pub poll_interval_ms: u64,
    /// How long a module may wait for an initial value before the runtime
    /// checks for circular waits.
    pub initial_value_grace_ms: u64,
    /// Start in testable mode.
    pub testable: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            open_retry_interval_ms: 500,
            queue_length: 3,
            stall_timeout_ms: 30_000,
            poll_interval_ms: 10,
            initial_value_grace_ms: 5_000,
            testable: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| AppCoreError::Config {
            cause: format!("{} has an invalid value '{}'", name, raw),
        }),
        Err(_) => Ok(None),
    }
}

impl RuntimeConfig {
    /// Create configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `APPCORE_OPEN_RETRY_MS`: Delay between device open attempts
    /// - `APPCORE_QUEUE_LENGTH`: Capacity of push-type input queues
    /// - `APPCORE_STALL_TIMEOUT_MS`: Testable mode stall timeout
    /// - `APPCORE_POLL_INTERVAL_MS`: Shutdown re-check interval of blocking waits
    /// - `APPCORE_INITIAL_VALUE_GRACE_MS`: Grace period before circular wait checks
    /// - `APPCORE_TESTABLE`: "true" or "1" to start in testable mode
    ///
    /// Unset variables keep their defaults; unparsable ones are an error.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            open_retry_interval_ms: env_parse("APPCORE_OPEN_RETRY_MS")?
                .unwrap_or(defaults.open_retry_interval_ms),
            queue_length: env_parse("APPCORE_QUEUE_LENGTH")?.unwrap_or(defaults.queue_length),
            stall_timeout_ms: env_parse("APPCORE_STALL_TIMEOUT_MS")?
                .unwrap_or(defaults.stall_timeout_ms),
            poll_interval_ms: env_parse("APPCORE_POLL_INTERVAL_MS")?
                .unwrap_or(defaults.poll_interval_ms),
            initial_value_grace_ms: env_parse("APPCORE_INITIAL_VALUE_GRACE_MS")?
                .unwrap_or(defaults.initial_value_grace_ms),
            testable: std::env::var("APPCORE_TESTABLE")
                .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
                .unwrap_or(defaults.testable),
        };
        config.validate()?;
        Ok(config)
    }

    /// A configuration suited for tests: testable mode and short delays.
    pub fn for_testing() -> Self {
        Self {
            open_retry_interval_ms: 5,
            stall_timeout_ms: 10_000,
            poll_interval_ms: 2,
            initial_value_grace_ms: 200,
            testable: true,
            ..Self::default()
        }
    }

    /// Check the configuration for values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_length == 0 {
            return Err(AppCoreError::Config {
                cause: "queue_length must be at least 1".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(AppCoreError::Config {
                cause: "poll_interval_ms must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Set the device open retry interval.
    pub fn with_open_retry_interval_ms(mut self, ms: u64) -> Self {
        self.open_retry_interval_ms = ms;
        self
    }

    /// Set the push queue capacity.
    pub fn with_queue_length(mut self, len: usize) -> Self {
        self.queue_length = len.max(1); // At least 1
        self
    }

    /// Set the testable mode stall timeout.
    pub fn with_stall_timeout_ms(mut self, ms: u64) -> Self {
        self.stall_timeout_ms = ms;
        self
    }

    /// Set the blocking wait re-check interval.
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms.max(1);
        self
    }

    /// Set the initial value grace period.
    pub fn with_initial_value_grace_ms(mut self, ms: u64) -> Self {
        self.initial_value_grace_ms = ms;
        self
    }

    /// Enable or disable testable mode.
    pub fn with_testable(mut self, testable: bool) -> Self {
        self.testable = testable;
        self
    }

    /// Delay between device open attempts.
    pub fn open_retry_interval(&self) -> Duration {
        Duration::from_millis(self.open_retry_interval_ms)
    }

    /// Testable mode stall timeout.
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    /// Re-check interval of blocking waits.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Grace period before checking for circular initial value waits.
    pub fn initial_value_grace(&self) -> Duration {
        Duration::from_millis(self.initial_value_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.open_retry_interval(), Duration::from_millis(500));
        assert!(!config.testable);
    }

    #[test]
    fn builders_clamp() {
        let config = RuntimeConfig::default()
            .with_queue_length(0)
            .with_poll_interval_ms(0)
            .with_testable(true);
        assert_eq!(config.queue_length, 1);
        assert_eq!(config.poll_interval_ms, 1);
        assert!(config.testable);
    }

    #[test]
    fn invalid_config_rejected() {
        let config = RuntimeConfig {
            queue_length: 0,
            ..RuntimeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "E211");
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"queue_length": 8, "testable": true}"#).unwrap();
        assert_eq!(config.queue_length, 8);
        assert!(config.testable);
        assert_eq!(config.stall_timeout_ms, 30_000);
    }
}
