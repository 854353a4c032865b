//! Error types for appcore.
//!
//! Errors fall into three families:
//!
//! - **Transient faults** (E100-E199) raised by device sessions. They are
//!   always recoverable and never reach application module code; the
//!   recovery coordinator consumes them.
//! - **Configuration / programming errors** (E200-E299 and E300-E399 for
//!   testable mode misuse). Fatal at setup, never retried.
//! - **Shutdown** (E900). Not a user-visible failure, only used to unwind
//!   blocked workers.

use crate::types::{DeviceId, ModuleId};
use crate::value::DataType;
use thiserror::Error;

/// The main error type for appcore operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppCoreError {
    // =========================================================================
    // Transient device faults (E100-E199)
    // =========================================================================
    /// Opening a device backend failed.
    #[error("E101: Failed to open device '{device}': {cause}")]
    DeviceOpen {
        /// Alias of the device.
        device: String,
        /// Reason reported by the backend.
        cause: String,
    },

    /// A register read or write on a device failed.
    #[error("E102: Transfer on register '{register}' of device '{device}' failed: {cause}")]
    DeviceTransfer {
        /// Alias of the device.
        device: String,
        /// Register name.
        register: String,
        /// Reason reported by the backend.
        cause: String,
    },

    /// An initialisation handler failed.
    #[error("E103: Initialisation handler #{index} of device '{device}' failed: {cause}")]
    InitHandler {
        /// Alias of the device.
        device: String,
        /// Position of the handler in registration order.
        index: usize,
        /// Reason for the failure.
        cause: String,
    },

    /// Replaying the deferred write log failed.
    #[error("E104: Write recovery of register '{register}' on device '{device}' failed: {cause}")]
    WriteRecovery {
        /// Alias of the device.
        device: String,
        /// Register that could not be restored.
        register: String,
        /// Reason for the failure.
        cause: String,
    },

    /// Activating asynchronous reads failed.
    #[error("E105: Activating asynchronous reads on device '{device}' failed: {cause}")]
    AsyncReadActivation {
        /// Alias of the device.
        device: String,
        /// Reason for the failure.
        cause: String,
    },

    /// Generic transient fault raised by a backend implementation.
    #[error("E199: Transient fault: {cause}")]
    Transient {
        /// Reason for the fault.
        cause: String,
    },

    // =========================================================================
    // Configuration / programming errors (E200-E299)
    // =========================================================================
    /// A variable path has more than one feeder.
    #[error("E201: Variable '{path}' has more than one feeder: {first} and {second}")]
    DuplicateFeeder {
        /// Variable path.
        path: String,
        /// Description of the first feeder.
        first: String,
        /// Description of the second feeder.
        second: String,
    },

    /// Endpoints of one variable disagree about its type or length.
    #[error("E202: Type mismatch on '{path}': expected {expected:?}[{expected_len}], got {actual:?}[{actual_len}]")]
    TypeMismatch {
        /// Variable path.
        path: String,
        /// Type of the first registered endpoint.
        expected: DataType,
        /// Element count of the first registered endpoint.
        expected_len: usize,
        /// Type of the conflicting endpoint.
        actual: DataType,
        /// Element count of the conflicting endpoint.
        actual_len: usize,
    },

    /// A path was requested that no endpoint has registered.
    #[error("E203: Unknown variable '{path}'")]
    UnknownVariable {
        /// Variable path.
        path: String,
    },

    /// Something was registered twice.
    #[error("E204: Duplicate registration of {what} '{name}'")]
    DuplicateRegistration {
        /// Kind of the registered entity.
        what: &'static str,
        /// Name of the entity.
        name: String,
    },

    /// Invalid wiring between endpoints.
    #[error("E205: Invalid wiring of '{path}': {cause}")]
    InvalidWiring {
        /// Variable path.
        path: String,
        /// Description of the problem.
        cause: String,
    },

    /// Invalid variable or module name.
    #[error("E206: Invalid name '{name}': {cause}")]
    InvalidName {
        /// The offending name.
        name: String,
        /// Description of the problem.
        cause: String,
    },

    /// Fault counter used out of pairing order.
    #[error("E207: Fault counter of module {module} used out of order: {cause}")]
    CounterMisuse {
        /// Module owning the counter.
        module: ModuleId,
        /// Description of the misuse.
        cause: String,
    },

    /// An operation was called in the wrong lifecycle phase.
    #[error("E208: Invalid lifecycle phase for '{operation}': {cause}")]
    Lifecycle {
        /// Operation that was attempted.
        operation: String,
        /// Description of the problem.
        cause: String,
    },

    /// Modules wait for initial values from each other.
    #[error("E209: Circular wait for initial values: {chain}")]
    CircularInitialValueWait {
        /// Human-readable chain of waiting modules.
        chain: String,
    },

    /// A device was referenced that is not registered.
    #[error("E210: Unknown device {device}")]
    UnknownDevice {
        /// The device identifier.
        device: DeviceId,
    },

    /// Invalid runtime configuration.
    #[error("E211: Invalid configuration: {cause}")]
    Config {
        /// Description of the problem.
        cause: String,
    },

    // =========================================================================
    // Testable mode errors (E300-E399)
    // =========================================================================
    /// Testable mode operation requested while testable mode is disabled.
    #[error("E301: Testable mode is not enabled")]
    TestableModeDisabled,

    /// The application did not settle within the stall timeout.
    #[error("E302: Application stalled after {timeout_ms}ms with {pending} pending operations: {details}")]
    StepStalled {
        /// Stall timeout in milliseconds.
        timeout_ms: u64,
        /// Number of pending operations when giving up.
        pending: usize,
        /// Variables still holding unread data.
        details: String,
    },

    // =========================================================================
    // Shutdown (E900)
    // =========================================================================
    /// The application is shutting down.
    #[error("E900: Shutdown in progress")]
    Shutdown,
}

impl AppCoreError {
    /// Get the error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DeviceOpen { .. } => "E101",
            Self::DeviceTransfer { .. } => "E102",
            Self::InitHandler { .. } => "E103",
            Self::WriteRecovery { .. } => "E104",
            Self::AsyncReadActivation { .. } => "E105",
            Self::Transient { .. } => "E199",
            Self::DuplicateFeeder { .. } => "E201",
            Self::TypeMismatch { .. } => "E202",
            Self::UnknownVariable { .. } => "E203",
            Self::DuplicateRegistration { .. } => "E204",
            Self::InvalidWiring { .. } => "E205",
            Self::InvalidName { .. } => "E206",
            Self::CounterMisuse { .. } => "E207",
            Self::Lifecycle { .. } => "E208",
            Self::CircularInitialValueWait { .. } => "E209",
            Self::UnknownDevice { .. } => "E210",
            Self::Config { .. } => "E211",
            Self::TestableModeDisabled => "E301",
            Self::StepStalled { .. } => "E302",
            Self::Shutdown => "E900",
        }
    }

    /// Check if this error is a transient resource fault handled by recovery.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DeviceOpen { .. }
                | Self::DeviceTransfer { .. }
                | Self::InitHandler { .. }
                | Self::WriteRecovery { .. }
                | Self::AsyncReadActivation { .. }
                | Self::Transient { .. }
        )
    }

    /// Check if this error is a configuration or programming error.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateFeeder { .. }
                | Self::TypeMismatch { .. }
                | Self::UnknownVariable { .. }
                | Self::DuplicateRegistration { .. }
                | Self::InvalidWiring { .. }
                | Self::InvalidName { .. }
                | Self::CounterMisuse { .. }
                | Self::Lifecycle { .. }
                | Self::CircularInitialValueWait { .. }
                | Self::UnknownDevice { .. }
                | Self::Config { .. }
                | Self::TestableModeDisabled
        )
    }

    /// Check if this error only signals cooperative shutdown.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }

    /// Create a generic transient fault.
    pub fn transient(cause: impl Into<String>) -> Self {
        Self::Transient {
            cause: cause.into(),
        }
    }

    /// Human-readable cause without the error code, used for status messages.
    pub fn cause(&self) -> String {
        match self {
            Self::DeviceOpen { cause, .. }
            | Self::DeviceTransfer { cause, .. }
            | Self::InitHandler { cause, .. }
            | Self::WriteRecovery { cause, .. }
            | Self::AsyncReadActivation { cause, .. }
            | Self::Transient { cause } => cause.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type alias using `AppCoreError`.
pub type Result<T> = std::result::Result<T, AppCoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_correct() {
        let err = AppCoreError::DeviceOpen {
            device: "dev".to_string(),
            cause: "refused".to_string(),
        };
        assert_eq!(err.code(), "E101");

        let err = AppCoreError::DuplicateFeeder {
            path: "/a".to_string(),
            first: "module A".to_string(),
            second: "module B".to_string(),
        };
        assert_eq!(err.code(), "E201");
        assert_eq!(AppCoreError::Shutdown.code(), "E900");
    }

    #[test]
    fn error_display() {
        let err = AppCoreError::DeviceTransfer {
            device: "adc".to_string(),
            register: "CH0".to_string(),
            cause: "timeout".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("E102"));
        assert!(msg.contains("adc"));
        assert!(msg.contains("CH0"));
        assert_eq!(err.cause(), "timeout");
    }

    #[test]
    fn classification() {
        assert!(AppCoreError::transient("gone").is_transient());
        assert!(!AppCoreError::transient("gone").is_config_error());

        let wiring = AppCoreError::InvalidWiring {
            path: "/x".to_string(),
            cause: "two feeders".to_string(),
        };
        assert!(wiring.is_config_error());
        assert!(!wiring.is_transient());

        assert!(AppCoreError::Shutdown.is_shutdown());
        assert!(!AppCoreError::Shutdown.is_config_error());
    }
}
