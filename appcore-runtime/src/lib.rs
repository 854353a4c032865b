//! appcore Runtime - Threaded execution of control-system applications.
//!
//! This crate provides the runtime for appcore applications:
//! - Module and device registration, connection and lifecycle
//! - Push/poll transfer channels with version and validity propagation
//! - Device sessions with exception handling and deferred write recovery
//! - Recovery groups for devices sharing low-level resources
//! - Trigger fan-outs reading poll-type registers on an external trigger
//! - Testable mode for deterministic stepping from a test thread
//! - Structured logging through `tracing`

#![warn(missing_docs)]

pub mod accessor;
pub mod application;
pub mod config;
pub mod connection;
pub mod context;
pub mod dependency_wait;
pub mod device;
pub mod module;
pub mod observability;
pub mod process_variable;
pub mod recovery;
pub mod sync;
pub mod testable;
pub mod testing;
pub mod transfer;
pub mod trigger;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::accessor::{Input, Output, ReadAnyGroup, UpdateMode};
    pub use crate::application::{Application, WorkerError};
    pub use crate::config::RuntimeConfig;
    pub use crate::connection::{ConnectionReport, VariableReport};
    pub use crate::device::{
        DeviceBackend, DeviceSession, DeviceStats, DummyBackend, DummyHandle, RegisterAccess,
        SessionState,
    };
    pub use crate::module::{ApplicationModule, ModuleBuilder};
    pub use crate::observability::{init_tracing, LogFormat, TracingConfig};
    pub use crate::recovery::{RecoveryGroup, RecoveryGroupRegistry, RecoveryStage};
    pub use crate::testing::{ProcessVariableAccessor, TestFacility};
    pub use appcore_core::{
        AppCoreError, DataType, DataValidity, DeviceId, ModuleId, Result, UserType, Value,
        VariablePath, VersionNumber, Void,
    };
}
