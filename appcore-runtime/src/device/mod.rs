//! Device sessions and the backend abstraction they drive.
//!
//! A [`DeviceSession`] owns one [`DeviceBackend`] and mediates every
//! transfer to it. While the session is in the error state reads return
//! frozen values and writes are only recorded for later replay; the
//! [`RecoveryCoordinator`](crate::recovery::RecoveryCoordinator) brings
//! the session back.

mod backend;
mod dummy;
mod session;
mod write_log;

pub use backend::{AsyncReadSink, DeviceBackend, InitHandler};
pub use dummy::{DummyBackend, DummyHandle};
pub use session::{DeviceSession, DeviceStats, SessionState};
pub use write_log::DeferredWriteLog;

use appcore_core::{Value, VersionNumber};
use serde::{Deserialize, Serialize};

/// How a device register is connected to a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterAccess {
    /// Read on demand by a poll-type consumer.
    ReadPoll,
    /// Delivered asynchronously by the backend.
    ReadPush,
    /// Written by the feeder of the variable.
    Write,
}

impl RegisterAccess {
    /// Whether the register feeds the variable.
    pub fn is_read(&self) -> bool {
        !matches!(self, Self::Write)
    }
}

/// Outcome of a synchronous register read.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncRead {
    /// The backend delivered a value.
    Fresh(Value),
    /// The device is faulty. The caller keeps its previous value and marks
    /// it faulty with the given exception version.
    Frozen(VersionNumber),
}
