//! Device recovery.
//!
//! Devices that share a low-level resource form a [`RecoveryGroup`] and are
//! recovered in lock-step: every member passes the same sequence of stages,
//! separated by group barriers, so that one member's reopen never races
//! another member's use of the shared resource. Each device session runs
//! its own [`RecoveryCoordinator`] on a dedicated thread.
//!
//! # Stages
//!
//! 1. **Detection**: all members observed the error.
//! 2. **Open**: the backend was opened (retried until it succeeds).
//! 3. **InitHandlers**: initialisation handlers ran. A failure anywhere
//!    sends the whole group back to stage 1.
//! 4. **WriteRecovery**: the deferred write log was replayed.
//! 5. **ClearError**: the error flag was cleared; asynchronous reads are
//!    activated and the device becomes functional.

mod coordinator;
mod group;

pub use coordinator::RecoveryCoordinator;
pub use group::{partition, RecoveryGroup, RecoveryGroupRegistry, RecoveryStage};
