//! Per-device recovery loop.
//!
//! Every device session has one coordinator thread. All coordinators of a
//! recovery group move through the same stages and meet at a group barrier
//! after each one:
//!
//! 1. Detection: every member has noticed the error.
//! 2. Open: the backend is opened, retrying at the configured interval
//!    until it opens and reports itself functional.
//! 3. Init handlers: registered handlers run in order. If any member
//!    fails, the whole group starts over from detection.
//! 4. Write recovery: with new writes blocked, the deferred write log is
//!    replayed. A failure again restarts the group.
//! 5. Clear error: the error flag is dropped, then writes are unblocked.
//!
//! Asynchronous reads are activated afterwards and the device is
//! published as functional. The coordinator then sleeps until the next
//! exception, pushes the last asynchronous values as faulty with the
//! exception version, waits for in-flight synchronous transfers and loops.

use std::sync::Arc;

use super::group::{RecoveryGroup, RecoveryStage};
use crate::context::RuntimeContext;
use crate::device::{DeviceSession, SessionState};
use appcore_core::error::Result;

/// Drives one device session through open, recovery and fault handling.
///
/// Runs on its own thread until the application shuts down.
#[derive(Debug)]
pub struct RecoveryCoordinator {
    session: Arc<DeviceSession>,
    group: Arc<RecoveryGroup>,
    ctx: Arc<RuntimeContext>,
}

impl RecoveryCoordinator {
    /// Create the coordinator of `session`, a member of `group`.
    pub fn new(
        session: Arc<DeviceSession>,
        group: Arc<RecoveryGroup>,
        ctx: Arc<RuntimeContext>,
    ) -> Self {
        Self {
            session,
            group,
            ctx,
        }
    }

    /// Run until shutdown.
    ///
    /// When the coordinator exits the group is shut down as well, so that
    /// no other member waits at a barrier this one will never reach.
    pub fn run(&self) -> Result<()> {
        let result = self.recovery_loop();
        self.group.shutdown();
        match result {
            Err(err) if err.is_shutdown() => {
                tracing::debug!(device = %self.session.alias(), "Recovery coordinator stopped");
                Ok(())
            }
            other => other,
        }
    }

    fn recovery_loop(&self) -> Result<()> {
        let session = &self.session;
        let group = &self.group;
        let ctx = &*self.ctx;

        loop {
            group.wait_stage(RecoveryStage::Detection, ctx)?;

            self.open_with_retry()?;
            session.drain_errors();
            group.wait_stage(RecoveryStage::Open, ctx)?;

            if let Err(err) = session.run_init_handlers() {
                session.publish_fault(&err.to_string());
                group.set_error_at(RecoveryStage::InitHandlers);
            }
            group.wait_stage(RecoveryStage::InitHandlers, ctx)?;
            if !group.stage_ok(RecoveryStage::InitHandlers) {
                tracing::debug!(device = %session.alias(), "Initialisation failed in group, reopening");
                continue;
            }

            let recovery = session.lock_for_recovery();
            if let Err(err) = session.replay_write_log() {
                session.publish_fault(&err.to_string());
                group.set_error_at(RecoveryStage::WriteRecovery);
            }
            group.wait_stage(RecoveryStage::WriteRecovery, ctx)?;
            if !group.stage_ok(RecoveryStage::WriteRecovery) {
                tracing::debug!(device = %session.alias(), "Write recovery failed in group, reopening");
                continue;
            }

            session.clear_error();
            group.wait_stage(RecoveryStage::ClearError, ctx)?;
            drop(recovery);

            // A failure here raises a regular exception, handled below.
            if let Err(err) = session.activate_async() {
                session.report_exception(err.cause());
            }
            session.become_functional();

            session.wait_for_error()?;
            ctx.testable().device_init_begin();
            let message = session.pop_error().unwrap_or_default();
            session.set_state(SessionState::Down);
            session.publish_fault(&message);
            session.push_faulty_async(session.exception_version());
            session.wait_sync_transfers()?;
        }
    }

    /// Open the backend, retrying at the configured interval. The first
    /// attempt is immediate.
    fn open_with_retry(&self) -> Result<()> {
        loop {
            self.ctx.cancel().checkpoint()?;
            match self.session.open_backend() {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::debug!(
                        device = %self.session.alias(),
                        error = %err,
                        "Open failed, retrying"
                    );
                    self.session.publish_fault(&err.to_string());
                    self.ctx.sleep(self.ctx.config().open_retry_interval())?;
                }
            }
        }
    }
}
