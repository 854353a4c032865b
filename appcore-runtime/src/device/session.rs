//! Device session: transfers and the error state of one device.
//!
//! A session starts out `Down` with an exception pending. Reads issued
//! while the error flag is set return the value frozen at the exception
//! version, and writes are only appended to the deferred write log. Any
//! failing transfer calls [`DeviceSession::report_exception`], which sets
//! the flag, stamps a fresh exception version, wakes the coordinator and
//! forwards the message to the other members of the recovery group.
//!
//! The coordinator walks the session through
//! [`SessionState`] from `Down` back to `Functional`; each recovery step
//! below sets the matching state before it runs.

use parking_lot::{Condvar, Mutex, RwLock, RwLockWriteGuard};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use super::backend::{AsyncReadSink, DeviceBackend, InitHandler};
use super::write_log::DeferredWriteLog;
use super::SyncRead;
use crate::accessor::OutputShared;
use crate::context::RuntimeContext;
use crate::recovery::RecoveryGroup;
use crate::transfer::{Fanout, Update};
use appcore_core::error::{AppCoreError, Result};
use appcore_core::types::{DeviceId, ResourceId, VariablePath};
use appcore_core::{DataType, DataValidity, Value, VersionNumber};

const OPENING_MESSAGE: &str = "Attempting to open device...";

/// Number of state transitions kept for diagnostics.
const STATE_HISTORY: usize = 32;

/// Lifecycle state of a device session.
///
/// A recovery walks the states from `Down` to `Functional` in declaration
/// order. `ShutDown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not opened yet, or an exception is outstanding.
    Down,
    /// Trying to open the backend until it reports functional.
    Opening,
    /// Running initialisation handlers.
    RunningInitHandlers,
    /// Replaying the deferred write log.
    RestoringWrites,
    /// Clearing the error state, writes still blocked.
    ClearingError,
    /// Activating asynchronous reads.
    ActivatingAsyncReads,
    /// Open and serving transfers.
    Functional,
    /// The application shut down.
    ShutDown,
}

/// Snapshot of a session's counters.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStats {
    /// Device alias.
    pub alias: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Successful opens so far.
    pub open_count: u64,
    /// Times the device became functional.
    pub functional_count: u64,
    /// Last published status message.
    pub last_message: String,
}

#[derive(Debug)]
struct ErrorState {
    has_error: bool,
    queue: VecDeque<String>,
    exception_version: VersionNumber,
}

struct AsyncSubscription {
    register: String,
    fanout: Arc<Fanout>,
    last: Option<Value>,
}

struct StatusOutputs {
    status: Arc<OutputShared>,
    message: Arc<OutputShared>,
    became_functional: Arc<OutputShared>,
}

/// Decrements the in-flight transfer counter on drop.
struct TransferGuard<'a>(&'a AtomicUsize);

impl<'a> TransferGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runtime state of one device.
///
/// The session starts in the error state; its recovery coordinator opens
/// it for the first time.
pub struct DeviceSession {
    id: DeviceId,
    alias: String,
    ctx: Arc<RuntimeContext>,
    backend: Mutex<Box<dyn DeviceBackend>>,
    resources: BTreeSet<ResourceId>,
    state: Mutex<SessionState>,
    history: Mutex<VecDeque<SessionState>>,
    error: Mutex<ErrorState>,
    error_cvar: Condvar,
    error_path: String,
    recovery_lock: RwLock<()>,
    write_log: Mutex<DeferredWriteLog>,
    init_handlers: Mutex<Vec<InitHandler>>,
    subscriptions: Mutex<Vec<AsyncSubscription>>,
    status: StatusOutputs,
    group: OnceLock<Arc<RecoveryGroup>>,
    sync_transfers: AtomicUsize,
    open_count: AtomicU64,
    functional_count: AtomicU64,
    last_message: Mutex<String>,
    functional_once: Mutex<bool>,
    functional_cvar: Condvar,
    initial_readers: Mutex<Vec<VariablePath>>,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("alias", &self.alias)
            .field("state", &*self.state.lock())
            .field("resources", &self.resources)
            .finish()
    }
}

impl DeviceSession {
    pub(crate) fn new(
        id: DeviceId,
        alias: &str,
        backend: Box<dyn DeviceBackend>,
        ctx: Arc<RuntimeContext>,
    ) -> Result<Arc<Self>> {
        let base = VariablePath::parse("/Devices")?.join(alias)?;
        let status_output = |name: &str, data_type: DataType| -> Result<Arc<OutputShared>> {
            Ok(Arc::new(OutputShared::new(
                base.join(name)?,
                data_type,
                1,
                None,
                Arc::clone(&ctx),
            )))
        };
        let status = StatusOutputs {
            status: status_output("status", DataType::Int32)?,
            message: status_output("status_message", DataType::String)?,
            became_functional: status_output("deviceBecameFunctional", DataType::Void)?,
        };
        let resources = backend.involved_resource_ids();

        Ok(Arc::new(Self {
            id,
            alias: alias.to_string(),
            error_path: format!("{}/errors", base),
            ctx,
            backend: Mutex::new(backend),
            resources,
            state: Mutex::new(SessionState::Down),
            history: Mutex::new(VecDeque::from([SessionState::Down])),
            error: Mutex::new(ErrorState {
                has_error: true,
                queue: VecDeque::new(),
                exception_version: VersionNumber::new(),
            }),
            error_cvar: Condvar::new(),
            recovery_lock: RwLock::new(()),
            write_log: Mutex::new(DeferredWriteLog::new()),
            init_handlers: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            status,
            group: OnceLock::new(),
            sync_transfers: AtomicUsize::new(0),
            open_count: AtomicU64::new(0),
            functional_count: AtomicU64::new(0),
            last_message: Mutex::new(String::new()),
            functional_once: Mutex::new(false),
            functional_cvar: Condvar::new(),
            initial_readers: Mutex::new(Vec::new()),
        }))
    }

    /// Device identifier.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Device alias.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Resources the device depends on.
    pub fn resources(&self) -> &BTreeSet<ResourceId> {
        &self.resources
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether an exception is outstanding.
    pub fn has_error(&self) -> bool {
        self.error.lock().has_error
    }

    /// Version attached to data frozen by the current exception.
    pub fn exception_version(&self) -> VersionNumber {
        self.error.lock().exception_version
    }

    /// Snapshot of the deferred write log.
    pub fn write_log(&self) -> DeferredWriteLog {
        self.write_log.lock().clone()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            alias: self.alias.clone(),
            state: self.state(),
            open_count: self.open_count.load(Ordering::SeqCst),
            functional_count: self.functional_count.load(Ordering::SeqCst),
            last_message: self.last_message.lock().clone(),
        }
    }

    /// Most recent state transitions, oldest first.
    pub fn state_history(&self) -> Vec<SessionState> {
        self.history.lock().iter().copied().collect()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous == state {
            return;
        }
        tracing::trace!(device = %self.alias, from = ?previous, to = ?state, "Session state changed");
        let mut history = self.history.lock();
        if history.len() == STATE_HISTORY {
            history.pop_front();
        }
        history.push_back(state);
    }

    pub(crate) fn add_init_handler(&self, handler: InitHandler) {
        self.init_handlers.lock().push(handler);
    }

    pub(crate) fn status_outputs(&self) -> [&Arc<OutputShared>; 3] {
        [
            &self.status.status,
            &self.status.message,
            &self.status.became_functional,
        ]
    }

    pub(crate) fn subscribe_async(&self, register: &str, fanout: Arc<Fanout>) {
        self.subscriptions.lock().push(AsyncSubscription {
            register: register.to_string(),
            fanout,
            last: None,
        });
    }

    pub(crate) fn async_registers(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .iter()
            .map(|s| s.register.clone())
            .collect()
    }

    /// A poll-type input reads `path` from this device for its initial value.
    pub(crate) fn expect_initial_reader(&self, path: VariablePath) {
        self.initial_readers.lock().push(path);
    }

    pub(crate) fn set_group(&self, group: Arc<RecoveryGroup>) {
        let _ = self.group.set(group);
    }

    pub(crate) fn group(&self) -> Option<&Arc<RecoveryGroup>> {
        self.group.get()
    }

    // ------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------

    /// Synchronous read of a poll-type register.
    pub(crate) fn read_sync(&self, register: &str, data_type: DataType, len: usize) -> SyncRead {
        let _transfer = TransferGuard::new(&self.sync_transfers);
        if self.has_error() {
            return SyncRead::Frozen(self.exception_version());
        }
        let result = self.backend.lock().read(register);
        match result {
            Ok(value) if value.data_type() == data_type && value.len() == len => {
                SyncRead::Fresh(value)
            }
            Ok(value) => {
                self.report_exception(format!(
                    "register {} returned {}[{}], expected {}[{}]",
                    register,
                    value.data_type(),
                    value.len(),
                    data_type,
                    len
                ));
                SyncRead::Frozen(self.exception_version())
            }
            Err(err) => {
                self.report_exception(err.cause());
                SyncRead::Frozen(self.exception_version())
            }
        }
    }

    /// Synchronous write. Always recorded in the write log; only reaches
    /// the backend while the device is functional.
    pub(crate) fn write_sync(&self, register: &str, value: &Value) {
        let _transfer = TransferGuard::new(&self.sync_transfers);
        let poll = self.ctx.config().poll_interval();
        let _guard = loop {
            if let Some(guard) = self.recovery_lock.try_read() {
                break guard;
            }
            if self.ctx.cancel().is_cancelled() {
                return;
            }
            self.ctx
                .testable()
                .with_released(|| std::thread::sleep(poll));
        };

        self.write_log.lock().record(register, value.clone());
        if self.has_error() {
            return;
        }
        let result = self.backend.lock().write(register, value);
        if let Err(err) = result {
            self.report_exception(err.cause());
        }
    }

    /// Put the session into the error state.
    ///
    /// Ignored if an exception is already outstanding. The message is
    /// forwarded to the other members of the recovery group.
    pub fn report_exception(&self, message: impl Into<String>) {
        let message = message.into();
        {
            let mut error = self.error.lock();
            if error.has_error {
                tracing::trace!(device = %self.alias, %message, "Exception ignored, already in error");
                return;
            }
            error.has_error = true;
            error.exception_version = VersionNumber::new();
            error.queue.push_back(message.clone());
            self.ctx.testable().increment(&self.error_path);
        }
        self.error_cvar.notify_all();
        self.set_state(SessionState::Down);
        tracing::warn!(device = %self.alias, %message, "Device exception");

        if let Some(group) = self.group.get() {
            let forwarded = if message.contains("[in device ") {
                message
            } else {
                format!("{} [in device {}]", message, self.alias)
            };
            group.forward_exception(self.id, &forwarded);
        }
    }

    pub(crate) fn deliver_async(&self, register: &str, value: Value) {
        if self.has_error() {
            return;
        }
        let failure = {
            let mut subscriptions = self.subscriptions.lock();
            let mut failure = None;
            for sub in subscriptions.iter_mut().filter(|s| s.register == register) {
                sub.last = Some(value.clone());
                if let Err(err) = sub.fanout.distribute(Update::fresh(value.clone())) {
                    failure = Some(err);
                }
            }
            failure
        };
        if let Some(err) = failure {
            self.report_exception(err.to_string());
        }
    }

    // ------------------------------------------------------------------
    // Recovery steps, driven by the coordinator
    // ------------------------------------------------------------------

    /// Mark the session as initialising before its coordinator starts.
    pub(crate) fn prepare(&self) {
        self.ctx.testable().device_init_begin();
        self.write_status(1, OPENING_MESSAGE);
    }

    /// Open the backend under the process-wide open lock.
    ///
    /// An open that succeeds while the backend still reports itself not
    /// functional counts as a failed attempt.
    pub(crate) fn open_backend(&self) -> Result<()> {
        self.set_state(SessionState::Opening);
        let _open = self
            .ctx
            .testable()
            .with_released(|| self.ctx.open_lock().lock());
        let mut backend = self.backend.lock();
        backend.open()?;
        if !backend.is_functional() {
            return Err(AppCoreError::DeviceOpen {
                device: self.alias.clone(),
                cause: "device opened but is not functional".to_string(),
            });
        }
        drop(backend);
        self.open_count.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(device = %self.alias, "Device opened");
        Ok(())
    }

    /// Run initialisation handlers in registration order, under the open lock.
    pub(crate) fn run_init_handlers(&self) -> Result<()> {
        self.set_state(SessionState::RunningInitHandlers);
        let _open = self
            .ctx
            .testable()
            .with_released(|| self.ctx.open_lock().lock());
        let handlers = self.init_handlers.lock();
        let mut backend = self.backend.lock();
        for (index, handler) in handlers.iter().enumerate() {
            handler(&mut **backend).map_err(|err| AppCoreError::InitHandler {
                device: self.alias.clone(),
                index,
                cause: err.cause(),
            })?;
        }
        Ok(())
    }

    /// Block new writes until the returned guard is dropped.
    pub(crate) fn lock_for_recovery(&self) -> RwLockWriteGuard<'_, ()> {
        self.ctx
            .testable()
            .with_released(|| self.recovery_lock.write())
    }

    /// Replay the deferred write log.
    pub(crate) fn replay_write_log(&self) -> Result<()> {
        self.set_state(SessionState::RestoringWrites);
        let log = self.write_log.lock().clone();
        let mut backend = self.backend.lock();
        for (register, value) in log.entries() {
            backend
                .write(register, value)
                .map_err(|err| AppCoreError::WriteRecovery {
                    device: self.alias.clone(),
                    register: register.clone(),
                    cause: err.cause(),
                })?;
        }
        Ok(())
    }

    pub(crate) fn clear_error(&self) {
        self.set_state(SessionState::ClearingError);
        self.error.lock().has_error = false;
    }

    /// Discard exceptions queued while already in recovery.
    pub(crate) fn drain_errors(&self) {
        let mut error = self.error.lock();
        while error.queue.pop_front().is_some() {
            self.ctx.testable().decrement(&self.error_path);
        }
    }

    pub(crate) fn activate_async(self: &Arc<Self>) -> Result<()> {
        self.set_state(SessionState::ActivatingAsyncReads);
        let sink = AsyncReadSink::new(Arc::downgrade(self));
        let result = self.backend.lock().activate_async_read(sink);
        result.map_err(|err| AppCoreError::AsyncReadActivation {
            device: self.alias.clone(),
            cause: err.cause(),
        })
    }

    /// Publish `message` on the status outputs unless it is already shown.
    pub(crate) fn publish_fault(&self, message: &str) {
        if *self.last_message.lock() == message {
            return;
        }
        tracing::warn!(device = %self.alias, %message, "Device faulty");
        self.write_status(1, message);
    }

    pub(crate) fn become_functional(&self) {
        self.write_status(0, "");
        self.status.became_functional.set_value(Value::Void(1));
        if let Err(err) = self.status.became_functional.write() {
            tracing::debug!(device = %self.alias, error = %err, "deviceBecameFunctional not written");
        }
        self.functional_count.fetch_add(1, Ordering::SeqCst);

        let first = {
            let mut once = self.functional_once.lock();
            let first = !*once;
            *once = true;
            first
        };
        if first {
            for path in self.initial_readers.lock().iter() {
                self.ctx.testable().increment(path.as_str());
            }
            self.functional_cvar.notify_all();
        }

        self.set_state(SessionState::Functional);
        self.ctx.testable().device_init_end();
        tracing::info!(device = %self.alias, "Device functional");
    }

    /// Wait until an exception is queued.
    pub(crate) fn wait_for_error(&self) -> Result<()> {
        let poll = self.ctx.config().poll_interval();
        loop {
            self.ctx.cancel().checkpoint()?;
            if !self.error.lock().queue.is_empty() {
                return Ok(());
            }
            self.ctx.testable().with_released(|| {
                let mut error = self.error.lock();
                if error.queue.is_empty() {
                    self.error_cvar.wait_for(&mut error, poll);
                }
            });
        }
    }

    pub(crate) fn pop_error(&self) -> Option<String> {
        let message = self.error.lock().queue.pop_front();
        if message.is_some() {
            self.ctx.testable().decrement(&self.error_path);
        }
        message
    }

    /// Send the last known value of every asynchronous register as faulty.
    pub(crate) fn push_faulty_async(&self, version: VersionNumber) {
        let subscriptions = self.subscriptions.lock();
        for sub in subscriptions.iter() {
            let value = sub.last.clone().unwrap_or_else(|| {
                Value::default_for(sub.fanout.data_type(), sub.fanout.len())
            });
            let update = Update {
                value,
                version,
                validity: DataValidity::Faulty,
            };
            if let Err(err) = sub.fanout.distribute(update) {
                tracing::error!(device = %self.alias, error = %err, "Failed to propagate fault");
            }
        }
    }

    /// Wait until no synchronous transfer is in flight.
    pub(crate) fn wait_sync_transfers(&self) -> Result<()> {
        let poll = self.ctx.config().poll_interval();
        while self.sync_transfers.load(Ordering::SeqCst) > 0 {
            self.ctx.cancel().checkpoint()?;
            self.ctx
                .testable()
                .with_released(|| std::thread::sleep(poll));
        }
        Ok(())
    }

    /// Wait until the device was functional once, then consume the initial
    /// value counted for `path`.
    pub(crate) fn wait_initial_value(
        &self,
        path: &VariablePath,
        mut on_idle: impl FnMut() -> Result<()>,
    ) -> Result<()> {
        let poll = self.ctx.config().poll_interval();
        loop {
            self.ctx.cancel().checkpoint()?;
            if *self.functional_once.lock() {
                self.ctx.testable().decrement(path.as_str());
                return Ok(());
            }
            on_idle()?;
            self.ctx.testable().with_released(|| {
                let mut once = self.functional_once.lock();
                if !*once {
                    self.functional_cvar.wait_for(&mut once, poll);
                }
            });
        }
    }

    pub(crate) fn close(&self) {
        self.set_state(SessionState::ShutDown);
        self.backend.lock().close();
    }

    fn write_status(&self, code: i32, message: &str) {
        *self.last_message.lock() = message.to_string();
        self.status.status.set_value(Value::Int32(vec![code]));
        self.status
            .message
            .set_value(Value::String(vec![message.to_string()]));
        for output in [&self.status.status, &self.status.message] {
            if let Err(err) = output.write() {
                tracing::debug!(device = %self.alias, error = %err, "Status not written");
            }
        }
    }
}
