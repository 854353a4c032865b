//! Input accessors and the sources they read from.
//!
//! Push-type inputs pop from a queue (or a latest-value cell on circular
//! networks), poll-type inputs either take the latest value or read their
//! device register synchronously. Every read advances the owning module's
//! version and updates its validity.

use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use super::UpdateMode;
use crate::device::{DeviceSession, SyncRead};
use crate::module::ModuleState;
use crate::transfer::{LatestCell, PushQueue, Update};
use appcore_core::error::{AppCoreError, Result};
use appcore_core::types::{AccessorId, ModuleId, VariablePath};
use appcore_core::{DataType, DataValidity, ReadValidity, UserType, Value, VersionNumber};

/// Where an input takes its data from.
#[derive(Debug)]
pub(crate) enum InputSource {
    Queue(Arc<PushQueue>),
    Latest(Arc<LatestCell>),
    DevicePoll {
        session: Arc<DeviceSession>,
        register: String,
    },
}

#[derive(Debug)]
struct InputState {
    value: Value,
    version: VersionNumber,
    tracker: Option<ReadValidity>,
}

/// Type-erased state of one input accessor.
#[derive(Debug)]
pub(crate) struct InputShared {
    id: AccessorId,
    path: VariablePath,
    data_type: DataType,
    len: usize,
    mode: UpdateMode,
    owner: Arc<ModuleState>,
    source: OnceLock<InputSource>,
    feeder: OnceLock<Option<ModuleId>>,
    state: Mutex<InputState>,
}

impl InputShared {
    pub(crate) fn new(
        path: VariablePath,
        data_type: DataType,
        len: usize,
        mode: UpdateMode,
        owner: Arc<ModuleState>,
    ) -> Self {
        Self {
            id: AccessorId::next(),
            path,
            data_type,
            len,
            mode,
            owner,
            source: OnceLock::new(),
            feeder: OnceLock::new(),
            state: Mutex::new(InputState {
                value: Value::default_for(data_type, len),
                version: VersionNumber::null(),
                tracker: None,
            }),
        }
    }

    pub(crate) fn id(&self) -> AccessorId {
        self.id
    }

    pub(crate) fn path(&self) -> &VariablePath {
        &self.path
    }

    pub(crate) fn data_type(&self) -> DataType {
        self.data_type
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn mode(&self) -> UpdateMode {
        self.mode
    }

    pub(crate) fn owner(&self) -> &Arc<ModuleState> {
        &self.owner
    }

    /// Wire the input. `circular` marks a feeder inside the owner's own
    /// circular network; `feeder` is the feeding module, if any.
    pub(crate) fn connect(&self, source: InputSource, circular: bool, feeder: Option<ModuleId>) {
        let _ = self.source.set(source);
        let _ = self.feeder.set(feeder);
        self.state.lock().tracker = Some(ReadValidity::new(circular));
    }

    pub(crate) fn source(&self) -> Result<&InputSource> {
        self.source.get().ok_or_else(|| AppCoreError::Lifecycle {
            operation: format!("read {}", self.path),
            cause: "input is not connected".to_string(),
        })
    }

    fn apply(&self, update: Update, push: bool) -> Result<()> {
        let owner = self.owner.validity()?;
        let mut state = self.state.lock();
        if let Some(tracker) = state.tracker.as_mut() {
            tracker.on_post_read(owner, update.validity);
        }
        state.value = update.value;
        state.version = update.version;
        if push {
            self.owner.advance_version(update.version);
        }
        Ok(())
    }

    fn read_device(&self, session: &DeviceSession, register: &str) -> Update {
        match session.read_sync(register, self.data_type, self.len) {
            SyncRead::Fresh(value) => Update::fresh(value),
            SyncRead::Frozen(version) => Update {
                value: self.state.lock().value.clone(),
                version,
                validity: DataValidity::Faulty,
            },
        }
    }

    pub(crate) fn read(&self) -> Result<()> {
        self.owner.ctx().cancel().checkpoint()?;
        match self.source()? {
            InputSource::Queue(queue) => {
                let update = queue.pop_blocking()?;
                self.apply(update, true)
            }
            InputSource::Latest(cell) => match cell.get() {
                Some(update) => self.apply(update, false),
                None => Ok(()),
            },
            InputSource::DevicePoll { session, register } => {
                let update = self.read_device(session, register);
                self.apply(update, false)
            }
        }
    }

    pub(crate) fn read_non_blocking(&self) -> Result<bool> {
        self.owner.ctx().cancel().checkpoint()?;
        match self.source()? {
            InputSource::Queue(queue) => match queue.try_pop() {
                Some(update) => self.apply(update, true).map(|_| true),
                None => Ok(false),
            },
            InputSource::Latest(cell) => match cell.get() {
                Some(update) if update.version != self.state.lock().version => {
                    self.apply(update, false).map(|_| true)
                }
                _ => Ok(false),
            },
            InputSource::DevicePoll { session, register } => {
                let update = self.read_device(session, register);
                self.apply(update, false).map(|_| true)
            }
        }
    }

    pub(crate) fn read_latest(&self) -> Result<bool> {
        if let InputSource::Queue(queue) = self.source()? {
            self.owner.ctx().cancel().checkpoint()?;
            let mut any = false;
            while let Some(update) = queue.try_pop() {
                self.apply(update, true)?;
                any = true;
            }
            return Ok(any);
        }
        self.read_non_blocking()
    }

    /// Block until the first value is available, then take it.
    ///
    /// After the configured grace period a circular wait between modules is
    /// reported as an error instead of blocking forever.
    pub(crate) fn read_initial(&self) -> Result<()> {
        let ctx = Arc::clone(self.owner.ctx());
        let feeder = self.feeder.get().copied().flatten();
        let grace = ctx.config().initial_value_grace();
        let started = Instant::now();
        let mut registered = false;

        let mut on_idle = || -> Result<()> {
            if !registered {
                ctx.waits()
                    .begin(self.owner.id(), self.owner.name(), &self.path, feeder);
                registered = true;
            }
            if started.elapsed() >= grace {
                if let Some(chain) = ctx.waits().find_cycle(self.owner.id()) {
                    tracing::error!(module = %self.owner.name(), %chain, "Circular initial value wait");
                    return Err(AppCoreError::CircularInitialValueWait { chain });
                }
            }
            Ok(())
        };

        let result = match self.source()? {
            InputSource::Queue(queue) => queue
                .pop_blocking_with(&mut on_idle)
                .and_then(|update| self.apply(update, true)),
            InputSource::Latest(cell) => cell
                .wait_initial_with(&mut on_idle)
                .and_then(|update| self.apply(update, false)),
            InputSource::DevicePoll { session, register } => session
                .wait_initial_value(&self.path, &mut on_idle)
                .and_then(|()| {
                    let update = self.read_device(session, register);
                    self.apply(update, false)
                }),
        };
        ctx.waits().end(self.owner.id());
        result
    }

    fn validity(&self) -> DataValidity {
        self.state
            .lock()
            .tracker
            .as_ref()
            .map_or(DataValidity::Faulty, ReadValidity::current)
    }
}

/// Typed input of a module.
#[derive(Debug)]
pub struct Input<T: UserType> {
    shared: Arc<InputShared>,
    _marker: PhantomData<T>,
}

impl<T: UserType> Input<T> {
    pub(crate) fn from_shared(shared: Arc<InputShared>) -> Self {
        Self {
            shared,
            _marker: PhantomData,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<InputShared> {
        &self.shared
    }

    /// Accessor identifier, as returned by
    /// [`ReadAnyGroup::read_any`](super::ReadAnyGroup::read_any).
    pub fn id(&self) -> AccessorId {
        self.shared.id()
    }

    /// Variable path.
    pub fn path(&self) -> &VariablePath {
        self.shared.path()
    }

    /// Update mode.
    pub fn mode(&self) -> UpdateMode {
        self.shared.mode()
    }

    /// Take the next value. Blocks for push-type inputs; poll-type inputs
    /// fetch the latest value.
    pub fn read(&mut self) -> Result<()> {
        self.shared.read()
    }

    /// Take the next value if one is available. Returns whether the value
    /// changed.
    pub fn read_non_blocking(&mut self) -> Result<bool> {
        self.shared.read_non_blocking()
    }

    /// Discard all but the newest pending value and take it.
    pub fn read_latest(&mut self) -> Result<bool> {
        self.shared.read_latest()
    }

    /// First element of the current value.
    pub fn value(&self) -> T {
        self.values().into_iter().next().unwrap_or_default()
    }

    /// All elements of the current value.
    pub fn values(&self) -> Vec<T> {
        T::from_value(&self.shared.state.lock().value).unwrap_or_default()
    }

    /// Validity of the current value. Faulty until the first read.
    pub fn validity(&self) -> DataValidity {
        self.shared.validity()
    }

    /// Version of the current value.
    pub fn version(&self) -> VersionNumber {
        self.shared.state.lock().version
    }
}
