//! In-process stand-in for the control system.
//!
//! Every variable network publishes to one [`ProcessVariable`]. Networks
//! without a feeder inside the application are fed from here instead.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

use crate::device::{DeviceSession, SyncRead};
use crate::transfer::{Fanout, Update};
use appcore_core::error::{AppCoreError, Result};
use appcore_core::types::VariablePath;
use appcore_core::{DataType, DataValidity, Value};

/// Where the control-system side of a variable gets its data from.
#[derive(Debug)]
enum Source {
    /// Updates published by the feeder of the network.
    Published,
    /// The control system itself feeds the network.
    ControlSystem(Arc<Fanout>),
    /// A poll-type device register, read on demand.
    DevicePoll {
        session: Arc<DeviceSession>,
        register: String,
    },
}

/// Control-system view of one variable.
#[derive(Debug)]
pub struct ProcessVariable {
    path: VariablePath,
    data_type: DataType,
    len: usize,
    latest: RwLock<Option<Update>>,
    source: OnceLock<Source>,
}

impl ProcessVariable {
    pub(crate) fn new(path: VariablePath, data_type: DataType, len: usize) -> Self {
        Self {
            path,
            data_type,
            len,
            latest: RwLock::new(None),
            source: OnceLock::new(),
        }
    }

    /// Variable path.
    pub fn path(&self) -> &VariablePath {
        &self.path
    }

    /// Element type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Element count.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the variable has no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the control system feeds this variable.
    pub fn is_writeable(&self) -> bool {
        matches!(self.source.get(), Some(Source::ControlSystem(_)))
    }

    pub(crate) fn set_published(&self) {
        let _ = self.source.set(Source::Published);
    }

    pub(crate) fn set_control_system_fanout(&self, fanout: Arc<Fanout>) {
        let _ = self.source.set(Source::ControlSystem(fanout));
    }

    pub(crate) fn set_device_poll(&self, session: Arc<DeviceSession>, register: String) {
        let _ = self.source.set(Source::DevicePoll { session, register });
    }

    pub(crate) fn publish(&self, update: Update) {
        *self.latest.write() = Some(update);
    }

    /// The most recent update, reading the device for poll-type registers.
    pub fn read(&self) -> Option<Update> {
        if let Some(Source::DevicePoll { session, register }) = self.source.get() {
            let previous = self.latest.read().clone();
            let update = match session.read_sync(register, self.data_type, self.len) {
                SyncRead::Fresh(value) => Update::fresh(value),
                SyncRead::Frozen(version) => Update {
                    value: previous
                        .map(|u| u.value)
                        .unwrap_or_else(|| Value::default_for(self.data_type, self.len)),
                    version,
                    validity: DataValidity::Faulty,
                },
            };
            self.publish(update.clone());
            return Some(update);
        }
        self.latest.read().clone()
    }

    /// Write from the control system into the application.
    pub fn write(&self, update: Update) -> Result<()> {
        match self.source.get() {
            Some(Source::ControlSystem(fanout)) => {
                self.publish(update.clone());
                fanout.distribute(update)
            }
            _ => Err(AppCoreError::InvalidWiring {
                path: self.path.to_string(),
                cause: "variable is fed by the application and cannot be written from the control system"
                    .to_string(),
            }),
        }
    }
}

/// All process variables of an application, keyed by path.
#[derive(Debug, Default)]
pub struct ProcessVariableTable {
    variables: DashMap<VariablePath, Arc<ProcessVariable>>,
}

impl ProcessVariableTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, pv: Arc<ProcessVariable>) {
        self.variables.insert(pv.path().clone(), pv);
    }

    /// Look up a variable.
    pub fn get(&self, path: &VariablePath) -> Result<Arc<ProcessVariable>> {
        self.variables
            .get(path)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AppCoreError::UnknownVariable {
                path: path.to_string(),
            })
    }

    /// All variables fed by the control system, in path order.
    pub fn writeable(&self) -> Vec<Arc<ProcessVariable>> {
        let mut out: Vec<Arc<ProcessVariable>> = self
            .variables
            .iter()
            .filter(|entry| entry.value().is_writeable())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        out.sort_by(|a, b| a.path().cmp(b.path()));
        out
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}
