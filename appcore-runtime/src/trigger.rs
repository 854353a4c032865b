//! Trigger fan-out: poll-type device registers read on an external trigger.
//!
//! Each time the trigger variable receives an update, every register bound
//! to the fan-out is read synchronously and sent to its network with the
//! trigger's version. A register that cannot be read is sent with its last
//! value and marked faulty, so push-type consumers see the fault in step
//! with the trigger.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::device::{DeviceSession, SyncRead};
use crate::transfer::{Fanout, PushQueue, Update};
use appcore_core::error::{AppCoreError, Result};
use appcore_core::types::{AccessorId, VariablePath};
use appcore_core::{DataType, DataValidity, Value};

struct TriggeredRegister {
    register: String,
    data_type: DataType,
    len: usize,
    fanout: Arc<Fanout>,
    last: Value,
}

/// Reads a set of registers of one device whenever a trigger arrives.
pub struct TriggerFanOut {
    id: AccessorId,
    trigger: VariablePath,
    session: Arc<DeviceSession>,
    queue: OnceLock<Arc<PushQueue>>,
    registers: Mutex<Vec<TriggeredRegister>>,
}

impl fmt::Debug for TriggerFanOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerFanOut")
            .field("trigger", &self.trigger)
            .field("device", &self.session.alias())
            .field("registers", &self.registers.lock().len())
            .finish()
    }
}

impl TriggerFanOut {
    pub(crate) fn new(trigger: VariablePath, session: Arc<DeviceSession>) -> Self {
        session.expect_initial_reader(trigger.clone());
        Self {
            id: AccessorId::next(),
            trigger,
            session,
            queue: OnceLock::new(),
            registers: Mutex::new(Vec::new()),
        }
    }

    /// Path of the trigger variable.
    pub fn trigger(&self) -> &VariablePath {
        &self.trigger
    }

    /// The device whose registers are read.
    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    /// Registers read on each trigger.
    pub fn registers(&self) -> Vec<String> {
        self.registers
            .lock()
            .iter()
            .map(|r| r.register.clone())
            .collect()
    }

    pub(crate) fn id(&self) -> AccessorId {
        self.id
    }

    pub(crate) fn attach_queue(&self, queue: Arc<PushQueue>) -> Result<()> {
        self.queue.set(queue).map_err(|_| AppCoreError::InvalidWiring {
            path: self.trigger.to_string(),
            cause: "trigger connected twice".to_string(),
        })
    }

    pub(crate) fn add_register(
        &self,
        register: &str,
        data_type: DataType,
        len: usize,
        fanout: Arc<Fanout>,
    ) {
        self.registers.lock().push(TriggeredRegister {
            register: register.to_string(),
            data_type,
            len,
            fanout,
            last: Value::default_for(data_type, len),
        });
    }

    /// Run until shutdown.
    ///
    /// The initial trigger value is consumed first, then the first read
    /// waits until the device was functional once.
    pub fn run(&self) -> Result<()> {
        let queue = self
            .queue
            .get()
            .cloned()
            .ok_or_else(|| AppCoreError::Lifecycle {
                operation: "trigger fan-out".to_string(),
                cause: format!("trigger {} is not connected", self.trigger),
            })?;

        let mut trigger = queue.pop_blocking()?;
        self.session.wait_initial_value(&self.trigger, || Ok(()))?;
        tracing::debug!(trigger = %self.trigger, device = %self.session.alias(), "Trigger fan-out started");
        loop {
            self.read_all(&trigger)?;
            trigger = queue.pop_blocking()?;
        }
    }

    fn read_all(&self, trigger: &Update) -> Result<()> {
        let mut registers = self.registers.lock();
        for entry in registers.iter_mut() {
            let validity = match self
                .session
                .read_sync(&entry.register, entry.data_type, entry.len)
            {
                SyncRead::Fresh(value) => {
                    entry.last = value;
                    trigger.validity
                }
                SyncRead::Frozen(_) => DataValidity::Faulty,
            };
            entry.fanout.distribute(Update {
                value: entry.last.clone(),
                version: trigger.version,
                validity,
            })?;
        }
        Ok(())
    }
}
