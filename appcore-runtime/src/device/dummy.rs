//! In-memory device backend with fault injection.
//!
//! Used by tests and demos in place of hardware. The [`DummyHandle`] stays
//! with the test and controls the backend after it has been handed to the
//! application.
//!
//! # Example
//!
//! ```
//! use appcore_runtime::device::DummyBackend;
//! use appcore_core::Value;
//!
//! let backend = DummyBackend::new("adc", [1]);
//! let handle = backend.handle();
//! handle.set_register("CH0", Value::Int32(vec![42]));
//! handle.fail_open(true);
//! assert_eq!(handle.register("CH0"), Some(Value::Int32(vec![42])));
//! ```

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::backend::{AsyncReadSink, DeviceBackend};
use appcore_core::error::{AppCoreError, Result};
use appcore_core::types::ResourceId;
use appcore_core::Value;

#[derive(Debug, Default)]
struct DummyState {
    registers: BTreeMap<String, Value>,
    opened: bool,
    open_calls: u64,
    fail_open: bool,
    fail_reads: bool,
    fail_writes: bool,
    writes: Vec<(String, Value)>,
    sink: Option<AsyncReadSink>,
}

/// Device backend keeping its registers in memory.
#[derive(Debug)]
pub struct DummyBackend {
    name: String,
    resources: BTreeSet<ResourceId>,
    state: Arc<Mutex<DummyState>>,
}

impl DummyBackend {
    /// Create a backend depending on the given resource ids.
    pub fn new(name: impl Into<String>, resources: impl IntoIterator<Item = u64>) -> Self {
        Self {
            name: name.into(),
            resources: resources.into_iter().map(ResourceId::new).collect(),
            state: Arc::new(Mutex::new(DummyState::default())),
        }
    }

    /// A handle controlling this backend.
    pub fn handle(&self) -> DummyHandle {
        DummyHandle {
            name: self.name.clone(),
            state: Arc::clone(&self.state),
        }
    }

    fn transfer_error(&self, register: &str, cause: &str) -> AppCoreError {
        AppCoreError::DeviceTransfer {
            device: self.name.clone(),
            register: register.to_string(),
            cause: cause.to_string(),
        }
    }
}

impl DeviceBackend for DummyBackend {
    fn open(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.open_calls += 1;
        if state.fail_open {
            state.opened = false;
            return Err(AppCoreError::DeviceOpen {
                device: self.name.clone(),
                cause: "simulated open failure".to_string(),
            });
        }
        state.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.opened = false;
        state.sink = None;
    }

    fn read(&mut self, register: &str) -> Result<Value> {
        let state = self.state.lock();
        if !state.opened {
            return Err(self.transfer_error(register, "device not open"));
        }
        if state.fail_reads {
            return Err(self.transfer_error(register, "simulated read failure"));
        }
        state
            .registers
            .get(register)
            .cloned()
            .ok_or_else(|| self.transfer_error(register, "no such register"))
    }

    fn write(&mut self, register: &str, value: &Value) -> Result<()> {
        let mut state = self.state.lock();
        if !state.opened {
            return Err(self.transfer_error(register, "device not open"));
        }
        if state.fail_writes {
            return Err(self.transfer_error(register, "simulated write failure"));
        }
        state.registers.insert(register.to_string(), value.clone());
        state.writes.push((register.to_string(), value.clone()));
        Ok(())
    }

    fn activate_async_read(&mut self, sink: AsyncReadSink) -> Result<()> {
        let initial: Vec<(String, Value)> = {
            let mut state = self.state.lock();
            state.sink = Some(sink.clone());
            sink.registers()
                .into_iter()
                .filter_map(|r| state.registers.get(&r).cloned().map(|v| (r, v)))
                .collect()
        };
        for (register, value) in initial {
            sink.push(&register, value);
        }
        Ok(())
    }

    fn is_functional(&self) -> bool {
        self.state.lock().opened
    }

    fn involved_resource_ids(&self) -> BTreeSet<ResourceId> {
        self.resources.clone()
    }
}

/// Test-side control of a [`DummyBackend`].
#[derive(Debug, Clone)]
pub struct DummyHandle {
    name: String,
    state: Arc<Mutex<DummyState>>,
}

impl DummyHandle {
    /// Device name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set a register value without any notification.
    pub fn set_register(&self, register: &str, value: Value) {
        self.state.lock().registers.insert(register.to_string(), value);
    }

    /// Current register value.
    pub fn register(&self, register: &str) -> Option<Value> {
        self.state.lock().registers.get(register).cloned()
    }

    /// Set a register and deliver it to asynchronous subscribers.
    pub fn push_async(&self, register: &str, value: Value) {
        let sink = {
            let mut state = self.state.lock();
            state.registers.insert(register.to_string(), value.clone());
            if state.opened {
                state.sink.clone()
            } else {
                None
            }
        };
        if let Some(sink) = sink {
            sink.push(register, value);
        }
    }

    /// Report a fault through the asynchronous path, as hardware losing
    /// its connection would.
    pub fn report_async_fault(&self, message: &str) {
        let sink = self.state.lock().sink.clone();
        if let Some(sink) = sink {
            sink.report_exception(message);
        }
    }

    /// Make `open()` fail.
    pub fn fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Make register reads fail.
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Make register writes fail.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Whether the backend is open.
    pub fn is_open(&self) -> bool {
        self.state.lock().opened
    }

    /// Number of `open()` calls, failed ones included.
    pub fn open_calls(&self) -> u64 {
        self.state.lock().open_calls
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    /// Successful writes in order.
    pub fn writes(&self) -> Vec<(String, Value)> {
        self.state.lock().writes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_require_open_device() {
        let mut backend = DummyBackend::new("dev", [1]);
        let handle = backend.handle();
        handle.set_register("R", Value::Int32(vec![5]));

        assert!(backend.read("R").unwrap_err().is_transient());
        backend.open().unwrap();
        assert_eq!(backend.read("R").unwrap(), Value::Int32(vec![5]));
        assert!(backend.is_functional());
    }

    #[test]
    fn injected_faults() {
        let mut backend = DummyBackend::new("dev", [1, 2]);
        let handle = backend.handle();
        handle.fail_open(true);
        assert_eq!(backend.open().unwrap_err().code(), "E101");
        assert_eq!(handle.open_calls(), 1);

        handle.fail_open(false);
        backend.open().unwrap();
        handle.fail_writes(true);
        assert_eq!(
            backend.write("R", &Value::Int32(vec![1])).unwrap_err().code(),
            "E102"
        );
        assert_eq!(handle.write_count(), 0);
        assert_eq!(backend.involved_resource_ids().len(), 2);
    }
}
