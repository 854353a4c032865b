//! Output accessors. A write stamps the module's version and validity and
//! hands the update to the variable's fan-out.

use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use crate::context::RuntimeContext;
use crate::module::ModuleState;
use crate::transfer::{Fanout, Update};
use appcore_core::error::{AppCoreError, Result};
use appcore_core::types::{AccessorId, VariablePath};
use appcore_core::{DataType, DataValidity, UserType, Value, VersionNumber, WriteValidity};

#[derive(Debug)]
struct OutputState {
    value: Value,
    validity: WriteValidity,
    last_version: VersionNumber,
}

/// Type-erased state of one output accessor.
///
/// Outputs without an owner belong to a device session (status variables).
#[derive(Debug)]
pub(crate) struct OutputShared {
    id: AccessorId,
    path: VariablePath,
    data_type: DataType,
    len: usize,
    owner: Option<Arc<ModuleState>>,
    ctx: Arc<RuntimeContext>,
    fanout: OnceLock<Arc<Fanout>>,
    state: Mutex<OutputState>,
}

impl OutputShared {
    pub(crate) fn new(
        path: VariablePath,
        data_type: DataType,
        len: usize,
        owner: Option<Arc<ModuleState>>,
        ctx: Arc<RuntimeContext>,
    ) -> Self {
        Self {
            id: AccessorId::next(),
            path,
            data_type,
            len,
            owner,
            ctx,
            fanout: OnceLock::new(),
            state: Mutex::new(OutputState {
                value: Value::default_for(data_type, len),
                validity: WriteValidity::new(),
                last_version: VersionNumber::null(),
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

    pub(crate) fn owner(&self) -> Option<&Arc<ModuleState>> {
        self.owner.as_ref()
    }

    pub(crate) fn attach(&self, fanout: Arc<Fanout>) {
        let _ = self.fanout.set(fanout);
    }

    pub(crate) fn set_value(&self, value: Value) {
        self.state.lock().value = value;
    }

    fn set_explicit_validity(&self, validity: DataValidity) {
        self.state.lock().validity.set_explicit(validity);
    }

    /// Send the current value to every consumer.
    ///
    /// The version is the owner's current version if that is newer than
    /// anything this output wrote before, otherwise a fresh one.
    pub(crate) fn write(&self) -> Result<()> {
        self.ctx.cancel().checkpoint()?;
        let fanout = self.fanout.get().ok_or_else(|| AppCoreError::Lifecycle {
            operation: format!("write {}", self.path),
            cause: "output is not connected".to_string(),
        })?;
        let owner = match &self.owner {
            Some(owner) => Some(owner.validity()?),
            None => None,
        };
        let update = {
            let mut state = self.state.lock();
            let validity = state.validity.on_pre_write(owner);
            let current = self
                .owner
                .as_ref()
                .map_or(VersionNumber::null(), |o| o.current_version());
            let version = if current > state.last_version {
                current
            } else {
                VersionNumber::new()
            };
            state.last_version = version;
            Update {
                value: state.value.clone(),
                version,
                validity,
            }
        };
        fanout.distribute(update)
    }
}

/// Typed output of a module.
#[derive(Debug)]
pub struct Output<T: UserType> {
    shared: Arc<OutputShared>,
    _marker: PhantomData<T>,
}

impl<T: UserType> Output<T> {
    pub(crate) fn from_shared(shared: Arc<OutputShared>) -> Self {
        Self {
            shared,
            _marker: PhantomData,
        }
    }

    /// Accessor identifier.
    pub fn id(&self) -> AccessorId {
        self.shared.id()
    }

    /// Variable path.
    pub fn path(&self) -> &VariablePath {
        self.shared.path()
    }

    /// Set the value of a scalar output (the first element of an array).
    pub fn set(&mut self, value: T) {
        let mut values = T::from_value(&self.shared.state.lock().value).unwrap_or_default();
        match values.first_mut() {
            Some(first) => *first = value,
            None => values.push(value),
        }
        self.shared.set_value(T::to_value(&values));
    }

    /// Set all elements. The length must match the declared length.
    pub fn set_values(&mut self, values: &[T]) -> Result<()> {
        if values.len() != self.shared.len() {
            return Err(AppCoreError::TypeMismatch {
                path: self.shared.path().to_string(),
                expected: self.shared.data_type(),
                expected_len: self.shared.len(),
                actual: T::DATA_TYPE,
                actual_len: values.len(),
            });
        }
        self.shared.set_value(T::to_value(values));
        Ok(())
    }

    /// Send the current value.
    pub fn write(&mut self) -> Result<()> {
        self.shared.write()
    }

    /// Set a scalar value and send it.
    pub fn write_value(&mut self, value: T) -> Result<()> {
        self.set(value);
        self.write()
    }

    /// Mark outgoing data explicitly faulty (or clear the mark).
    ///
    /// The flag stays in effect for all later writes until it is set back
    /// to [`DataValidity::Ok`].
    pub fn set_validity(&mut self, validity: DataValidity) {
        self.shared.set_explicit_validity(validity);
    }

    /// Value currently held by the accessor.
    pub fn value(&self) -> T {
        T::from_value(&self.shared.state.lock().value)
            .and_then(|v| v.into_iter().next())
            .unwrap_or_default()
    }
}
