//! Test facility: drives an application from the control-system side.
//!
//! Defaults are set before the application runs; afterwards variables are
//! read and written through [`ProcessVariableAccessor`]s and, in testable
//! mode, the application is stepped until every queued update is consumed.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::application::Application;
use crate::process_variable::ProcessVariable;
use crate::transfer::Update;
use appcore_core::error::{AppCoreError, Result};
use appcore_core::types::VariablePath;
use appcore_core::{DataValidity, UserType, Value, VersionNumber};

/// Control-system side accessor to one process variable.
#[derive(Debug)]
pub struct ProcessVariableAccessor<T: UserType> {
    pv: Arc<ProcessVariable>,
    value: Value,
    validity: DataValidity,
    version: VersionNumber,
    _marker: PhantomData<T>,
}

impl<T: UserType> ProcessVariableAccessor<T> {
    fn new(pv: Arc<ProcessVariable>) -> Result<Self> {
        if pv.data_type() != T::DATA_TYPE {
            return Err(AppCoreError::TypeMismatch {
                path: pv.path().to_string(),
                expected: pv.data_type(),
                expected_len: pv.len(),
                actual: T::DATA_TYPE,
                actual_len: pv.len(),
            });
        }
        let value = Value::default_for(pv.data_type(), pv.len());
        Ok(Self {
            pv,
            value,
            validity: DataValidity::Ok,
            version: VersionNumber::null(),
            _marker: PhantomData,
        })
    }

    /// Variable path.
    pub fn path(&self) -> &VariablePath {
        self.pv.path()
    }

    /// Fetch the latest value published by the application. Returns
    /// whether a value was available.
    pub fn read(&mut self) -> bool {
        match self.pv.read() {
            Some(update) => {
                self.value = update.value;
                self.validity = update.validity;
                self.version = update.version;
                true
            }
            None => false,
        }
    }

    /// First element of the held value.
    pub fn value(&self) -> T {
        self.values().into_iter().next().unwrap_or_default()
    }

    /// All elements of the held value.
    pub fn values(&self) -> Vec<T> {
        T::from_value(&self.value).unwrap_or_default()
    }

    /// Set the first element.
    pub fn set(&mut self, value: T) {
        let mut values = self.values();
        match values.first_mut() {
            Some(first) => *first = value,
            None => values.push(value),
        }
        self.value = T::to_value(&values);
    }

    /// Set all elements.
    pub fn set_values(&mut self, values: &[T]) -> Result<()> {
        if values.len() != self.pv.len() {
            return Err(AppCoreError::TypeMismatch {
                path: self.pv.path().to_string(),
                expected: self.pv.data_type(),
                expected_len: self.pv.len(),
                actual: T::DATA_TYPE,
                actual_len: values.len(),
            });
        }
        self.value = T::to_value(values);
        Ok(())
    }

    /// Set the validity sent with the next write.
    pub fn set_validity(&mut self, validity: DataValidity) {
        self.validity = validity;
    }

    /// Send the held value into the application.
    pub fn write(&mut self) -> Result<()> {
        self.version = VersionNumber::new();
        self.pv.write(Update {
            value: self.value.clone(),
            version: self.version,
            validity: self.validity,
        })
    }

    /// Validity of the held value.
    pub fn validity(&self) -> DataValidity {
        self.validity
    }

    /// Version of the held value.
    pub fn version(&self) -> VersionNumber {
        self.version
    }
}

/// Runs an application under test.
///
/// In testable mode the facility's thread is the test thread: the
/// application only runs while a step is in progress.
#[derive(Debug)]
pub struct TestFacility {
    app: Application,
    testable: bool,
    defaults: BTreeMap<VariablePath, Value>,
    started: bool,
}

impl TestFacility {
    /// Wrap `app`, enabling testable mode if requested.
    pub fn new(app: Application, testable: bool) -> Result<Self> {
        if testable {
            app.enable_testable_mode()?;
        }
        Ok(Self {
            app,
            testable,
            defaults: BTreeMap::new(),
            started: false,
        })
    }

    /// Wrap `app`, taking the testable flag from its configuration.
    pub fn from_application(app: Application) -> Result<Self> {
        let testable = app.context().config().testable;
        Self::new(app, testable)
    }

    fn require_not_running(&self, operation: &str) -> Result<()> {
        if self.started {
            return Err(AppCoreError::Lifecycle {
                operation: operation.to_string(),
                cause: "defaults must be set before the application runs".to_string(),
            });
        }
        Ok(())
    }

    /// Default value for a control-system fed scalar.
    pub fn set_scalar_default<T: UserType>(&mut self, path: &str, value: T) -> Result<()> {
        self.require_not_running("set_scalar_default")?;
        self.defaults
            .insert(VariablePath::parse(path)?, T::to_value(&[value]));
        Ok(())
    }

    /// Default value for a control-system fed array.
    pub fn set_array_default<T: UserType>(&mut self, path: &str, values: &[T]) -> Result<()> {
        self.require_not_running("set_array_default")?;
        self.defaults
            .insert(VariablePath::parse(path)?, T::to_value(values));
        Ok(())
    }

    /// Initialise the application, write the initial value of every
    /// control-system fed variable and start it. In testable mode, step
    /// until all devices are up and all initial values are processed.
    pub fn run_application(&mut self) -> Result<()> {
        self.started = true;
        self.app.initialise()?;
        let variables = Arc::clone(self.app.process_variables()?);

        for (path, value) in &self.defaults {
            let pv = variables.get(path)?;
            if !pv.is_writeable() {
                return Err(AppCoreError::InvalidWiring {
                    path: path.to_string(),
                    cause: "default set for a variable not fed by the control system".to_string(),
                });
            }
            if value.data_type() != pv.data_type() || value.len() != pv.len() {
                return Err(AppCoreError::TypeMismatch {
                    path: path.to_string(),
                    expected: pv.data_type(),
                    expected_len: pv.len(),
                    actual: value.data_type(),
                    actual_len: value.len(),
                });
            }
        }

        for pv in variables.writeable() {
            let value = self
                .defaults
                .get(pv.path())
                .cloned()
                .unwrap_or_else(|| Value::default_for(pv.data_type(), pv.len()));
            pv.write(Update::fresh(value))?;
        }

        self.app.run()?;
        if self.testable {
            self.step_application(true)?;
        }
        Ok(())
    }

    /// Let the application process everything sent so far.
    pub fn step_application(&self, wait_for_devices: bool) -> Result<()> {
        self.app.context().testable().step(wait_for_devices)
    }

    /// Whether unprocessed data is pending.
    pub fn can_step_application(&self) -> bool {
        self.app.context().testable().can_step(false)
    }

    fn variable(&self, path: &str) -> Result<Arc<ProcessVariable>> {
        self.app
            .process_variables()?
            .get(&VariablePath::parse(path)?)
    }

    /// Accessor to a scalar variable.
    pub fn get_scalar<T: UserType>(&self, path: &str) -> Result<ProcessVariableAccessor<T>> {
        ProcessVariableAccessor::new(self.variable(path)?)
    }

    /// Accessor to an array variable.
    pub fn get_array<T: UserType>(&self, path: &str) -> Result<ProcessVariableAccessor<T>> {
        ProcessVariableAccessor::new(self.variable(path)?)
    }

    /// Write a scalar into the application.
    pub fn write_scalar<T: UserType>(&self, path: &str, value: T) -> Result<()> {
        let mut accessor = self.get_scalar::<T>(path)?;
        accessor.set(value);
        accessor.write()
    }

    /// Latest scalar value published by the application.
    pub fn read_scalar<T: UserType>(&self, path: &str) -> Result<T> {
        let mut accessor = self.get_scalar::<T>(path)?;
        accessor.read();
        Ok(accessor.value())
    }

    /// Write an array into the application.
    pub fn write_array<T: UserType>(&self, path: &str, values: &[T]) -> Result<()> {
        let mut accessor = self.get_array::<T>(path)?;
        accessor.set_values(values)?;
        accessor.write()
    }

    /// Latest array value published by the application.
    pub fn read_array<T: UserType>(&self, path: &str) -> Result<Vec<T>> {
        let mut accessor = self.get_array::<T>(path)?;
        accessor.read();
        Ok(accessor.values())
    }

    /// The application under test.
    pub fn application(&self) -> &Application {
        &self.app
    }

    /// Stop the application.
    pub fn shutdown(&mut self) {
        self.app.shutdown();
    }
}
