//! Application modules and their registration.

use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};

use crate::accessor::{Input, InputShared, Output, OutputShared, UpdateMode};
use crate::connection::{Endpoint, EndpointRegistry};
use crate::context::RuntimeContext;
use appcore_core::error::{AppCoreError, Result};
use appcore_core::types::{ModuleId, VariablePath};
use appcore_core::{ModuleValidity, UserType, VersionNumber};

/// User logic running on its own thread.
///
/// Before `main_loop` is entered every input has received its initial
/// value. `main_loop` normally blocks on push-type inputs forever; it
/// returns `Err(Shutdown)` (via `?` on an accessor call) when the
/// application stops.
pub trait ApplicationModule: Send + 'static {
    /// Called on the setup thread before any worker starts. Outputs written
    /// here provide initial values.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// The module's processing loop.
    fn main_loop(&mut self) -> Result<()>;
}

/// Runtime state shared by all accessors of one module.
#[derive(Debug)]
pub struct ModuleState {
    id: ModuleId,
    name: String,
    ctx: Arc<RuntimeContext>,
    validity: OnceLock<ModuleValidity>,
    current_version: Mutex<VersionNumber>,
}

impl ModuleState {
    pub(crate) fn new(id: ModuleId, name: &str, ctx: Arc<RuntimeContext>) -> Self {
        Self {
            id,
            name: name.to_string(),
            ctx,
            validity: OnceLock::new(),
            current_version: Mutex::new(VersionNumber::null()),
        }
    }

    /// Module identifier.
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn ctx(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    pub(crate) fn set_validity(&self, validity: ModuleValidity) {
        let _ = self.validity.set(validity);
    }

    /// Fault bookkeeping; available once the application is initialised.
    pub fn validity(&self) -> Result<&ModuleValidity> {
        self.validity.get().ok_or_else(|| AppCoreError::Lifecycle {
            operation: "validity".to_string(),
            cause: format!("module '{}' is not connected yet", self.name),
        })
    }

    /// Version of the latest push update the module consumed.
    pub fn current_version(&self) -> VersionNumber {
        *self.current_version.lock()
    }

    pub(crate) fn advance_version(&self, version: VersionNumber) {
        let mut current = self.current_version.lock();
        if version > *current {
            *current = version;
        }
    }
}

/// Declares the accessors of a module while it is constructed.
///
/// Relative paths are resolved below `/<module name>`.
pub struct ModuleBuilder<'a> {
    state: Arc<ModuleState>,
    endpoints: &'a mut EndpointRegistry,
    inputs: Vec<Arc<InputShared>>,
}

impl<'a> ModuleBuilder<'a> {
    pub(crate) fn new(state: Arc<ModuleState>, endpoints: &'a mut EndpointRegistry) -> Self {
        Self {
            state,
            endpoints,
            inputs: Vec::new(),
        }
    }

    /// Identifier of the module under construction.
    pub fn id(&self) -> ModuleId {
        self.state.id()
    }

    /// Name of the module under construction.
    pub fn name(&self) -> &str {
        self.state.name()
    }

    /// Declare a scalar input.
    pub fn scalar_input<T: UserType>(&mut self, path: &str, mode: UpdateMode) -> Result<Input<T>> {
        self.array_input(path, mode, 1)
    }

    /// Declare an array input of `len` elements.
    pub fn array_input<T: UserType>(
        &mut self,
        path: &str,
        mode: UpdateMode,
        len: usize,
    ) -> Result<Input<T>> {
        let path = self.resolve(path)?;
        let shared = Arc::new(InputShared::new(
            path.clone(),
            T::DATA_TYPE,
            len,
            mode,
            Arc::clone(&self.state),
        ));
        self.endpoints
            .add(path, Endpoint::Input(Arc::clone(&shared)));
        self.inputs.push(Arc::clone(&shared));
        Ok(Input::from_shared(shared))
    }

    /// Declare a scalar output.
    pub fn scalar_output<T: UserType>(&mut self, path: &str) -> Result<Output<T>> {
        self.array_output(path, 1)
    }

    /// Declare an array output of `len` elements.
    pub fn array_output<T: UserType>(&mut self, path: &str, len: usize) -> Result<Output<T>> {
        let path = self.resolve(path)?;
        let shared = Arc::new(OutputShared::new(
            path.clone(),
            T::DATA_TYPE,
            len,
            Some(Arc::clone(&self.state)),
            Arc::clone(self.state.ctx()),
        ));
        self.endpoints
            .add(path, Endpoint::Output(Arc::clone(&shared)));
        Ok(Output::from_shared(shared))
    }

    pub(crate) fn into_inputs(self) -> Vec<Arc<InputShared>> {
        self.inputs
    }

    fn resolve(&self, path: &str) -> Result<VariablePath> {
        if path.starts_with('/') {
            VariablePath::parse(path)
        } else {
            VariablePath::parse(&format!("/{}/{}", self.state.name(), path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn state() -> Arc<ModuleState> {
        let ctx = Arc::new(RuntimeContext::new(RuntimeConfig::for_testing()));
        Arc::new(ModuleState::new(ModuleId::new(0), "Controller", ctx))
    }

    #[test]
    fn version_only_moves_forward() {
        let state = state();
        let (older, newer) = (VersionNumber::new(), VersionNumber::new());
        state.advance_version(newer);
        state.advance_version(older);
        assert_eq!(state.current_version(), newer);
    }

    #[test]
    fn relative_paths_resolve_below_module() {
        let state = state();
        let mut endpoints = EndpointRegistry::new();
        let mut builder = ModuleBuilder::new(state, &mut endpoints);
        let input = builder
            .scalar_input::<i32>("setpoint", UpdateMode::Push)
            .unwrap();
        let output = builder.scalar_output::<i32>("/heater/power").unwrap();

        assert_eq!(input.path().as_str(), "/Controller/setpoint");
        assert_eq!(output.path().as_str(), "/heater/power");
        assert_eq!(builder.into_inputs().len(), 1);
    }

    #[test]
    fn validity_requires_connection() {
        let state = state();
        assert_eq!(state.validity().unwrap_err().code(), "E208");
    }
}
