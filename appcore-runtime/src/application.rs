//! Application assembly and lifecycle.
//!
//! An [`Application`] goes through three phases:
//!
//! 1. **Registration**: modules, devices, register connections and
//!    initialisation handlers are declared.
//! 2. **Initialisation**: endpoints are validated and wired, circular
//!    networks are detected and recovery groups are formed.
//! 3. **Running**: every module, every device session and every trigger
//!    fan-out runs on its own named thread until [`Application::shutdown`].

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::accessor::InputShared;
use crate::config::RuntimeConfig;
use crate::connection::{self, ConnectionReport, Endpoint, EndpointRegistry};
use crate::context::RuntimeContext;
use crate::device::{DeviceBackend, DeviceSession, DeviceStats, RegisterAccess};
use crate::module::{ApplicationModule, ModuleBuilder, ModuleState};
use crate::process_variable::ProcessVariableTable;
use crate::recovery::{RecoveryCoordinator, RecoveryGroupRegistry};
use crate::trigger::TriggerFanOut;
use crate::{instrument_module, instrument_recovery, instrument_trigger};
use appcore_core::error::{AppCoreError, Result};
use appcore_core::types::{DeviceId, ModuleId, VariablePath};
use appcore_core::UserType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Registering,
    Initialised,
    Running,
    ShutDown,
}

struct ModuleEntry {
    state: Arc<ModuleState>,
    module: Option<Box<dyn ApplicationModule>>,
    inputs: Vec<Arc<InputShared>>,
}

/// Error recorded by a worker thread, with the thread name.
pub type WorkerError = (String, AppCoreError);

/// A control-system application: modules, devices and their wiring.
///
/// # Example
///
/// ```
/// use appcore_runtime::prelude::*;
///
/// struct Doubler {
///     input: Input<i32>,
///     output: Output<i32>,
/// }
///
/// impl ApplicationModule for Doubler {
///     fn main_loop(&mut self) -> Result<()> {
///         loop {
///             self.output.write_value(self.input.value() * 2)?;
///             self.input.read()?;
///         }
///     }
/// }
///
/// let mut app = Application::new("demo", RuntimeConfig::for_testing()).unwrap();
/// app.add_module("Doubler", |b| {
///     Ok(Doubler {
///         input: b.scalar_input("/in", UpdateMode::Push)?,
///         output: b.scalar_output("/out")?,
///     })
/// })
/// .unwrap();
/// app.initialise().unwrap();
/// assert_eq!(app.connection_report().unwrap().variables.len(), 2);
/// ```
pub struct Application {
    name: String,
    ctx: Arc<RuntimeContext>,
    phase: Phase,
    endpoints: EndpointRegistry,
    modules: Vec<ModuleEntry>,
    sessions: Vec<Arc<DeviceSession>>,
    triggers: Vec<Arc<TriggerFanOut>>,
    variables: Arc<ProcessVariableTable>,
    groups: RecoveryGroupRegistry,
    report: Option<ConnectionReport>,
    workers: Vec<JoinHandle<()>>,
    worker_errors: Arc<Mutex<Vec<WorkerError>>>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("modules", &self.modules.len())
            .field("devices", &self.sessions.len())
            .finish()
    }
}

fn validate_name(name: &str) -> Result<()> {
    let problem = if name.is_empty() {
        Some("name is empty")
    } else if name.contains('/') {
        Some("name contains '/'")
    } else if name.chars().any(char::is_whitespace) {
        Some("name contains whitespace")
    } else {
        None
    };
    match problem {
        Some(cause) => Err(AppCoreError::InvalidName {
            name: name.to_string(),
            cause: cause.to_string(),
        }),
        None => Ok(()),
    }
}

fn spawn_error(err: std::io::Error) -> AppCoreError {
    AppCoreError::Lifecycle {
        operation: "spawn worker".to_string(),
        cause: err.to_string(),
    }
}

impl Application {
    /// Create an empty application.
    pub fn new(name: impl Into<String>, config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            ctx: Arc::new(RuntimeContext::new(config)),
            phase: Phase::Registering,
            endpoints: EndpointRegistry::new(),
            modules: Vec::new(),
            sessions: Vec::new(),
            triggers: Vec::new(),
            variables: Arc::new(ProcessVariableTable::new()),
            groups: RecoveryGroupRegistry::default(),
            report: None,
            workers: Vec::new(),
            worker_errors: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Application name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared runtime state.
    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    /// Whether workers are running.
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    fn require(&self, phase: Phase, operation: &str) -> Result<()> {
        if self.phase != phase {
            return Err(AppCoreError::Lifecycle {
                operation: operation.to_string(),
                cause: format!("application is {:?}, expected {:?}", self.phase, phase),
            });
        }
        Ok(())
    }

    /// Register a module. `factory` declares its accessors and builds it.
    pub fn add_module<M, F>(&mut self, name: &str, factory: F) -> Result<ModuleId>
    where
        M: ApplicationModule,
        F: FnOnce(&mut ModuleBuilder<'_>) -> Result<M>,
    {
        self.require(Phase::Registering, "add_module")?;
        validate_name(name)?;
        if self.modules.iter().any(|m| m.state.name() == name) {
            return Err(AppCoreError::DuplicateRegistration {
                what: "module",
                name: name.to_string(),
            });
        }

        let id = ModuleId::new(self.modules.len() as u32);
        let state = Arc::new(ModuleState::new(id, name, Arc::clone(&self.ctx)));
        let mut builder = ModuleBuilder::new(Arc::clone(&state), &mut self.endpoints);
        let module = factory(&mut builder)?;
        let inputs = builder.into_inputs();

        tracing::debug!(module = name, id = %id, inputs = inputs.len(), "Module registered");
        self.modules.push(ModuleEntry {
            state,
            module: Some(Box::new(module)),
            inputs,
        });
        Ok(id)
    }

    /// Register a device under `alias`.
    pub fn add_device(
        &mut self,
        alias: &str,
        backend: impl DeviceBackend + 'static,
    ) -> Result<DeviceId> {
        self.require(Phase::Registering, "add_device")?;
        validate_name(alias)?;
        if self.sessions.iter().any(|s| s.alias() == alias) {
            return Err(AppCoreError::DuplicateRegistration {
                what: "device",
                name: alias.to_string(),
            });
        }
        let id = DeviceId::new(self.sessions.len() as u32);
        let session = DeviceSession::new(id, alias, Box::new(backend), Arc::clone(&self.ctx))?;
        tracing::debug!(device = alias, id = %id, resources = ?session.resources(), "Device registered");
        self.sessions.push(session);
        Ok(id)
    }

    fn session(&self, device: DeviceId) -> Result<&Arc<DeviceSession>> {
        self.sessions
            .iter()
            .find(|s| s.id() == device)
            .ok_or(AppCoreError::UnknownDevice { device })
    }

    /// Connect a device register to a variable path.
    pub fn connect_device_register<T: UserType>(
        &mut self,
        device: DeviceId,
        register: &str,
        path: &str,
        access: RegisterAccess,
        len: usize,
    ) -> Result<()> {
        self.require(Phase::Registering, "connect_device_register")?;
        let session = Arc::clone(self.session(device)?);
        let path = VariablePath::parse(path)?;
        self.endpoints.add(
            path,
            Endpoint::Device {
                session,
                register: register.to_string(),
                access,
                data_type: T::DATA_TYPE,
                len,
            },
        );
        Ok(())
    }

    /// Connect a poll-type device register to `path`, read whenever the
    /// variable `trigger` receives an update.
    ///
    /// Unlike a plain poll register, the resulting network may feed
    /// push-type inputs. All registers of one device sharing a trigger are
    /// read by the same worker and carry the trigger's version.
    pub fn connect_triggered_register<T: UserType>(
        &mut self,
        device: DeviceId,
        register: &str,
        path: &str,
        len: usize,
        trigger: &str,
    ) -> Result<()> {
        self.require(Phase::Registering, "connect_triggered_register")?;
        let session = Arc::clone(self.session(device)?);
        let path = VariablePath::parse(path)?;
        let trigger = VariablePath::parse(trigger)?;
        let existing = self
            .triggers
            .iter()
            .find(|t| t.trigger() == &trigger && t.session().id() == device)
            .cloned();
        let fanout = match existing {
            Some(fanout) => fanout,
            None => {
                let fanout = Arc::new(TriggerFanOut::new(trigger.clone(), session));
                self.endpoints
                    .add(trigger, Endpoint::Trigger(Arc::clone(&fanout)));
                self.triggers.push(Arc::clone(&fanout));
                fanout
            }
        };
        self.endpoints.add(
            path,
            Endpoint::Triggered {
                fanout,
                register: register.to_string(),
                data_type: T::DATA_TYPE,
                len,
            },
        );
        Ok(())
    }

    /// Register an initialisation handler, run after every (re-)open of
    /// `device` in registration order.
    pub fn add_initialisation_handler(
        &mut self,
        device: DeviceId,
        handler: impl Fn(&mut dyn DeviceBackend) -> Result<()> + Send + Sync + 'static,
    ) -> Result<()> {
        self.require(Phase::Registering, "add_initialisation_handler")?;
        self.session(device)?.add_init_handler(Box::new(handler));
        Ok(())
    }

    /// Enable testable mode. The calling thread becomes the test thread.
    pub fn enable_testable_mode(&self) -> Result<()> {
        if matches!(self.phase, Phase::Running | Phase::ShutDown) {
            return Err(AppCoreError::Lifecycle {
                operation: "enable_testable_mode".to_string(),
                cause: "application already started".to_string(),
            });
        }
        self.ctx.testable().enable();
        Ok(())
    }

    /// Validate and wire all endpoints. Idempotent.
    pub fn initialise(&mut self) -> Result<()> {
        match self.phase {
            Phase::Initialised => return Ok(()),
            Phase::Registering => {}
            _ => self.require(Phase::Registering, "initialise")?,
        }
        let states: Vec<Arc<ModuleState>> =
            self.modules.iter().map(|m| Arc::clone(&m.state)).collect();
        let endpoints = std::mem::take(&mut self.endpoints);
        let connected = connection::connect(endpoints, &states, &self.sessions, &self.ctx)?;

        self.variables = Arc::new(connected.variables);
        self.groups = connected.groups;
        self.report = Some(connected.report);
        self.phase = Phase::Initialised;
        Ok(())
    }

    /// Start all workers, initialising first if necessary.
    pub fn run(&mut self) -> Result<()> {
        if self.phase == Phase::Registering {
            self.initialise()?;
        }
        self.require(Phase::Initialised, "run")?;

        for entry in &mut self.modules {
            if let Some(module) = entry.module.as_mut() {
                module.prepare()?;
            }
        }
        for session in &self.sessions {
            session.prepare();
        }

        for session in &self.sessions {
            let group = Arc::clone(self.groups.group_of(session.id())?);
            let coordinator =
                RecoveryCoordinator::new(Arc::clone(session), Arc::clone(&group), Arc::clone(&self.ctx));
            let ctx = Arc::clone(&self.ctx);
            let errors = Arc::clone(&self.worker_errors);
            let alias = session.alias().to_string();
            let thread_name = format!("device:{}", alias);
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    let _span = instrument_recovery!(alias, group.id()).entered();
                    ctx.testable().lock();
                    let result = coordinator.run();
                    ctx.testable().unlock();
                    record(&errors, thread_name, result);
                })
                .map_err(spawn_error)?;
            self.workers.push(handle);
        }

        for trigger in &self.triggers {
            let trigger = Arc::clone(trigger);
            let ctx = Arc::clone(&self.ctx);
            let errors = Arc::clone(&self.worker_errors);
            let thread_name = format!("trigger:{}", trigger.trigger());
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    let _span =
                        instrument_trigger!(trigger.trigger(), trigger.session().alias()).entered();
                    ctx.testable().lock();
                    let result = trigger.run();
                    ctx.testable().unlock();
                    record(&errors, thread_name, result);
                })
                .map_err(spawn_error)?;
            self.workers.push(handle);
        }

        for entry in &mut self.modules {
            let Some(mut module) = entry.module.take() else {
                continue;
            };
            let inputs = entry.inputs.clone();
            let ctx = Arc::clone(&self.ctx);
            let errors = Arc::clone(&self.worker_errors);
            let (id, name) = (entry.state.id(), entry.state.name().to_string());
            let thread_name = format!("module:{}", name);
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    let _span = instrument_module!(id, name).entered();
                    ctx.testable().lock();
                    let result = inputs
                        .iter()
                        .try_for_each(|input| input.read_initial())
                        .and_then(|()| module.main_loop());
                    ctx.testable().unlock();
                    record(&errors, thread_name, result);
                })
                .map_err(spawn_error)?;
            self.workers.push(handle);
        }

        self.phase = Phase::Running;
        tracing::info!(
            application = %self.name,
            modules = self.modules.len(),
            devices = self.sessions.len(),
            triggers = self.triggers.len(),
            testable = self.ctx.testable().is_enabled(),
            "Application running"
        );
        Ok(())
    }

    /// Stop all workers and wait for them to finish. Idempotent.
    pub fn shutdown(&mut self) {
        if self.phase == Phase::ShutDown {
            return;
        }
        let was_running = self.phase == Phase::Running;
        self.phase = Phase::ShutDown;
        self.ctx.cancel().cancel();
        self.ctx.testable().shutdown();
        self.groups.shutdown();

        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                tracing::error!(worker = %name, "Worker panicked");
            }
        }
        if was_running {
            for session in &self.sessions {
                session.close();
            }
            tracing::info!(application = %self.name, "Application shut down");
        }
    }

    /// Wiring summary; available after initialisation.
    pub fn connection_report(&self) -> Option<&ConnectionReport> {
        self.report.as_ref()
    }

    /// Control-system view of all variables.
    pub fn process_variables(&self) -> Result<&Arc<ProcessVariableTable>> {
        if self.phase == Phase::Registering {
            return Err(AppCoreError::Lifecycle {
                operation: "process_variables".to_string(),
                cause: "application is not initialised".to_string(),
            });
        }
        Ok(&self.variables)
    }

    /// Recovery groups; empty before initialisation.
    pub fn recovery_groups(&self) -> &RecoveryGroupRegistry {
        &self.groups
    }

    /// Counters of every device session.
    pub fn device_stats(&self) -> Vec<DeviceStats> {
        self.sessions.iter().map(|s| s.stats()).collect()
    }

    /// Look up a device session by alias.
    pub fn device(&self, alias: &str) -> Option<&Arc<DeviceSession>> {
        self.sessions.iter().find(|s| s.alias() == alias)
    }

    /// Errors that terminated worker threads, other than shutdown.
    pub fn worker_errors(&self) -> Vec<WorkerError> {
        self.worker_errors.lock().clone()
    }
}

fn record(errors: &Mutex<Vec<WorkerError>>, worker: String, result: Result<()>) {
    match result {
        Ok(()) => tracing::debug!(%worker, "Worker finished"),
        Err(err) if err.is_shutdown() => tracing::debug!(%worker, "Worker stopped"),
        Err(err) => {
            tracing::error!(%worker, error = %err, "Worker failed");
            errors.lock().push((worker, err));
        }
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DummyBackend;

    fn app() -> Application {
        Application::new("test", RuntimeConfig::for_testing()).unwrap()
    }

    #[test]
    fn names_are_validated() {
        let mut app = app();
        let err = app.add_device("bad alias", DummyBackend::new("x", [1])).unwrap_err();
        assert_eq!(err.code(), "E206");
        let err = app.add_device("a/b", DummyBackend::new("x", [1])).unwrap_err();
        assert_eq!(err.code(), "E206");
    }

    #[test]
    fn duplicate_device_alias_is_rejected() {
        let mut app = app();
        app.add_device("adc", DummyBackend::new("adc", [1])).unwrap();
        let err = app.add_device("adc", DummyBackend::new("adc", [2])).unwrap_err();
        assert_eq!(err.code(), "E204");
    }

    #[test]
    fn unknown_device_is_rejected() {
        let mut app = app();
        let err = app
            .connect_device_register::<i32>(DeviceId::new(7), "R", "/r", RegisterAccess::ReadPoll, 1)
            .unwrap_err();
        assert_eq!(err.code(), "E210");
    }

    #[test]
    fn registration_closes_after_initialise() {
        let mut app = app();
        app.add_device("adc", DummyBackend::new("adc", [1])).unwrap();
        app.initialise().unwrap();
        app.initialise().unwrap();
        let err = app.add_device("dac", DummyBackend::new("dac", [2])).unwrap_err();
        assert_eq!(err.code(), "E208");

        let report = app.connection_report().unwrap();
        assert_eq!(report.recovery_groups.len(), 1);
        assert!(app
            .process_variables()
            .unwrap()
            .get(&VariablePath::parse("/Devices/adc/status").unwrap())
            .is_ok());
    }
}
