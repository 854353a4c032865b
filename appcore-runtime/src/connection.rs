//! Wiring of endpoints into variable networks.
//!
//! All accessors and device registers sharing a path form one network with
//! at most one feeder. Connecting runs in two passes: the first validates
//! every network and builds the module graph for circular dependency
//! detection, the second creates the transfer channels.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::accessor::{InputShared, InputSource, OutputShared, UpdateMode};
use crate::context::RuntimeContext;
use crate::device::{DeviceSession, RegisterAccess};
use crate::module::ModuleState;
use crate::process_variable::{ProcessVariable, ProcessVariableTable};
use crate::recovery::RecoveryGroupRegistry;
use crate::transfer::{Fanout, LatestCell, PushQueue, Sink};
use crate::trigger::TriggerFanOut;
use appcore_core::error::{AppCoreError, Result};
use appcore_core::graph::{Edge, GraphNode};
use appcore_core::types::{DeviceId, ModuleId, NetworkId, VariablePath};
use appcore_core::validity::NetworkInvalidity;
use appcore_core::{
    detect_circular_networks, DataType, ModuleGraph, ModuleValidity, NetworkTable,
};

/// One end of a variable network.
#[derive(Debug)]
pub(crate) enum Endpoint {
    /// Module output or device status output.
    Output(Arc<OutputShared>),
    /// Module input.
    Input(Arc<InputShared>),
    /// Device register.
    Device {
        session: Arc<DeviceSession>,
        register: String,
        access: RegisterAccess,
        data_type: DataType,
        len: usize,
    },
    /// Trigger of a fan-out. Takes the type of the rest of the network.
    Trigger(Arc<TriggerFanOut>),
    /// Poll-type device register read on each trigger of a fan-out.
    Triggered {
        fanout: Arc<TriggerFanOut>,
        register: String,
        data_type: DataType,
        len: usize,
    },
}

impl Endpoint {
    /// Element type and count; `None` for endpoints accepting any type.
    fn shape(&self) -> Option<(DataType, usize)> {
        match self {
            Self::Output(output) => Some((output.data_type(), output.len())),
            Self::Input(input) => Some((input.data_type(), input.len())),
            Self::Device { data_type, len, .. } | Self::Triggered { data_type, len, .. } => {
                Some((*data_type, *len))
            }
            Self::Trigger(_) => None,
        }
    }

    fn is_feeder(&self) -> bool {
        match self {
            Self::Output(_) | Self::Triggered { .. } => true,
            Self::Input(_) | Self::Trigger(_) => false,
            Self::Device { access, .. } => access.is_read(),
        }
    }

    fn module(&self) -> Option<ModuleId> {
        match self {
            Self::Output(output) => output.owner().map(|o| o.id()),
            Self::Input(input) => Some(input.owner().id()),
            Self::Device { .. } | Self::Trigger(_) | Self::Triggered { .. } => None,
        }
    }

    fn is_device(&self) -> bool {
        matches!(self, Self::Device { .. } | Self::Triggered { .. })
    }

    fn describe(&self) -> String {
        match self {
            Self::Output(output) => match output.owner() {
                Some(owner) => format!("output of module '{}'", owner.name()),
                None => "device status".to_string(),
            },
            Self::Input(input) => format!("input of module '{}'", input.owner().name()),
            Self::Device {
                session,
                register,
                access,
                ..
            } => format!(
                "register '{}' of device '{}' ({:?})",
                register,
                session.alias(),
                access
            ),
            Self::Trigger(fanout) => format!(
                "trigger of device '{}' registers {:?}",
                fanout.session().alias(),
                fanout.registers()
            ),
            Self::Triggered {
                fanout, register, ..
            } => format!(
                "register '{}' of device '{}' (triggered by {})",
                register,
                fanout.session().alias(),
                fanout.trigger()
            ),
        }
    }
}

/// Endpoints collected during registration, grouped by path.
#[derive(Debug, Default)]
pub(crate) struct EndpointRegistry {
    paths: BTreeMap<VariablePath, Vec<Endpoint>>,
}

impl EndpointRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, path: VariablePath, endpoint: Endpoint) {
        self.paths.entry(path).or_default().push(endpoint);
    }
}

/// Summary of one variable network.
#[derive(Debug, Clone, Serialize)]
pub struct VariableReport {
    /// Variable path.
    pub path: VariablePath,
    /// Element type.
    pub data_type: DataType,
    /// Element count.
    pub len: usize,
    /// The feeder; `control system` if nothing in the application feeds it.
    pub feeder: String,
    /// All consumers.
    pub consumers: Vec<String>,
}

/// Result of connecting an application, for diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionReport {
    /// Variable networks in path order.
    pub variables: Vec<VariableReport>,
    /// Members of each recovery group.
    pub recovery_groups: Vec<Vec<DeviceId>>,
    /// Circular dependency networks among modules.
    pub circular_networks: NetworkTable,
}

impl ConnectionReport {
    /// Render as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Everything produced by connecting.
pub(crate) struct Connected {
    pub(crate) variables: ProcessVariableTable,
    pub(crate) groups: RecoveryGroupRegistry,
    pub(crate) report: ConnectionReport,
}

/// Validate and wire all endpoints.
pub(crate) fn connect(
    mut endpoints: EndpointRegistry,
    modules: &[Arc<ModuleState>],
    sessions: &[Arc<DeviceSession>],
    ctx: &Arc<RuntimeContext>,
) -> Result<Connected> {
    for session in sessions {
        for output in session.status_outputs() {
            endpoints.add(output.path().clone(), Endpoint::Output(Arc::clone(output)));
        }
    }

    // Pass 1: validation and module graph.
    let mut graph = ModuleGraph::new();
    for module in modules {
        graph.add_node(GraphNode::new(module.id(), module.name()));
    }
    for (path, network) in &endpoints.paths {
        validate(path, network)?;
        let feeder = network.iter().find(|e| e.is_feeder());
        if let Some(from) = feeder.and_then(Endpoint::module) {
            for endpoint in network {
                if let Endpoint::Input(input) = endpoint {
                    if input.mode() == UpdateMode::Push {
                        graph.add_edge(Edge::new(from, input.owner().id(), path.clone()));
                    }
                }
            }
        }
    }

    let networks = detect_circular_networks(&graph);
    let invalidity: BTreeMap<NetworkId, Arc<NetworkInvalidity>> = networks
        .networks()
        .map(|(id, _)| (id, Arc::new(NetworkInvalidity::new(id))))
        .collect();
    for module in modules {
        let validity = match networks
            .network_of(module.id())
            .and_then(|id| invalidity.get(&id))
        {
            Some(network) => ModuleValidity::in_network(module.id(), Arc::clone(network)),
            None => ModuleValidity::new(module.id()),
        };
        module.set_validity(validity);
    }

    // Pass 2: channels.
    let variables = ProcessVariableTable::new();
    let mut report = ConnectionReport {
        circular_networks: networks.clone(),
        ..ConnectionReport::default()
    };
    for (path, network) in endpoints.paths {
        let entry = wire(path, network, &networks, &variables, ctx)?;
        report.variables.push(entry);
    }

    let groups = RecoveryGroupRegistry::build(sessions);
    report.recovery_groups = groups
        .groups()
        .iter()
        .map(|g| g.members().to_vec())
        .collect();

    tracing::info!(
        variables = variables.len(),
        modules = modules.len(),
        devices = sessions.len(),
        circular_networks = networks.len(),
        "Application connected"
    );
    Ok(Connected {
        variables,
        groups,
        report,
    })
}

fn validate(path: &VariablePath, network: &[Endpoint]) -> Result<()> {
    let mut shapes = network.iter().filter_map(Endpoint::shape);
    if let Some((expected, expected_len)) = shapes.next() {
        for (actual, actual_len) in shapes {
            if actual != expected || actual_len != expected_len {
                return Err(AppCoreError::TypeMismatch {
                    path: path.to_string(),
                    expected,
                    expected_len,
                    actual,
                    actual_len,
                });
            }
        }
    }
    let mut feeders = network.iter().filter(|e| e.is_feeder());
    if let (Some(a), Some(b)) = (feeders.next(), feeders.next()) {
        return Err(AppCoreError::DuplicateFeeder {
            path: path.to_string(),
            first: a.describe(),
            second: b.describe(),
        });
    }
    Ok(())
}

fn invalid_wiring(path: &VariablePath, cause: &str) -> AppCoreError {
    AppCoreError::InvalidWiring {
        path: path.to_string(),
        cause: cause.to_string(),
    }
}

fn wire(
    path: VariablePath,
    network: Vec<Endpoint>,
    networks: &NetworkTable,
    variables: &ProcessVariableTable,
    ctx: &Arc<RuntimeContext>,
) -> Result<VariableReport> {
    // A network of triggers only is a void variable written by the control system.
    let (data_type, len) = network
        .iter()
        .find_map(Endpoint::shape)
        .unwrap_or((DataType::Void, 1));
    let pv = Arc::new(ProcessVariable::new(path.clone(), data_type, len));
    variables.insert(Arc::clone(&pv));

    let (feeders, consumers): (Vec<Endpoint>, Vec<Endpoint>) =
        network.into_iter().partition(Endpoint::is_feeder);
    let feeder = feeders.into_iter().next();
    let feeder_module = feeder.as_ref().and_then(Endpoint::module);
    let poll_device = match &feeder {
        Some(Endpoint::Device {
            session,
            register,
            access: RegisterAccess::ReadPoll,
            ..
        }) => Some((Arc::clone(session), register.clone())),
        _ => None,
    };

    let mut sinks = Vec::new();
    let mut consumer_names = Vec::new();
    for consumer in consumers {
        consumer_names.push(consumer.describe());
        match consumer {
            Endpoint::Input(input) => {
                let circular = feeder_module
                    .is_some_and(|from| networks.is_circular_edge(from, input.owner().id()));
                match (&poll_device, input.mode()) {
                    (Some(_), UpdateMode::Push) => {
                        return Err(invalid_wiring(
                            &path,
                            "a poll-type device register cannot feed a push-type input",
                        ));
                    }
                    (Some((session, register)), UpdateMode::Poll) => {
                        session.expect_initial_reader(path.clone());
                        input.connect(
                            InputSource::DevicePoll {
                                session: Arc::clone(session),
                                register: register.clone(),
                            },
                            false,
                            None,
                        );
                    }
                    (None, UpdateMode::Push) => {
                        let queue = Arc::new(PushQueue::new(
                            input.id(),
                            path.clone(),
                            ctx.config().queue_length,
                            true,
                            Arc::clone(ctx),
                        ));
                        sinks.push(Sink::Queue(Arc::clone(&queue)));
                        input.connect(InputSource::Queue(queue), circular, feeder_module);
                    }
                    (None, UpdateMode::Poll) => {
                        let cell = Arc::new(LatestCell::new(path.clone(), Arc::clone(ctx)));
                        sinks.push(Sink::Latest(Arc::clone(&cell)));
                        input.connect(InputSource::Latest(cell), circular, feeder_module);
                    }
                }
            }
            Endpoint::Trigger(trigger) => {
                if poll_device.is_some() {
                    return Err(invalid_wiring(
                        &path,
                        "a poll-type device register cannot drive a trigger",
                    ));
                }
                let queue = Arc::new(PushQueue::new(
                    trigger.id(),
                    path.clone(),
                    ctx.config().queue_length,
                    true,
                    Arc::clone(ctx),
                ));
                sinks.push(Sink::Queue(Arc::clone(&queue)));
                trigger.attach_queue(queue)?;
            }
            Endpoint::Device {
                session, register, ..
            } => {
                if feeder.as_ref().is_some_and(Endpoint::is_device) {
                    return Err(invalid_wiring(
                        &path,
                        "a device register cannot feed another device register",
                    ));
                }
                sinks.push(Sink::Device { session, register });
            }
            Endpoint::Output(_) | Endpoint::Triggered { .. } => {}
        }
    }

    let feeder_name = feeder
        .as_ref()
        .map_or_else(|| "control system".to_string(), Endpoint::describe);
    match feeder {
        None => {
            let fanout = Arc::new(Fanout::new(path.clone(), data_type, len, sinks));
            pv.set_control_system_fanout(fanout);
        }
        Some(Endpoint::Output(output)) => {
            sinks.push(Sink::ControlSystem(Arc::clone(&pv)));
            pv.set_published();
            output.attach(Arc::new(Fanout::new(path.clone(), data_type, len, sinks)));
        }
        Some(Endpoint::Device {
            session,
            register,
            access: RegisterAccess::ReadPush,
            ..
        }) => {
            sinks.push(Sink::ControlSystem(Arc::clone(&pv)));
            pv.set_published();
            session.subscribe_async(
                &register,
                Arc::new(Fanout::new(path.clone(), data_type, len, sinks)),
            );
        }
        Some(Endpoint::Triggered {
            fanout, register, ..
        }) => {
            sinks.push(Sink::ControlSystem(Arc::clone(&pv)));
            pv.set_published();
            fanout.add_register(
                &register,
                data_type,
                len,
                Arc::new(Fanout::new(path.clone(), data_type, len, sinks)),
            );
        }
        Some(Endpoint::Device {
            session, register, ..
        }) => {
            pv.set_device_poll(session, register);
        }
        Some(Endpoint::Input(_) | Endpoint::Trigger(_)) => {}
    }

    tracing::debug!(path = %path, feeder = %feeder_name, consumers = consumer_names.len(), "Network wired");
    Ok(VariableReport {
        path,
        data_type,
        len,
        feeder: feeder_name,
        consumers: consumer_names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::module::ModuleBuilder;

    fn ctx() -> Arc<RuntimeContext> {
        Arc::new(RuntimeContext::new(RuntimeConfig::for_testing()))
    }

    fn module(id: u32, name: &str, ctx: &Arc<RuntimeContext>) -> Arc<ModuleState> {
        Arc::new(ModuleState::new(ModuleId::new(id), name, Arc::clone(ctx)))
    }

    #[test]
    fn two_feeders_are_rejected() {
        let ctx = ctx();
        let (a, b) = (module(0, "A", &ctx), module(1, "B", &ctx));
        let mut endpoints = EndpointRegistry::new();
        let _oa = ModuleBuilder::new(Arc::clone(&a), &mut endpoints)
            .scalar_output::<i32>("/x")
            .unwrap();
        let _ob = ModuleBuilder::new(Arc::clone(&b), &mut endpoints)
            .scalar_output::<i32>("/x")
            .unwrap();

        let err = connect(endpoints, &[a, b], &[], &ctx).err().unwrap();
        assert_eq!(err.code(), "E201");
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let ctx = ctx();
        let (a, b) = (module(0, "A", &ctx), module(1, "B", &ctx));
        let mut endpoints = EndpointRegistry::new();
        let _out = ModuleBuilder::new(Arc::clone(&a), &mut endpoints)
            .scalar_output::<i32>("/x")
            .unwrap();
        let _in = ModuleBuilder::new(Arc::clone(&b), &mut endpoints)
            .scalar_input::<f64>("/x", UpdateMode::Push)
            .unwrap();

        let err = connect(endpoints, &[a, b], &[], &ctx).err().unwrap();
        assert_eq!(err.code(), "E202");
    }

    #[test]
    fn unfed_network_is_writeable_from_control_system() {
        let ctx = ctx();
        let a = module(0, "A", &ctx);
        let mut endpoints = EndpointRegistry::new();
        let _in = ModuleBuilder::new(Arc::clone(&a), &mut endpoints)
            .scalar_input::<i32>("/setpoint", UpdateMode::Push)
            .unwrap();
        let _out = ModuleBuilder::new(Arc::clone(&a), &mut endpoints)
            .scalar_output::<i32>("/readback")
            .unwrap();

        let connected = connect(endpoints, &[a], &[], &ctx).unwrap();
        let writeable: Vec<String> = connected
            .variables
            .writeable()
            .iter()
            .map(|pv| pv.path().to_string())
            .collect();
        assert_eq!(writeable, vec!["/setpoint".to_string()]);
        assert_eq!(connected.report.variables.len(), 2);
        assert_eq!(connected.report.variables[1].feeder, "control system");
    }

    #[test]
    fn mutual_feedback_forms_network() {
        let ctx = ctx();
        let (a, b) = (module(0, "A", &ctx), module(1, "B", &ctx));
        let mut endpoints = EndpointRegistry::new();
        {
            let mut builder = ModuleBuilder::new(Arc::clone(&a), &mut endpoints);
            builder.scalar_output::<i32>("/a2b").unwrap();
            builder.scalar_input::<i32>("/b2a", UpdateMode::Push).unwrap();
        }
        {
            let mut builder = ModuleBuilder::new(Arc::clone(&b), &mut endpoints);
            builder.scalar_output::<i32>("/b2a").unwrap();
            builder.scalar_input::<i32>("/a2b", UpdateMode::Push).unwrap();
        }

        let connected = connect(endpoints, &[Arc::clone(&a), b], &[], &ctx).unwrap();
        assert_eq!(connected.report.circular_networks.len(), 1);
        assert!(a.validity().unwrap().network().is_some());
    }
}
