//! Recovery groups: devices sharing resources recover in lockstep.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::context::RuntimeContext;
use crate::device::DeviceSession;
use crate::sync::Barrier;
use appcore_core::error::{AppCoreError, Result};
use appcore_core::types::{DeviceId, GroupId, ResourceId};

/// Recovery stage, each ending in a group barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStage {
    /// All members noticed the error.
    Detection,
    /// All members opened their backend.
    Open,
    /// All members ran their initialisation handlers.
    InitHandlers,
    /// All members replayed their write logs.
    WriteRecovery,
    /// All members cleared their error flag.
    ClearError,
}

impl RecoveryStage {
    const ALL: [RecoveryStage; 5] = [
        Self::Detection,
        Self::Open,
        Self::InitHandlers,
        Self::WriteRecovery,
        Self::ClearError,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RecoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Detection => "detection",
            Self::Open => "open",
            Self::InitHandlers => "init_handlers",
            Self::WriteRecovery => "write_recovery",
            Self::ClearError => "clear_error",
        };
        f.write_str(name)
    }
}

/// Devices recovered together because they share resources.
pub struct RecoveryGroup {
    id: GroupId,
    members: Vec<DeviceId>,
    resources: BTreeSet<ResourceId>,
    sessions: Vec<Weak<DeviceSession>>,
    barriers: Vec<Barrier>,
    error_stage: Mutex<Option<RecoveryStage>>,
    shutdown: AtomicBool,
}

impl fmt::Debug for RecoveryGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryGroup")
            .field("id", &self.id)
            .field("members", &self.members)
            .field("resources", &self.resources)
            .finish()
    }
}

impl RecoveryGroup {
    fn new(id: GroupId, sessions: &[&Arc<DeviceSession>]) -> Self {
        let parties = sessions.len();
        Self {
            id,
            members: sessions.iter().map(|s| s.id()).collect(),
            resources: sessions
                .iter()
                .flat_map(|s| s.resources().iter().copied())
                .collect(),
            sessions: sessions.iter().map(|s| Arc::downgrade(s)).collect(),
            barriers: RecoveryStage::ALL
                .iter()
                .map(|_| Barrier::new(parties))
                .collect(),
            error_stage: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Group identifier.
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Member devices in id order.
    pub fn members(&self) -> &[DeviceId] {
        &self.members
    }

    /// Union of the members' resources.
    pub fn resources(&self) -> &BTreeSet<ResourceId> {
        &self.resources
    }

    /// Whether the group was shut down.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Wait at the barrier ending `stage`.
    ///
    /// The leader of the detection barrier resets the error stage for the
    /// new recovery round.
    pub fn wait_stage(&self, stage: RecoveryStage, ctx: &RuntimeContext) -> Result<()> {
        let barrier = &self.barriers[stage.index()];
        let poll = ctx.config().poll_interval();
        ctx.testable().with_released(|| {
            barrier.wait_with(ctx.cancel(), poll, || {
                if stage == RecoveryStage::Detection {
                    *self.error_stage.lock() = None;
                }
            })
        })?;
        if self.is_shutdown() {
            return Err(AppCoreError::Shutdown);
        }
        Ok(())
    }

    /// Record a failure in `stage`. The first failure of a round wins.
    pub fn set_error_at(&self, stage: RecoveryStage) {
        let mut error_stage = self.error_stage.lock();
        if error_stage.is_none() {
            *error_stage = Some(stage);
        }
    }

    /// Whether no member failed in `stage` during this round.
    pub fn stage_ok(&self, stage: RecoveryStage) -> bool {
        *self.error_stage.lock() != Some(stage)
    }

    /// Report `message` to every member except `origin`.
    pub(crate) fn forward_exception(&self, origin: DeviceId, message: &str) {
        for session in self.sessions.iter().filter_map(Weak::upgrade) {
            if session.id() != origin {
                session.report_exception(message);
            }
        }
    }

    /// Close all barriers, releasing every waiting member.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for barrier in &self.barriers {
            barrier.close();
        }
    }
}

/// Partition devices into groups of transitively shared resources.
///
/// Groups are ordered by their smallest member, members by id.
pub fn partition(devices: &[(DeviceId, BTreeSet<ResourceId>)]) -> Vec<Vec<DeviceId>> {
    let mut parent: Vec<usize> = (0..devices.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let mut owner: BTreeMap<ResourceId, usize> = BTreeMap::new();
    for (index, (_, resources)) in devices.iter().enumerate() {
        for resource in resources {
            match owner.get(resource) {
                Some(&first) => {
                    let (a, b) = (find(&mut parent, first), find(&mut parent, index));
                    if a != b {
                        parent[a.max(b)] = a.min(b);
                    }
                }
                None => {
                    owner.insert(*resource, index);
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<DeviceId>> = BTreeMap::new();
    for index in 0..devices.len() {
        let root = find(&mut parent, index);
        groups.entry(root).or_default().push(devices[index].0);
    }
    let mut groups: Vec<Vec<DeviceId>> = groups
        .into_values()
        .map(|mut members| {
            members.sort();
            members
        })
        .collect();
    groups.sort_by_key(|members| members.first().copied());
    groups
}

/// All recovery groups of an application.
#[derive(Debug, Default)]
pub struct RecoveryGroupRegistry {
    groups: Vec<Arc<RecoveryGroup>>,
    by_device: BTreeMap<DeviceId, usize>,
}

impl RecoveryGroupRegistry {
    /// Partition `sessions` and attach each one to its group.
    pub fn build(sessions: &[Arc<DeviceSession>]) -> Self {
        let devices: Vec<(DeviceId, BTreeSet<ResourceId>)> = sessions
            .iter()
            .map(|s| (s.id(), s.resources().clone()))
            .collect();

        let mut registry = Self::default();
        for (index, members) in partition(&devices).into_iter().enumerate() {
            let member_sessions: Vec<&Arc<DeviceSession>> = members
                .iter()
                .filter_map(|id| sessions.iter().find(|s| s.id() == *id))
                .collect();
            let group = Arc::new(RecoveryGroup::new(
                GroupId::new(index as u32),
                &member_sessions,
            ));
            for session in &member_sessions {
                session.set_group(Arc::clone(&group));
                registry.by_device.insert(session.id(), index);
            }
            tracing::debug!(
                group = %group.id(),
                members = ?group.members(),
                "Recovery group formed"
            );
            registry.groups.push(group);
        }
        registry
    }

    /// The group containing `device`.
    pub fn group_of(&self, device: DeviceId) -> Result<&Arc<RecoveryGroup>> {
        self.by_device
            .get(&device)
            .map(|&index| &self.groups[index])
            .ok_or(AppCoreError::UnknownDevice { device })
    }

    /// All groups, ordered by smallest member.
    pub fn groups(&self) -> &[Arc<RecoveryGroup>] {
        &self.groups
    }

    /// Shut down every group.
    pub fn shutdown(&self) {
        for group in &self.groups {
            group.shutdown();
        }
    }
}
