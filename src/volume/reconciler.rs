//! Volume Reconciler
//!
//! Turns a [`TopologyView`] and a [`DesiredTopology`] into an ordered plan of
//! create, delete and metadata-update actions. Planning is pure: nothing is
//! applied here, and planning the same inputs twice gives the same plan.

use crate::error::VolumeError;
use crate::volume::desired::{DesiredTopology, RetentionPolicy};
use crate::volume::metadata::{write_role, write_serial, write_status, VolumePhase};
use crate::volume::naming::{Role, VolumeIdentity};
use crate::volume::status::{next_transition, StatusTransition, VolumeStatus};
use crate::volume::template::build_volume;
use crate::volume::topology::{ClusterSnapshot, TopologyView, VolumeState};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use tracing::{debug, info};

// =============================================================================
// Actions
// =============================================================================

/// Kind of a planned action, in application order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    Create,
    Delete,
    Update,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Create => write!(f, "create"),
            ActionKind::Delete => write!(f, "delete"),
            ActionKind::Update => write!(f, "update"),
        }
    }
}

/// A single metadata correction carried by an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataChange {
    Status(VolumeStatus),
    RoleLabel(Role),
    SerialAnnotation(u32),
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeAction {
    /// Create a new volume object
    Create {
        identity: VolumeIdentity,
        volume: PersistentVolumeClaim,
    },
    /// Delete an orphaned volume
    Delete {
        identity: VolumeIdentity,
        name: String,
        expected_version: Option<String>,
    },
    /// Replace the volume's metadata
    Update {
        identity: VolumeIdentity,
        volume: PersistentVolumeClaim,
        expected_version: Option<String>,
        changes: Vec<MetadataChange>,
    },
}

impl VolumeAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            VolumeAction::Create { .. } => ActionKind::Create,
            VolumeAction::Delete { .. } => ActionKind::Delete,
            VolumeAction::Update { .. } => ActionKind::Update,
        }
    }

    pub fn identity(&self) -> &VolumeIdentity {
        match self {
            VolumeAction::Create { identity, .. }
            | VolumeAction::Delete { identity, .. }
            | VolumeAction::Update { identity, .. } => identity,
        }
    }

    /// Object name the action targets
    pub fn name(&self) -> String {
        match self {
            VolumeAction::Delete { name, .. } => name.clone(),
            _ => self.identity().name(),
        }
    }

    /// Status this action writes, if any
    pub fn written_status(&self) -> Option<VolumeStatus> {
        match self {
            VolumeAction::Create { .. } => Some(VolumeStatus::Initializing),
            VolumeAction::Update { changes, .. } => changes.iter().find_map(|c| match c {
                MetadataChange::Status(status) => Some(*status),
                _ => None,
            }),
            VolumeAction::Delete { .. } => None,
        }
    }
}

impl std::fmt::Display for VolumeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind(), self.name())
    }
}

// =============================================================================
// Plan
// =============================================================================

/// Ordered actions plus everything worth warning about
#[derive(Debug, Clone, Default)]
pub struct VolumePlan {
    pub actions: Vec<VolumeAction>,
    pub issues: Vec<VolumeError>,
}

impl VolumePlan {
    /// True when there is nothing to apply
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind() == kind).count()
    }

    pub fn actions_of(&self, kind: ActionKind) -> impl Iterator<Item = &VolumeAction> {
        self.actions.iter().filter(move |a| a.kind() == kind)
    }

    /// Put actions in application order: creations, deletions, updates
    fn sort(&mut self) {
        self.actions
            .sort_by(|a, b| (a.kind(), a.name()).cmp(&(b.kind(), b.name())));
    }
}

// =============================================================================
// Planning
// =============================================================================

/// Build the view and plan in one step
pub fn reconcile(snapshot: &ClusterSnapshot, desired: &DesiredTopology) -> (TopologyView, VolumePlan) {
    let view = TopologyView::build(snapshot, desired);
    let plan = plan(&view, desired);
    (view, plan)
}

/// Compute the plan for one pass
pub fn plan(view: &TopologyView, desired: &DesiredTopology) -> VolumePlan {
    let mut plan = VolumePlan {
        actions: Vec::new(),
        issues: view.issues().to_vec(),
    };

    for (serial, roles) in &desired.instances {
        for role in roles {
            match view.volume(*serial, role) {
                None => plan_missing(&mut plan, desired, *serial, role),
                Some(state) => plan_existing(&mut plan, state),
            }
        }
    }

    for state in view.volumes() {
        if !view.is_orphan(state) && !desired.wants(state.identity.serial, &state.identity.role) {
            plan.issues.push(VolumeError::inconsistent(
                &state.name,
                format!(
                    "instance {} does not request a {} volume; leaving it untouched",
                    state.identity.instance_name(),
                    state.identity.role
                ),
            ));
        }
    }

    for orphan in view.orphans() {
        plan_orphan(&mut plan, orphan, desired.retention);
    }

    plan.sort();

    info!(
        cluster = %desired.cluster,
        creates = plan.count(ActionKind::Create),
        deletes = plan.count(ActionKind::Delete),
        updates = plan.count(ActionKind::Update),
        issues = plan.issues.len(),
        "Planned volume actions"
    );

    plan
}

fn plan_missing(plan: &mut VolumePlan, desired: &DesiredTopology, serial: u32, role: &Role) {
    let identity = VolumeIdentity::new(desired.cluster.clone(), serial, role.clone());
    match desired.storage_for(role) {
        Some(storage) => {
            debug!(volume = %identity.name(), "Volume missing, planning creation");
            plan.actions.push(VolumeAction::Create {
                volume: build_volume(desired, &identity, storage),
                identity,
            });
        }
        None => plan.issues.push(VolumeError::inconsistent(
            identity.name(),
            format!("no storage specification for role {}", role),
        )),
    }
}

fn plan_existing(plan: &mut VolumePlan, state: &VolumeState) {
    if state.resizing {
        debug!(volume = %state.name, "Volume is resizing, leaving it frozen");
        return;
    }

    if state.phase == VolumePhase::Lost {
        plan.issues.push(VolumeError::inconsistent(
            &state.name,
            "volume lost its backing persistent volume",
        ));
        return;
    }

    let mut volume = state.object.clone();
    let mut changes = Vec::new();

    if next_transition(state.status, state.in_use, state.resizing) == StatusTransition::Promote
        && write_status(&mut volume, VolumeStatus::Ready)
    {
        changes.push(MetadataChange::Status(VolumeStatus::Ready));
    }

    if state.drift.role_label {
        write_role(&mut volume, &state.identity.role);
        changes.push(MetadataChange::RoleLabel(state.identity.role.clone()));
    }

    if state.drift.serial_annotation {
        write_serial(&mut volume, state.identity.serial);
        changes.push(MetadataChange::SerialAnnotation(state.identity.serial));
    }

    if !changes.is_empty() {
        debug!(volume = %state.name, ?changes, "Planning metadata update");
        plan.actions.push(VolumeAction::Update {
            identity: state.identity.clone(),
            volume,
            expected_version: state.resource_version.clone(),
            changes,
        });
    }
}

fn plan_orphan(plan: &mut VolumePlan, orphan: &VolumeState, retention: RetentionPolicy) {
    let deferred = |reason: &str| {
        VolumeError::inconsistent(
            &orphan.name,
            format!(
                "instance {} was removed; {}",
                orphan.identity.instance_name(),
                reason
            ),
        )
    };

    match retention {
        RetentionPolicy::Keep => plan
            .issues
            .push(deferred("volume kept by retention policy")),
        RetentionPolicy::Delete if orphan.resizing => plan
            .issues
            .push(deferred("deletion deferred while the volume is resizing")),
        RetentionPolicy::Delete if orphan.active => plan.issues.push(deferred(&format!(
            "deletion deferred while in use by {}",
            orphan.references.iter().cloned().collect::<Vec<_>>().join(", ")
        ))),
        RetentionPolicy::Delete => {
            debug!(volume = %orphan.name, "Planning orphan deletion");
            plan.actions.push(VolumeAction::Delete {
                identity: orphan.identity.clone(),
                name: orphan.name.clone(),
                expected_version: orphan.resource_version.clone(),
            });
        }
    }
}
