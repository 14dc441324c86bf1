//! Topology Index
//!
//! Folds one listed snapshot of volumes, pods and jobs into a per-instance
//! view of the cluster's storage. The view is built once per pass and is
//! read-only afterwards.

use crate::error::VolumeError;
use crate::volume::desired::DesiredTopology;
use crate::volume::metadata::{
    is_resizing, read_phase, read_role, read_serial, read_status, VolumePhase, CLUSTER_LABEL,
};
use crate::volume::naming::{parse_name, Role, VolumeIdentity};
use crate::volume::status::VolumeStatus;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, PodSpec};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time listing of everything one pass looks at
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub volumes: Vec<PersistentVolumeClaim>,
    pub pods: Vec<Pod>,
    pub jobs: Vec<Job>,
}

impl ClusterSnapshot {
    /// All workloads, pods first
    pub fn workloads(&self) -> Vec<WorkloadRef> {
        self.pods
            .iter()
            .map(WorkloadRef::from)
            .chain(self.jobs.iter().map(WorkloadRef::from))
            .collect()
    }

    /// Keep only the objects that belong to `cluster`
    ///
    /// A volume belongs when it carries the cluster label or its name
    /// decodes to the cluster. A workload belongs when it carries the label
    /// or mounts a claim whose name decodes to the cluster.
    pub fn scoped_to(self, cluster: &str) -> Self {
        let ours = |name: &str| {
            parse_name(name)
                .map(|identity| identity.cluster == cluster)
                .unwrap_or(false)
        };
        let labelled = |labels: &BTreeMap<String, String>| {
            labels.get(CLUSTER_LABEL).map(String::as_str) == Some(cluster)
        };

        ClusterSnapshot {
            volumes: self
                .volumes
                .into_iter()
                .filter(|v| labelled(v.labels()) || ours(&v.name_any()))
                .collect(),
            pods: self
                .pods
                .into_iter()
                .filter(|p| {
                    labelled(p.labels()) || claim_names(p.spec.as_ref()).iter().any(|c| ours(c))
                })
                .collect(),
            jobs: self
                .jobs
                .into_iter()
                .filter(|j| {
                    labelled(j.labels())
                        || claim_names(j.spec.as_ref().and_then(|s| s.template.spec.as_ref()))
                            .iter()
                            .any(|c| ours(c))
                })
                .collect(),
        }
    }
}

// =============================================================================
// Workloads
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkloadKind {
    Pod,
    Job,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::Pod => write!(f, "Pod"),
            WorkloadKind::Job => write!(f, "Job"),
        }
    }
}

/// Lifecycle phase of a workload, normalized across pods and jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadPhase {
    Pending,
    Running,
    Completed,
    Failed,
    Terminating,
    Unknown,
}

impl WorkloadPhase {
    /// Counts as a reference to the volumes it mounts
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            WorkloadPhase::Pending | WorkloadPhase::Running | WorkloadPhase::Completed
        )
    }

    /// Has actually mounted its volumes: running now or ran to completion
    pub fn is_attached(&self) -> bool {
        matches!(self, WorkloadPhase::Running | WorkloadPhase::Completed)
    }

    /// Still holds (or is about to hold) its volumes
    pub fn is_active(&self) -> bool {
        matches!(self, WorkloadPhase::Pending | WorkloadPhase::Running)
    }
}

/// A pod or job together with the claims it mounts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub name: String,
    pub phase: WorkloadPhase,
    pub claims: Vec<String>,
}

impl WorkloadRef {
    /// Stable key used in reverse-index entries
    pub fn key(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

fn claim_names(spec: Option<&PodSpec>) -> Vec<String> {
    spec.and_then(|s| s.volumes.as_ref())
        .map(|volumes| {
            volumes
                .iter()
                .filter_map(|v| v.persistent_volume_claim.as_ref())
                .map(|source| source.claim_name.clone())
                .collect()
        })
        .unwrap_or_default()
}

impl From<&Pod> for WorkloadRef {
    fn from(pod: &Pod) -> Self {
        let phase = if pod.metadata.deletion_timestamp.is_some() {
            WorkloadPhase::Terminating
        } else {
            match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
                Some("Pending") | None => WorkloadPhase::Pending,
                Some("Running") => WorkloadPhase::Running,
                Some("Succeeded") => WorkloadPhase::Completed,
                Some("Failed") => WorkloadPhase::Failed,
                Some(_) => WorkloadPhase::Unknown,
            }
        };

        Self {
            kind: WorkloadKind::Pod,
            name: pod.name_any(),
            phase,
            claims: claim_names(pod.spec.as_ref()),
        }
    }
}

impl From<&Job> for WorkloadRef {
    fn from(job: &Job) -> Self {
        let has_condition = |kind: &str| {
            job.status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .map(|conditions| {
                    conditions
                        .iter()
                        .any(|c| c.type_ == kind && c.status.eq_ignore_ascii_case("true"))
                })
                .unwrap_or(false)
        };

        let phase = if job.metadata.deletion_timestamp.is_some() {
            WorkloadPhase::Terminating
        } else if has_condition("Failed") {
            WorkloadPhase::Failed
        } else if has_condition("Complete") {
            WorkloadPhase::Completed
        } else {
            match job.status.as_ref() {
                None => WorkloadPhase::Pending,
                Some(status) if status.succeeded.unwrap_or(0) > 0 => WorkloadPhase::Completed,
                Some(status) if status.active.unwrap_or(0) > 0 => WorkloadPhase::Running,
                Some(status) if status.failed.unwrap_or(0) > 0 => WorkloadPhase::Failed,
                Some(_) => WorkloadPhase::Pending,
            }
        };

        Self {
            kind: WorkloadKind::Job,
            name: job.name_any(),
            phase,
            claims: claim_names(job.spec.as_ref().and_then(|s| s.template.spec.as_ref())),
        }
    }
}

// =============================================================================
// Volume State
// =============================================================================

/// Metadata that disagrees with the identity derived from the object name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataDrift {
    pub role_label: bool,
    pub serial_annotation: bool,
}

impl MetadataDrift {
    pub fn is_empty(&self) -> bool {
        !self.role_label && !self.serial_annotation
    }
}

/// Everything a pass knows about one indexed volume
#[derive(Debug, Clone)]
pub struct VolumeState {
    pub identity: VolumeIdentity,
    pub name: String,
    pub status: VolumeStatus,
    pub phase: VolumePhase,
    /// Referenced by a running or completed workload
    pub in_use: bool,
    /// Referenced by a pending or running workload
    pub active: bool,
    pub resizing: bool,
    /// Keys of the referencing live workloads
    pub references: BTreeSet<String>,
    pub drift: MetadataDrift,
    pub resource_version: Option<String>,
    /// Listed object, kept for building updates
    pub object: PersistentVolumeClaim,
}

/// A live workload mounting a claim of this cluster that does not exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    pub claim: String,
    pub workloads: BTreeSet<String>,
}

// =============================================================================
// Topology View
// =============================================================================

/// Per-pass index of a cluster's volumes: serial -> role -> state
#[derive(Debug, Clone, Default)]
pub struct TopologyView {
    cluster: String,
    instances: BTreeMap<u32, BTreeMap<Role, VolumeState>>,
    orphans: BTreeSet<(u32, Role)>,
    dangling: Vec<DanglingReference>,
    issues: Vec<VolumeError>,
}

impl TopologyView {
    /// Build the view for `desired.cluster` from a snapshot
    pub fn build(snapshot: &ClusterSnapshot, desired: &DesiredTopology) -> Self {
        let mut view = TopologyView {
            cluster: desired.cluster.clone(),
            ..Default::default()
        };

        // Reverse index: claim name -> live workloads
        let workloads = snapshot.workloads();
        let mut reverse: BTreeMap<&str, Vec<&WorkloadRef>> = BTreeMap::new();
        for workload in workloads.iter().filter(|w| w.phase.is_live()) {
            for claim in &workload.claims {
                reverse.entry(claim.as_str()).or_default().push(workload);
            }
        }

        for pvc in &snapshot.volumes {
            match view.classify(pvc, &reverse) {
                Ok(state) => view.insert(state, desired),
                Err(issue) => {
                    debug!(
                        cluster = %view.cluster,
                        volume = %issue.object_name(),
                        kind = issue.kind(),
                        "Excluding volume from this pass: {}",
                        issue
                    );
                    view.issues.push(issue);
                }
            }
        }

        let listed: BTreeSet<String> = snapshot.volumes.iter().map(|v| v.name_any()).collect();
        for (claim, refs) in &reverse {
            let ours = parse_name(claim)
                .map(|identity| identity.cluster == view.cluster)
                .unwrap_or(false);
            if !ours || listed.contains(*claim) {
                continue;
            }
            let workloads: BTreeSet<String> = refs.iter().map(|w| w.key()).collect();
            view.issues.push(VolumeError::inconsistent(
                *claim,
                format!(
                    "referenced by {} but no such volume exists",
                    workloads.iter().cloned().collect::<Vec<_>>().join(", ")
                ),
            ));
            view.dangling.push(DanglingReference {
                claim: claim.to_string(),
                workloads,
            });
        }

        debug!(
            cluster = %view.cluster,
            volumes = view.volume_count(),
            orphans = view.orphans.len(),
            dangling = view.dangling.len(),
            issues = view.issues.len(),
            "Built topology view"
        );

        view
    }

    /// Decode one volume, or explain why it is excluded
    fn classify(
        &self,
        pvc: &PersistentVolumeClaim,
        reverse: &BTreeMap<&str, Vec<&WorkloadRef>>,
    ) -> Result<VolumeState, VolumeError> {
        let name = pvc.name_any();
        let identity = parse_name(&name)?;
        if identity.cluster != self.cluster {
            return Err(VolumeError::malformed(
                &name,
                format!(
                    "name belongs to cluster {:?}, not {:?}",
                    identity.cluster, self.cluster
                ),
            ));
        }

        let labelled_role = read_role(pvc)?;
        let annotated_serial = read_serial(pvc)?;

        let refs = reverse.get(name.as_str());
        let references: BTreeSet<String> = refs
            .map(|refs| refs.iter().map(|w| w.key()).collect())
            .unwrap_or_default();
        let any = |check: fn(&WorkloadPhase) -> bool| {
            refs.map(|refs| refs.iter().any(|w| check(&w.phase)))
                .unwrap_or(false)
        };
        let in_use = any(WorkloadPhase::is_attached);
        let active = any(WorkloadPhase::is_active);

        Ok(VolumeState {
            drift: MetadataDrift {
                role_label: labelled_role != identity.role,
                serial_annotation: annotated_serial != Some(identity.serial),
            },
            status: read_status(pvc),
            phase: read_phase(pvc),
            in_use,
            active,
            resizing: is_resizing(pvc),
            references,
            resource_version: pvc.resource_version(),
            object: pvc.clone(),
            identity,
            name,
        })
    }

    fn insert(&mut self, state: VolumeState, desired: &DesiredTopology) {
        let serial = state.identity.serial;
        let role = state.identity.role.clone();
        let slot = self.instances.entry(serial).or_default();
        if slot.contains_key(&role) {
            self.issues.push(VolumeError::inconsistent(
                &state.name,
                "duplicate volume for the same instance and role",
            ));
            return;
        }
        if !desired.contains_serial(serial) {
            self.orphans.insert((serial, role.clone()));
        }
        slot.insert(role, state);
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// State of the volume for `serial` and `role`
    pub fn volume(&self, serial: u32, role: &Role) -> Option<&VolumeState> {
        self.instances.get(&serial).and_then(|roles| roles.get(role))
    }

    /// Every indexed volume, by serial then role
    pub fn volumes(&self) -> impl Iterator<Item = &VolumeState> {
        self.instances.values().flat_map(|roles| roles.values())
    }

    pub fn volume_count(&self) -> usize {
        self.instances.values().map(|roles| roles.len()).sum()
    }

    /// Volumes whose instance is no longer desired
    pub fn orphans(&self) -> impl Iterator<Item = &VolumeState> {
        self.orphans
            .iter()
            .filter_map(|(serial, role)| self.volume(*serial, role))
    }

    pub fn is_orphan(&self, state: &VolumeState) -> bool {
        self.orphans
            .contains(&(state.identity.serial, state.identity.role.clone()))
    }

    pub fn dangling(&self) -> &[DanglingReference] {
        &self.dangling
    }

    /// Classification problems found while building
    pub fn issues(&self) -> &[VolumeError] {
        &self.issues
    }
}
