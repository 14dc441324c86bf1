//! Storage-volume reconciliation core
//!
//! Everything in here is pure: it works on listed objects and produces
//! plans, and never talks to the API server.

pub mod desired;
pub mod metadata;
pub mod naming;
pub mod reconciler;
pub mod status;
pub mod template;
pub mod topology;

#[cfg(test)]
pub(crate) mod testing;

pub use desired::{DesiredTopology, RetentionPolicy, StorageSpec};
pub use metadata::VolumePhase;
pub use naming::{derive_name, parse_name, Role, VolumeIdentity};
pub use reconciler::{plan, reconcile, ActionKind, MetadataChange, VolumeAction, VolumePlan};
pub use status::{next_transition, StatusTransition, VolumeStatus};
pub use topology::{ClusterSnapshot, TopologyView, VolumeState, WorkloadKind, WorkloadPhase, WorkloadRef};
