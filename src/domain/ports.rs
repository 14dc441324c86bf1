//! Domain Ports - Boundaries between the volume reconciler and the cluster
//!
//! The planner in [`crate::volume`] is pure. These traits are how the
//! controller feeds it listed objects and applies its plans. Adapters live
//! in [`crate::client`].

use crate::error::Result;
use crate::volume::{ClusterSnapshot, DesiredTopology, RetentionPolicy};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use std::sync::Arc;

// =============================================================================
// Object Lister Port
// =============================================================================

/// Port for listing everything one pass needs to look at
#[async_trait]
pub trait ObjectLister: Send + Sync {
    /// List the volumes, pods and jobs of `cluster` in `namespace`
    async fn snapshot(&self, cluster: &str, namespace: &str) -> Result<ClusterSnapshot>;
}

// =============================================================================
// Volume Client Port
// =============================================================================

/// Port for mutating storage-volume objects
///
/// Updates and deletions carry the resource version the plan was computed
/// against. An implementation must reject the call with
/// [`crate::Error::Conflict`] when the stored object has moved on.
#[async_trait]
pub trait VolumeClient: Send + Sync {
    /// Create a new volume
    async fn create(&self, volume: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim>;

    /// Replace a volume's metadata
    async fn update(
        &self,
        volume: &PersistentVolumeClaim,
        expected_version: Option<&str>,
    ) -> Result<PersistentVolumeClaim>;

    /// Delete a volume
    async fn delete(&self, namespace: &str, name: &str, expected_version: Option<&str>)
        -> Result<()>;
}

// =============================================================================
// Desired Topology Port
// =============================================================================

/// Anything that can say which volumes a cluster should have
pub trait TopologyProvider {
    /// Desired topology; `fallback_retention` applies when the source sets none
    fn desired_topology(&self, fallback_retention: RetentionPolicy) -> Result<DesiredTopology>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ObjectListerRef = Arc<dyn ObjectLister>;
pub type VolumeClientRef = Arc<dyn VolumeClient>;
