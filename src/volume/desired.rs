//! Desired Topology
//!
//! What the cluster specification asks for: which instance serials exist,
//! which volume roles each instance needs, how each role is sized, and what
//! happens to volumes of removed instances.

use crate::volume::naming::Role;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// Retention Policy
// =============================================================================

/// What to do with the volumes of an instance removed by scale-down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Leave the volumes in place for manual intervention
    #[default]
    Keep,
    /// Delete the volumes once nothing uses them
    Delete,
}

impl std::fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetentionPolicy::Keep => write!(f, "keep"),
            RetentionPolicy::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for RetentionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" | "retain" => Ok(RetentionPolicy::Keep),
            "delete" => Ok(RetentionPolicy::Delete),
            other => Err(format!("unknown retention policy: {}", other)),
        }
    }
}

// =============================================================================
// Storage Spec
// =============================================================================

/// How a volume of one role is provisioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSpec {
    /// Requested size as a Kubernetes quantity (e.g. "10Gi")
    pub size: String,
    /// Storage class; `None` uses the platform default
    pub storage_class: Option<String>,
    /// Access modes; empty means ReadWriteOnce
    pub access_modes: Vec<String>,
}

impl StorageSpec {
    pub fn new(size: impl Into<String>) -> Self {
        Self {
            size: size.into(),
            storage_class: None,
            access_modes: Vec::new(),
        }
    }

    pub fn with_storage_class(mut self, class: impl Into<String>) -> Self {
        self.storage_class = Some(class.into());
        self
    }
}

// =============================================================================
// Desired Topology
// =============================================================================

/// Desired state of a cluster's volumes
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredTopology {
    /// Cluster name
    pub cluster: String,
    /// Namespace the volumes live in
    pub namespace: String,
    /// Desired role set per instance serial
    pub instances: BTreeMap<u32, BTreeSet<Role>>,
    /// Provisioning spec per role
    pub storage: BTreeMap<Role, StorageSpec>,
    /// Scale-down retention
    pub retention: RetentionPolicy,
    /// Owner references stamped on created volumes
    pub owner_references: Vec<OwnerReference>,
}

impl DesiredTopology {
    /// Empty topology with no instances
    pub fn new(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            instances: BTreeMap::new(),
            storage: BTreeMap::new(),
            retention,
            owner_references: Vec::new(),
        }
    }

    /// Instances `1..=count`, each needing every role in `storage`
    pub fn uniform(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        count: u32,
        storage: BTreeMap<Role, StorageSpec>,
        retention: RetentionPolicy,
    ) -> Self {
        let roles: BTreeSet<Role> = storage.keys().cloned().collect();
        let mut topology = Self::new(cluster, namespace, retention);
        topology.instances = (1..=count).map(|serial| (serial, roles.clone())).collect();
        topology.storage = storage;
        topology
    }

    pub fn with_instance(mut self, serial: u32, roles: impl IntoIterator<Item = Role>) -> Self {
        self.instances.insert(serial, roles.into_iter().collect());
        self
    }

    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner_references.push(owner);
        self
    }

    /// Number of desired instances
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn contains_serial(&self, serial: u32) -> bool {
        self.instances.contains_key(&serial)
    }

    /// Whether the instance with `serial` needs a volume of `role`
    pub fn wants(&self, serial: u32, role: &Role) -> bool {
        self.instances
            .get(&serial)
            .map(|roles| roles.contains(role))
            .unwrap_or(false)
    }

    pub fn storage_for(&self, role: &Role) -> Option<&StorageSpec> {
        self.storage.get(role)
    }
}
