//! PostgresCluster CRD
//!
//! The replicated PostgreSQL cluster whose storage volumes this operator
//! keeps in shape. Instance serials are assigned by another controller and
//! reported in `status.instanceSerials`; this operator only reads them and
//! writes the `status.volumes` summary.

use crate::domain::ports::TopologyProvider;
use crate::error::{Error, Result};
use crate::volume::naming::validate_cluster_name;
use crate::volume::{DesiredTopology, RetentionPolicy, Role, StorageSpec};
use chrono::{DateTime, Utc};
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// PostgresCluster CRD
// =============================================================================

/// A replicated PostgreSQL cluster and the storage each instance needs
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "pgvolume.io",
    version = "v1",
    kind = "PostgresCluster",
    plural = "postgresclusters",
    shortname = "pgc",
    status = "PostgresClusterStatus",
    printcolumn = r#"{"name": "Instances", "type": "integer", "jsonPath": ".spec.instances"}"#,
    printcolumn = r#"{"name": "Volumes", "type": "integer", "jsonPath": ".status.volumes.total"}"#,
    printcolumn = r#"{"name": "Ready", "type": "integer", "jsonPath": ".status.volumes.ready"}"#,
    printcolumn = r#"{"name": "Issues", "type": "integer", "jsonPath": ".status.volumes.issues"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterSpec {
    /// Number of instances
    pub instances: u32,

    /// Primary data volume storage
    pub storage: ClusterStorage,

    /// Separate write-ahead log volume; WAL stays on the data volume when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wal_storage: Option<VolumeStorage>,

    /// Additional tablespaces, one volume each per instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tablespaces: Vec<TablespaceSpec>,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// How volumes of one role are provisioned
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStorage {
    /// Requested size (e.g. "10Gi")
    pub size: String,

    /// Storage class name; platform default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Access modes; ReadWriteOnce when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,
}

impl VolumeStorage {
    fn to_storage_spec(&self, cluster: &str, role: &Role) -> Result<StorageSpec> {
        if self.size.trim().is_empty() {
            return Err(Error::InvalidClusterSpec {
                cluster: cluster.to_string(),
                reason: format!("{} storage has no size", role),
            });
        }
        Ok(StorageSpec {
            size: self.size.trim().to_string(),
            storage_class: self.storage_class.clone(),
            access_modes: self.access_modes.clone(),
        })
    }
}

/// Primary storage plus the cluster-wide retention setting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStorage {
    #[serde(flatten)]
    pub volume: VolumeStorage,

    /// What happens to the volumes of removed instances; operator default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_retention: Option<RetentionPolicy>,
}

/// A tablespace and its storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TablespaceSpec {
    /// Tablespace name (`[a-z_][a-z0-9_]*`)
    pub name: String,

    pub storage: VolumeStorage,
}

// =============================================================================
// Status
// =============================================================================

/// PostgresCluster status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterStatus {
    /// Serials of the cluster's instances, assigned by the instance controller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_serials: Vec<u32>,

    /// Volume summary written after every pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<VolumeSummary>,
}

/// Per-pass summary of the cluster's volumes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSummary {
    /// Indexed volumes
    pub total: u32,
    pub ready: u32,
    pub initializing: u32,
    /// Volumes with an expansion in flight
    pub resizing: u32,
    /// Volumes of removed instances still present
    pub orphaned: u32,
    /// Warnings raised by the last pass
    pub issues: u32,
    /// Actions applied by the last pass
    pub applied: u32,
    /// Generation the summary was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<DateTime<Utc>>,
    /// Error that stopped the last pass, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// =============================================================================
// Desired Topology
// =============================================================================

/// Serials the cluster should have
///
/// Assigned serials win when present: scale-down keeps the lowest
/// `instances` of them, scale-up extends past the highest. Without assigned
/// serials the cluster runs `1..=instances`.
pub fn desired_serials(instances: u32, assigned: &[u32]) -> Vec<u32> {
    let mut serials: Vec<u32> = assigned.iter().copied().filter(|s| *s > 0).collect();
    serials.sort_unstable();
    serials.dedup();

    if serials.is_empty() {
        return (1..=instances).collect();
    }

    serials.truncate(instances as usize);
    let mut next = serials.last().copied().unwrap_or(0);
    while serials.len() < instances as usize {
        next = match next.checked_add(1) {
            Some(n) => n,
            None => break,
        };
        serials.push(next);
    }
    serials
}

impl TopologyProvider for PostgresCluster {
    fn desired_topology(&self, fallback_retention: RetentionPolicy) -> Result<DesiredTopology> {
        let cluster = self.name_any();
        let invalid = |reason: String| Error::InvalidClusterSpec {
            cluster: cluster.clone(),
            reason,
        };

        validate_cluster_name(&cluster).map_err(invalid)?;
        let namespace = self
            .namespace()
            .ok_or_else(|| invalid("cluster must be namespaced".into()))?;

        let mut storage = BTreeMap::new();
        storage.insert(
            Role::PrimaryData,
            self.spec.storage.volume.to_storage_spec(&cluster, &Role::PrimaryData)?,
        );
        if let Some(wal) = &self.spec.wal_storage {
            storage.insert(
                Role::WriteAheadLog,
                wal.to_storage_spec(&cluster, &Role::WriteAheadLog)?,
            );
        }
        for tablespace in &self.spec.tablespaces {
            let role = Role::tablespace(tablespace.name.as_str()).map_err(invalid)?;
            let spec = tablespace.storage.to_storage_spec(&cluster, &role)?;
            if storage.insert(role, spec).is_some() {
                return Err(invalid(format!(
                    "tablespace {:?} is listed twice",
                    tablespace.name
                )));
            }
        }

        let assigned = self
            .status
            .as_ref()
            .map(|s| s.instance_serials.as_slice())
            .unwrap_or_default();
        let roles: BTreeSet<Role> = storage.keys().cloned().collect();
        let retention = self
            .spec
            .storage
            .volume_retention
            .unwrap_or(fallback_retention);

        let mut topology = DesiredTopology::new(cluster.clone(), namespace, retention);
        topology.instances = desired_serials(self.spec.instances, assigned)
            .into_iter()
            .map(|serial| (serial, roles.clone()))
            .collect();
        topology.storage = storage;
        if let Some(owner) = self.controller_owner_ref(&()) {
            topology = topology.with_owner(owner);
        }
        Ok(topology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn cluster(instances: u32) -> PostgresCluster {
        let mut cluster = PostgresCluster::new(
            "pg",
            PostgresClusterSpec {
                instances,
                storage: ClusterStorage {
                    volume: VolumeStorage {
                        size: "10Gi".into(),
                        ..Default::default()
                    },
                    volume_retention: None,
                },
                wal_storage: Some(VolumeStorage {
                    size: "2Gi".into(),
                    storage_class: Some("fast".into()),
                    ..Default::default()
                }),
                tablespaces: vec![TablespaceSpec {
                    name: "hot_data".into(),
                    storage: VolumeStorage {
                        size: "5Gi".into(),
                        ..Default::default()
                    },
                }],
            },
        );
        cluster.metadata.namespace = Some("db".into());
        cluster.metadata.uid = Some("4f1c".into());
        cluster
    }

    #[test]
    fn test_desired_serials() {
        assert_eq!(desired_serials(3, &[]), vec![1, 2, 3]);
        assert_eq!(desired_serials(0, &[]), Vec::<u32>::new());
        // scale-down keeps the lowest
        assert_eq!(desired_serials(2, &[7, 2, 5]), vec![2, 5]);
        // scale-up extends past the highest
        assert_eq!(desired_serials(4, &[2, 5]), vec![2, 5, 6, 7]);
        assert_eq!(desired_serials(2, &[0, 3, 3]), vec![3, 4]);
    }

    #[test]
    fn test_desired_topology_from_spec() {
        let topology = cluster(2).desired_topology(RetentionPolicy::Keep).unwrap();

        assert_eq!(topology.cluster, "pg");
        assert_eq!(topology.namespace, "db");
        assert_eq!(topology.retention, RetentionPolicy::Keep);
        assert_eq!(topology.instance_count(), 2);
        assert!(topology.wants(2, &Role::WriteAheadLog));
        assert!(topology.wants(1, &Role::Tablespace("hot_data".into())));
        assert_eq!(
            topology
                .storage_for(&Role::WriteAheadLog)
                .and_then(|s| s.storage_class.as_deref()),
            Some("fast")
        );
        assert_eq!(topology.owner_references.len(), 1);
        assert_eq!(topology.owner_references[0].kind, "PostgresCluster");
    }

    #[test]
    fn test_retention_override_and_assigned_serials() {
        let mut pg = cluster(1);
        pg.spec.storage.volume_retention = Some(RetentionPolicy::Delete);
        pg.status = Some(PostgresClusterStatus {
            instance_serials: vec![4, 9],
            volumes: None,
        });

        let topology = pg.desired_topology(RetentionPolicy::Keep).unwrap();
        assert_eq!(topology.retention, RetentionPolicy::Delete);
        assert_eq!(topology.instances.keys().copied().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_invalid_specs_are_rejected() {
        let mut pg = cluster(1);
        pg.spec.tablespaces.push(TablespaceSpec {
            name: "hot_data".into(),
            storage: VolumeStorage {
                size: "1Gi".into(),
                ..Default::default()
            },
        });
        assert_matches!(
            pg.desired_topology(RetentionPolicy::Keep),
            Err(Error::InvalidClusterSpec { .. })
        );

        let mut pg = cluster(1);
        pg.spec.tablespaces[0].name = "Bad-Name".into();
        assert_matches!(
            pg.desired_topology(RetentionPolicy::Keep),
            Err(Error::InvalidClusterSpec { .. })
        );

        let mut pg = cluster(1);
        pg.spec.storage.volume.size = " ".into();
        assert_matches!(
            pg.desired_topology(RetentionPolicy::Keep),
            Err(Error::InvalidClusterSpec { .. })
        );

        let mut pg = cluster(1);
        pg.metadata.namespace = None;
        assert!(pg.desired_topology(RetentionPolicy::Keep).is_err());
    }

    #[test]
    fn test_spec_deserializes_from_yaml() {
        let yaml = r#"
instances: 3
storage:
  size: 20Gi
  storageClass: standard
  volumeRetention: delete
walStorage:
  size: 4Gi
tablespaces:
  - name: archive
    storage:
      size: 100Gi
"#;
        let spec: PostgresClusterSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.instances, 3);
        assert_eq!(spec.storage.volume.size, "20Gi");
        assert_eq!(spec.storage.volume.storage_class.as_deref(), Some("standard"));
        assert_eq!(spec.storage.volume_retention, Some(RetentionPolicy::Delete));
        assert_eq!(spec.tablespaces[0].name, "archive");
    }
}
