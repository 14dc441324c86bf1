//! Volume Template
//!
//! Builds the PersistentVolumeClaim object for a volume the cluster needs.

use crate::volume::desired::{DesiredTopology, StorageSpec};
use crate::volume::metadata::{write_role, write_serial, CLUSTER_LABEL, INSTANCE_LABEL, STATUS_ANNOTATION};
use crate::volume::naming::VolumeIdentity;
use crate::volume::status::VolumeStatus;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Access mode used when the storage spec names none
pub const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";

/// Build a new, initializing volume for `identity`
pub fn build_volume(
    desired: &DesiredTopology,
    identity: &VolumeIdentity,
    storage: &StorageSpec,
) -> PersistentVolumeClaim {
    let access_modes = if storage.access_modes.is_empty() {
        vec![DEFAULT_ACCESS_MODE.to_string()]
    } else {
        storage.access_modes.clone()
    };

    let mut pvc = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(identity.name()),
            namespace: Some(desired.namespace.clone()),
            labels: Some(BTreeMap::from([
                (CLUSTER_LABEL.to_string(), identity.cluster.clone()),
                (INSTANCE_LABEL.to_string(), identity.instance_name()),
            ])),
            annotations: Some(BTreeMap::from([(
                STATUS_ANNOTATION.to_string(),
                VolumeStatus::Initializing.as_str().to_string(),
            )])),
            owner_references: if desired.owner_references.is_empty() {
                None
            } else {
                Some(desired.owner_references.clone())
            },
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(access_modes),
            storage_class_name: storage.storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(storage.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    };

    write_role(&mut pvc, &identity.role);
    write_serial(&mut pvc, identity.serial);
    pvc
}
