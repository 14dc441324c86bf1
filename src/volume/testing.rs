//! Test fixtures for storage volumes and workloads

use crate::volume::metadata::{
    write_role, CLUSTER_LABEL, RESIZING_CONDITION, ROLE_LABEL, SERIAL_ANNOTATION,
    STATUS_ANNOTATION,
};
use crate::volume::naming::{derive_name, Role};
use crate::volume::status::VolumeStatus;
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobSpec, JobStatus};
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimCondition, PersistentVolumeClaimStatus,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, PodStatus, PodTemplateSpec, Volume,
};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// A bound volume named `<cluster>-<serial>` with the given role label
pub fn make_pvc(
    cluster: &str,
    serial: &str,
    role_label: Option<&str>,
    status: VolumeStatus,
) -> PersistentVolumeClaim {
    let mut labels = BTreeMap::from([(CLUSTER_LABEL.to_string(), cluster.to_string())]);
    if let Some(role) = role_label {
        labels.insert(ROLE_LABEL.to_string(), role.to_string());
    }

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(format!("{}-{}", cluster, serial)),
            namespace: Some("default".into()),
            resource_version: Some("1".into()),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([
                (SERIAL_ANNOTATION.to_string(), serial.to_string()),
                (STATUS_ANNOTATION.to_string(), status.as_str().to_string()),
            ])),
            ..Default::default()
        },
        status: Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A bound volume with canonical name and metadata for the identity
pub fn make_volume(
    cluster: &str,
    serial: u32,
    role: &Role,
    status: VolumeStatus,
) -> PersistentVolumeClaim {
    let mut pvc = make_pvc(cluster, &serial.to_string(), None, status);
    pvc.metadata.name = Some(derive_name(cluster, serial, role));
    write_role(&mut pvc, role);
    pvc
}

pub fn with_label(mut pvc: PersistentVolumeClaim, key: &str, value: &str) -> PersistentVolumeClaim {
    pvc.labels_mut().insert(key.to_string(), value.to_string());
    pvc
}

pub fn with_annotation(
    mut pvc: PersistentVolumeClaim,
    key: &str,
    value: &str,
) -> PersistentVolumeClaim {
    pvc.annotations_mut()
        .insert(key.to_string(), value.to_string());
    pvc
}

pub fn with_resizing(mut pvc: PersistentVolumeClaim, status: &str) -> PersistentVolumeClaim {
    let condition = PersistentVolumeClaimCondition {
        type_: RESIZING_CONDITION.to_string(),
        status: status.to_string(),
        ..Default::default()
    };
    pvc.status
        .get_or_insert_with(Default::default)
        .conditions
        .get_or_insert_with(Vec::new)
        .push(condition);
    pvc
}

fn claim_volumes(claims: &[&str]) -> Vec<Volume> {
    claims
        .iter()
        .map(|claim| Volume {
            name: format!("vol-{}", claim),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim.to_string(),
                read_only: None,
            }),
            ..Default::default()
        })
        .collect()
}

/// A pod in the given phase mounting the given claims
pub fn make_pod(name: &str, claims: &[&str], phase: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".into()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            volumes: Some(claim_volumes(claims)),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

/// A job mounting the given claims; `outcome` is one of
/// `"active"`, `"succeeded"`, `"failed"` or `"new"`
pub fn make_job(name: &str, claims: &[&str], outcome: &str) -> Job {
    let status = match outcome {
        "active" => Some(JobStatus {
            active: Some(1),
            ..Default::default()
        }),
        "succeeded" => Some(JobStatus {
            succeeded: Some(1),
            ..Default::default()
        }),
        "failed" => Some(JobStatus {
            failed: Some(1),
            conditions: Some(vec![JobCondition {
                type_: "Failed".into(),
                status: "True".into(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        _ => None,
    };

    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".into()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    volumes: Some(claim_volumes(claims)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status,
    }
}
