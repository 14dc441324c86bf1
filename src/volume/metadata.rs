//! Volume Metadata Contract
//!
//! Reads and writes the labels, annotations and conditions a storage volume
//! carries. Raw strings are decoded into typed values here and nowhere else.

use crate::error::VolumeError;
use crate::volume::naming::{parse_serial, validate_tablespace_name, Role};
use crate::volume::status::VolumeStatus;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

// =============================================================================
// Keys
// =============================================================================

/// Prefix shared by every key the operator owns
pub const KEY_PREFIX: &str = "pgvolume.io";

/// Annotation carrying the volume readiness status
pub const STATUS_ANNOTATION: &str = "pgvolume.io/volumeStatus";

/// Annotation carrying the owning instance serial
pub const SERIAL_ANNOTATION: &str = "pgvolume.io/instanceSerial";

/// Label carrying the volume role
pub const ROLE_LABEL: &str = "pgvolume.io/volumeRole";

/// Label carrying the tablespace name of tablespace volumes
pub const TABLESPACE_LABEL: &str = "pgvolume.io/tablespaceName";

/// Label carrying the cluster name
pub const CLUSTER_LABEL: &str = "pgvolume.io/cluster";

/// Label carrying the owning instance name
pub const INSTANCE_LABEL: &str = "pgvolume.io/instanceName";

/// Condition set by the platform while a volume expansion is in flight
pub const RESIZING_CONDITION: &str = "Resizing";

pub const ROLE_DATA: &str = "PG_DATA";
pub const ROLE_WAL: &str = "PG_WAL";
pub const ROLE_TABLESPACE: &str = "PG_TABLESPACE";

// =============================================================================
// Phase
// =============================================================================

/// Binding phase reported by the platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumePhase {
    #[default]
    Pending,
    Bound,
    Lost,
}

impl std::fmt::Display for VolumePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumePhase::Pending => write!(f, "Pending"),
            VolumePhase::Bound => write!(f, "Bound"),
            VolumePhase::Lost => write!(f, "Lost"),
        }
    }
}

// =============================================================================
// Readers
// =============================================================================

/// Decode the role from the role label
///
/// An absent label is the legacy primary-data volume. Both the split form
/// (`PG_TABLESPACE` plus the tablespace label) and the combined
/// `PG_TABLESPACE:<name>` form are accepted.
pub fn read_role(pvc: &PersistentVolumeClaim) -> Result<Role, VolumeError> {
    let labels = pvc.labels();
    let value = match labels.get(ROLE_LABEL) {
        None => return Ok(Role::PrimaryData),
        Some(value) => value.trim(),
    };

    let unknown = || VolumeError::unknown_role(pvc.name_any(), value);

    match value {
        ROLE_DATA => Ok(Role::PrimaryData),
        ROLE_WAL => Ok(Role::WriteAheadLog),
        ROLE_TABLESPACE => labels
            .get(TABLESPACE_LABEL)
            .filter(|name| validate_tablespace_name(name).is_ok())
            .map(|name| Role::Tablespace(name.clone()))
            .ok_or_else(unknown),
        _ => value
            .strip_prefix(ROLE_TABLESPACE)
            .and_then(|rest| rest.strip_prefix(':'))
            .filter(|name| validate_tablespace_name(name).is_ok())
            .map(|name| Role::Tablespace(name.to_string()))
            .ok_or_else(unknown),
    }
}

/// Decode the status annotation; absent or unrecognized means initializing
pub fn read_status(pvc: &PersistentVolumeClaim) -> VolumeStatus {
    match pvc.annotations().get(STATUS_ANNOTATION) {
        None => VolumeStatus::Initializing,
        Some(value) => VolumeStatus::parse(value).unwrap_or_else(|| {
            debug!(
                volume = %pvc.name_any(),
                value = %value,
                "Unrecognized volume status, treating as initializing"
            );
            VolumeStatus::Initializing
        }),
    }
}

/// Decode the serial annotation; `None` when the annotation is absent
pub fn read_serial(pvc: &PersistentVolumeClaim) -> Result<Option<u32>, VolumeError> {
    pvc.annotations()
        .get(SERIAL_ANNOTATION)
        .map(|value| parse_serial(value.trim()))
        .transpose()
        .map_err(|reason| VolumeError::malformed(pvc.name_any(), reason))
}

/// Whether a volume expansion is in flight
pub fn is_resizing(pvc: &PersistentVolumeClaim) -> bool {
    pvc.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.type_ == RESIZING_CONDITION && c.status.eq_ignore_ascii_case("true")
            })
        })
        .unwrap_or(false)
}

/// Binding phase; absent means pending
pub fn read_phase(pvc: &PersistentVolumeClaim) -> VolumePhase {
    match pvc.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Bound") => VolumePhase::Bound,
        Some("Lost") => VolumePhase::Lost,
        _ => VolumePhase::Pending,
    }
}

// =============================================================================
// Writers
// =============================================================================

/// Set the status annotation in memory
///
/// Refuses (returns `false`) while the volume is resizing or when the write
/// would move a ready volume back to initializing.
pub fn write_status(pvc: &mut PersistentVolumeClaim, status: VolumeStatus) -> bool {
    if is_resizing(pvc) || !read_status(pvc).can_become(status) {
        return false;
    }
    pvc.annotations_mut()
        .insert(STATUS_ANNOTATION.to_string(), status.as_str().to_string());
    true
}

/// Set the serial annotation in memory
pub fn write_serial(pvc: &mut PersistentVolumeClaim, serial: u32) {
    pvc.annotations_mut()
        .insert(SERIAL_ANNOTATION.to_string(), serial.to_string());
}

/// Set the role labels in memory
pub fn write_role(pvc: &mut PersistentVolumeClaim, role: &Role) {
    let labels = pvc.labels_mut();
    match role {
        Role::PrimaryData => {
            labels.insert(ROLE_LABEL.to_string(), ROLE_DATA.to_string());
            labels.remove(TABLESPACE_LABEL);
        }
        Role::WriteAheadLog => {
            labels.insert(ROLE_LABEL.to_string(), ROLE_WAL.to_string());
            labels.remove(TABLESPACE_LABEL);
        }
        Role::Tablespace(name) => {
            labels.insert(ROLE_LABEL.to_string(), ROLE_TABLESPACE.to_string());
            labels.insert(TABLESPACE_LABEL.to_string(), name.clone());
        }
    }
}
