//! Error types for the PG Volume Operator
//!
//! Two layers of errors live here. [`VolumeError`] classifies a single
//! storage-volume object during a reconciliation pass; it is collected into
//! the pass report and never aborts the pass. [`Error`] is the crate-wide
//! error for everything that happens around the pure core: talking to the
//! API server, applying actions, configuration.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Per-object classification
// =============================================================================

/// Problem found with one storage-volume object or workload reference
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VolumeError {
    /// Object name or serial annotation cannot be parsed
    #[error("malformed identity on {name}: {reason}")]
    MalformedIdentity { name: String, reason: String },

    /// Role label value is not recognized
    #[error("unknown volume role {value:?} on {name}")]
    UnknownRole { name: String, value: String },

    /// Dangling reference, orphan or otherwise ambiguous placement
    #[error("inconsistent topology for {name}: {reason}")]
    InconsistentTopology { name: String, reason: String },
}

impl VolumeError {
    pub fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        VolumeError::MalformedIdentity {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_role(name: impl Into<String>, value: impl Into<String>) -> Self {
        VolumeError::UnknownRole {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn inconsistent(name: impl Into<String>, reason: impl Into<String>) -> Self {
        VolumeError::InconsistentTopology {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Name of the object the problem is keyed by
    pub fn object_name(&self) -> &str {
        match self {
            VolumeError::MalformedIdentity { name, .. }
            | VolumeError::UnknownRole { name, .. }
            | VolumeError::InconsistentTopology { name, .. } => name,
        }
    }

    /// Short machine-readable kind, used for events and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            VolumeError::MalformedIdentity { .. } => "MalformedIdentity",
            VolumeError::UnknownRole { .. } => "UnknownRole",
            VolumeError::InconsistentTopology { .. } => "InconsistentTopology",
        }
    }
}

// =============================================================================
// Crate-wide errors
// =============================================================================

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    /// Optimistic-concurrency rejection; the whole cluster must be recomputed
    #[error("Conflict applying {kind}/{name}: object changed since it was listed")]
    Conflict { kind: String, name: String },

    // =========================================================================
    // Cluster Errors
    // =========================================================================
    #[error("Invalid cluster specification for {cluster}: {reason}")]
    InvalidClusterSpec { cluster: String, reason: String },

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Stale view; refetch and recompute almost immediately
            Error::Conflict { .. } | Error::ResourceExists { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(1))
            }

            // Transient errors - retry with backoff
            Error::Kube(_) | Error::ResourceNotFound { .. } => {
                ErrorAction::RequeueWithBackoff
            }

            // Configuration/validation errors - don't retry automatically
            Error::Configuration(_) | Error::InvalidClusterSpec { .. } | Error::Metrics(_) => {
                ErrorAction::NoRequeue
            }

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Build an error from a Kubernetes API failure on a named object,
    /// turning HTTP 409 into [`Error::Conflict`]
    pub fn from_kube(kind: &str, name: &str, err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 409 => Error::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(resp) if resp.code == 404 => Error::ResourceNotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            _ => Error::Kube(err),
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "boom".into(),
            reason: "Conflict".into(),
            code,
        })
    }

    #[test]
    fn test_error_actions() {
        let err = Error::Conflict {
            kind: "PersistentVolumeClaim".into(),
            name: "pg-1".into(),
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(1))
        );

        let err = Error::Configuration("bad config".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::Internal("oops".into());
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);

        let err = Error::from(prometheus::Error::Msg("duplicate metric".into()));
        assert_eq!(err.action(), ErrorAction::NoRequeue);
    }

    #[test]
    fn test_error_retryable() {
        let conflict = Error::Conflict {
            kind: "PersistentVolumeClaim".into(),
            name: "pg-1".into(),
        };
        assert!(conflict.is_retryable());
        assert!(conflict.is_conflict());

        let config_err = Error::InvalidClusterSpec {
            cluster: "pg".into(),
            reason: "no instances".into(),
        };
        assert!(!config_err.is_retryable());
        assert!(!config_err.is_conflict());
    }

    #[test]
    fn test_from_kube_maps_status_codes() {
        let err = Error::from_kube("PersistentVolumeClaim", "pg-1", api_error(409));
        assert!(err.is_conflict());

        let err = Error::from_kube("PersistentVolumeClaim", "pg-1", api_error(404));
        assert!(matches!(err, Error::ResourceNotFound { .. }));

        let err = Error::from_kube("PersistentVolumeClaim", "pg-1", api_error(500));
        assert!(matches!(err, Error::Kube(_)));
    }

    #[test]
    fn test_volume_error_accessors() {
        let err = VolumeError::unknown_role("pg-1", "PG_BOGUS");
        assert_eq!(err.object_name(), "pg-1");
        assert_eq!(err.kind(), "UnknownRole");
        assert_eq!(err.to_string(), "unknown volume role \"PG_BOGUS\" on pg-1");
    }
}
