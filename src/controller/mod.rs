//! Volume controller
//!
//! Drives reconciliation passes for every `PostgresCluster`. The
//! `kube::runtime::Controller` scheduler runs at most one pass per cluster
//! at a time and coalesces triggers that arrive while a pass is running.
//!
//! - [`run`]: watch clusters, their volumes, pods and jobs
//! - [`reconcile`]: one pass for one cluster
//! - [`error_policy`]: requeue decision after a failed pass

pub mod apply;
pub mod backoff;
pub mod pass;
pub mod reconcile;
pub mod status;

pub use apply::{apply_plan, ApplyOutcome};
pub use backoff::ClusterBackoff;
pub use pass::{run_pass, PassReport};
pub use reconcile::{error_policy, reconcile, run};

use crate::domain::ports::{ObjectListerRef, VolumeClientRef};
use crate::metrics::Metrics;
use crate::volume::RetentionPolicy;
use kube::runtime::events::Reporter;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;

/// Name used as field manager and event reporter
pub const CONTROLLER_NAME: &str = "pg-volume-operator";

// =============================================================================
// Operator Configuration
// =============================================================================

/// Operator-wide settings
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    /// Retention applied when a cluster does not set one
    pub default_retention: RetentionPolicy,
    /// Plan and log, but apply to a scratch copy only
    pub dry_run: bool,
    /// Requeue interval after a successful pass
    pub requeue_interval: Duration,
    /// First retry delay after a failed pass
    pub backoff_initial: Duration,
    /// Upper bound on the retry delay
    pub backoff_max: Duration,
    /// Emit Kubernetes events for reported issues
    pub publish_events: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            default_retention: RetentionPolicy::Keep,
            dry_run: false,
            requeue_interval: Duration::from_secs(300),
            backoff_initial: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            publish_events: true,
        }
    }
}

// =============================================================================
// Context
// =============================================================================

/// Shared state handed to every pass
pub struct Context {
    /// Kubernetes client, for status patches and events
    pub client: Client,
    pub lister: ObjectListerRef,
    pub volumes: VolumeClientRef,
    pub config: OperatorConfig,
    pub metrics: Arc<Metrics>,
    pub backoff: ClusterBackoff,
    pub reporter: Reporter,
}

impl Context {
    pub fn new(
        client: Client,
        lister: ObjectListerRef,
        volumes: VolumeClientRef,
        config: OperatorConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            backoff: ClusterBackoff::new(config.backoff_initial, config.backoff_max),
            reporter: Reporter {
                controller: CONTROLLER_NAME.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            client,
            lister,
            volumes,
            config,
            metrics,
        }
    }
}
