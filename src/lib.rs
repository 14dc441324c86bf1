//! PG Volume Operator - Storage-volume reconciliation for PostgreSQL clusters
//!
//! Keeps every instance of a replicated PostgreSQL cluster supplied with its
//! data, write-ahead log and tablespace volumes: creates missing ones,
//! promotes them to ready once a workload has used them, heals drifted
//! metadata and retires the volumes of removed instances.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 kube::runtime::Controller                        │
//! │   PostgresCluster ── owns PVCs ── watches Pods / Jobs            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ObjectLister ──► TopologyView ──► plan() ──► apply_plan()       │
//! │   (snapshot)       (index)        (pure)      (VolumeClient)     │
//! ├──────────────────────────────────────────────────────────────────┤
//! │        Adapters: KubeObjects (API server) | MemoryStore          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`volume`]: naming, metadata contract, status machine, topology and planner
//! - [`controller`]: passes, apply, backoff and the watch loop
//! - [`client`]: Kubernetes and in-memory adapters
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Port traits
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod client;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod volume;

// Re-export commonly used types
pub use client::{KubeObjects, MemoryStore};

pub use controller::{Context, OperatorConfig};

pub use crd::{PostgresCluster, PostgresClusterSpec, PostgresClusterStatus, VolumeSummary};

pub use domain::ports::{ObjectLister, TopologyProvider, VolumeClient};

pub use error::{Error, ErrorAction, Result, VolumeError};

pub use metrics::Metrics;

pub use volume::{
    DesiredTopology, RetentionPolicy, Role, TopologyView, VolumeAction, VolumeIdentity,
    VolumePlan, VolumeStatus,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
