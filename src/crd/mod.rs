//! Custom Resource Definitions
//!
//! - PostgresCluster: replicated PostgreSQL cluster and its per-instance storage

pub mod cluster;

pub use cluster::*;
