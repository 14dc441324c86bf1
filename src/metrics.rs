//! Prometheus metrics for the volume operator
//!
//! ## Counters
//! - `pgvolume_reconcile_passes_total{outcome}` - passes by outcome
//! - `pgvolume_actions_total{kind}` - applied actions by kind
//! - `pgvolume_issues_total{kind}` - reported warnings by kind
//!
//! ## Gauges
//! - `pgvolume_volumes{cluster,status}` - indexed volumes per cluster and status
//!
//! ## Histograms
//! - `pgvolume_reconcile_duration_seconds` - pass duration

use crate::error::{Result, VolumeError};
use crate::volume::ActionKind;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "pgvolume";

const DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Outcome label of a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Nothing to apply
    Clean,
    /// Every planned action applied
    Applied,
    /// Stopped on a conflict
    Conflict,
    /// Stopped on any other failure
    Failed,
}

impl PassOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::Clean => "clean",
            PassOutcome::Applied => "applied",
            PassOutcome::Conflict => "conflict",
            PassOutcome::Failed => "failed",
        }
    }
}

/// Operator metrics registry
pub struct Metrics {
    registry: Registry,
    /// Passes by outcome
    pub passes: IntCounterVec,
    /// Applied actions by kind
    pub actions: IntCounterVec,
    /// Reported issues by kind
    pub issues: IntCounterVec,
    /// Indexed volumes by cluster and status
    pub volumes: IntGaugeVec,
    /// Pass duration by cluster
    pub pass_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let passes = IntCounterVec::new(
            Opts::new("reconcile_passes_total", "Reconciliation passes by outcome")
                .namespace(NAMESPACE),
            &["outcome"],
        )?;
        let actions = IntCounterVec::new(
            Opts::new("actions_total", "Applied volume actions by kind").namespace(NAMESPACE),
            &["kind"],
        )?;
        let issues = IntCounterVec::new(
            Opts::new("issues_total", "Reported volume issues by kind").namespace(NAMESPACE),
            &["kind"],
        )?;
        let volumes = IntGaugeVec::new(
            Opts::new("volumes", "Indexed volumes by cluster and status").namespace(NAMESPACE),
            &["cluster", "status"],
        )?;
        let pass_duration = HistogramVec::new(
            HistogramOpts::new("reconcile_duration_seconds", "Duration of reconciliation passes")
                .namespace(NAMESPACE)
                .buckets(DURATION_BUCKETS.to_vec()),
            &["cluster"],
        )?;

        registry.register(Box::new(passes.clone()))?;
        registry.register(Box::new(actions.clone()))?;
        registry.register(Box::new(issues.clone()))?;
        registry.register(Box::new(volumes.clone()))?;
        registry.register(Box::new(pass_duration.clone()))?;

        Ok(Self {
            registry,
            passes,
            actions,
            issues,
            volumes,
            pass_duration,
        })
    }

    pub fn record_pass(&self, outcome: PassOutcome) {
        self.passes.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn record_action(&self, kind: ActionKind) {
        self.actions.with_label_values(&[&kind.to_string()]).inc();
    }

    pub fn record_issue(&self, issue: &VolumeError) {
        self.issues.with_label_values(&[issue.kind()]).inc();
    }

    pub fn set_volume_counts(&self, cluster: &str, ready: u32, initializing: u32) {
        self.volumes
            .with_label_values(&[cluster, "ready"])
            .set(i64::from(ready));
        self.volumes
            .with_label_values(&[cluster, "initializing"])
            .set(i64::from(initializing));
    }

    pub fn observe_duration(&self, cluster: &str, seconds: f64) {
        self.pass_duration
            .with_label_values(&[cluster])
            .observe(seconds);
    }

    /// Drop the per-cluster series of a cluster that no longer exists
    pub fn forget_cluster(&self, cluster: &str) {
        // Absent series are reported as errors; nothing to drop then.
        for status in ["ready", "initializing"] {
            let _ = self.volumes.remove_label_values(&[cluster, status]);
        }
        let _ = self.pass_duration.remove_label_values(&[cluster]);
    }

    /// Render every metric in the text exposition format
    pub fn render(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record_pass(PassOutcome::Applied);
        metrics.record_action(ActionKind::Create);
        metrics.record_issue(&VolumeError::malformed("pg-x", "bad serial"));
        metrics.set_volume_counts("pg", 2, 1);
        metrics.observe_duration("pg", 0.2);

        let (content_type, body) = metrics.render().unwrap();
        let body = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("pgvolume_reconcile_passes_total{outcome=\"applied\"} 1"));
        assert!(body.contains("pgvolume_actions_total{kind=\"create\"} 1"));
        assert!(body.contains("pgvolume_issues_total{kind=\"MalformedIdentity\"} 1"));
        assert!(body.contains("pgvolume_volumes{cluster=\"pg\",status=\"ready\"} 2"));
    }

    #[test]
    fn test_forget_cluster_drops_its_series() {
        let metrics = Metrics::new().unwrap();
        metrics.set_volume_counts("db/pg", 2, 1);
        metrics.set_volume_counts("db/other", 1, 0);
        metrics.observe_duration("db/pg", 0.1);

        metrics.forget_cluster("db/pg");
        // unknown clusters are ignored
        metrics.forget_cluster("db/missing");

        let (_, body) = metrics.render().unwrap();
        let body = String::from_utf8(body).unwrap();
        assert!(!body.contains("cluster=\"db/pg\""));
        assert!(body.contains("pgvolume_volumes{cluster=\"db/other\",status=\"ready\"} 1"));
    }
}
