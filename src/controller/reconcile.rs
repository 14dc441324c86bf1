//! Controller wiring: the per-cluster pass, its error policy and the watch loop

use super::{Context, ClusterBackoff};
use crate::controller::pass::{run_pass, PassReport};
use crate::controller::status::{needs_update, summarize};
use crate::crd::{PostgresCluster, VolumeSummary};
use crate::domain::ports::TopologyProvider;
use crate::error::{Error, ErrorAction, Result};
use crate::metrics::{Metrics, PassOutcome};
use crate::volume::metadata::CLUSTER_LABEL;
use crate::volume::{ActionKind, VolumeStatus};
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{watcher, Controller};
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

fn cluster_key(cluster: &PostgresCluster) -> String {
    format!(
        "{}/{}",
        cluster.namespace().unwrap_or_default(),
        cluster.name_any()
    )
}

// =============================================================================
// Reconcile
// =============================================================================

/// Run one pass for `cluster`
pub async fn reconcile(cluster: Arc<PostgresCluster>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let key = cluster_key(&cluster);

    if cluster.metadata.deletion_timestamp.is_some() {
        debug!(cluster = %key, "Cluster is being deleted, skipping");
        release_cluster(&ctx.backoff, &ctx.metrics, &key);
        return Ok(Action::await_change());
    }

    let failed = |err: Error| {
        ctx.metrics.record_pass(PassOutcome::Failed);
        err
    };

    let desired = cluster
        .desired_topology(ctx.config.default_retention)
        .map_err(failed)?;
    info!(
        cluster = %key,
        instances = desired.instance_count(),
        retention = %desired.retention,
        dry_run = ctx.config.dry_run,
        "Reconciling volumes"
    );

    let report = run_pass(
        ctx.lister.as_ref(),
        ctx.volumes.as_ref(),
        &desired,
        ctx.config.dry_run,
    )
    .await
    .map_err(failed)?;

    record_metrics(&ctx, &key, &report);
    publish_events(&cluster, &ctx, &report).await;

    let summary = summarize(
        &report.view,
        &report.plan,
        &report.outcome,
        cluster.metadata.generation,
        Utc::now(),
    );
    let current = cluster.status.as_ref().and_then(|s| s.volumes.as_ref());
    let patched = if ctx.config.dry_run || !needs_update(current, &summary) {
        Ok(())
    } else {
        patch_status(&cluster, &ctx, &summary).await
    };

    ctx.metrics
        .observe_duration(&key, started.elapsed().as_secs_f64());

    if let Some(err) = report.outcome.error {
        return Err(err);
    }
    patched?;

    ctx.backoff.reset(&key);
    info!(
        cluster = %key,
        applied = report.outcome.applied.len(),
        issues = report.plan.issues.len(),
        "Volumes reconciled"
    );
    Ok(Action::requeue(ctx.config.requeue_interval))
}

/// Forget the retry state and metric series of a departing cluster
fn release_cluster(backoff: &ClusterBackoff, metrics: &Metrics, key: &str) {
    backoff.reset(key);
    metrics.forget_cluster(key);
}

fn record_metrics(ctx: &Context, key: &str, report: &PassReport) {
    let metrics = &ctx.metrics;

    let outcome = match &report.outcome.error {
        Some(err) if err.is_conflict() => PassOutcome::Conflict,
        Some(_) => PassOutcome::Failed,
        None if report.plan.is_empty() => PassOutcome::Clean,
        None => PassOutcome::Applied,
    };
    metrics.record_pass(outcome);

    for (kind, _) in &report.outcome.applied {
        metrics.record_action(*kind);
    }
    for issue in &report.plan.issues {
        metrics.record_issue(issue);
    }

    let ready = report
        .view
        .volumes()
        .filter(|v| v.status == VolumeStatus::Ready)
        .count();
    let initializing = report.view.volume_count() - ready;
    metrics.set_volume_counts(
        key,
        u32::try_from(ready).unwrap_or(u32::MAX),
        u32::try_from(initializing).unwrap_or(u32::MAX),
    );
}

fn action_reason(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Create => "VolumeCreated",
        ActionKind::Delete => "VolumeDeleted",
        ActionKind::Update => "VolumeUpdated",
    }
}

/// Publish issues as warning events and applied actions as normal events
///
/// Event delivery is best effort and never fails the pass.
async fn publish_events(cluster: &PostgresCluster, ctx: &Context, report: &PassReport) {
    if !ctx.config.publish_events || ctx.config.dry_run {
        return;
    }

    let recorder = Recorder::new(
        ctx.client.clone(),
        ctx.reporter.clone(),
        cluster.object_ref(&()),
    );

    let warnings = report.plan.issues.iter().map(|issue| Event {
        type_: EventType::Warning,
        reason: issue.kind().to_string(),
        note: Some(issue.to_string()),
        action: "Reconcile".into(),
        secondary: None,
    });
    let applied = report.outcome.applied.iter().map(|(kind, name)| Event {
        type_: EventType::Normal,
        reason: action_reason(*kind).to_string(),
        note: Some(format!("{} volume {}", kind, name)),
        action: "Reconcile".into(),
        secondary: None,
    });

    for event in warnings.chain(applied) {
        if let Err(err) = recorder.publish(event).await {
            debug!(cluster = %cluster.name_any(), error = %err, "Failed to publish event");
        }
    }
}

async fn patch_status(
    cluster: &PostgresCluster,
    ctx: &Context,
    summary: &VolumeSummary,
) -> Result<()> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();
    let api: Api<PostgresCluster> = Api::namespaced(ctx.client.clone(), &namespace);

    let patch = json!({ "status": { "volumes": summary } });
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| Error::from_kube("PostgresCluster", &name, e))?;
    debug!(cluster = %name, namespace = %namespace, "Patched volume summary");
    Ok(())
}

// =============================================================================
// Error Policy
// =============================================================================

/// Requeue delay for a failed pass; `None` waits for the next change
pub fn requeue_delay(error: &Error, backoff: &ClusterBackoff, key: &str) -> Option<Duration> {
    match error.action() {
        ErrorAction::RequeueAfter(delay) => Some(delay),
        ErrorAction::RequeueWithBackoff => Some(backoff.next_delay(key)),
        ErrorAction::NoRequeue => None,
    }
}

pub fn error_policy(cluster: Arc<PostgresCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = cluster_key(&cluster);
    match requeue_delay(error, &ctx.backoff, &key) {
        Some(delay) => {
            warn!(cluster = %key, error = %error, ?delay, "Pass failed, requeueing");
            Action::requeue(delay)
        }
        None => {
            error!(cluster = %key, error = %error, "Pass failed, waiting for a spec change");
            Action::await_change()
        }
    }
}

// =============================================================================
// Watch Loop
// =============================================================================

/// Map a labelled pod or job to its cluster
fn cluster_for<K>(obj: &K) -> Option<ObjectRef<PostgresCluster>>
where
    K: Resource,
{
    let name = obj.labels().get(CLUSTER_LABEL)?;
    let namespace = obj.namespace()?;
    Some(ObjectRef::new(name).within(&namespace))
}

/// Run the controller until a termination signal arrives
pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let (clusters, volumes, pods, jobs) = match &ctx.config.namespace {
        Some(ns) => (
            Api::<PostgresCluster>::namespaced(client.clone(), ns),
            Api::<PersistentVolumeClaim>::namespaced(client.clone(), ns),
            Api::<Pod>::namespaced(client.clone(), ns),
            Api::<Job>::namespaced(client.clone(), ns),
        ),
        None => (
            Api::all(client.clone()),
            Api::all(client.clone()),
            Api::all(client.clone()),
            Api::all(client.clone()),
        ),
    };
    let labelled = watcher::Config::default().labels(CLUSTER_LABEL);

    info!(
        namespace = ctx.config.namespace.as_deref().unwrap_or("*"),
        "Starting PostgresCluster volume controller"
    );

    Controller::new(clusters, watcher::Config::default())
        .owns(volumes, labelled.clone())
        .watches(pods, labelled.clone(), |pod: Pod| cluster_for(&pod))
        .watches(jobs, labelled, |job: Job| cluster_for(&job))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => debug!(cluster = %obj.name, ?action, "Reconciled cluster"),
                Err(err) => warn!(error = %err, "Controller stream error"),
            }
        })
        .await;

    info!("Volume controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_delay_follows_error_action() {
        let backoff = ClusterBackoff::new(Duration::from_secs(2), Duration::from_secs(60));

        let conflict = Error::Conflict {
            kind: "PersistentVolumeClaim".into(),
            name: "pg-1".into(),
        };
        assert_eq!(
            requeue_delay(&conflict, &backoff, "db/pg"),
            Some(Duration::from_secs(1))
        );
        assert!(backoff.is_empty());

        let transient = Error::Internal("boom".into());
        assert_eq!(
            requeue_delay(&transient, &backoff, "db/pg").map(|d| d.as_secs()),
            Some(2)
        );
        assert_eq!(
            requeue_delay(&transient, &backoff, "db/pg").map(|d| d.as_secs()),
            Some(4)
        );

        let invalid = Error::InvalidClusterSpec {
            cluster: "pg".into(),
            reason: "bad".into(),
        };
        assert_eq!(requeue_delay(&invalid, &backoff, "db/pg"), None);
    }

    #[test]
    fn test_release_cluster_clears_backoff_and_series() {
        let backoff = ClusterBackoff::new(Duration::from_secs(2), Duration::from_secs(60));
        let metrics = Metrics::new().unwrap();
        backoff.next_delay("db/pg");
        backoff.next_delay("db/other");
        metrics.set_volume_counts("db/pg", 3, 0);

        release_cluster(&backoff, &metrics, "db/pg");

        assert_eq!(backoff.len(), 1);
        assert_eq!(
            requeue_delay(&Error::Internal("boom".into()), &backoff, "db/pg").map(|d| d.as_secs()),
            Some(2)
        );
        let (_, body) = metrics.render().unwrap();
        assert!(!String::from_utf8(body).unwrap().contains("db/pg"));
    }

    #[test]
    fn test_cluster_for_labelled_pod() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("pg-1".into());
        pod.metadata.namespace = Some("db".into());
        assert!(cluster_for(&pod).is_none());

        pod.labels_mut().insert(CLUSTER_LABEL.into(), "pg".into());
        let cluster = cluster_for(&pod).unwrap();
        assert_eq!(cluster.name, "pg");
        assert_eq!(cluster.namespace.as_deref(), Some("db"));
    }
}
