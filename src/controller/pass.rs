//! One reconciliation pass over one cluster
//!
//! list → build view → plan → report warnings → apply in order

use crate::client::MemoryStore;
use crate::controller::apply::{apply_plan, ApplyOutcome};
use crate::domain::ports::{ObjectLister, VolumeClient};
use crate::error::Result;
use crate::volume::{reconcile, DesiredTopology, TopologyView, VolumePlan};
use tracing::{info, warn};

/// Everything a pass computed and did
#[derive(Debug)]
pub struct PassReport {
    pub view: TopologyView,
    pub plan: VolumePlan,
    pub outcome: ApplyOutcome,
}

/// Run one pass
///
/// With `dry_run` the plan is applied to a scratch copy of the listing
/// instead of through `client`.
pub async fn run_pass(
    lister: &dyn ObjectLister,
    client: &dyn VolumeClient,
    desired: &DesiredTopology,
    dry_run: bool,
) -> Result<PassReport> {
    let snapshot = lister.snapshot(&desired.cluster, &desired.namespace).await?;
    let (view, plan) = reconcile(&snapshot, desired);

    for issue in &plan.issues {
        warn!(
            cluster = %desired.cluster,
            volume = %issue.object_name(),
            kind = issue.kind(),
            "{}",
            issue
        );
    }

    let outcome = if plan.is_empty() {
        ApplyOutcome::default()
    } else if dry_run {
        for action in &plan.actions {
            info!(cluster = %desired.cluster, action = %action, "Dry run, not applying");
        }
        let scratch = MemoryStore::from_snapshot(&snapshot);
        apply_plan(&scratch, &desired.namespace, &plan).await
    } else {
        apply_plan(client, &desired.namespace, &plan).await
    };

    Ok(PassReport {
        view,
        plan,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::metadata::read_status;
    use crate::volume::testing::{make_job, make_pod, make_volume};
    use crate::volume::{ActionKind, ClusterSnapshot, RetentionPolicy, Role, StorageSpec, VolumeStatus};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    fn desired(count: u32, retention: RetentionPolicy) -> DesiredTopology {
        DesiredTopology::uniform(
            "pg",
            "default",
            count,
            BTreeMap::from([
                (Role::PrimaryData, StorageSpec::new("10Gi")),
                (Role::WriteAheadLog, StorageSpec::new("2Gi")),
            ]),
            retention,
        )
    }

    /// Lister that always returns the same, possibly stale, snapshot
    struct FixedLister(ClusterSnapshot);

    #[async_trait]
    impl ObjectLister for FixedLister {
        async fn snapshot(&self, _cluster: &str, _namespace: &str) -> Result<ClusterSnapshot> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_scale_up_converges() {
        let store = MemoryStore::new();
        let desired = desired(2, RetentionPolicy::Keep);

        let first = run_pass(&store, &store, &desired, false).await.unwrap();
        assert_eq!(first.plan.count(ActionKind::Create), 4);
        assert!(first.outcome.is_complete());
        assert_eq!(
            store.volume_names("default"),
            vec!["pg-1", "pg-1-wal", "pg-2", "pg-2-wal"]
        );

        let second = run_pass(&store, &store, &desired, false).await.unwrap();
        assert!(second.plan.is_empty());
        assert_eq!(store.write_count(), 4);
    }

    #[tokio::test]
    async fn test_volume_promoted_once_in_use() {
        let store = MemoryStore::new();
        let desired = desired(1, RetentionPolicy::Keep);
        run_pass(&store, &store, &desired, false).await.unwrap();

        store.insert_job(make_job("pg-1-initdb", &["pg-1", "pg-1-wal"], "active"));
        let report = run_pass(&store, &store, &desired, false).await.unwrap();
        assert_eq!(report.plan.count(ActionKind::Update), 2);
        for name in ["pg-1", "pg-1-wal"] {
            let volume = store.volume("default", name).unwrap();
            assert_eq!(read_status(&volume), VolumeStatus::Ready);
        }

        // the job failing does not demote anything
        store.insert_job(make_job("pg-1-initdb", &["pg-1", "pg-1-wal"], "failed"));
        let report = run_pass(&store, &store, &desired, false).await.unwrap();
        assert!(report.plan.is_empty());
    }

    #[tokio::test]
    async fn test_stale_listing_conflicts_then_recovers() {
        let store = MemoryStore::new();
        store.insert_volume(make_volume("pg", 1, &Role::PrimaryData, VolumeStatus::Initializing));
        store.insert_volume(make_volume("pg", 1, &Role::WriteAheadLog, VolumeStatus::Initializing));
        store.insert_pod(make_pod("pg-1", &["pg-1", "pg-1-wal"], "Running"));
        let desired = desired(1, RetentionPolicy::Keep);

        let stale = FixedLister(store.snapshot("pg", "default").await.unwrap());
        store
            .modify_volume("default", "pg-1", |_| {})
            .unwrap();

        let report = run_pass(&stale, &store, &desired, false).await.unwrap();
        let error = report.outcome.error.expect("stale update must fail");
        assert!(error.is_conflict());
        assert!(report.outcome.applied.is_empty());
        // nothing after the failed action was attempted
        let wal = store.volume("default", "pg-1-wal").unwrap();
        assert_eq!(read_status(&wal), VolumeStatus::Initializing);

        let report = run_pass(&store, &store, &desired, false).await.unwrap();
        assert!(report.outcome.is_complete());
        assert_eq!(report.outcome.applied_count(), 2);
    }

    #[tokio::test]
    async fn test_scale_down_respects_retention() {
        let store = MemoryStore::new();
        run_pass(&store, &store, &desired(3, RetentionPolicy::Keep), false)
            .await
            .unwrap();

        let report = run_pass(&store, &store, &desired(2, RetentionPolicy::Keep), false)
            .await
            .unwrap();
        assert!(report.plan.is_empty());
        assert_eq!(report.plan.issues.len(), 2);
        assert_eq!(store.volume_names("default").len(), 6);

        let report = run_pass(&store, &store, &desired(2, RetentionPolicy::Delete), false)
            .await
            .unwrap();
        assert_eq!(report.outcome.applied_count(), 2);
        assert_eq!(
            store.volume_names("default"),
            vec!["pg-1", "pg-1-wal", "pg-2", "pg-2-wal"]
        );
    }

    #[tokio::test]
    async fn test_dry_run_leaves_store_untouched() {
        let store = MemoryStore::new();
        let report = run_pass(&store, &store, &desired(2, RetentionPolicy::Keep), true)
            .await
            .unwrap();

        assert_eq!(report.outcome.applied_count(), 4);
        assert!(store.volume_names("default").is_empty());
        assert_eq!(store.write_count(), 0);
    }
}
