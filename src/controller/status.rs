//! Cluster status summary

use crate::controller::apply::ApplyOutcome;
use crate::crd::VolumeSummary;
use crate::volume::{TopologyView, VolumePlan, VolumeStatus};
use chrono::{DateTime, Utc};

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Summarize a pass; volume counts are as listed at the start of the pass
pub fn summarize(
    view: &TopologyView,
    plan: &VolumePlan,
    outcome: &ApplyOutcome,
    observed_generation: Option<i64>,
    now: DateTime<Utc>,
) -> VolumeSummary {
    let ready = view
        .volumes()
        .filter(|v| v.status == VolumeStatus::Ready)
        .count();

    VolumeSummary {
        total: count(view.volume_count()),
        ready: count(ready),
        initializing: count(view.volume_count() - ready),
        resizing: count(view.volumes().filter(|v| v.resizing).count()),
        orphaned: count(view.orphans().count()),
        issues: count(plan.issues.len()),
        applied: count(outcome.applied_count()),
        observed_generation,
        last_reconciled: Some(now),
        message: outcome.error.as_ref().map(|e| e.to_string()),
    }
}

/// Whether `next` differs from the published summary beyond its timestamp
pub fn needs_update(current: Option<&VolumeSummary>, next: &VolumeSummary) -> bool {
    let strip = |s: &VolumeSummary| VolumeSummary {
        last_reconciled: None,
        ..s.clone()
    };
    match current {
        None => true,
        Some(current) => strip(current) != strip(next),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::volume::testing::{make_pod, make_volume, with_resizing};
    use crate::volume::{reconcile, ClusterSnapshot, DesiredTopology, RetentionPolicy, Role, StorageSpec};
    use std::collections::BTreeMap;

    #[test]
    fn test_summarize_counts() {
        let snapshot = ClusterSnapshot {
            volumes: vec![
                make_volume("pg", 1, &Role::PrimaryData, VolumeStatus::Ready),
                with_resizing(
                    make_volume("pg", 2, &Role::PrimaryData, VolumeStatus::Initializing),
                    "True",
                ),
                make_volume("pg", 3, &Role::PrimaryData, VolumeStatus::Ready),
            ],
            pods: vec![make_pod("pg-2", &["pg-2"], "Running")],
            ..Default::default()
        };
        let desired = DesiredTopology::uniform(
            "pg",
            "default",
            2,
            BTreeMap::from([(Role::PrimaryData, StorageSpec::new("1Gi"))]),
            RetentionPolicy::Keep,
        );
        let (view, plan) = reconcile(&snapshot, &desired);
        let outcome = ApplyOutcome {
            applied: Vec::new(),
            error: Some(Error::Conflict {
                kind: "PersistentVolumeClaim".into(),
                name: "pg-2".into(),
            }),
        };

        let now = Utc::now();
        let summary = summarize(&view, &plan, &outcome, Some(4), now);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.ready, 2);
        assert_eq!(summary.initializing, 1);
        assert_eq!(summary.resizing, 1);
        assert_eq!(summary.orphaned, 1);
        assert_eq!(summary.issues, 1);
        assert_eq!(summary.observed_generation, Some(4));
        assert_eq!(summary.last_reconciled, Some(now));
        assert!(summary.message.unwrap().contains("pg-2"));
    }

    #[test]
    fn test_needs_update_ignores_timestamp() {
        let summary = VolumeSummary {
            total: 2,
            ready: 2,
            last_reconciled: Some(Utc::now()),
            ..Default::default()
        };
        assert!(needs_update(None, &summary));

        let mut later = summary.clone();
        later.last_reconciled = Some(Utc::now() + chrono::Duration::seconds(30));
        assert!(!needs_update(Some(&summary), &later));

        later.ready = 1;
        later.initializing = 1;
        assert!(needs_update(Some(&summary), &later));
    }
}
