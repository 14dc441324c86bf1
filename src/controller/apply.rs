//! Plan application
//!
//! Applies a plan's actions in order through a [`VolumeClient`] and stops at
//! the first failure. Whatever was not applied is recomputed by the next
//! pass from a fresh listing.

use crate::domain::ports::VolumeClient;
use crate::error::{Error, Result};
use crate::volume::{ActionKind, VolumeAction, VolumePlan};
use tracing::{debug, warn};

/// Result of applying one plan
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Actions that went through, in order
    pub applied: Vec<(ActionKind, String)>,
    /// Error that stopped application
    pub error: Option<Error>,
}

impl ApplyOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Apply one action against volumes in `namespace`
pub async fn apply_action(
    client: &dyn VolumeClient,
    namespace: &str,
    action: &VolumeAction,
) -> Result<()> {
    match action {
        VolumeAction::Create { volume, .. } => {
            client.create(volume).await?;
        }
        VolumeAction::Delete {
            name,
            expected_version,
            ..
        } => {
            client
                .delete(namespace, name, expected_version.as_deref())
                .await?;
        }
        VolumeAction::Update {
            volume,
            expected_version,
            ..
        } => {
            client.update(volume, expected_version.as_deref()).await?;
        }
    }
    Ok(())
}

/// Apply a plan's actions in order, stopping at the first failure
pub async fn apply_plan(
    client: &dyn VolumeClient,
    namespace: &str,
    plan: &VolumePlan,
) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::default();

    for action in &plan.actions {
        match apply_action(client, namespace, action).await {
            Ok(()) => {
                debug!(action = %action, "Applied volume action");
                outcome.applied.push((action.kind(), action.name()));
            }
            Err(err) => {
                warn!(
                    action = %action,
                    applied = outcome.applied.len(),
                    remaining = plan.actions.len() - outcome.applied.len(),
                    error = %err,
                    "Stopping plan application"
                );
                outcome.error = Some(err);
                break;
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryStore;
    use crate::volume::testing::make_volume;
    use crate::volume::{Role, VolumeIdentity, VolumeStatus};

    #[tokio::test]
    async fn test_apply_stops_at_first_failure() {
        let store = MemoryStore::new();
        store.insert_volume(make_volume("pg", 2, &Role::PrimaryData, VolumeStatus::Ready));

        let create = |serial: u32| VolumeAction::Create {
            identity: VolumeIdentity::new("pg", serial, Role::PrimaryData),
            volume: make_volume("pg", serial, &Role::PrimaryData, VolumeStatus::Initializing),
        };
        let plan = VolumePlan {
            actions: vec![create(1), create(2), create(3)],
            issues: Vec::new(),
        };

        let outcome = apply_plan(&store, "default", &plan).await;
        assert!(!outcome.is_complete());
        assert_eq!(outcome.applied, vec![(ActionKind::Create, "pg-1".to_string())]);
        assert!(matches!(outcome.error, Some(Error::ResourceExists { .. })));
        assert!(store.volume("default", "pg-3").is_none());
    }
}
