//! Kubernetes Adapter
//!
//! Implements the lister and client ports against the API server. Listing
//! is narrowed server-side to objects labelled for the cluster plus
//! unlabelled ones, which are then scoped by name. Updates
//! use `replace` so the listed resource version travels with the object;
//! deletions carry it as a precondition.

use crate::domain::ports::{ObjectLister, VolumeClient};
use crate::error::{Error, Result};
use crate::volume::metadata::CLUSTER_LABEL;
use crate::volume::ClusterSnapshot;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{DeleteParams, ListParams, PostParams, Preconditions};
use kube::{Api, Client, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::{debug, info};

const KIND: &str = "PersistentVolumeClaim";

/// Adapter over a live Kubernetes client
#[derive(Clone)]
pub struct KubeObjects {
    client: Client,
    field_manager: String,
}

impl KubeObjects {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn volumes(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(self.field_manager.clone()),
        }
    }

    fn namespace_of(volume: &PersistentVolumeClaim) -> Result<String> {
        volume.namespace().ok_or_else(|| {
            Error::Internal(format!("volume {} has no namespace", volume.name_any()))
        })
    }
}

/// Label selectors covering a cluster's objects: those labelled for it, and
/// unlabelled ones whose names are decoded afterwards
pub fn cluster_selectors(cluster: &str) -> [String; 2] {
    [
        format!("{}={}", CLUSTER_LABEL, cluster),
        format!("!{}", CLUSTER_LABEL),
    ]
}

/// List the objects that can belong to `cluster`; objects labelled for other
/// clusters are never fetched
async fn list_for_cluster<K>(api: &Api<K>, cluster: &str) -> std::result::Result<Vec<K>, kube::Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    let [labelled, unlabelled] = cluster_selectors(cluster);
    let labelled = ListParams::default().labels(&labelled);
    let unlabelled = ListParams::default().labels(&unlabelled);
    let (labelled, unlabelled) =
        futures::try_join!(api.list(&labelled), api.list(&unlabelled))?;
    Ok(labelled.items.into_iter().chain(unlabelled.items).collect())
}

#[async_trait]
impl ObjectLister for KubeObjects {
    async fn snapshot(&self, cluster: &str, namespace: &str) -> Result<ClusterSnapshot> {
        let volumes = self.volumes(namespace);
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);

        let (volumes, pods, jobs) = futures::try_join!(
            list_for_cluster(&volumes, cluster),
            list_for_cluster(&pods, cluster),
            list_for_cluster(&jobs, cluster),
        )?;

        let snapshot = ClusterSnapshot {
            volumes,
            pods,
            jobs,
        }
        .scoped_to(cluster);

        debug!(
            cluster = %cluster,
            namespace = %namespace,
            volumes = snapshot.volumes.len(),
            pods = snapshot.pods.len(),
            jobs = snapshot.jobs.len(),
            "Listed cluster snapshot"
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl VolumeClient for KubeObjects {
    async fn create(&self, volume: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let name = volume.name_any();
        let namespace = Self::namespace_of(volume)?;
        let created = self
            .volumes(&namespace)
            .create(&self.post_params(), volume)
            .await
            .map_err(|e| Error::from_kube(KIND, &name, e))?;
        info!(volume = %name, namespace = %namespace, "Created volume");
        Ok(created)
    }

    async fn update(
        &self,
        volume: &PersistentVolumeClaim,
        expected_version: Option<&str>,
    ) -> Result<PersistentVolumeClaim> {
        let name = volume.name_any();
        let namespace = Self::namespace_of(volume)?;

        let mut volume = volume.clone();
        if let Some(version) = expected_version {
            volume.metadata.resource_version = Some(version.to_string());
        }

        let updated = self
            .volumes(&namespace)
            .replace(&name, &self.post_params(), &volume)
            .await
            .map_err(|e| Error::from_kube(KIND, &name, e))?;
        info!(volume = %name, namespace = %namespace, "Updated volume metadata");
        Ok(updated)
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        expected_version: Option<&str>,
    ) -> Result<()> {
        let params = DeleteParams {
            preconditions: expected_version.map(|version| Preconditions {
                resource_version: Some(version.to_string()),
                uid: None,
            }),
            ..Default::default()
        };

        self.volumes(namespace)
            .delete(name, &params)
            .await
            .map_err(|e| Error::from_kube(KIND, name, e))?;
        info!(volume = %name, namespace = %namespace, "Deleted volume");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_selectors() {
        let [labelled, unlabelled] = cluster_selectors("pg");
        assert_eq!(labelled, "pgvolume.io/cluster=pg");
        assert_eq!(unlabelled, "!pgvolume.io/cluster");
    }
}
