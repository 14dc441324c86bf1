//! In-Memory Object Store
//!
//! Versioned store of volumes, pods and jobs implementing both ports. Every
//! write bumps a store-wide resource version, and stale versions are
//! rejected with [`Error::Conflict`] the way the API server does. Used for
//! dry runs and tests.

use crate::domain::ports::{ObjectLister, VolumeClient};
use crate::error::{Error, Result};
use crate::volume::ClusterSnapshot;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::ResourceExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const KIND: &str = "PersistentVolumeClaim";

type ObjectKey = (String, String);

fn key_of<K: kube::Resource>(obj: &K) -> ObjectKey {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory object store
pub struct MemoryStore {
    volumes: RwLock<BTreeMap<ObjectKey, PersistentVolumeClaim>>,
    pods: RwLock<BTreeMap<ObjectKey, Pod>>,
    jobs: RwLock<BTreeMap<ObjectKey, Job>>,
    /// Last issued resource version
    version: AtomicU64,
    /// Number of successful writes
    writes: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            volumes: RwLock::new(BTreeMap::new()),
            pods: RwLock::new(BTreeMap::new()),
            jobs: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Seed a store from a listed snapshot, keeping listed resource versions
    pub fn from_snapshot(snapshot: &ClusterSnapshot) -> Self {
        let store = Self::new();
        let mut highest = 0;
        {
            let mut volumes = store.volumes.write();
            for volume in &snapshot.volumes {
                let mut volume = volume.clone();
                let version = volume
                    .resource_version()
                    .and_then(|v| v.parse::<u64>().ok());
                match version {
                    Some(v) => highest = highest.max(v),
                    None => {
                        highest += 1;
                        volume.metadata.resource_version = Some(highest.to_string());
                    }
                }
                volumes.insert(key_of(&volume), volume);
            }
        }
        store.version.store(highest, Ordering::SeqCst);
        for pod in &snapshot.pods {
            store.insert_pod(pod.clone());
        }
        for job in &snapshot.jobs {
            store.insert_job(job.clone());
        }
        store
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Insert or overwrite a volume without version checks
    pub fn insert_volume(&self, mut volume: PersistentVolumeClaim) -> PersistentVolumeClaim {
        volume.metadata.resource_version = Some(self.next_version());
        self.volumes.write().insert(key_of(&volume), volume.clone());
        volume
    }

    pub fn insert_pod(&self, pod: Pod) {
        self.pods.write().insert(key_of(&pod), pod);
    }

    pub fn insert_job(&self, job: Job) {
        self.jobs.write().insert(key_of(&job), job);
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.pods
            .write()
            .remove(&(namespace.to_string(), name.to_string()))
    }

    /// Fetch a stored volume
    pub fn volume(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.volumes
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Names of the stored volumes in `namespace`, sorted
    pub fn volume_names(&self, namespace: &str) -> Vec<String> {
        self.volumes
            .read()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Apply a change to a stored volume as a concurrent writer would
    pub fn modify_volume<F>(&self, namespace: &str, name: &str, f: F) -> Result<PersistentVolumeClaim>
    where
        F: FnOnce(&mut PersistentVolumeClaim),
    {
        let mut volumes = self.volumes.write();
        let volume = volumes
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::ResourceNotFound {
                kind: KIND.into(),
                name: name.to_string(),
            })?;
        f(volume);
        volume.metadata.resource_version = Some(self.next_version());
        Ok(volume.clone())
    }

    /// Number of successful writes through the client port
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn check_version(
        stored: &PersistentVolumeClaim,
        expected: Option<&str>,
        name: &str,
    ) -> Result<()> {
        match expected {
            Some(expected) if stored.resource_version().as_deref() != Some(expected) => {
                Err(Error::Conflict {
                    kind: KIND.into(),
                    name: name.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectLister for MemoryStore {
    async fn snapshot(&self, cluster: &str, namespace: &str) -> Result<ClusterSnapshot> {
        let in_namespace = |key: &ObjectKey| key.0 == namespace;

        let snapshot = ClusterSnapshot {
            volumes: self
                .volumes
                .read()
                .iter()
                .filter(|(k, _)| in_namespace(k))
                .map(|(_, v)| v.clone())
                .collect(),
            pods: self
                .pods
                .read()
                .iter()
                .filter(|(k, _)| in_namespace(k))
                .map(|(_, v)| v.clone())
                .collect(),
            jobs: self
                .jobs
                .read()
                .iter()
                .filter(|(k, _)| in_namespace(k))
                .map(|(_, v)| v.clone())
                .collect(),
        };

        Ok(snapshot.scoped_to(cluster))
    }
}

#[async_trait]
impl VolumeClient for MemoryStore {
    async fn create(&self, volume: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let key = key_of(volume);
        let mut volumes = self.volumes.write();
        if volumes.contains_key(&key) {
            return Err(Error::ResourceExists {
                kind: KIND.into(),
                name: key.1,
            });
        }

        let mut created = volume.clone();
        created.metadata.resource_version = Some(self.next_version());
        volumes.insert(key, created.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(volume = %created.name_any(), "Created volume in memory");
        Ok(created)
    }

    async fn update(
        &self,
        volume: &PersistentVolumeClaim,
        expected_version: Option<&str>,
    ) -> Result<PersistentVolumeClaim> {
        let key = key_of(volume);
        let mut volumes = self.volumes.write();
        let stored = volumes.get_mut(&key).ok_or_else(|| Error::ResourceNotFound {
            kind: KIND.into(),
            name: key.1.clone(),
        })?;
        Self::check_version(stored, expected_version, &key.1)?;

        stored.metadata.labels = volume.metadata.labels.clone();
        stored.metadata.annotations = volume.metadata.annotations.clone();
        stored.metadata.resource_version = Some(self.next_version());
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(volume = %key.1, "Updated volume in memory");
        Ok(stored.clone())
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        expected_version: Option<&str>,
    ) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let mut volumes = self.volumes.write();
        let stored = volumes.get(&key).ok_or_else(|| Error::ResourceNotFound {
            kind: KIND.into(),
            name: name.to_string(),
        })?;
        Self::check_version(stored, expected_version, name)?;

        volumes.remove(&key);
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(volume = %name, "Deleted volume from memory");
        Ok(())
    }
}
