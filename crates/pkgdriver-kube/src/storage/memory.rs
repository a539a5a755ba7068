//! In-memory release store
//!
//! Releases live in process memory. Used by tests and the `memory` storage
//! backend; lock poisoning only happens after a panic elsewhere, so lock
//! results are unwrapped.

use async_trait::async_trait;
use pkgdriver_core::Release;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use super::ReleaseStore;
use crate::error::{KubeError, Result};

/// In-memory release store
#[derive(Clone, Default)]
pub struct MemoryStore {
    /// Storage: name -> revision -> release
    store: Arc<RwLock<HashMap<String, BTreeMap<u32, Release>>>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
    /// When set, reads fail with this message
    read_failure: Arc<RwLock<Option<String>>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases
    pub fn with_releases(releases: Vec<Release>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.store.write().unwrap();
            for release in releases {
                inner
                    .entry(release.name.clone())
                    .or_default()
                    .insert(release.revision, release);
            }
        }
        store
    }

    /// Make every subsequent read fail with a storage error, or clear it
    pub fn set_read_failure(&self, message: Option<&str>) {
        *self.read_failure.write().unwrap() = message.map(str::to_string);
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().unwrap().clone()
    }

    /// Every stored revision across all releases
    pub fn all_releases(&self) -> Vec<Release> {
        let store = self.store.read().unwrap();
        store
            .values()
            .flat_map(|revisions| revisions.values())
            .cloned()
            .collect()
    }

    /// Count stored revisions
    pub fn release_count(&self) -> usize {
        let store = self.store.read().unwrap();
        store.values().map(BTreeMap::len).sum()
    }

    fn record(&self, op: impl FnOnce(&mut OperationCounts)) {
        op(&mut self.operations.write().unwrap());
    }

    fn check_read(&self) -> Result<()> {
        match self.read_failure.read().unwrap().as_ref() {
            Some(message) => Err(KubeError::Storage(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ReleaseStore for MemoryStore {
    async fn get(&self, name: &str, revision: u32) -> Result<Release> {
        self.record(|ops| ops.gets += 1);
        self.check_read()?;

        let store = self.store.read().unwrap();
        store
            .get(name)
            .and_then(|revisions| revisions.get(&revision))
            .cloned()
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
            })
    }

    async fn history(&self, name: &str) -> Result<Vec<Release>> {
        self.record(|ops| ops.lists += 1);
        self.check_read()?;

        let store = self.store.read().unwrap();
        let releases: Vec<Release> = store
            .get(name)
            .map(|revisions| revisions.values().rev().cloned().collect())
            .unwrap_or_default();

        if releases.is_empty() {
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
            });
        }

        Ok(releases)
    }

    async fn create(&self, release: &Release) -> Result<()> {
        self.record(|ops| ops.creates += 1);

        let mut store = self.store.write().unwrap();
        let revisions = store.entry(release.name.clone()).or_default();

        if revisions.contains_key(&release.revision) {
            return Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                revision: release.revision,
            });
        }

        revisions.insert(release.revision, release.clone());
        Ok(())
    }

    async fn update(&self, release: &Release) -> Result<()> {
        self.record(|ops| ops.updates += 1);

        let mut store = self.store.write().unwrap();
        store
            .entry(release.name.clone())
            .or_default()
            .insert(release.revision, release.clone());
        Ok(())
    }

    async fn delete(&self, name: &str, revision: u32) -> Result<Release> {
        self.record(|ops| ops.deletes += 1);

        let mut store = self.store.write().unwrap();
        let revisions = store.get_mut(name).ok_or_else(|| KubeError::ReleaseNotFound {
            name: name.to_string(),
        })?;
        let release = revisions
            .remove(&revision)
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
            })?;
        if revisions.is_empty() {
            store.remove(name);
        }

        Ok(release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::test_release;

    fn revision(name: &str, revision: u32) -> Release {
        let mut release = test_release(name, "kind: ConfigMap");
        release.revision = revision;
        release
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryStore::new();
        store.create(&revision("myapp", 1)).await.unwrap();

        let retrieved = store.get("myapp", 1).await.unwrap();
        assert_eq!(retrieved.name, "myapp");
        assert_eq!(retrieved.revision, 1);

        let counts = store.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.gets, 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let store = MemoryStore::new();
        store.create(&revision("myapp", 1)).await.unwrap();

        let err = store.create(&revision("myapp", 1)).await.unwrap_err();
        assert!(matches!(err, KubeError::ReleaseAlreadyExists { revision: 1, .. }));
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let store = MemoryStore::with_releases(vec![
            revision("myapp", 1),
            revision("myapp", 3),
            revision("myapp", 2),
            revision("other", 1),
        ]);

        let history = store.history("myapp").await.unwrap();
        let revisions: Vec<u32> = history.iter().map(|r| r.revision).collect();
        assert_eq!(revisions, vec![3, 2, 1]);

        assert_eq!(store.latest("myapp").await.unwrap().revision, 3);
    }

    #[tokio::test]
    async fn test_missing_release() {
        let store = MemoryStore::new();

        assert!(store.get("nope", 1).await.unwrap_err().is_release_not_found());
        assert!(store.history("nope").await.unwrap_err().is_release_not_found());
        assert!(store.latest("nope").await.unwrap_err().is_release_not_found());
        assert!(!store.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_last_revision_forgets_release() {
        let store = MemoryStore::with_releases(vec![revision("myapp", 1)]);

        let deleted = store.delete("myapp", 1).await.unwrap();
        assert_eq!(deleted.revision, 1);
        assert_eq!(store.release_count(), 0);
        assert!(!store.exists("myapp").await.unwrap());
        assert!(store.delete("myapp", 1).await.unwrap_err().is_release_not_found());
    }

    #[tokio::test]
    async fn test_read_failure() {
        let store = MemoryStore::with_releases(vec![revision("myapp", 1)]);
        store.set_read_failure(Some("etcd unavailable"));

        let err = store.latest("myapp").await.unwrap_err();
        assert!(matches!(err, KubeError::Storage(ref m) if m == "etcd unavailable"));

        store.set_read_failure(None);
        assert!(store.exists("myapp").await.unwrap());
    }
}
