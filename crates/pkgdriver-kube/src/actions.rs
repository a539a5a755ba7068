//! Release actions: install, upgrade, uninstall and get
//!
//! [`ActionConfig`] binds a release store and a manifest applier. Each action records its progress in the store so an interrupted
//! operation leaves a pending revision behind.

use pkgdriver_core::{Chart, Release, Values};
use std::sync::Arc;

use crate::apply::ManifestApplier;
use crate::cluster::ClusterSession;
use crate::error::{KubeError, Result};
use crate::render::ChartRenderer;
use crate::storage::{ReleaseStore, StorageBackend};

/// Options for install operation
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,
}

impl InstallOptions {
    /// Create install options with name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// Options for upgrade operation
#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    /// Release name
    pub name: String,

    /// Maximum number of revisions to keep, the new one included
    pub max_history: Option<u32>,
}

impl UpgradeOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Limit stored revisions
    pub fn with_max_history(mut self, max_history: u32) -> Self {
        self.max_history = Some(max_history);
        self
    }
}

/// Release actions bound to one cluster session
pub struct ActionConfig {
    store: Arc<dyn ReleaseStore>,
    applier: Arc<dyn ManifestApplier>,
    renderer: ChartRenderer,
}

impl ActionConfig {
    /// Create from explicit parts
    pub fn new(store: Arc<dyn ReleaseStore>, applier: Arc<dyn ManifestApplier>) -> Self {
        Self {
            store,
            applier,
            renderer: ChartRenderer::new(),
        }
    }

    /// Bind a cluster session, storing releases with `backend` in `namespace`
    pub fn init(
        session: &dyn ClusterSession,
        backend: StorageBackend,
        namespace: &str,
    ) -> Result<Self> {
        let store = session.release_store(backend, namespace)?;
        tracing::debug!(
            cluster = session.cluster_name(),
            storage = %backend,
            namespace,
            "initialized action configuration"
        );
        Ok(Self::new(store, session.applier()))
    }

    // ========== Get ==========

    /// Latest revision of a release
    pub async fn get(&self, name: &str) -> Result<Release> {
        self.store.latest(name).await
    }

    // ========== Install ==========

    /// Install a new release
    pub async fn install(
        &self,
        chart: &Chart,
        values: Values,
        options: &InstallOptions,
    ) -> Result<Release> {
        if self.store.exists(&options.name).await? {
            let existing = self.store.latest(&options.name).await?;
            return Err(KubeError::ReleaseAlreadyExists {
                name: options.name.clone(),
                revision: existing.revision,
            });
        }

        let mut release = Release::for_install(
            &options.name,
            &options.namespace,
            chart.metadata.clone(),
            values,
            String::new(),
        );
        release.manifest = self.renderer.render(chart, &release.info(), &release.config)?;

        self.store.create(&release).await?;
        self.deploy(&mut release).await?;

        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            chart = %chart.name(),
            version = %chart.version(),
            "installed release"
        );
        Ok(release)
    }

    // ========== Upgrade ==========

    /// Upgrade an existing release
    ///
    /// Refuses to start while the latest revision is still pending. History is
    /// trimmed to `max_history` whether or not the new revision deploys.
    pub async fn upgrade(
        &self,
        chart: &Chart,
        values: Values,
        options: &UpgradeOptions,
    ) -> Result<Release> {
        let existing = self.store.latest(&options.name).await?;

        if existing.status.is_pending() {
            return Err(KubeError::OperationInProgress {
                name: existing.name.clone(),
                status: existing.status.to_string(),
            });
        }

        let mut release = Release::for_upgrade(&existing, chart.metadata.clone(), values, String::new());
        release.manifest = self.renderer.render(chart, &release.info(), &release.config)?;

        // Store the pending release
        self.store.create(&release).await?;

        // Mark previous as superseded
        let mut previous = existing;
        previous.mark_superseded();
        self.store.update(&previous).await?;

        let deployed = self.deploy(&mut release).await;

        if let Some(max_history) = options.max_history {
            self.cleanup_history(&release.name, max_history).await?;
        }
        deployed?;

        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            revision = release.revision,
            "upgraded release"
        );
        Ok(release)
    }

    // ========== Uninstall ==========

    /// Uninstall a release, deleting its resources and every stored revision
    pub async fn uninstall(&self, name: &str) -> Result<Release> {
        let mut release = self.store.latest(name).await?;

        release.mark_uninstalling();
        self.store.update(&release).await?;

        let result = self
            .applier
            .delete(&release.namespace, &release.manifest)
            .await
            .and_then(|summary| summary.into_result());
        if let Err(e) = result {
            release.mark_failed(e.to_string());
            self.store.update(&release).await?;
            return Err(e);
        }

        for revision in self.store.history(name).await? {
            self.store.delete(name, revision.revision).await?;
        }

        tracing::info!(release = %name, namespace = %release.namespace, "uninstalled release");
        Ok(release)
    }

    /// Apply a pending release and record the outcome
    async fn deploy(&self, release: &mut Release) -> Result<()> {
        let result = self
            .applier
            .apply(&release.namespace, &release.manifest)
            .await
            .and_then(|summary| summary.into_result());

        match result {
            Ok(summary) => {
                tracing::debug!(release = %release.name, result = %summary.summary(), "applied resources");
                release.mark_deployed();
                self.store.update(release).await
            }
            Err(e) => {
                release.mark_failed(e.to_string());
                self.store.update(release).await?;
                Err(e)
            }
        }
    }

    /// Delete the oldest revisions beyond `max_history`
    async fn cleanup_history(&self, name: &str, max_history: u32) -> Result<()> {
        let history = self.store.history(name).await?;

        for release in history.iter().skip(max_history.max(1) as usize) {
            self.store.delete(name, release.revision).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::OperationSummary;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use pkgdriver_core::{ChartMetadata, ReleaseStatus};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingApplier {
        applied: Mutex<Vec<(String, String)>>,
        deleted: Mutex<Vec<(String, String)>>,
        fail_apply: bool,
    }

    #[async_trait]
    impl ManifestApplier for RecordingApplier {
        async fn apply(&self, namespace: &str, manifest: &str) -> Result<OperationSummary> {
            self.applied
                .lock()
                .unwrap()
                .push((namespace.to_string(), manifest.to_string()));
            let mut summary = OperationSummary::default();
            if self.fail_apply {
                summary
                    .failed
                    .push(("ConfigMap/app1".to_string(), "forbidden".to_string()));
            }
            Ok(summary)
        }

        async fn delete(&self, namespace: &str, manifest: &str) -> Result<OperationSummary> {
            self.deleted
                .lock()
                .unwrap()
                .push((namespace.to_string(), manifest.to_string()));
            Ok(OperationSummary::default())
        }
    }

    fn chart() -> Chart {
        Chart {
            metadata: ChartMetadata {
                api_version: "v2".to_string(),
                name: "app1".to_string(),
                version: semver::Version::new(1, 0, 0),
                description: None,
                app_version: None,
                annotations: Default::default(),
            },
            values: Values::from_yaml("replicas: 1\n").unwrap(),
            templates: BTreeMap::from([(
                "cm.yaml".to_string(),
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ release.name }}\ndata:\n  replicas: \"{{ values.replicas }}\"".to_string(),
            )]),
        }
    }

    fn config(store: &MemoryStore, applier: Arc<RecordingApplier>) -> ActionConfig {
        ActionConfig::new(Arc::new(store.clone()), applier)
    }

    fn values(json: &str) -> Values {
        Values::from_json(json).unwrap()
    }

    #[tokio::test]
    async fn test_install_deploys_and_stores() {
        let store = MemoryStore::new();
        let applier = Arc::new(RecordingApplier::default());
        let actions = config(&store, applier.clone());

        let release = actions
            .install(&chart(), values(r#"{"replicas": 2}"#), &InstallOptions::new("app1", "ns-a"))
            .await
            .unwrap();

        assert_eq!(release.status, ReleaseStatus::Deployed);
        assert_eq!(release.namespace, "ns-a");
        assert!(release.manifest.contains("replicas: \"2\""));

        let stored = actions.get("app1").await.unwrap();
        assert_eq!(stored, release);

        let applied = applier.applied.lock().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].0, "ns-a");
    }

    #[tokio::test]
    async fn test_install_existing_fails() {
        let store = MemoryStore::new();
        let actions = config(&store, Arc::new(RecordingApplier::default()));
        let options = InstallOptions::new("app1", "ns-a");

        actions.install(&chart(), Values::new(), &options).await.unwrap();
        let err = actions.install(&chart(), Values::new(), &options).await.unwrap_err();
        assert!(matches!(err, KubeError::ReleaseAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_failed_apply_records_failure() {
        let store = MemoryStore::new();
        let applier = Arc::new(RecordingApplier {
            fail_apply: true,
            ..Default::default()
        });
        let actions = config(&store, applier);

        let err = actions
            .install(&chart(), Values::new(), &InstallOptions::new("app1", "ns-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::Apply(_)));

        let stored = actions.get("app1").await.unwrap();
        assert!(matches!(stored.status, ReleaseStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn test_upgrade_supersedes_and_caps_history() {
        let store = MemoryStore::new();
        let actions = config(&store, Arc::new(RecordingApplier::default()));

        actions
            .install(&chart(), values(r#"{"replicas": 1}"#), &InstallOptions::new("app1", "ns-a"))
            .await
            .unwrap();

        let options = UpgradeOptions::new("app1").with_max_history(2);
        for replicas in 2..=4 {
            actions
                .upgrade(&chart(), values(&format!(r#"{{"replicas": {}}}"#, replicas)), &options)
                .await
                .unwrap();
        }

        let history = store.history("app1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].revision, 4);
        assert_eq!(history[0].status, ReleaseStatus::Deployed);
        assert_eq!(history[0].namespace, "ns-a");
        assert_eq!(history[0].config, values(r#"{"replicas": 4}"#));
        assert_eq!(history[1].status, ReleaseStatus::Superseded);
    }

    #[tokio::test]
    async fn test_failed_upgrades_still_cap_history() {
        let store = MemoryStore::new();
        config(&store, Arc::new(RecordingApplier::default()))
            .install(&chart(), Values::new(), &InstallOptions::new("app1", "ns-a"))
            .await
            .unwrap();

        let failing = config(
            &store,
            Arc::new(RecordingApplier {
                fail_apply: true,
                ..Default::default()
            }),
        );
        let options = UpgradeOptions::new("app1").with_max_history(2);
        for _ in 0..4 {
            let err = failing
                .upgrade(&chart(), Values::new(), &options)
                .await
                .unwrap_err();
            assert!(matches!(err, KubeError::Apply(_)));
        }

        let history = store.history("app1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].revision, 5);
        assert!(matches!(history[0].status, ReleaseStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn test_upgrade_refuses_pending_release() {
        let mut pending = Release::for_install(
            "app1",
            "ns-a",
            chart().metadata,
            Values::new(),
            String::new(),
        );
        pending.status = ReleaseStatus::PendingInstall;
        let store = MemoryStore::with_releases(vec![pending]);
        let actions = config(&store, Arc::new(RecordingApplier::default()));

        let err = actions
            .upgrade(&chart(), Values::new(), &UpgradeOptions::new("app1"))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::OperationInProgress { .. }));
    }

    #[tokio::test]
    async fn test_uninstall_removes_history() {
        let store = MemoryStore::new();
        let applier = Arc::new(RecordingApplier::default());
        let actions = config(&store, applier.clone());

        actions
            .install(&chart(), Values::new(), &InstallOptions::new("app1", "ns-a"))
            .await
            .unwrap();
        actions
            .upgrade(&chart(), Values::new(), &UpgradeOptions::new("app1"))
            .await
            .unwrap();

        let removed = actions.uninstall("app1").await.unwrap();
        assert_eq!(removed.namespace, "ns-a");
        assert_eq!(store.release_count(), 0);
        assert_eq!(applier.deleted.lock().unwrap().len(), 1);

        let err = actions.uninstall("app1").await.unwrap_err();
        assert!(err.is_release_not_found());
    }
}
