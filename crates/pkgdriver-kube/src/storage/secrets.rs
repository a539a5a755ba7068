//! Kubernetes Secrets release store
//!
//! The default store. Each revision is one Secret named after its storage key
//! in the storage namespace, carrying the encoded release under `release`.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use pkgdriver_core::Release;
use pkgdriver_core::release::storage_key;
use std::collections::BTreeMap;

use super::{
    COMPRESSION_LABEL, CompressionMethod, MANAGED_BY, MANAGED_BY_LABEL, RELEASE_NAME_LABEL,
    ReleaseStore, decode_from_storage, encode_for_storage, storage_labels,
};
use crate::error::{KubeError, Result};

/// Secret type marking stored releases
pub const RELEASE_SECRET_TYPE: &str = "pkgdriver.io/release.v1";

const RELEASE_DATA_KEY: &str = "release";

/// Kubernetes Secrets release store
pub struct SecretsStore {
    client: Client,
    namespace: String,
    compression: CompressionMethod,
}

impl SecretsStore {
    /// Create a store keeping releases in `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            compression: CompressionMethod::default(),
        }
    }

    /// Use a different compression method for new writes
    pub fn with_compression(mut self, compression: CompressionMethod) -> Self {
        self.compression = compression;
        self
    }

    /// Namespace holding the release Secrets
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn api(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn build_secret(&self, release: &Release) -> Result<Secret> {
        let encoded = encode_for_storage(release, self.compression)?;

        let mut labels = storage_labels(release);
        labels.insert(
            COMPRESSION_LABEL.to_string(),
            self.compression.label().to_string(),
        );

        let mut data = BTreeMap::new();
        data.insert(
            RELEASE_DATA_KEY.to_string(),
            k8s_openapi::ByteString(encoded.into_bytes()),
        );

        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(release.storage_key()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            type_: Some(RELEASE_SECRET_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        })
    }

    fn parse_secret(&self, secret: &Secret) -> Result<Release> {
        let data = secret
            .data
            .as_ref()
            .and_then(|d| d.get(RELEASE_DATA_KEY))
            .ok_or_else(|| KubeError::Storage("Secret missing 'release' data".to_string()))?;

        let encoded = std::str::from_utf8(&data.0)
            .map_err(|e| KubeError::Storage(format!("Invalid UTF-8 in secret: {}", e)))?;

        decode_from_storage(encoded, compression_of(secret, self.compression))
    }

    fn not_found(name: &str) -> KubeError {
        KubeError::ReleaseNotFound {
            name: name.to_string(),
        }
    }
}

/// Compression recorded on a Secret, falling back to `default`
fn compression_of(secret: &Secret, default: CompressionMethod) -> CompressionMethod {
    secret
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(COMPRESSION_LABEL))
        .and_then(|c| CompressionMethod::from_label(c))
        .unwrap_or(default)
}

#[async_trait]
impl ReleaseStore for SecretsStore {
    async fn get(&self, name: &str, revision: u32) -> Result<Release> {
        match self.api().get(&storage_key(name, revision)).await {
            Ok(secret) => self.parse_secret(&secret),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(Self::not_found(name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn history(&self, name: &str) -> Result<Vec<Release>> {
        let selector = format!(
            "{}={},{}={}",
            MANAGED_BY_LABEL, MANAGED_BY, RELEASE_NAME_LABEL, name
        );
        let secrets = self
            .api()
            .list(&ListParams::default().labels(&selector))
            .await?;

        let mut releases = Vec::with_capacity(secrets.items.len());
        for secret in &secrets.items {
            match self.parse_secret(secret) {
                Ok(release) => releases.push(release),
                Err(e) => tracing::warn!(
                    secret = secret.metadata.name.as_deref().unwrap_or_default(),
                    error = %e,
                    "skipping unreadable release secret"
                ),
            }
        }

        if releases.is_empty() {
            return Err(Self::not_found(name));
        }

        // Sort by revision descending (newest first)
        releases.sort_by(|a, b| b.revision.cmp(&a.revision));
        Ok(releases)
    }

    async fn create(&self, release: &Release) -> Result<()> {
        let secret = self.build_secret(release)?;
        match self.api().create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                revision: release.revision,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, release: &Release) -> Result<()> {
        let key = release.storage_key();
        let api = self.api();

        let mut secret = self.build_secret(release)?;
        match api.get(&key).await {
            Ok(existing) => {
                secret.metadata.resource_version = existing.metadata.resource_version;
                api.replace(&key, &PostParams::default(), &secret).await?;
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                api.create(&PostParams::default(), &secret).await?;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    async fn delete(&self, name: &str, revision: u32) -> Result<Release> {
        let release = self.get(name, revision).await?;
        match self
            .api()
            .delete(&storage_key(name, revision), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(release),
            // Already deleted
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(release),
            Err(e) => Err(e.into()),
        }
    }
}
