//! Release stores
//!
//! A store persists every revision of every release it manages, keyed by
//! release name. Two backends are provided:
//! - **Secrets** (default): one Kubernetes Secret per revision in the storage namespace
//! - **Memory**: process-local, for tests and dry runs
//!
//! Stored releases are JSON, compressed (zstd by default, gzip supported)
//! and base64-encoded.

mod memory;
mod secrets;

pub use memory::{MemoryStore, OperationCounts};
pub use secrets::SecretsStore;

use async_trait::async_trait;
use pkgdriver_core::Release;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{KubeError, Result};

/// Label marking resources owned by pkgdriver
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY: &str = "pkgdriver";
pub const RELEASE_NAME_LABEL: &str = "pkgdriver.io/release-name";
pub const RELEASE_REVISION_LABEL: &str = "pkgdriver.io/release-revision";
pub const RELEASE_NAMESPACE_LABEL: &str = "pkgdriver.io/release-namespace";
pub const RELEASE_STATUS_LABEL: &str = "pkgdriver.io/status";
pub const COMPRESSION_LABEL: &str = "pkgdriver.io/compression";

/// Release persistence
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Get a specific revision of a release
    async fn get(&self, name: &str, revision: u32) -> Result<Release>;

    /// Every stored revision of a release, newest first
    ///
    /// Returns [`KubeError::ReleaseNotFound`] when nothing is stored.
    async fn history(&self, name: &str) -> Result<Vec<Release>>;

    /// Store a new revision
    async fn create(&self, release: &Release) -> Result<()>;

    /// Replace a stored revision
    async fn update(&self, release: &Release) -> Result<()>;

    /// Delete a specific revision, returning it
    async fn delete(&self, name: &str, revision: u32) -> Result<Release>;

    /// The newest revision of a release
    async fn latest(&self, name: &str) -> Result<Release> {
        self.history(name)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
            })
    }

    /// Check if a release exists
    async fn exists(&self, name: &str) -> Result<bool> {
        match self.latest(name).await {
            Ok(_) => Ok(true),
            Err(KubeError::ReleaseNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Which release store a session uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Kubernetes Secrets in the storage namespace
    #[default]
    Secret,
    /// Process-local memory
    Memory,
}

impl FromStr for StorageBackend {
    type Err = KubeError;

    /// Parse a backend name; an empty name selects the default
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "secret" | "secrets" => Ok(Self::Secret),
            "memory" => Ok(Self::Memory),
            other => Err(KubeError::InvalidConfig(format!(
                "unknown storage backend '{}' (expected 'secret' or 'memory')",
                other
            ))),
        }
    }
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Secret => write!(f, "secret"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Compression method for release data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression
    None,

    /// Gzip compression
    Gzip { level: u32 },

    /// Zstd compression
    Zstd { level: i32 },
}

impl Default for CompressionMethod {
    fn default() -> Self {
        Self::Zstd { level: 3 }
    }
}

impl CompressionMethod {
    /// Label value recorded next to stored data
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip { .. } => "gzip",
            Self::Zstd { .. } => "zstd",
        }
    }

    /// Method for a label value, if known
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "none" => Some(Self::None),
            "gzip" => Some(Self::Gzip { level: 6 }),
            "zstd" => Some(Self::Zstd { level: 3 }),
            _ => None,
        }
    }
}

/// Compress data using the configured method
#[must_use = "compression result should be used"]
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { level } => {
            use std::io::Write;
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder
                .write_all(data)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| KubeError::Compression(e.to_string()))
        }
        CompressionMethod::Zstd { level } => zstd::encode_all(std::io::Cursor::new(data), level)
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Decompress data
#[must_use = "decompression result should be used"]
pub fn decompress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { .. } => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            Ok(decompressed)
        }
        CompressionMethod::Zstd { .. } => zstd::decode_all(std::io::Cursor::new(data))
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Encode a release for storage (serialize + compress + base64)
#[must_use = "encoded data should be used for storage"]
pub fn encode_for_storage(release: &Release, compression: CompressionMethod) -> Result<String> {
    let json = serde_json::to_vec(release)?;
    let compressed = compress(&json, compression)?;
    Ok(base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        &compressed,
    ))
}

/// Decode a stored release (base64 + decompress + deserialize)
#[must_use = "decoded release should be used"]
pub fn decode_from_storage(data: &str, compression: CompressionMethod) -> Result<Release> {
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data)
        .map_err(|e| KubeError::Serialization(format!("base64 decode error: {}", e)))?;
    let decompressed = decompress(&decoded, compression)?;
    Ok(serde_json::from_slice(&decompressed)?)
}

/// Labels applied to all storage resources
#[must_use = "labels should be applied to resources"]
pub fn storage_labels(release: &Release) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels.insert(RELEASE_NAME_LABEL.to_string(), release.name.clone());
    labels.insert(RELEASE_REVISION_LABEL.to_string(), release.revision.to_string());
    labels.insert(RELEASE_NAMESPACE_LABEL.to_string(), release.namespace.clone());
    labels.insert(
        RELEASE_STATUS_LABEL.to_string(),
        release.status.status_name().to_string(),
    );
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgdriver_core::{ChartMetadata, ReleaseStatus, Values};

    pub(crate) fn test_release(name: &str, manifest: &str) -> Release {
        Release::for_install(
            name,
            "ns-a",
            ChartMetadata {
                api_version: "v2".to_string(),
                name: "test-chart".to_string(),
                version: semver::Version::new(1, 0, 0),
                description: Some("Test chart".to_string()),
                app_version: None,
                annotations: Default::default(),
            },
            Values::from_json(r#"{"replicas": 3}"#).unwrap(),
            manifest.to_string(),
        )
    }

    #[test]
    fn test_compression_roundtrip() {
        let data = b"Hello, World! This is test data for compression.";
        for method in [
            CompressionMethod::None,
            CompressionMethod::Gzip { level: 6 },
            CompressionMethod::Zstd { level: 3 },
        ] {
            let compressed = compress(data, method).unwrap();
            let decompressed = decompress(&compressed, method).unwrap();
            assert_eq!(data.as_slice(), decompressed.as_slice(), "{:?}", method);
        }
    }

    #[test]
    fn test_encode_decode_preserves_release() {
        let mut release = test_release("app1", "apiVersion: v1\nkind: ConfigMap");
        release.mark_failed("Test failure");

        let encoded = encode_for_storage(&release, CompressionMethod::default()).unwrap();
        let decoded = decode_from_storage(&encoded, CompressionMethod::default()).unwrap();

        assert_eq!(decoded, release);
        assert!(matches!(decoded.status, ReleaseStatus::Failed { reason } if reason == "Test failure"));
    }

    #[test]
    fn test_large_manifest_compresses() {
        let release = test_release("app1", &"apiVersion: v1\nkind: ConfigMap\n".repeat(1000));

        let encoded = encode_for_storage(&release, CompressionMethod::default()).unwrap();
        let raw = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &encoded)
            .unwrap();
        let json = serde_json::to_vec(&release).unwrap();
        assert!(raw.len() < json.len());
    }

    #[test]
    fn test_decode_invalid_data() {
        assert!(decode_from_storage("not valid base64!!!", CompressionMethod::None).is_err());

        let not_json =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"not json");
        assert!(decode_from_storage(&not_json, CompressionMethod::None).is_err());
    }

    #[test]
    fn test_storage_labels() {
        let release = test_release("app1", "");
        let labels = storage_labels(&release);

        assert_eq!(labels.get(MANAGED_BY_LABEL).map(String::as_str), Some("pkgdriver"));
        assert_eq!(labels.get(RELEASE_NAME_LABEL).map(String::as_str), Some("app1"));
        assert_eq!(labels.get(RELEASE_REVISION_LABEL).map(String::as_str), Some("1"));
        assert_eq!(labels.get(RELEASE_NAMESPACE_LABEL).map(String::as_str), Some("ns-a"));
        assert_eq!(
            labels.get(RELEASE_STATUS_LABEL).map(String::as_str),
            Some("pending-install")
        );
    }

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!("".parse::<StorageBackend>().unwrap(), StorageBackend::Secret);
        assert_eq!("secret".parse::<StorageBackend>().unwrap(), StorageBackend::Secret);
        assert_eq!("Memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!("sql".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_compression_labels() {
        for method in [
            CompressionMethod::None,
            CompressionMethod::Gzip { level: 6 },
            CompressionMethod::Zstd { level: 3 },
        ] {
            assert_eq!(CompressionMethod::from_label(method.label()), Some(method));
        }
        assert_eq!(CompressionMethod::from_label("lz4"), None);
    }
}
