//! Driver configuration

use serde::{Deserialize, Serialize};

use crate::storage::StorageBackend;

/// Environment variable selecting the release storage backend
pub const STORAGE_ENV: &str = "PKGDRIVER_STORAGE";

/// Environment variable selecting the release storage namespace
pub const NAMESPACE_ENV: &str = "PKGDRIVER_NAMESPACE";

/// Namespace used when nothing else is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Package driver settings
///
/// The storage backend is kept as written and parsed during initialization,
/// so an unknown backend name surfaces as an initialization failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverConfig {
    /// Release storage backend name (`secret` or `memory`)
    pub storage: String,

    /// Namespace releases are stored in
    pub namespace: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::default().to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl DriverConfig {
    /// Read overrides from `PKGDRIVER_STORAGE` and `PKGDRIVER_NAMESPACE`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(storage) = lookup(STORAGE_ENV).filter(|s| !s.is_empty()) {
            config.storage = storage;
        }
        if let Some(namespace) = lookup(NAMESPACE_ENV).filter(|s| !s.is_empty()) {
            config.namespace = namespace;
        }
        config
    }

    /// Use a specific backend
    pub fn with_storage(mut self, backend: StorageBackend) -> Self {
        self.storage = backend.to_string();
        self
    }

    /// Use a specific storage namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}
