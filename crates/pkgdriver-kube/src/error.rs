//! Error types for pkgdriver-kube

use thiserror::Error;

/// Result type for pkgdriver-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur during Kubernetes operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Release not found
    #[error("release '{name}' not found")]
    ReleaseNotFound { name: String },

    /// Release revision already stored
    #[error("release '{name}' revision {revision} already exists")]
    ReleaseAlreadyExists { name: String, revision: u32 },

    /// Another operation is in progress
    #[error("another operation is in progress for release '{name}': {status}")]
    OperationInProgress { name: String, status: String },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compression error
    #[error("compression error: {0}")]
    Compression(String),

    /// Template rendering error
    #[error("template error: {0}")]
    Template(String),

    /// Registry client or chart resolution error
    #[error(transparent)]
    Resolve(#[from] pkgdriver_repo::RepoError),

    /// Registry authentication error
    #[error("authenticator error: {0}")]
    Auth(String),

    /// Kubeconfig could not be obtained or parsed
    #[error("kubeconfig error for cluster '{cluster}': {message}")]
    Kubeconfig { cluster: String, message: String },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// One or more resources could not be applied or deleted
    #[error("resource operation failed: {0}")]
    Apply(String),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<minijinja::Error> for KubeError {
    fn from(e: minijinja::Error) -> Self {
        KubeError::Template(e.to_string())
    }
}

impl KubeError {
    /// Check if the release store reported no such release
    pub fn is_release_not_found(&self) -> bool {
        matches!(self, KubeError::ReleaseNotFound { .. })
    }
}
