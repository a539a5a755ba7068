//! pkgdriver Kube - package lifecycle against Kubernetes clusters
//!
//! This crate provides:
//! - **Package Driver**: Create-or-upgrade, uninstall and drift detection for one package at a time
//! - **Release Storage**: Persist release revisions in Kubernetes Secrets or in memory
//! - **Release Actions**: Install, upgrade and uninstall with a pending/deployed state machine
//! - **Rendering**: Chart templates rendered with MiniJinja
//! - **Applying**: Server-Side Apply of rendered manifests through API discovery
//! - **Authentication**: Registry pull secrets and namespace tracking
//! - **Cluster Sessions**: Clients for named clusters from kubeconfig Secrets

pub mod actions;
pub mod apply;
pub mod auth;
pub mod cluster;
pub mod config;
pub mod driver;
pub mod error;
pub mod render;
pub mod storage;

pub use actions::{ActionConfig, InstallOptions, UpgradeOptions};
pub use apply::{KubeApplier, ManifestApplier, OperationSummary};
pub use auth::{AuthConfig, Authenticator, KubeAuthenticator};
pub use cluster::{
    ClusterSession, KubeClusterClient, KubeconfigClient, SecretKubeconfigClient,
    TargetClusterClient,
};
pub use config::DriverConfig;
pub use driver::{
    BookkeepingFailure, BookkeepingTask, ConfigDrift, DriverError, DriverSession, InitStep,
    InstallOutcome, PackageDriver, ReleaseAction, UninstallOutcome,
};
pub use error::{KubeError, Result};
pub use render::ChartRenderer;
pub use storage::{CompressionMethod, MemoryStore, ReleaseStore, SecretsStore, StorageBackend};
