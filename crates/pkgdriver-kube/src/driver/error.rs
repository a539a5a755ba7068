//! Package driver errors

use std::fmt;
use thiserror::Error;

use crate::error::KubeError;
use pkgdriver_repo::RepoError;

/// Initialization step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    ClusterSession,
    RegistryClient,
    ActionConfig,
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClusterSession => write!(f, "establish cluster session"),
            Self::RegistryClient => write!(f, "create registry client"),
            Self::ActionConfig => write!(f, "initialize release actions"),
        }
    }
}

/// Errors surfaced by the package driver
#[derive(Debug, Error)]
pub enum DriverError {
    /// The driver could not be bound to a cluster
    #[error("failed to {operation} for cluster '{cluster}'")]
    Initialization {
        operation: InitStep,
        cluster: String,
        #[source]
        source: KubeError,
    },

    /// The chart could not be fetched or loaded
    #[error("failed to resolve chart {uri} for package '{name}'")]
    ChartResolution {
        name: String,
        uri: String,
        #[source]
        source: RepoError,
    },

    /// The release store failed for a reason other than a missing release
    #[error("failed to query release '{name}'")]
    ReleaseQuery {
        name: String,
        #[source]
        source: KubeError,
    },

    #[error("failed to install package '{name}'")]
    Install {
        name: String,
        #[source]
        source: KubeError,
    },

    #[error("failed to upgrade package '{name}'")]
    Upgrade {
        name: String,
        #[source]
        source: KubeError,
    },

    #[error("failed to uninstall package '{name}'")]
    Uninstall {
        name: String,
        #[source]
        source: KubeError,
    },

    /// No release to compare against
    #[error("release '{name}' not found")]
    NotFound {
        name: String,
        #[source]
        source: KubeError,
    },
}

impl DriverError {
    pub(crate) fn initialization(
        operation: InitStep,
        cluster: &str,
        source: impl Into<KubeError>,
    ) -> Self {
        Self::Initialization {
            operation,
            cluster: cluster.to_string(),
            source: source.into(),
        }
    }

    /// Package name the error is about, if any
    pub fn package(&self) -> Option<&str> {
        match self {
            Self::Initialization { .. } => None,
            Self::ChartResolution { name, .. }
            | Self::ReleaseQuery { name, .. }
            | Self::Install { name, .. }
            | Self::Upgrade { name, .. }
            | Self::Uninstall { name, .. }
            | Self::NotFound { name, .. } => Some(name),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
