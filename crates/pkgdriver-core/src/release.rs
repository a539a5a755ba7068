//! Release types
//!
//! A release is one revision of a package installed into a namespace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chart::ChartMetadata;
use crate::values::Values;

/// A stored release revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    /// Release name
    pub name: String,

    /// Namespace the workloads are installed into
    pub namespace: String,

    /// Revision number (1-indexed, increments with each upgrade)
    pub revision: u32,

    /// Current status
    pub status: ReleaseStatus,

    /// Chart metadata at deploy time
    pub chart: ChartMetadata,

    /// Configuration applied on top of the chart defaults
    pub config: Values,

    /// Rendered manifest
    pub manifest: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Release {
    /// First revision of a release, pending installation
    pub fn for_install(
        name: impl Into<String>,
        namespace: impl Into<String>,
        chart: ChartMetadata,
        config: Values,
        manifest: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            namespace: namespace.into(),
            revision: 1,
            status: ReleaseStatus::PendingInstall,
            chart,
            config,
            manifest,
            created_at: now,
            updated_at: now,
        }
    }

    /// Next revision after `previous`, pending upgrade
    pub fn for_upgrade(
        previous: &Release,
        chart: ChartMetadata,
        config: Values,
        manifest: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: previous.name.clone(),
            namespace: previous.namespace.clone(),
            revision: previous.revision + 1,
            status: ReleaseStatus::PendingUpgrade,
            chart,
            config,
            manifest,
            created_at: now,
            updated_at: now,
        }
    }

    /// Storage key for this revision
    pub fn storage_key(&self) -> String {
        storage_key(&self.name, self.revision)
    }

    /// Template-facing view of this release
    pub fn info(&self) -> ReleaseInfo {
        ReleaseInfo {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            revision: self.revision,
            is_install: self.revision == 1,
            is_upgrade: self.revision > 1,
        }
    }

    pub fn mark_deployed(&mut self) {
        self.set_status(ReleaseStatus::Deployed);
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.set_status(ReleaseStatus::Failed {
            reason: reason.into(),
        });
    }

    pub fn mark_superseded(&mut self) {
        self.set_status(ReleaseStatus::Superseded);
    }

    pub fn mark_uninstalling(&mut self) {
        self.set_status(ReleaseStatus::Uninstalling);
    }

    fn set_status(&mut self, status: ReleaseStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Storage key for a release revision
pub fn storage_key(name: &str, revision: u32) -> String {
    format!("pkgdriver.release.v1.{}.v{}", name, revision)
}

/// Release status
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum ReleaseStatus {
    #[default]
    Unknown,
    Deployed,
    Superseded,
    Failed {
        reason: String,
    },
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
}

impl ReleaseStatus {
    /// Check if this is a pending (transitional) state
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::PendingInstall | Self::PendingUpgrade | Self::Uninstalling
        )
    }

    /// Human-readable status name
    pub fn status_name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Deployed => "deployed",
            Self::Superseded => "superseded",
            Self::Failed { .. } => "failed",
            Self::Uninstalling => "uninstalling",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
        }
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "failed: {}", reason),
            other => write!(f, "{}", other.status_name()),
        }
    }
}

/// Release information exposed to templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Revision number
    pub revision: u32,

    /// Is this an install operation?
    pub is_install: bool,

    /// Is this an upgrade operation?
    pub is_upgrade: bool,
}
