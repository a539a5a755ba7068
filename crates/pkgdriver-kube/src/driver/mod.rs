//! The package driver
//!
//! [`PackageDriver`] reconciles one package at a time against a target
//! cluster. [`PackageDriver::initialize`] binds it to a cluster and returns a
//! [`DriverSession`], the only handle exposing install, uninstall and drift
//! detection. A session never changes after creation; serving another cluster
//! means initializing another session.

mod bookkeeping;
mod error;

pub use bookkeeping::{Bookkeeping, BookkeepingFailure, BookkeepingTask};
pub use error::{DriverError, InitStep};

use pkgdriver_core::{Chart, IMAGE_PULL_SECRETS_KEY, PackageSource, Values};
use pkgdriver_repo::{ChartResolver, RegistryChartResolver, RegistryClient};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::actions::{ActionConfig, InstallOptions, UpgradeOptions};
use crate::auth::Authenticator;
use crate::cluster::TargetClusterClient;
use crate::config::{DEFAULT_NAMESPACE, DriverConfig};
use crate::storage::StorageBackend;

/// Revisions kept per release after an upgrade
pub const MAX_HISTORY: u32 = 2;

type DriverResult<T> = std::result::Result<T, DriverError>;

/// What `install` did with the release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    Created,
    Upgraded,
}

/// Result of a successful install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub action: ReleaseAction,
    /// Namespace the release lives in
    pub namespace: String,
    pub revision: u32,
    /// Best-effort steps that failed
    pub bookkeeping: Vec<BookkeepingFailure>,
}

/// Result of a successful uninstall
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UninstallOutcome {
    /// There was nothing to remove
    NotFound,
    Removed {
        namespace: String,
        bookkeeping: Vec<BookkeepingFailure>,
    },
}

/// Entry point binding collaborators to a cluster
pub struct PackageDriver {
    auth: Arc<dyn Authenticator>,
    cluster: Arc<dyn TargetClusterClient>,
    resolver: Option<Arc<dyn ChartResolver>>,
    config: DriverConfig,
}

impl PackageDriver {
    pub fn new(
        auth: Arc<dyn Authenticator>,
        cluster: Arc<dyn TargetClusterClient>,
        config: DriverConfig,
    ) -> Self {
        Self {
            auth,
            cluster,
            resolver: None,
            config,
        }
    }

    /// Resolve charts with `resolver` instead of the session's registry client
    pub fn with_resolver(mut self, resolver: Arc<dyn ChartResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Bind the driver to `cluster_name`
    ///
    /// Opens the cluster session, builds the registry client from the
    /// authenticator's credentials file and initializes the release actions,
    /// in that order. Releases are stored in the configured namespace.
    #[instrument(skip(self), fields(storage = %self.config.storage, namespace = %self.config.namespace))]
    pub async fn initialize(&self, cluster_name: &str) -> DriverResult<DriverSession> {
        let session = self
            .cluster
            .initialize(cluster_name)
            .await
            .map_err(|e| DriverError::initialization(InitStep::ClusterSession, cluster_name, e))?;

        let registry = RegistryClient::from_credentials_file(&self.auth.auth_filename())
            .map(Arc::new)
            .map_err(|e| DriverError::initialization(InitStep::RegistryClient, cluster_name, e))?;

        let resolver: Arc<dyn ChartResolver> = match &self.resolver {
            Some(resolver) => resolver.clone(),
            None => Arc::new(
                RegistryChartResolver::new(registry.clone()).map_err(|e| {
                    DriverError::initialization(InitStep::RegistryClient, cluster_name, e)
                })?,
            ),
        };

        let actions = self
            .config
            .storage
            .parse::<StorageBackend>()
            .and_then(|backend| {
                ActionConfig::init(session.as_ref(), backend, &self.config.namespace)
            })
            .map_err(|e| DriverError::initialization(InitStep::ActionConfig, cluster_name, e))?;

        info!("driver initialized");

        Ok(DriverSession {
            cluster: cluster_name.to_string(),
            auth: self.auth.clone(),
            resolver,
            actions,
        })
    }
}

/// A driver bound to one cluster
pub struct DriverSession {
    cluster: String,
    auth: Arc<dyn Authenticator>,
    resolver: Arc<dyn ChartResolver>,
    actions: ActionConfig,
}

impl DriverSession {
    /// Cluster this session was initialized for
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Install `name`, or upgrade it when a release already exists
    ///
    /// The target namespace is `namespace` when non-empty, else the chart's
    /// `defaultNamespace`, else `default`. Registry secret values for that
    /// namespace replace same-named top-level keys of `values`.
    #[instrument(skip(self, source, values), fields(cluster = %self.cluster, chart = %source))]
    pub async fn install(
        &self,
        name: &str,
        namespace: &str,
        source: &PackageSource,
        mut values: Values,
    ) -> DriverResult<InstallOutcome> {
        let chart = self
            .resolver
            .resolve(source)
            .await
            .map_err(|e| DriverError::ChartResolution {
                name: name.to_string(),
                uri: source.chart_uri(),
                source: e,
            })?;

        let namespace = resolve_namespace(namespace, &chart);
        debug!(namespace, "resolved target namespace");

        match self.auth.get_secret_values(&namespace).await {
            Ok(secret_values) => values.overlay(&secret_values),
            Err(e) => debug!(error = %e, "no registry secret values, continuing without"),
        }

        let existing = match self.actions.get(name).await {
            Ok(release) => Some(release),
            Err(e) if e.is_release_not_found() => None,
            Err(e) => {
                return Err(DriverError::ReleaseQuery {
                    name: name.to_string(),
                    source: e,
                });
            }
        };

        let (action, release) = match existing {
            None => {
                let release = self
                    .actions
                    .install(&chart, values, &InstallOptions::new(name, &namespace))
                    .await
                    .map_err(|e| DriverError::Install {
                        name: name.to_string(),
                        source: e,
                    })?;
                (ReleaseAction::Created, release)
            }
            Some(_) => {
                let options = UpgradeOptions::new(name).with_max_history(MAX_HISTORY);
                let release = self
                    .actions
                    .upgrade(&chart, values, &options)
                    .await
                    .map_err(|e| DriverError::Upgrade {
                        name: name.to_string(),
                        source: e,
                    })?;
                (ReleaseAction::Upgraded, release)
            }
        };

        let mut bookkeeping = Bookkeeping::new(name);
        bookkeeping
            .run(
                BookkeepingTask::TrackNamespace,
                self.auth.add_to_config_map(name, &namespace),
            )
            .await;
        bookkeeping
            .run(
                BookkeepingTask::PropagateSecret,
                self.auth.add_secret_to_all_namespaces(),
            )
            .await;

        Ok(InstallOutcome {
            action,
            namespace: release.namespace,
            revision: release.revision,
            bookkeeping: bookkeeping.finish(),
        })
    }

    /// Remove `name`; a missing release is not an error
    #[instrument(skip(self), fields(cluster = %self.cluster))]
    pub async fn uninstall(&self, name: &str) -> DriverResult<UninstallOutcome> {
        let release = match self.actions.uninstall(name).await {
            Ok(release) => release,
            Err(e) if e.is_release_not_found() => {
                debug!("release already absent");
                return Ok(UninstallOutcome::NotFound);
            }
            Err(e) => {
                return Err(DriverError::Uninstall {
                    name: name.to_string(),
                    source: e,
                });
            }
        };

        let mut bookkeeping = Bookkeeping::new(name);
        bookkeeping
            .run(
                BookkeepingTask::UntrackNamespace,
                self.auth.del_from_config_map(name, &release.namespace),
            )
            .await;

        Ok(UninstallOutcome::Removed {
            namespace: release.namespace,
            bookkeeping: bookkeeping.finish(),
        })
    }

    /// Whether `values` differ from the configuration stored for `name`
    ///
    /// A stored `imagePullSecrets` entry is copied into `values` when they
    /// lack one, since that key is injected by the driver.
    pub async fn is_config_changed(&self, name: &str, values: Values) -> DriverResult<bool> {
        Ok(self.config_drift(name, values).await?.is_changed())
    }

    /// Stored configuration of `name` next to the candidate `values`
    ///
    /// The candidate is reconciled the same way as in
    /// [`DriverSession::is_config_changed`].
    #[instrument(skip(self, values), fields(cluster = %self.cluster))]
    pub async fn config_drift(&self, name: &str, mut values: Values) -> DriverResult<ConfigDrift> {
        let release = self.actions.get(name).await.map_err(|e| {
            if e.is_release_not_found() {
                DriverError::NotFound {
                    name: name.to_string(),
                    source: e,
                }
            } else {
                DriverError::ReleaseQuery {
                    name: name.to_string(),
                    source: e,
                }
            }
        })?;

        backfill_pull_secrets(&mut values, &release.config);

        let drift = ConfigDrift {
            revision: release.revision,
            stored: release.config,
            candidate: values,
        };
        debug!(changed = drift.is_changed(), revision = drift.revision, "compared configuration");
        Ok(drift)
    }
}

/// Stored and candidate configuration of a release
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDrift {
    /// Revision the stored configuration belongs to
    pub revision: u32,
    pub stored: Values,
    pub candidate: Values,
}

impl ConfigDrift {
    pub fn is_changed(&self) -> bool {
        self.stored != self.candidate
    }
}

/// Caller namespace, else chart default, else `default`
pub fn resolve_namespace(requested: &str, chart: &Chart) -> String {
    if !requested.is_empty() {
        return requested.to_string();
    }
    chart
        .default_namespace()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE)
        .to_string()
}

fn backfill_pull_secrets(values: &mut Values, stored: &Values) {
    if values.contains_key(IMAGE_PULL_SECRETS_KEY) {
        return;
    }
    if let Some(secrets) = stored.get_key(IMAGE_PULL_SECRETS_KEY) {
        values.insert(IMAGE_PULL_SECRETS_KEY, secrets.clone());
    }
}
