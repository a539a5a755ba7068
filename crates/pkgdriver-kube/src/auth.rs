//! Registry authentication and namespace tracking
//!
//! The authenticator owns everything the driver needs to pull from a private
//! registry: the credentials file handed to the registry client, the
//! `imagePullSecrets` values injected into releases, and the pull Secret that
//! must exist in every namespace a package runs in. Which namespaces those are
//! is recorded in a tracking ConfigMap whose keys are namespaces and whose
//! values are comma-separated package names.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use pkgdriver_core::{IMAGE_PULL_SECRETS_KEY, Values};
use pkgdriver_repo::DockerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

use crate::error::{KubeError, Result};
use crate::storage::{MANAGED_BY, MANAGED_BY_LABEL};

const FIELD_MANAGER: &str = "pkgdriver";

/// Registry authentication collaborator of the package driver
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Path of the registry credentials file
    fn auth_filename(&self) -> PathBuf;

    /// Values granting workloads in `namespace` access to the registry
    ///
    /// An error means no private registry secret is available.
    async fn get_secret_values(&self, namespace: &str) -> Result<Values>;

    /// Record that package `name` runs in `namespace`
    async fn add_to_config_map(&self, name: &str, namespace: &str) -> Result<()>;

    /// Forget that package `name` runs in `namespace`
    async fn del_from_config_map(&self, name: &str, namespace: &str) -> Result<()>;

    /// Copy the pull secret into every tracked namespace
    async fn add_secret_to_all_namespaces(&self) -> Result<()>;
}

/// Settings of the Kubernetes-backed authenticator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// Name of the registry pull Secret
    pub secret_name: String,

    /// Namespace holding the source pull Secret and the tracking ConfigMap
    pub secret_namespace: String,

    /// Name of the namespace tracking ConfigMap
    pub config_map_name: String,

    /// Registry credentials file (Docker `config.json` format)
    pub credentials_file: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_name: "pkgdriver-registry".to_string(),
            secret_namespace: "pkgdriver-system".to_string(),
            config_map_name: "pkgdriver-namespaces".to_string(),
            credentials_file: DockerConfig::default_path()
                .unwrap_or_else(|_| PathBuf::from("config.json")),
        }
    }
}

/// [`Authenticator`] keeping its state in the cluster
pub struct KubeAuthenticator {
    client: Client,
    config: AuthConfig,
}

impl KubeAuthenticator {
    pub fn new(client: Client, config: AuthConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.config.secret_namespace)
    }

    async fn source_secret(&self) -> Result<Secret> {
        let secrets: Api<Secret> =
            Api::namespaced(self.client.clone(), &self.config.secret_namespace);
        secrets
            .get_opt(&self.config.secret_name)
            .await?
            .ok_or_else(|| {
                KubeError::Auth(format!(
                    "registry secret {}/{} not found",
                    self.config.secret_namespace, self.config.secret_name
                ))
            })
    }

    async fn tracking_config_map(&self) -> Result<Option<ConfigMap>> {
        Ok(self.config_maps().get_opt(&self.config.config_map_name).await?)
    }

    /// Apply `change` to the tracking data and write it back if it changed
    async fn update_tracking<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool + Send,
    {
        let api = self.config_maps();

        match self.tracking_config_map().await? {
            Some(mut config_map) => {
                let data = config_map.data.get_or_insert_with(BTreeMap::new);
                if !change(data) {
                    return Ok(());
                }
                api.replace(&self.config.config_map_name, &PostParams::default(), &config_map)
                    .await?;
            }
            None => {
                let mut data = BTreeMap::new();
                if !change(&mut data) {
                    return Ok(());
                }
                let config_map = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(self.config.config_map_name.clone()),
                        namespace: Some(self.config.secret_namespace.clone()),
                        labels: Some(managed_labels()),
                        ..Default::default()
                    },
                    data: Some(data),
                    ..Default::default()
                };
                api.create(&PostParams::default(), &config_map).await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Authenticator for KubeAuthenticator {
    fn auth_filename(&self) -> PathBuf {
        self.config.credentials_file.clone()
    }

    async fn get_secret_values(&self, namespace: &str) -> Result<Values> {
        self.source_secret().await?;
        debug!(namespace, secret = %self.config.secret_name, "injecting pull secret");
        Ok(pull_secret_values(&self.config.secret_name))
    }

    #[instrument(skip(self))]
    async fn add_to_config_map(&self, name: &str, namespace: &str) -> Result<()> {
        self.update_tracking(|data| add_tracked(data, namespace, name))
            .await
    }

    #[instrument(skip(self))]
    async fn del_from_config_map(&self, name: &str, namespace: &str) -> Result<()> {
        self.update_tracking(|data| remove_tracked(data, namespace, name))
            .await
    }

    #[instrument(skip(self))]
    async fn add_secret_to_all_namespaces(&self) -> Result<()> {
        let source = self.source_secret().await?;
        let namespaces = self
            .tracking_config_map()
            .await?
            .and_then(|cm| cm.data)
            .map(|data| data.into_keys().collect::<Vec<_>>())
            .unwrap_or_default();

        let params = PatchParams::apply(FIELD_MANAGER).force();
        let mut failures = Vec::new();

        for namespace in namespaces
            .iter()
            .filter(|ns| **ns != self.config.secret_namespace)
        {
            let copy = propagated_secret(&source, &self.config.secret_name, namespace);
            let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
            match api
                .patch(&self.config.secret_name, &params, &Patch::Apply(&copy))
                .await
            {
                Ok(_) => debug!(namespace, "pull secret applied"),
                Err(e) => {
                    warn!(namespace, error = %e, "failed to apply pull secret");
                    failures.push(format!("{}: {}", namespace, e));
                }
            }
        }

        if !failures.is_empty() {
            return Err(KubeError::Auth(format!(
                "pull secret propagation failed for {}",
                failures.join("; ")
            )));
        }

        info!(count = namespaces.len(), "pull secret propagated");
        Ok(())
    }
}

/// Values referencing the pull secret `secret_name`
pub fn pull_secret_values(secret_name: &str) -> Values {
    let mut values = Values::new();
    values.insert(
        IMAGE_PULL_SECRETS_KEY,
        serde_json::json!([{ "name": secret_name }]),
    );
    values
}

/// Package names tracked for `namespace`
pub fn tracked_packages(data: &BTreeMap<String, String>, namespace: &str) -> Vec<String> {
    data.get(namespace)
        .map(|names| {
            names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Track `name` under `namespace`; returns whether the data changed
pub fn add_tracked(data: &mut BTreeMap<String, String>, namespace: &str, name: &str) -> bool {
    let mut names = tracked_packages(data, namespace);
    if names.iter().any(|n| n == name) {
        return false;
    }
    names.push(name.to_string());
    data.insert(namespace.to_string(), names.join(","));
    true
}

/// Stop tracking `name` under `namespace`; returns whether the data changed
///
/// The namespace key is dropped with its last package.
pub fn remove_tracked(data: &mut BTreeMap<String, String>, namespace: &str, name: &str) -> bool {
    let names = tracked_packages(data, namespace);
    if !names.iter().any(|n| n == name) {
        return false;
    }

    let remaining: Vec<String> = names.into_iter().filter(|n| n != name).collect();
    if remaining.is_empty() {
        data.remove(namespace);
    } else {
        data.insert(namespace.to_string(), remaining.join(","));
    }
    true
}

/// Copy of the pull secret for `namespace`, stripped of server-set metadata
pub fn propagated_secret(source: &Secret, name: &str, namespace: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        type_: source.type_.clone(),
        data: source.data.clone(),
        ..Default::default()
    }
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    #[test]
    fn test_add_tracked() {
        let mut data = BTreeMap::new();
        assert!(add_tracked(&mut data, "ns-a", "app1"));
        assert!(add_tracked(&mut data, "ns-a", "app2"));
        assert!(add_tracked(&mut data, "ns-b", "app1"));

        assert_eq!(data.get("ns-a").unwrap(), "app1,app2");
        assert_eq!(data.get("ns-b").unwrap(), "app1");
    }

    #[test]
    fn test_add_tracked_is_idempotent() {
        let mut data = BTreeMap::from([("ns-a".to_string(), "app1".to_string())]);
        assert!(!add_tracked(&mut data, "ns-a", "app1"));
        assert_eq!(data.get("ns-a").unwrap(), "app1");
    }

    #[test]
    fn test_remove_tracked() {
        let mut data = BTreeMap::from([("ns-a".to_string(), "app1,app2".to_string())]);

        assert!(remove_tracked(&mut data, "ns-a", "app1"));
        assert_eq!(data.get("ns-a").unwrap(), "app2");

        assert!(remove_tracked(&mut data, "ns-a", "app2"));
        assert!(!data.contains_key("ns-a"));

        assert!(!remove_tracked(&mut data, "ns-a", "app2"));
    }

    #[test]
    fn test_tracked_packages_tolerates_spacing() {
        let data = BTreeMap::from([("ns-a".to_string(), " app1, ,app2 ".to_string())]);
        assert_eq!(tracked_packages(&data, "ns-a"), vec!["app1", "app2"]);
        assert!(tracked_packages(&data, "ns-b").is_empty());
    }

    #[test]
    fn test_pull_secret_values() {
        let values = pull_secret_values("regcred");
        assert_eq!(
            values.get_key(IMAGE_PULL_SECRETS_KEY).unwrap(),
            &serde_json::json!([{"name": "regcred"}])
        );
    }

    #[test]
    fn test_propagated_secret_drops_server_metadata() {
        let source = Secret {
            metadata: ObjectMeta {
                name: Some("regcred".to_string()),
                namespace: Some("pkgdriver-system".to_string()),
                resource_version: Some("42".to_string()),
                uid: Some("abc".to_string()),
                ..Default::default()
            },
            type_: Some("kubernetes.io/dockerconfigjson".to_string()),
            data: Some(BTreeMap::from([(
                ".dockerconfigjson".to_string(),
                ByteString(b"{}".to_vec()),
            )])),
            ..Default::default()
        };

        let copy = propagated_secret(&source, "regcred", "ns-a");
        assert_eq!(copy.metadata.namespace.as_deref(), Some("ns-a"));
        assert!(copy.metadata.resource_version.is_none());
        assert!(copy.metadata.uid.is_none());
        assert_eq!(copy.type_, source.type_);
        assert_eq!(copy.data, source.data);
    }

    #[test]
    fn test_auth_config_deserializes_partial() {
        let config: AuthConfig =
            serde_json::from_str(r#"{"secretName": "regcred", "credentialsFile": "/tmp/c.json"}"#)
                .unwrap();
        assert_eq!(config.secret_name, "regcred");
        assert_eq!(config.credentials_file, PathBuf::from("/tmp/c.json"));
        assert_eq!(config.config_map_name, "pkgdriver-namespaces");
    }
}
