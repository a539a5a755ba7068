//! Target cluster sessions
//!
//! A [`TargetClusterClient`] turns a cluster name into a [`ClusterSession`]:
//! the Kubernetes client for that cluster together with the release store and
//! manifest applier bound to it. Kubeconfigs for named clusters come from a
//! [`KubeconfigClient`]; an empty cluster name means the cluster the process
//! itself runs against.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::apply::{KubeApplier, ManifestApplier};
use crate::error::{KubeError, Result};
use crate::storage::{MemoryStore, ReleaseStore, SecretsStore, StorageBackend};

/// Data key holding the kubeconfig inside a cluster's kubeconfig Secret
pub const KUBECONFIG_SECRET_KEY: &str = "value";

/// Name of the Secret holding the kubeconfig of `cluster`
pub fn kubeconfig_secret_name(cluster: &str) -> String {
    format!("{}-kubeconfig", cluster)
}

/// Source of kubeconfigs for named clusters
#[async_trait]
pub trait KubeconfigClient: Send + Sync {
    /// Kubeconfig YAML for `cluster`
    async fn get_kubeconfig(&self, cluster: &str) -> Result<String>;
}

/// Reads kubeconfigs from `<cluster>-kubeconfig` Secrets on a management cluster
pub struct SecretKubeconfigClient {
    client: Client,
    namespace: String,
}

impl SecretKubeconfigClient {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl KubeconfigClient for SecretKubeconfigClient {
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn get_kubeconfig(&self, cluster: &str) -> Result<String> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let secret_name = kubeconfig_secret_name(cluster);

        debug!("reading kubeconfig secret {}/{}", self.namespace, secret_name);

        let secret = secrets.get(&secret_name).await.map_err(|e| KubeError::Kubeconfig {
            cluster: cluster.to_string(),
            message: format!("failed to get secret {}: {}", secret_name, e),
        })?;

        kubeconfig_from_secret(cluster, &secret)
    }
}

/// Extract the kubeconfig text from a kubeconfig Secret
pub fn kubeconfig_from_secret(cluster: &str, secret: &Secret) -> Result<String> {
    let data = secret
        .data
        .as_ref()
        .and_then(|data| data.get(KUBECONFIG_SECRET_KEY))
        .ok_or_else(|| KubeError::Kubeconfig {
            cluster: cluster.to_string(),
            message: format!("secret has no '{}' key", KUBECONFIG_SECRET_KEY),
        })?;

    String::from_utf8(data.0.clone()).map_err(|e| KubeError::Kubeconfig {
        cluster: cluster.to_string(),
        message: format!("kubeconfig is not valid UTF-8: {}", e),
    })
}

/// Connection to the cluster hosting a package's workloads
pub trait ClusterSession: Send + Sync {
    /// Cluster name the session was opened for (empty for the local cluster)
    fn cluster_name(&self) -> &str;

    /// Release store of the given backend, keeping releases in `namespace`
    fn release_store(
        &self,
        backend: StorageBackend,
        namespace: &str,
    ) -> Result<Arc<dyn ReleaseStore>>;

    /// Applier for rendered manifests
    fn applier(&self) -> Arc<dyn ManifestApplier>;
}

/// Opens sessions to named clusters
#[async_trait]
pub trait TargetClusterClient: Send + Sync {
    async fn initialize(&self, cluster_name: &str) -> Result<Arc<dyn ClusterSession>>;
}

/// [`TargetClusterClient`] backed by real Kubernetes clients
#[derive(Default)]
pub struct KubeClusterClient {
    kubeconfigs: Option<Arc<dyn KubeconfigClient>>,
}

impl KubeClusterClient {
    /// Client that only reaches the local cluster
    pub fn local() -> Self {
        Self::default()
    }

    /// Client that resolves named clusters through `kubeconfigs`
    pub fn new(kubeconfigs: Arc<dyn KubeconfigClient>) -> Self {
        Self {
            kubeconfigs: Some(kubeconfigs),
        }
    }

    async fn client_for(&self, cluster_name: &str) -> Result<Client> {
        if cluster_name.is_empty() {
            return Ok(Client::try_default().await?);
        }

        let kubeconfigs = self.kubeconfigs.as_ref().ok_or_else(|| KubeError::Kubeconfig {
            cluster: cluster_name.to_string(),
            message: "no kubeconfig source configured for named clusters".to_string(),
        })?;

        let kubeconfig = kubeconfigs.get_kubeconfig(cluster_name).await?;
        client_from_kubeconfig(cluster_name, &kubeconfig).await
    }
}

#[async_trait]
impl TargetClusterClient for KubeClusterClient {
    #[instrument(skip(self))]
    async fn initialize(&self, cluster_name: &str) -> Result<Arc<dyn ClusterSession>> {
        let client = self.client_for(cluster_name).await?;
        debug!("connected to cluster");

        Ok(Arc::new(KubeSession {
            cluster_name: cluster_name.to_string(),
            applier: Arc::new(KubeApplier::new(client.clone())),
            client,
        }))
    }
}

/// Build a client from kubeconfig YAML
pub async fn client_from_kubeconfig(cluster: &str, kubeconfig: &str) -> Result<Client> {
    let parsed = Kubeconfig::from_yaml(kubeconfig).map_err(|e| KubeError::Kubeconfig {
        cluster: cluster.to_string(),
        message: format!("failed to parse kubeconfig: {}", e),
    })?;

    let config = Config::from_custom_kubeconfig(parsed, &KubeConfigOptions::default())
        .await
        .map_err(|e| KubeError::Kubeconfig {
            cluster: cluster.to_string(),
            message: format!("failed to build client config: {}", e),
        })?;

    Client::try_from(config).map_err(|e| KubeError::Kubeconfig {
        cluster: cluster.to_string(),
        message: format!("failed to create client: {}", e),
    })
}

struct KubeSession {
    cluster_name: String,
    client: Client,
    applier: Arc<KubeApplier>,
}

impl ClusterSession for KubeSession {
    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    fn release_store(
        &self,
        backend: StorageBackend,
        namespace: &str,
    ) -> Result<Arc<dyn ReleaseStore>> {
        Ok(match backend {
            StorageBackend::Secret => Arc::new(SecretsStore::new(self.client.clone(), namespace)),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        })
    }

    fn applier(&self) -> Arc<dyn ManifestApplier> {
        self.applier.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(data: Option<BTreeMap<String, ByteString>>) -> Secret {
        Secret {
            data,
            ..Default::default()
        }
    }

    #[test]
    fn test_kubeconfig_secret_name() {
        assert_eq!(kubeconfig_secret_name("edge-1"), "edge-1-kubeconfig");
    }

    #[test]
    fn test_kubeconfig_from_secret() {
        let data = BTreeMap::from([(
            KUBECONFIG_SECRET_KEY.to_string(),
            ByteString(b"apiVersion: v1\nkind: Config\n".to_vec()),
        )]);
        let kubeconfig = kubeconfig_from_secret("edge-1", &secret(Some(data))).unwrap();
        assert!(kubeconfig.contains("kind: Config"));
    }

    #[test]
    fn test_kubeconfig_secret_without_value() {
        let err = kubeconfig_from_secret("edge-1", &secret(None)).unwrap_err();
        assert!(matches!(err, KubeError::Kubeconfig { ref cluster, .. } if cluster == "edge-1"));

        let data = BTreeMap::from([("other".to_string(), ByteString(Vec::new()))]);
        assert!(kubeconfig_from_secret("edge-1", &secret(Some(data))).is_err());
    }

    #[test]
    fn test_kubeconfig_secret_not_utf8() {
        let data = BTreeMap::from([(
            KUBECONFIG_SECRET_KEY.to_string(),
            ByteString(vec![0xff, 0xfe]),
        )]);
        assert!(kubeconfig_from_secret("edge-1", &secret(Some(data))).is_err());
    }

    #[tokio::test]
    async fn test_invalid_kubeconfig_rejected() {
        let Err(err) = client_from_kubeconfig("edge-1", "::: not yaml").await else {
            panic!("kubeconfig should be rejected");
        };
        assert!(err.to_string().contains("edge-1"));
    }

    #[tokio::test]
    async fn test_named_cluster_needs_kubeconfig_source() {
        let client = KubeClusterClient::local();
        let Err(err) = client.client_for("edge-1").await else {
            panic!("named cluster should need a kubeconfig source");
        };
        assert!(matches!(err, KubeError::Kubeconfig { ref cluster, .. } if cluster == "edge-1"));
    }
}
