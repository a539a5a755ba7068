//! Applying and deleting rendered manifests
//!
//! [`KubeApplier`] behaves like `kubectl apply -f` / `kubectl delete -f`:
//! - Server-Side Apply through dynamic discovery, no compile-time types
//! - Creation in dependency order, deletion in reverse
//! - Resources annotated with a `keep` resource policy survive deletion

use async_trait::async_trait;
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PropagationPolicy},
    core::{GroupVersionKind, TypeMeta},
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};
use tokio::sync::OnceCell;

use crate::error::{KubeError, Result};

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "pkgdriver";

/// Annotation to keep resource on uninstall (Helm-compatible)
const RESOURCE_POLICY_ANNOTATION: &str = "helm.sh/resource-policy";
const PKGDRIVER_RESOURCE_POLICY: &str = "pkgdriver.io/resource-policy";
const RESOURCE_POLICY_KEEP: &str = "keep";

/// Summary of apply/delete operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationSummary {
    /// Successfully processed resources
    pub succeeded: Vec<String>,
    /// Failed resources with errors
    pub failed: Vec<(String, String)>,
    /// Skipped resources (e.g., due to policy)
    pub skipped: Vec<(String, String)>,
}

impl OperationSummary {
    /// Check if all operations succeeded
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if !self.succeeded.is_empty() {
            parts.push(format!("{} succeeded", self.succeeded.len()));
        }
        if !self.failed.is_empty() {
            parts.push(format!("{} failed", self.failed.len()));
        }
        if !self.skipped.is_empty() {
            parts.push(format!("{} skipped", self.skipped.len()));
        }
        if parts.is_empty() {
            "No resources processed".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Turn recorded failures into an error
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let details = self
            .failed
            .iter()
            .map(|(name, err)| format!("{}: {}", name, err))
            .collect::<Vec<_>>()
            .join("; ");
        Err(KubeError::Apply(format!("{} ({})", self.summary(), details)))
    }
}

/// Applies manifests to a cluster
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    /// Create or update every resource in `manifest`
    async fn apply(&self, namespace: &str, manifest: &str) -> Result<OperationSummary>;

    /// Delete every resource in `manifest`
    async fn delete(&self, namespace: &str, manifest: &str) -> Result<OperationSummary>;
}

/// Resource category, in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceCategory {
    Crd = 0,
    Namespace = 1,
    NamespaceConfig = 2,
    ClusterRbac = 10,
    NamespacedRbac = 11,
    Config = 20,
    Storage = 21,
    Network = 30,
    Workload = 40,
    Batch = 50,
    Autoscaling = 60,
    Other = 100,
}

impl ResourceCategory {
    /// Categorize a resource by its kind
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "CustomResourceDefinition" => Self::Crd,
            "Namespace" => Self::Namespace,
            "ResourceQuota" | "LimitRange" => Self::NamespaceConfig,
            "ClusterRole" | "ClusterRoleBinding" => Self::ClusterRbac,
            "Role" | "RoleBinding" | "ServiceAccount" => Self::NamespacedRbac,
            "ConfigMap" | "Secret" => Self::Config,
            "PersistentVolume" | "PersistentVolumeClaim" | "StorageClass" => Self::Storage,
            "NetworkPolicy" | "Service" | "Endpoints" | "Ingress" | "IngressClass" => Self::Network,
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Pod" => Self::Workload,
            "Job" | "CronJob" => Self::Batch,
            "HorizontalPodAutoscaler" | "PodDisruptionBudget" => Self::Autoscaling,
            _ => Self::Other,
        }
    }
}

/// Split a multi-document manifest into objects
///
/// Comment-only and empty documents are dropped.
pub fn parse_manifest(manifest: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    let mut current = String::new();
    let mut index = 0;

    let mut flush = |doc: &mut String, index: &mut usize| -> Result<()> {
        let has_content = doc
            .lines()
            .any(|l| !l.trim().is_empty() && !l.trim().starts_with('#'));
        if has_content {
            let obj: DynamicObject = serde_yaml::from_str(doc).map_err(|e| {
                KubeError::InvalidManifest(format!("document {}: {}", index, e))
            })?;
            if obj.types.is_none() {
                return Err(KubeError::InvalidManifest(format!(
                    "document {}: missing apiVersion or kind",
                    index
                )));
            }
            if obj.metadata.name.is_none() {
                return Err(KubeError::InvalidManifest(format!(
                    "document {}: missing metadata.name",
                    index
                )));
            }
            objects.push(obj);
        }
        doc.clear();
        *index += 1;
        Ok(())
    };

    for line in manifest.lines() {
        if line.starts_with("---") {
            flush(&mut current, &mut index)?;
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    flush(&mut current, &mut index)?;

    Ok(objects)
}

fn kind_of(obj: &DynamicObject) -> &str {
    obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default()
}

fn display_name(obj: &DynamicObject) -> String {
    let name = obj.metadata.name.as_deref().unwrap_or("unnamed");
    match &obj.metadata.namespace {
        Some(ns) => format!("{}/{}/{}", ns, kind_of(obj), name),
        None => format!("{}/{}", kind_of(obj), name),
    }
}

fn has_keep_policy(obj: &DynamicObject) -> bool {
    obj.metadata.annotations.as_ref().is_some_and(|annotations| {
        [RESOURCE_POLICY_ANNOTATION, PKGDRIVER_RESOURCE_POLICY]
            .iter()
            .any(|key| annotations.get(*key).map(String::as_str) == Some(RESOURCE_POLICY_KEEP))
    })
}

/// Sort objects for creation (dependencies first), stable within a category
pub fn sort_for_apply(objects: &mut [DynamicObject]) {
    objects.sort_by_key(|obj| ResourceCategory::from_kind(kind_of(obj)));
}

/// Sort objects for deletion (reverse of creation order)
pub fn sort_for_delete(objects: &mut [DynamicObject]) {
    objects.sort_by_key(|obj| std::cmp::Reverse(ResourceCategory::from_kind(kind_of(obj))));
}

/// Convert TypeMeta to GroupVersionKind
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}

/// Server-Side Apply against a live cluster
pub struct KubeApplier {
    client: Client,
    discovery: OnceCell<Discovery>,
}

impl KubeApplier {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovery: OnceCell::new(),
        }
    }

    async fn discovery(&self) -> Result<&Discovery> {
        self.discovery
            .get_or_try_init(|| async {
                Discovery::new(self.client.clone())
                    .run()
                    .await
                    .map_err(KubeError::Api)
            })
            .await
    }

    async fn resolve(
        &self,
        obj: &mut DynamicObject,
        default_namespace: &str,
    ) -> Result<(ApiResource, ApiCapabilities)> {
        let type_meta = obj
            .types
            .as_ref()
            .ok_or_else(|| KubeError::InvalidManifest("missing apiVersion or kind".to_string()))?;
        let gvk = gvk_from_type_meta(type_meta);

        let (api_resource, capabilities) =
            self.discovery().await?.resolve_gvk(&gvk).ok_or_else(|| {
                KubeError::InvalidManifest(format!(
                    "Unknown resource type: {}/{}",
                    type_meta.api_version, type_meta.kind
                ))
            })?;

        if capabilities.scope == Scope::Namespaced && obj.metadata.namespace.is_none() {
            obj.metadata.namespace = Some(default_namespace.to_string());
        }
        Ok((api_resource, capabilities))
    }

    fn api_for(
        &self,
        obj: &DynamicObject,
        api_resource: &ApiResource,
        capabilities: &ApiCapabilities,
    ) -> Api<DynamicObject> {
        match (&capabilities.scope, obj.metadata.namespace.as_deref()) {
            (Scope::Namespaced, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, api_resource)
            }
            (Scope::Namespaced, None) => {
                Api::default_namespaced_with(self.client.clone(), api_resource)
            }
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), api_resource),
        }
    }

    async fn apply_one(&self, obj: &mut DynamicObject, namespace: &str) -> Result<&'static str> {
        let (api_resource, capabilities) = self.resolve(obj, namespace).await?;
        let api = self.api_for(obj, &api_resource, &capabilities);
        let name = obj.metadata.name.clone().unwrap_or_default();

        let exists = api.get_opt(&name).await?.is_some();
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&name, &params, &Patch::Apply(&*obj)).await?;

        Ok(if exists { "configured" } else { "created" })
    }

    async fn delete_one(&self, obj: &mut DynamicObject, namespace: &str) -> Result<bool> {
        let (api_resource, capabilities) = self.resolve(obj, namespace).await?;
        let api = self.api_for(obj, &api_resource, &capabilities);
        let name = obj.metadata.name.clone().unwrap_or_default();

        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        match api.delete(&name, &params).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(KubeError::Api(e)),
        }
    }
}

#[async_trait]
impl ManifestApplier for KubeApplier {
    async fn apply(&self, namespace: &str, manifest: &str) -> Result<OperationSummary> {
        let mut objects = parse_manifest(manifest)?;
        sort_for_apply(&mut objects);

        let mut summary = OperationSummary::default();
        for obj in &mut objects {
            match self.apply_one(obj, namespace).await {
                Ok(action) => summary
                    .succeeded
                    .push(format!("{} ({})", display_name(obj), action)),
                Err(e) => summary.failed.push((display_name(obj), e.to_string())),
            }
        }

        tracing::debug!(namespace, result = %summary.summary(), "applied manifest");
        Ok(summary)
    }

    async fn delete(&self, namespace: &str, manifest: &str) -> Result<OperationSummary> {
        let mut objects = parse_manifest(manifest)?;
        sort_for_delete(&mut objects);

        let mut summary = OperationSummary::default();
        for obj in &mut objects {
            if has_keep_policy(obj) {
                summary
                    .skipped
                    .push((display_name(obj), "resource-policy: keep".to_string()));
                continue;
            }

            match self.delete_one(obj, namespace).await {
                Ok(true) => summary.succeeded.push(format!("{} (deleted)", display_name(obj))),
                Ok(false) => summary
                    .skipped
                    .push((display_name(obj), "not found".to_string())),
                Err(e) => summary.failed.push((display_name(obj), e.to_string())),
            }
        }

        tracing::debug!(namespace, result = %summary.summary(), "deleted manifest");
        Ok(summary)
    }
}
