//! CLI commands

pub mod diff;
pub mod install;
pub mod uninstall;

use pkgdriver_core::{Values, parse_set_values};
use pkgdriver_kube::{
    AuthConfig, DriverConfig, DriverSession, KubeAuthenticator, KubeClusterClient, PackageDriver,
    SecretKubeconfigClient,
};
use std::sync::Arc;

use crate::error::{CliError, Result};
use crate::{ClusterArgs, ValuesArgs};

/// Merge values files in order, then `--set` overrides
pub fn load_values(args: &ValuesArgs) -> Result<Values> {
    let mut values = Values::new();

    for file in &args.values {
        let file_values = Values::from_file(file).map_err(|e| match e {
            pkgdriver_core::CoreError::Io(io) => CliError::Io {
                message: format!("{}: {}", file.display(), io),
            },
            other => CliError::values_with_help(
                format!("{}: {}", file.display(), other),
                "values files must be YAML mappings",
            ),
        })?;
        values.merge(&file_values);
    }

    if !args.set.is_empty() {
        let overrides = parse_set_values(&args.set)
            .map_err(|e| CliError::values_with_help(e.to_string(), "use --set key=value"))?;
        values.merge(&overrides);
    }

    Ok(values)
}

/// Driver configuration from defaults, environment and flags
pub fn driver_config(args: &ClusterArgs) -> DriverConfig {
    let mut config = DriverConfig::from_env();
    if let Some(storage) = &args.storage {
        config.storage = storage.clone();
    }
    if let Some(namespace) = &args.storage_namespace {
        config = config.with_namespace(namespace.clone());
    }
    config
}

/// Authenticator settings from defaults and flags
pub fn auth_config(args: &ClusterArgs) -> AuthConfig {
    let mut config = AuthConfig::default();
    if let Some(name) = &args.secret_name {
        config.secret_name = name.clone();
    }
    if let Some(namespace) = &args.secret_namespace {
        config.secret_namespace = namespace.clone();
    }
    if let Some(path) = &args.credentials_file {
        config.credentials_file = path.clone();
    }
    config
}

/// Initialize a driver session for the selected cluster
pub async fn connect(args: &ClusterArgs) -> Result<DriverSession> {
    let client = kube::Client::try_default().await?;
    let config = driver_config(args);
    tracing::debug!(
        cluster = %args.cluster,
        storage = %config.storage,
        namespace = %config.namespace,
        "connecting"
    );

    let auth = Arc::new(KubeAuthenticator::new(client.clone(), auth_config(args)));
    let kubeconfigs = Arc::new(SecretKubeconfigClient::new(
        client,
        args.kubeconfig_namespace.clone(),
    ));
    let cluster = Arc::new(KubeClusterClient::new(kubeconfigs));

    let driver = PackageDriver::new(auth, cluster, config);
    Ok(driver.initialize(&args.cluster).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn cluster_args() -> ClusterArgs {
        ClusterArgs {
            cluster: String::new(),
            kubeconfig_namespace: "default".to_string(),
            storage: None,
            storage_namespace: None,
            secret_name: None,
            secret_namespace: None,
            credentials_file: None,
        }
    }

    #[test]
    fn test_load_values_merges_in_order() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("base.yaml");
        let prod = temp.path().join("prod.yaml");
        std::fs::write(&base, "image:\n  tag: v1\n  repo: nginx\nreplicas: 1\n").unwrap();
        std::fs::write(&prod, "image:\n  tag: v2\n").unwrap();

        let values = load_values(&ValuesArgs {
            values: vec![base, prod],
            set: vec!["replicas=3".to_string()],
        })
        .unwrap();

        assert_eq!(values.get("image.tag").unwrap(), "v2");
        assert_eq!(values.get("image.repo").unwrap(), "nginx");
        assert_eq!(values.get("replicas").unwrap(), 3);
    }

    #[test]
    fn test_load_values_missing_file() {
        let err = load_values(&ValuesArgs {
            values: vec![PathBuf::from("/definitely/not/here.yaml")],
            set: vec![],
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), crate::exit_codes::IO_ERROR);
    }

    #[test]
    fn test_load_values_bad_set() {
        let err = load_values(&ValuesArgs {
            values: vec![],
            set: vec!["novalue".to_string()],
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), crate::exit_codes::VALUES_ERROR);
    }

    #[test]
    fn test_flags_override_config() {
        let mut args = cluster_args();
        args.storage = Some("memory".to_string());
        args.storage_namespace = Some("pkg-system".to_string());
        args.secret_name = Some("regcred".to_string());
        args.credentials_file = Some(PathBuf::from("/tmp/config.json"));

        let config = driver_config(&args);
        assert_eq!(config.storage, "memory");
        assert_eq!(config.namespace, "pkg-system");

        let auth = auth_config(&args);
        assert_eq!(auth.secret_name, "regcred");
        assert_eq!(auth.credentials_file, PathBuf::from("/tmp/config.json"));
    }
}
