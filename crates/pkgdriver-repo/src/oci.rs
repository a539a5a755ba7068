//! OCI registry client
//!
//! Charts are stored as OCI artifacts with a single chart content layer.
//! Pulls go by digest when one is known, by tag otherwise.

use oci_distribution::Reference;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use pkgdriver_core::PackageSource;
use std::path::Path;

use crate::credentials::DockerConfig;
use crate::error::{RepoError, Result};

/// Media types for charts in OCI
pub mod media_types {
    /// Chart config
    pub const HELM_CONFIG: &str = "application/vnd.cncf.helm.config.v1+json";
    /// Chart content layer
    pub const HELM_CONTENT: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";
}

/// A chart archive pulled from a registry
#[derive(Debug, Clone)]
pub struct PulledChart {
    /// Raw `.tgz` bytes of the chart content layer
    pub data: Vec<u8>,
    /// Manifest digest reported by the registry
    pub manifest_digest: Option<String>,
}

/// OCI registry client authenticated from a credentials file
pub struct RegistryClient {
    client: Client,
    credentials: DockerConfig,
}

impl RegistryClient {
    /// Create a client using the given credentials
    pub fn new(credentials: DockerConfig) -> Self {
        Self {
            client: Self::create_client(ClientProtocol::Https),
            credentials,
        }
    }

    /// Create a client with anonymous access to every registry
    pub fn anonymous() -> Self {
        Self::new(DockerConfig::default())
    }

    /// Create a client from a docker-style credentials file
    pub fn from_credentials_file(path: &Path) -> Result<Self> {
        let credentials = DockerConfig::load(path)?;
        tracing::debug!(
            path = %path.display(),
            registries = credentials.auths.len(),
            "loaded registry credentials"
        );
        Ok(Self::new(credentials))
    }

    /// Talk plain http to the listed registries (`host` or `host:port`)
    pub fn with_plain_http_registries(mut self, registries: Vec<String>) -> Self {
        if !registries.is_empty() {
            self.client = Self::create_client(ClientProtocol::HttpsExcept(registries));
        }
        self
    }

    fn create_client(protocol: ClientProtocol) -> Client {
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        Client::new(config)
    }

    /// Credentials this client was built with
    pub fn credentials(&self) -> &DockerConfig {
        &self.credentials
    }

    /// Pull the chart content layer for `reference`
    pub async fn pull_chart(&self, reference: &OciReference) -> Result<PulledChart> {
        let oci_ref = reference.to_reference()?;
        let auth = self.credentials.registry_auth(&reference.registry);

        tracing::debug!(reference = %reference.to_oci_string(), "pulling chart");
        let image_data = self
            .client
            .pull(
                &oci_ref,
                &auth,
                vec![media_types::HELM_CONFIG, media_types::HELM_CONTENT],
            )
            .await
            .map_err(|e| {
                let message = e.to_string();
                let lowered = message.to_lowercase();
                if lowered.contains("manifest unknown") || lowered.contains("not found") {
                    RepoError::OciManifestNotFound {
                        reference: reference.to_oci_string(),
                    }
                } else if lowered.contains("unauthorized") || lowered.contains("denied") {
                    RepoError::AuthFailed { message }
                } else {
                    RepoError::OciError {
                        message: format!("Failed to pull {}: {}", reference.to_oci_string(), message),
                    }
                }
            })?;

        let chart_layer = image_data
            .layers
            .into_iter()
            .find(|l| l.media_type == media_types::HELM_CONTENT)
            .ok_or_else(|| RepoError::OciError {
                message: "No chart content layer found in manifest".to_string(),
            })?;

        Ok(PulledChart {
            data: chart_layer.data,
            manifest_digest: image_data.digest,
        })
    }
}

/// OCI reference helper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl OciReference {
    /// Parse an OCI reference string
    pub fn parse(s: &str) -> Result<Self> {
        let clean = s
            .trim_start_matches("oci://")
            .trim_start_matches("https://")
            .trim_start_matches("http://");

        let (registry, rest) =
            clean
                .split_once('/')
                .ok_or_else(|| RepoError::InvalidOciReference {
                    reference: s.to_string(),
                })?;
        if registry.is_empty() || rest.is_empty() {
            return Err(RepoError::InvalidOciReference {
                reference: s.to_string(),
            });
        }

        let (repo_tag, digest) = match rest.rsplit_once('@') {
            Some((repo_tag, digest)) => (repo_tag, Some(digest.to_string())),
            None => (rest, None),
        };

        let (repository, tag) = match repo_tag.rsplit_once(':') {
            Some((r, t)) if !r.is_empty() && !t.contains('/') => (r.to_string(), Some(t.to_string())),
            _ => (repo_tag.to_string(), None),
        };

        Ok(Self {
            registry: registry.to_string(),
            repository,
            tag,
            digest,
        })
    }

    /// Reference for a package source
    ///
    /// The source version becomes the tag (`+` is not legal in OCI tags and
    /// is stored as `_`); the source digest pins the manifest.
    pub fn from_source(source: &PackageSource) -> Result<Self> {
        let mut reference = Self::parse(&source.chart_uri())?;
        if !source.version.is_empty() {
            reference.tag = Some(source.version.replace('+', "_"));
        }
        if !source.digest.is_empty() {
            reference.digest = Some(source.digest.clone());
        }
        Ok(reference)
    }

    /// Convert to string representation
    pub fn to_oci_string(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(tag) = &self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    fn to_reference(&self) -> Result<Reference> {
        let s = self.to_oci_string();
        Reference::try_from(s.as_str()).map_err(|e| RepoError::InvalidOciReference {
            reference: format!("{}: {}", s, e),
        })
    }
}
