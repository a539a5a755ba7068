//! Registry credentials from a docker-style `config.json`
//!
//! The registry authenticator writes the credentials file; this module only
//! reads it. A missing file means anonymous access, a malformed one is an
//! error.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use oci_distribution::secrets::RegistryAuth;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{RepoError, Result};

/// Docker config.json format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, DockerAuth>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerAuth {
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl DockerAuth {
    /// Username and password, decoding the `auth` field when present
    pub fn basic(&self) -> Option<(String, String)> {
        if let Some(encoded) = &self.auth {
            let decoded = STANDARD.decode(encoded.trim()).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (user, pass) = decoded.split_once(':')?;
            return Some((user.to_string(), pass.to_string()));
        }
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.clone(), p.clone())),
            _ => None,
        }
    }
}

impl DockerConfig {
    /// Load credentials from `path`
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no registry credentials file, using anonymous access");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content).map_err(|e| RepoError::CredentialsFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Default docker credentials location (`~/.docker/config.json`)
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| RepoError::AuthFailed {
            message: "Could not determine home directory".to_string(),
        })?;
        Ok(home.join(".docker").join("config.json"))
    }

    /// Credentials for a registry host (`host` or `host:port`)
    pub fn credentials_for_host(&self, host: &str) -> Option<(String, String)> {
        let candidates = [
            host.to_string(),
            format!("https://{}", host),
            format!("http://{}", host),
        ];

        candidates
            .iter()
            .filter_map(|candidate| self.auths.get(candidate))
            .find_map(DockerAuth::basic)
    }

    /// OCI auth for a registry host
    pub fn registry_auth(&self, host: &str) -> RegistryAuth {
        match self.credentials_for_host(host) {
            Some((user, pass)) => RegistryAuth::Basic(user, pass),
            None => RegistryAuth::Anonymous,
        }
    }

    /// Authorization header value for an http(s) URL
    pub fn auth_header_for_url(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let host = match parsed.port() {
            Some(port) => format!("{}:{}", parsed.host_str()?, port),
            None => parsed.host_str()?.to_string(),
        };
        let (user, pass) = self.credentials_for_host(&host)?;
        Some(format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass))))
    }
}
