//! Chart downloads over http(s)
//!
//! Credentials from the registry credentials file are attached per host and
//! never forwarded across a cross-origin redirect.

use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

use crate::credentials::DockerConfig;
use crate::error::{REQUEST_TIMEOUT_SECS, RepoError, Result};

const MAX_REDIRECTS: u32 = 10;

/// HTTP client for chart archives
pub struct ChartDownloader {
    client: reqwest::Client,
    credentials: DockerConfig,
}

impl ChartDownloader {
    /// Create a downloader using the given credentials
    pub fn new(credentials: DockerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            // Redirects are followed by hand so credentials stay on their origin
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| RepoError::NetworkError {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            credentials,
        })
    }

    /// Download `url`, verifying it against `expected_digest` when non-empty
    pub async fn download(&self, url: &str, expected_digest: &str) -> Result<Vec<u8>> {
        let original = Url::parse(url).map_err(|e| RepoError::InvalidChartUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let mut current = original.clone();
        let mut redirects = 0;

        let response = loop {
            let mut request = self.client.get(current.as_str());
            if same_origin(&original, &current) {
                if let Some(auth) = self.credentials.auth_header_for_url(current.as_str()) {
                    request = request.header(reqwest::header::AUTHORIZATION, auth);
                }
            } else {
                tracing::warn!(
                    from = %original,
                    to = %current,
                    "cross-origin redirect, credentials not forwarded"
                );
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_redirection() {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(RepoError::NetworkError {
                        message: format!("Too many redirects (max {})", MAX_REDIRECTS),
                    });
                }
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| RepoError::NetworkError {
                        message: "Redirect without Location header".to_string(),
                    })?;
                current = current.join(location)?;
                continue;
            }

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(RepoError::AuthRequired {
                    url: current.to_string(),
                });
            }
            if status == reqwest::StatusCode::FORBIDDEN {
                return Err(RepoError::AuthFailed {
                    message: format!("Access denied to {}", current),
                });
            }
            if !status.is_success() {
                return Err(RepoError::HttpError {
                    status: status.as_u16(),
                    message: format!("Request to {} failed", current),
                });
            }

            break response;
        };

        let data = response.bytes().await?.to_vec();

        if !expected_digest.is_empty() {
            let actual = compute_digest(&data);
            if !digest_matches(expected_digest, &actual) {
                return Err(RepoError::IntegrityCheckFailed {
                    name: url.to_string(),
                    expected: expected_digest.to_string(),
                    actual,
                });
            }
        }

        Ok(data)
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Compute SHA256 digest of data
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Check if two digests match, ignoring the algorithm prefix and case
pub fn digest_matches(expected: &str, actual: &str) -> bool {
    let normalize = |s: &str| -> String {
        s.trim_start_matches("sha256:")
            .trim_start_matches("sha256-")
            .to_lowercase()
    };
    normalize(expected) == normalize(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_compute_digest() {
        let digest = compute_digest(b"hello world");
        assert_eq!(
            digest,
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_digest_matches() {
        assert!(digest_matches("sha256:ABC", "sha256:abc"));
        assert!(digest_matches("abc", "sha256:abc"));
        assert!(!digest_matches("sha256:abc", "sha256:def"));
    }

    #[tokio::test]
    async fn test_download_verifies_digest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app-1.0.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".to_vec()))
            .mount(&server)
            .await;

        let downloader = ChartDownloader::new(DockerConfig::default()).unwrap();
        let url = format!("{}/app-1.0.0.tgz", server.uri());

        let data = downloader.download(&url, &compute_digest(b"hello world")).await.unwrap();
        assert_eq!(data, b"hello world");

        let err = downloader
            .download(&url, "sha256:0000000000000000000000000000000000000000000000000000000000000000")
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::IntegrityCheckFailed { .. }));
    }

    #[tokio::test]
    async fn test_download_sends_credentials_for_host() {
        let server = MockServer::start().await;
        let host = server.address().to_string();
        let expected = format!("Basic {}", STANDARD.encode("bot:pw"));

        Mock::given(method("GET"))
            .and(path("/private.tgz"))
            .and(header("authorization", expected.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"chart".to_vec()))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/private.tgz"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let anonymous = ChartDownloader::new(DockerConfig::default()).unwrap();
        let url = format!("{}/private.tgz", server.uri());
        let err = anonymous.download(&url, "").await.unwrap_err();
        assert!(matches!(err, RepoError::AuthRequired { .. }));

        let credentials: DockerConfig = serde_json::from_str(&format!(
            r#"{{"auths": {{"{}": {{"username": "bot", "password": "pw"}}}}}}"#,
            host
        ))
        .unwrap();
        let authed = ChartDownloader::new(credentials).unwrap();
        assert_eq!(authed.download(&url, "").await.unwrap(), b"chart");
    }

    #[tokio::test]
    async fn test_download_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let downloader = ChartDownloader::new(DockerConfig::default()).unwrap();
        let err = downloader
            .download(&format!("{}/missing.tgz", server.uri()), "")
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::HttpError { status: 404, .. }));
    }

    #[test]
    fn test_same_origin() {
        let a = Url::parse("https://charts.example.com/a.tgz").unwrap();
        let b = Url::parse("https://charts.example.com:443/b.tgz").unwrap();
        let c = Url::parse("https://cdn.example.com/a.tgz").unwrap();
        assert!(same_origin(&a, &b));
        assert!(!same_origin(&a, &c));
    }
}
