//! Error types for chart resolution

use pkgdriver_core::CoreError;
use thiserror::Error;

/// Chart resolution errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Reference Errors ============
    #[error("Invalid chart URL: {url} - {reason}")]
    InvalidChartUrl { url: String, reason: String },

    #[error("Invalid OCI reference: {reference}")]
    InvalidOciReference { reference: String },

    // ============ Network Errors ============
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Request timeout after {seconds}s")]
    Timeout { seconds: u64 },

    // ============ Authentication Errors ============
    #[error("Authentication required for {url}")]
    AuthRequired { url: String },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    #[error("Invalid credentials file {path}: {message}")]
    CredentialsFile { path: String, message: String },

    // ============ OCI Errors ============
    #[error("OCI registry error: {message}")]
    OciError { message: String },

    #[error("OCI manifest not found: {reference}")]
    OciManifestNotFound { reference: String },

    // ============ Chart Errors ============
    #[error("Integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to load chart: {0}")]
    Chart(#[from] CoreError),

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// Request timeout applied to chart downloads
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RepoError::Timeout {
                seconds: REQUEST_TIMEOUT_SECS,
            }
        } else if e.is_connect() {
            RepoError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidChartUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}
