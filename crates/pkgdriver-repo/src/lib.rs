//! pkgdriver chart resolution
//!
//! This crate locates charts for the package driver:
//!
//! - **OCI registries**: Pull by digest or version tag from any OCI registry
//! - **HTTP charts**: Download `.tgz` archives from http(s) URLs
//! - **Credentials**: Docker-style `config.json` written by the registry authenticator
//!
//! ## Security Notes
//!
//! - Credentials are NEVER sent after cross-origin redirects
//! - A source digest is always verified against what was fetched

pub mod credentials;
pub mod error;
pub mod http;
pub mod oci;
pub mod resolver;

// Re-exports for convenience
pub use credentials::{DockerAuth, DockerConfig};
pub use error::{RepoError, Result};
pub use http::{ChartDownloader, compute_digest, digest_matches};
pub use oci::{OciReference, PulledChart, RegistryClient};
pub use resolver::{ChartResolver, RegistryChartResolver};
