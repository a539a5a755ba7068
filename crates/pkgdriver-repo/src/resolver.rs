//! Chart resolution
//!
//! Turns a [`PackageSource`] into a loaded [`Chart`], pulling from an OCI
//! registry or downloading an http(s) archive.

use async_trait::async_trait;
use pkgdriver_core::{Chart, PackageSource};
use std::sync::Arc;

use crate::error::{RepoError, Result};
use crate::http::{ChartDownloader, digest_matches};
use crate::oci::{OciReference, RegistryClient};

/// Locates and loads the chart for a package source
#[async_trait]
pub trait ChartResolver: Send + Sync {
    /// Fetch and load the chart `source` points at
    async fn resolve(&self, source: &PackageSource) -> Result<Chart>;
}

/// Resolver backed by an authenticated registry client
pub struct RegistryChartResolver {
    registry: Arc<RegistryClient>,
    downloader: ChartDownloader,
}

impl RegistryChartResolver {
    /// Create a resolver sharing the registry client's credentials
    pub fn new(registry: Arc<RegistryClient>) -> Result<Self> {
        let downloader = ChartDownloader::new(registry.credentials().clone())?;
        Ok(Self {
            registry,
            downloader,
        })
    }

    async fn pull_oci(&self, source: &PackageSource) -> Result<Vec<u8>> {
        let reference = OciReference::from_source(source)?;
        let pulled = self.registry.pull_chart(&reference).await?;

        if let Some(actual) = &pulled.manifest_digest
            && !source.digest.is_empty()
            && !digest_matches(&source.digest, actual)
        {
            return Err(RepoError::IntegrityCheckFailed {
                name: reference.to_oci_string(),
                expected: source.digest.clone(),
                actual: actual.clone(),
            });
        }

        Ok(pulled.data)
    }
}

#[async_trait]
impl ChartResolver for RegistryChartResolver {
    async fn resolve(&self, source: &PackageSource) -> Result<Chart> {
        source.validate()?;

        let data = if source.is_oci() {
            self.pull_oci(source).await?
        } else {
            self.downloader
                .download(&source.chart_uri(), &source.digest)
                .await?
        };

        let chart = Chart::from_archive(&data)?;
        if !source.version.is_empty() && !version_matches(&chart, &source.version) {
            tracing::warn!(
                source = %source,
                chart_version = %chart.version(),
                "chart version differs from the requested version"
            );
        }

        tracing::debug!(source = %source, chart = chart.name(), "resolved chart");
        Ok(chart)
    }
}

fn version_matches(chart: &Chart, requested: &str) -> bool {
    let requested = requested.trim_start_matches('v').replace('_', "+");
    chart.version().to_string() == requested
}
