//! Package source references
//!
//! A package is located by a chart URI, a version tag and a content digest.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// URI schemes a chart reference may carry
pub const SUPPORTED_SCHEMES: [&str; 3] = ["https://", "http://", "oci://"];

/// Where a package's chart lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSource {
    /// Chart URI (`oci://registry/repository`, or an http(s) URL to a `.tgz`)
    pub uri: String,

    /// Version tag
    #[serde(default)]
    pub version: String,

    /// Content digest (`sha256:<hex>`)
    #[serde(default)]
    pub digest: String,
}

impl PackageSource {
    /// Create a source, rejecting an empty URI
    pub fn new(
        uri: impl Into<String>,
        version: impl Into<String>,
        digest: impl Into<String>,
    ) -> Result<Self> {
        let source = Self {
            uri: uri.into(),
            version: version.into(),
            digest: digest.into(),
        };
        source.validate()?;
        Ok(source)
    }

    /// Check that the source can be resolved at all
    pub fn validate(&self) -> Result<()> {
        if self.uri.trim().is_empty() {
            return Err(CoreError::InvalidSource {
                message: "chart URI is empty".to_string(),
            });
        }
        if self.version.is_empty() && self.digest.is_empty() {
            return Err(CoreError::InvalidSource {
                message: format!("{} has neither a version nor a digest", self.uri),
            });
        }
        if !self.digest.is_empty() && !self.digest.contains(':') {
            return Err(CoreError::InvalidSource {
                message: format!(
                    "digest '{}' must be of the form <algorithm>:<hex>",
                    self.digest
                ),
            });
        }
        Ok(())
    }

    /// Chart URI with a scheme; bare registry references are treated as OCI
    pub fn chart_uri(&self) -> String {
        if has_supported_scheme(&self.uri) {
            self.uri.clone()
        } else {
            format!("oci://{}", self.uri)
        }
    }

    /// Whether the chart is pulled from an OCI registry
    pub fn is_oci(&self) -> bool {
        self.chart_uri().starts_with("oci://")
    }

    /// Tag or digest used to locate the chart, digest first
    pub fn reference(&self) -> &str {
        if self.digest.is_empty() {
            &self.version
        } else {
            &self.digest
        }
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.chart_uri())?;
        if !self.version.is_empty() {
            write!(f, ":{}", self.version)?;
        }
        if !self.digest.is_empty() {
            write!(f, "@{}", self.digest)?;
        }
        Ok(())
    }
}

/// Detect if the given URL has an acceptable scheme prefix
pub fn has_supported_scheme(url: &str) -> bool {
    SUPPORTED_SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_uri_keeps_scheme() {
        let oci = PackageSource::new("oci://public.ecr.aws/pkgs/harbor", "1.0.0", "").unwrap();
        assert_eq!(oci.chart_uri(), "oci://public.ecr.aws/pkgs/harbor");
        assert!(oci.is_oci());

        let http = PackageSource::new("https://charts.example.com/app-1.0.0.tgz", "1.0.0", "").unwrap();
        assert_eq!(http.chart_uri(), "https://charts.example.com/app-1.0.0.tgz");
        assert!(!http.is_oci());
    }

    #[test]
    fn test_chart_uri_defaults_to_oci() {
        let source = PackageSource::new("public.ecr.aws/pkgs/harbor", "1.0.0", "").unwrap();
        assert_eq!(source.chart_uri(), "oci://public.ecr.aws/pkgs/harbor");
    }

    #[test]
    fn test_reference_prefers_digest() {
        let source = PackageSource::new("oci://reg/app", "1.0.0", "sha256:abc").unwrap();
        assert_eq!(source.reference(), "sha256:abc");

        let tagged = PackageSource::new("oci://reg/app", "1.0.0", "").unwrap();
        assert_eq!(tagged.reference(), "1.0.0");
    }

    #[test]
    fn test_validate() {
        assert!(PackageSource::new("", "1.0.0", "").is_err());
        assert!(PackageSource::new("oci://reg/app", "", "").is_err());
        assert!(PackageSource::new("oci://reg/app", "", "deadbeef").is_err());
        assert!(PackageSource::new("oci://reg/app", "", "sha256:deadbeef").is_ok());
    }

    #[test]
    fn test_display() {
        let source = PackageSource::new("reg/app", "1.0.0", "sha256:abc").unwrap();
        assert_eq!(source.to_string(), "oci://reg/app:1.0.0@sha256:abc");
    }

    #[test]
    fn test_supported_schemes() {
        assert!(has_supported_scheme("http://x"));
        assert!(has_supported_scheme("https://x"));
        assert!(has_supported_scheme("oci://x"));
        assert!(!has_supported_scheme("ftp://x"));
        assert!(!has_supported_scheme("x/y"));
    }
}
