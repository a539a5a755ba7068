//! pkgdriver core - shared types for the package driver
//!
//! This crate provides the foundational types used throughout pkgdriver:
//! - `PackageSource`: Where a package's chart lives (URI, version, digest)
//! - `Chart`: A loaded chart with metadata, default values and templates
//! - `Values`: Configuration values with deep merge and structural equality
//! - `Release`: One stored revision of an installed package

pub mod archive;
pub mod chart;
pub mod error;
pub mod release;
pub mod source;
pub mod values;

pub use chart::{Chart, ChartMetadata, DEFAULT_NAMESPACE_KEY};
pub use error::{CoreError, Result};
pub use release::{Release, ReleaseInfo, ReleaseStatus};
pub use source::PackageSource;
pub use values::{IMAGE_PULL_SECRETS_KEY, Values, parse_set_values};
