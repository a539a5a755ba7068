//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Chart not found: {path}")]
    ChartNotFound { path: String },

    #[error("Invalid chart: {message}")]
    InvalidChart { message: String },

    #[error("Invalid package source: {message}")]
    InvalidSource { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("Values merge error: {message}")]
    ValuesMerge { message: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
