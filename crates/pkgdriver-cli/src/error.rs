//! CLI error types with exit code handling
//!
//! This module provides a unified error type for CLI operations that
//! maps errors to appropriate exit codes.

use miette::Diagnostic;
use pkgdriver_core::CoreError;
use pkgdriver_kube::DriverError;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Values files or overrides are invalid
    #[error("Invalid values: {message}")]
    #[diagnostic(code(pkgdriver::cli::values))]
    Values {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Chart fetch or load error
    #[error("Chart error: {message}")]
    #[diagnostic(code(pkgdriver::cli::chart))]
    Chart {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Cluster session or registry setup failed
    #[error("Cluster error: {message}")]
    #[diagnostic(code(pkgdriver::cli::cluster))]
    Cluster {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Release operation failed
    #[error("Release error: {message}")]
    #[diagnostic(code(pkgdriver::cli::release))]
    Release { message: String },

    /// No such release
    #[error("{message}")]
    #[diagnostic(code(pkgdriver::cli::not_found))]
    NotFound { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(pkgdriver::cli::io))]
    Io { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Values { .. } => exit_codes::VALUES_ERROR,
            CliError::Chart { .. } => exit_codes::CHART_ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Release { .. } => exit_codes::ERROR,
            CliError::NotFound { .. } => exit_codes::NOT_FOUND,
            CliError::Io { .. } => exit_codes::IO_ERROR,
        }
    }

    /// Create a values error with help text
    pub fn values_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Values {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

/// Message of `err` followed by its sources
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Io(e) => CliError::Io {
                message: e.to_string(),
            },
            CoreError::InvalidSource { message } => CliError::Chart {
                message,
                help: Some("pass a chart URI with --version or --digest".to_string()),
            },
            other => CliError::Values {
                message: other.to_string(),
                help: None,
            },
        }
    }
}

impl From<DriverError> for CliError {
    fn from(err: DriverError) -> Self {
        let message = error_chain(&err);
        match err {
            DriverError::Initialization { .. } => CliError::Cluster {
                message,
                help: Some(
                    "check --cluster, the kubeconfig secret and the registry credentials file"
                        .to_string(),
                ),
            },
            DriverError::ChartResolution { .. } => CliError::Chart {
                message,
                help: Some("check the chart URI, version and digest".to_string()),
            },
            DriverError::NotFound { .. } => CliError::NotFound { message },
            _ => CliError::Release { message },
        }
    }
}

impl From<kube::Error> for CliError {
    fn from(err: kube::Error) -> Self {
        CliError::Cluster {
            message: error_chain(&err),
            help: Some("set KUBECONFIG or run inside a cluster".to_string()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
