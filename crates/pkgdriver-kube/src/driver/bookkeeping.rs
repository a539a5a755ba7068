//! Best-effort side effects
//!
//! Namespace tracking and pull-secret propagation follow a successful chart
//! operation. Their failures are logged and reported, never raised.

use std::fmt;
use std::future::Future;
use tracing::warn;

use crate::error::Result;

/// Bookkeeping step run after a chart operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookkeepingTask {
    TrackNamespace,
    UntrackNamespace,
    PropagateSecret,
}

impl fmt::Display for BookkeepingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrackNamespace => write!(f, "track namespace"),
            Self::UntrackNamespace => write!(f, "untrack namespace"),
            Self::PropagateSecret => write!(f, "propagate pull secret"),
        }
    }
}

/// A bookkeeping step that failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookkeepingFailure {
    pub task: BookkeepingTask,
    pub message: String,
}

impl fmt::Display for BookkeepingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.task, self.message)
    }
}

/// Collects failures of best-effort steps for one package
pub struct Bookkeeping<'a> {
    package: &'a str,
    failures: Vec<BookkeepingFailure>,
}

impl<'a> Bookkeeping<'a> {
    pub fn new(package: &'a str) -> Self {
        Self {
            package,
            failures: Vec::new(),
        }
    }

    /// Await `step`, recording its failure instead of returning it
    pub async fn run<F>(&mut self, task: BookkeepingTask, step: F)
    where
        F: Future<Output = Result<()>>,
    {
        if let Err(e) = step.await {
            warn!(package = self.package, task = %task, error = %e, "bookkeeping failed");
            self.failures.push(BookkeepingFailure {
                task,
                message: e.to_string(),
            });
        }
    }

    pub fn finish(self) -> Vec<BookkeepingFailure> {
        self.failures
    }
}
