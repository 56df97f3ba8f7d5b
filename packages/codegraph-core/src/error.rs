//! Error types for codegraph-core

use std::fmt;
use thiserror::Error;

/// How the Splitter Driver and Run Coordinator should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Retry with backoff (e.g. splitter timeout, store busy).
    Transient,
    /// Abort the run; never retried.
    Permanent,
    /// Environment-level failure (disk full, OOM); abort and surface loudly.
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Implemented by every crate-scoped error type reachable through a port trait (`ConnectionGraphStore`,
/// `SplitterClient`, `ProjectDescriptionSource`), so the Splitter Driver's retry policy and the Run
/// Coordinator's abort policy can dispatch on `ErrorCategory` without string matching.
pub trait Categorized: std::error::Error + Send + Sync + 'static {
    fn category(&self) -> ErrorCategory;
}

impl Categorized for CoreError {
    fn category(&self) -> ErrorCategory {
        CoreError::category(self)
    }
}

/// Errors raised by the pure domain layer: diff, reconciliation and matching.
///
/// Both variants correspond to fatal taxons in the error handling design — they indicate a bug in
/// the diff/reconcile algorithm itself, never a condition callers should retry.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("diff invariant violated for {old_line_count} old / {new_line_count} new lines: {message}")]
    DiffInvariantViolation {
        old_line_count: usize,
        new_line_count: usize,
        message: String,
    },

    #[error("reconcile invariant violated for connection {connection_id}: {message}")]
    ReconcileInvariantViolation { connection_id: i64, message: String },
}

impl CoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::DiffInvariantViolation { .. } => ErrorCategory::Permanent,
            CoreError::ReconcileInvariantViolation { .. } => ErrorCategory::Permanent,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
