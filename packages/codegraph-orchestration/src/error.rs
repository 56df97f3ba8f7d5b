//! Error types for codegraph-orchestration.
//!
//! Each variant is a direct rendering of §7's taxonomy rather than a string-matched `anyhow::Error`;
//! `category()` lets the Run Coordinator's abort policy and the Splitter Driver's retry loop dispatch
//! without inspecting messages.

use thiserror::Error;

use codegraph_core::error::{Categorized, CoreError, ErrorCategory};
use codegraph_storage::StorageError;

use crate::http::HttpAdapterError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("checkpoint row {row_id} is inconsistent: {reason}")]
    InputCorruption { row_id: i64, reason: String },

    #[error("splitter call failed on attempt {attempt}: {source}")]
    SplitterTransient {
        attempt: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("splitter call failed permanently: {source}")]
    SplitterPermanent {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Store(#[from] StorageError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Http(#[from] HttpAdapterError),

    #[error("run cancelled")]
    Cancelled,

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::InputCorruption { .. } => ErrorCategory::Permanent,
            OrchestratorError::SplitterTransient { .. } => ErrorCategory::Transient,
            OrchestratorError::SplitterPermanent { .. } => ErrorCategory::Permanent,
            OrchestratorError::Store(e) => e.category(),
            OrchestratorError::Core(e) => e.category(),
            OrchestratorError::Http(e) => e.category(),
            OrchestratorError::Cancelled => ErrorCategory::Permanent,
            OrchestratorError::InvalidStateTransition { .. } => ErrorCategory::Permanent,
            OrchestratorError::Config(_) => ErrorCategory::Permanent,
        }
    }

    /// True if the error originates from the Splitter boundary (§6A exit code 10).
    pub fn is_splitter_failure(&self) -> bool {
        matches!(
            self,
            OrchestratorError::SplitterTransient { .. } | OrchestratorError::SplitterPermanent { .. }
        )
    }

    /// True if the error originates from the store boundary (§6A exit code 11).
    pub fn is_store_failure(&self) -> bool {
        matches!(self, OrchestratorError::Store(_))
    }

    /// True if the error is an invariant violation (§6A exit code 20).
    pub fn is_invariant_violation(&self) -> bool {
        match self {
            OrchestratorError::Core(CoreError::DiffInvariantViolation { .. }) => true,
            OrchestratorError::Core(CoreError::ReconcileInvariantViolation { .. }) => true,
            OrchestratorError::Store(e) => e.kind == codegraph_storage::ErrorKind::InvariantViolation,
            _ => false,
        }
    }
}

impl Categorized for OrchestratorError {
    fn category(&self) -> ErrorCategory {
        OrchestratorError::category(self)
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
