//! Error types for codegraph-storage

use std::fmt;
use thiserror::Error;

use codegraph_core::error::{Categorized, ErrorCategory};

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Database errors (SQLite)
    Database,
    /// Serialization/deserialization errors
    Serialization,
    /// Transaction errors
    Transaction,
    /// A referenced project/file/connection does not exist
    NotFound,
    /// A schema-level invariant (FK, unique key, range check) was violated
    InvariantViolation,
    /// Configuration errors
    Config,
    /// I/O errors
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Transaction => "transaction",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
    category: ErrorCategory,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            category: ErrorCategory::Permanent,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    // Convenience constructors
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn not_found(entity: &str, id: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("{entity} not found: {id}"))
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }

    pub fn invariant_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvariantViolation, message)
    }
}

impl Categorized for StorageError {
    fn category(&self) -> ErrorCategory {
        self.category
    }
}

/// `rusqlite`'s `SQLITE_BUSY`/`SQLITE_LOCKED` map to `Transient` (the caller may retry the whole
/// transaction per §7's `StoreTransient`); every other SQLite error is `Permanent`.
#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        let category = match &err {
            rusqlite::Error::SqliteFailure(sqlite_err, _) => match sqlite_err.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    ErrorCategory::Transient
                }
                _ => ErrorCategory::Permanent,
            },
            _ => ErrorCategory::Permanent,
        };
        StorageError::database(format!("SQLite error: {err}"))
            .with_source(err)
            .with_category(category)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {err}")).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
