//! Persistent Store (C1): the projects/files/connections/connection-mappings/checkpoint-queue
//! tables behind a single transactional boundary per run.
//!
//! This crate implements `codegraph_core::ports::ConnectionGraphStore` — the pure domain layer
//! never depends on it directly. Everything here is an adapter; the schema and transaction
//! handling live under `infrastructure::sqlite`.

pub mod error;

#[cfg(feature = "sqlite")]
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

#[cfg(feature = "sqlite")]
pub use infrastructure::sqlite::SqliteConnectionGraphStore;
