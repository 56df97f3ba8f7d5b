//! Infrastructure layer: storage adapters.

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConnectionGraphStore;
