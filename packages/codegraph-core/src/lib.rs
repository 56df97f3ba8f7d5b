//! Pure domain types and algorithms for the incremental cross-indexing engine.
//!
//! Nothing in this crate touches a filesystem, a database or a network socket. It defines the
//! entities of the connection graph, the diff/reconcile/batch/matcher algorithms that operate on
//! them, and the port traits (`ConnectionGraphStore`, `SplitterClient`, `ProjectDescriptionSource`)
//! that `codegraph-storage` and `codegraph-orchestration` implement or drive.

pub mod batch;
pub mod checkpoint;
pub mod diff;
pub mod domain;
pub mod error;
pub mod matcher;
pub mod ports;
pub mod reconcile;
pub mod text;

pub use domain::{
    ChangeKind, CheckpointRow, CheckpointRowId, Connection, ConnectionId, ConnectionMapping,
    ConnectionMappingId, Direction, File, FileId, Project, ProjectId,
};
pub use error::{CoreError, ErrorCategory, Result};
