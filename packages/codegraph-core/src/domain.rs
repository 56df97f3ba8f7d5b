//! Domain entities for the connection graph.
//!
//! All identifiers are opaque stable integers, assigned by the store on insert. Entities here are
//! plain data — no mutable status flags, no behavior tied to a particular store backend. The
//! Reconciler and Matcher operate on owned copies of these types and return new owned values; they
//! never hold a reference back into a store.

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

opaque_id!(ProjectId);
opaque_id!(FileId);
opaque_id!(ConnectionId);
opaque_id!(ConnectionMappingId);
opaque_id!(CheckpointRowId);

/// A project (repository) under cross-indexing. Created once; never mutated by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub root_path: String,
    pub description: Option<String>,
}

impl Project {
    pub fn new(id: ProjectId, name: impl Into<String>, root_path: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            root_path: root_path.into(),
            description: None,
        }
    }
}

/// A source file within a project, unique by `(project_id, path)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub project_id: ProjectId,
    pub path: String,
    pub language: String,
    pub content_hash: String,
}

impl File {
    pub fn new(
        id: FileId,
        project_id: ProjectId,
        path: impl Into<String>,
        language: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            id,
            project_id,
            path: path.into(),
            language: language.into(),
            content_hash: content_hash.into(),
        }
    }
}

/// Direction of an external integration point relative to the file it is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// A single inbound or outbound external integration point, attributed to a line range in one file.
///
/// # Invariants
///
/// - I1: `1 <= start_line <= end_line`, and the range is valid in the file's current content.
/// - I2: `code_snippet` equals the exact lines `start_line..=end_line` of the current file content.
/// - I3: `description` and `technology_name` are produced only by the Splitter — the Reconciler
///   never invents them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub file_id: FileId,
    pub direction: Direction,
    pub start_line: u32,
    pub end_line: u32,
    pub code_snippet: String,
    pub description: String,
    pub technology_name: String,
}

impl Connection {
    /// Number of lines this connection spans (inclusive).
    pub fn line_count(&self) -> u32 {
        self.end_line - self.start_line + 1
    }
}

/// A directed pairing between one outgoing Connection and one incoming Connection, with a
/// confidence score in `[0, 1]`. Weakly owned by both endpoints: deleting either connection
/// cascades the mapping's deletion at the store layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMapping {
    pub id: ConnectionMappingId,
    pub outgoing_connection_id: ConnectionId,
    pub incoming_connection_id: ConnectionId,
    pub confidence: f64,
    pub technology_name: String,
    pub rationale: Option<String>,
}

/// The kind of change a checkpoint row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// A pending file change as written by an external watcher/editor. Read-consume-delete: the Run
/// Coordinator deletes only the row IDs it successfully processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRow {
    pub id: CheckpointRowId,
    pub project_id: ProjectId,
    pub file_path: String,
    pub change_kind: ChangeKind,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
