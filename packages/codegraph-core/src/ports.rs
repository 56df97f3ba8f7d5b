//! Driven port traits: the interfaces `codegraph-storage` and `codegraph-orchestration` implement
//! or drive so this crate never touches a filesystem, a database or a network socket directly.
//!
//! Each trait carries an associated `Error` bounded by `Categorized` so the Splitter Driver's
//! retry policy and the Run Coordinator's abort policy can dispatch on `ErrorCategory` without
//! string matching, per §3A/§7.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
    CheckpointRow, CheckpointRowId, Connection, ConnectionId, Direction, File, FileId, Project,
    ProjectId,
};
use crate::error::Categorized;
use crate::matcher::MatchCandidate;
use crate::reconcile::SurviveShift;

/// A brand-new connection row to insert, produced by the Splitter. Carries no id — the store
/// assigns `ConnectionId` on insert and the driver never reuses the id of a deleted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConnection {
    pub file_id: FileId,
    pub direction: Direction,
    pub start_line: u32,
    pub end_line: u32,
    pub code_snippet: String,
    pub description: String,
    pub technology_name: String,
}

/// Every write accumulated over one run, applied atomically by `ConnectionGraphStore::commit_run`.
/// Building this up as plain data — rather than mutating the store as each component runs — is
/// what makes the run-scoped transaction boundary possible: nothing is visible to readers, and
/// nothing can partially land, until a single `commit_run` call.
#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    /// Files whose owning project was deleted this run; their connections cascade-delete.
    pub file_deletes: Vec<FileId>,
    /// Connections that shifted line range but kept identical code (case 4).
    pub survive_shifts: Vec<SurviveShift>,
    /// Connections to delete outright (cases 1-3, or owned by a deleted file).
    pub connection_deletes: Vec<ConnectionId>,
    /// Connections the Splitter derived this run, to insert fresh.
    pub new_connections: Vec<NewConnection>,
    /// Cross-project pairings the Matcher proposed this run.
    pub new_mappings: Vec<MatchCandidate>,
    /// Checkpoint rows to delete — the full coalesced set, including no-op rows.
    pub checkpoint_row_deletes: Vec<CheckpointRowId>,
}

impl RunPlan {
    pub fn is_empty(&self) -> bool {
        self.file_deletes.is_empty()
            && self.survive_shifts.is_empty()
            && self.connection_deletes.is_empty()
            && self.new_connections.is_empty()
            && self.new_mappings.is_empty()
            && self.checkpoint_row_deletes.is_empty()
    }
}

/// A connection paired with the id of the project its file belongs to, as returned by the
/// store's global connection listings (consumed by the Matcher).
#[derive(Debug, Clone)]
pub struct ConnectionWithProject {
    pub connection: Connection,
    pub project_id: ProjectId,
}

/// The Persistent Store (C1): tables for projects, files, connections, connection mappings, and
/// the checkpoint queue, behind one transactional boundary per run.
///
/// Project creation is explicitly out of scope for this crate (§1: "initial ... project parsing"
/// is an external collaborator) — projects are assumed to already exist when a checkpoint row
/// references their id. File rows, by contrast, are this engine's responsibility: they are
/// upserted eagerly, outside `commit_run`, because they are idempotent content-identity records
/// (unique by `(project_id, path)`) whose presence doesn't depend on whether the rest of the
/// run's connection changes ultimately commit.
#[async_trait]
pub trait ConnectionGraphStore: Send + Sync {
    type Error: Categorized;

    /// All pending checkpoint rows, in no particular order (the caller sorts/coalesces).
    async fn list_checkpoint_rows(&self) -> Result<Vec<CheckpointRow>, Self::Error>;

    /// Upserts a file by `(project_id, path)`, returning its (possibly newly assigned) id.
    async fn upsert_file(
        &self,
        project_id: ProjectId,
        path: &str,
        language: &str,
        content_hash: &str,
    ) -> Result<File, Self::Error>;

    async fn file_by_path(&self, project_id: ProjectId, path: &str) -> Result<Option<File>, Self::Error>;

    async fn connections_by_file(&self, file_id: FileId) -> Result<Vec<Connection>, Self::Error>;

    async fn all_projects(&self) -> Result<Vec<Project>, Self::Error>;

    /// Every connection of the given direction across every project, for the globally-scoped
    /// Matcher: matching is not restricted to projects touched by the current run.
    async fn connections_by_direction(
        &self,
        direction: Direction,
    ) -> Result<Vec<ConnectionWithProject>, Self::Error>;

    /// Applies every accumulated write in `plan` inside a single transaction and commits. Any
    /// failure rolls back the whole transaction; no checkpoint rows are deleted and no partial
    /// connection state is visible to subsequent readers.
    async fn commit_run(&self, plan: RunPlan) -> Result<(), Self::Error>;
}

/// One unit of code handed to the Splitter, the wire shape of `SnippetJob` plus the file's path
/// (the Splitter is language- and path-aware but has no notion of our internal `FileId`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitterSnippet {
    pub file_path: String,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    pub code: String,
    pub prior_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitterRequest {
    pub project_description: String,
    pub snippets: Vec<SplitterSnippet>,
}

/// A connection the Splitter derived from one `SplitterSnippet`, keyed back to it by
/// `source_index` (the snippet's position in the request's `snippets` list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedConnection {
    pub source_index: usize,
    pub direction: Direction,
    pub start_line: u32,
    pub end_line: u32,
    pub code_snippet: String,
    pub description: String,
    pub technology_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SplitterResponse {
    pub connections: Vec<DerivedConnection>,
}

/// The external LLM-backed code-to-connections analyzer (§6, outbound). The core treats it as a
/// pure function up to retries: the driver in `codegraph-orchestration` owns the retry/backoff
/// policy and batching; this trait is just the one-shot request/response boundary.
#[async_trait]
pub trait SplitterClient: Send + Sync {
    type Error: Categorized;

    async fn split(&self, request: SplitterRequest) -> Result<SplitterResponse, Self::Error>;
}

/// Read-only lookup for a project's short natural-language description, handed to the Splitter
/// alongside each batch (§6, inbound).
#[async_trait]
pub trait ProjectDescriptionSource: Send + Sync {
    type Error: Categorized;

    async fn description(&self, project_id: ProjectId) -> Result<Option<String>, Self::Error>;
}
