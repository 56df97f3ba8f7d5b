//! `rusqlite`-backed implementation of `ConnectionGraphStore`.
//!
//! `rusqlite::Connection` is synchronous, so every method hops onto `tokio::task::spawn_blocking`
//! per §4.1A. The connection itself lives behind a `std::sync::Mutex` — a single run is
//! single-threaded at the orchestration level (§5), so this is never a contended lock; it exists
//! only so the store can be shared behind an `Arc` across the async call sites.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use codegraph_core::domain::{
    ChangeKind, CheckpointRow, CheckpointRowId, Connection as GraphConnection, ConnectionId,
    Direction, File, FileId, Project, ProjectId,
};
use codegraph_core::ports::{ConnectionGraphStore, ConnectionWithProject, RunPlan};

use crate::error::StorageError;

use super::schema::SCHEMA;

pub struct SqliteConnectionGraphStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteConnectionGraphStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("connection mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::database(format!("blocking task panicked: {e}")))?
    }

    /// Like `blocking`, but hands the closure mutable access — needed for `Connection::transaction`,
    /// which borrows `&mut Connection`.
    async fn blocking_mut<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().expect("connection mutex poisoned");
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::database(format!("blocking task panicked: {e}")))?
    }
}

fn direction_to_str(d: Direction) -> &'static str {
    match d {
        Direction::Incoming => "incoming",
        Direction::Outgoing => "outgoing",
    }
}

fn direction_from_str(s: &str) -> Result<Direction, StorageError> {
    match s {
        "incoming" => Ok(Direction::Incoming),
        "outgoing" => Ok(Direction::Outgoing),
        other => Err(StorageError::invariant_violation(format!(
            "unknown connection direction in store: {other}"
        ))),
    }
}

fn change_kind_from_str(s: &str) -> Result<ChangeKind, StorageError> {
    match s {
        "added" => Ok(ChangeKind::Added),
        "modified" => Ok(ChangeKind::Modified),
        "deleted" => Ok(ChangeKind::Deleted),
        other => Err(StorageError::invariant_violation(format!(
            "unknown checkpoint change_kind in store: {other}"
        ))),
    }
}

fn row_to_project(row: &rusqlite::Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: ProjectId(row.get(0)?),
        name: row.get(1)?,
        root_path: row.get(2)?,
        description: row.get(3)?,
    })
}

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<File> {
    Ok(File {
        id: FileId(row.get(0)?),
        project_id: ProjectId(row.get(1)?),
        path: row.get(2)?,
        language: row.get(3)?,
        content_hash: row.get(4)?,
    })
}

fn row_to_connection(row: &rusqlite::Row) -> rusqlite::Result<GraphConnection> {
    let direction_str: String = row.get(2)?;
    Ok(GraphConnection {
        id: ConnectionId(row.get(0)?),
        file_id: FileId(row.get(1)?),
        direction: direction_from_str(&direction_str)
            .map_err(|e| rusqlite::Error::InvalidColumnType(2, e.to_string(), rusqlite::types::Type::Text))?,
        start_line: row.get::<_, i64>(3)? as u32,
        end_line: row.get::<_, i64>(4)? as u32,
        code_snippet: row.get(5)?,
        description: row.get(6)?,
        technology_name: row.get(7)?,
    })
}

#[async_trait]
impl ConnectionGraphStore for SqliteConnectionGraphStore {
    type Error = StorageError;

    async fn list_checkpoint_rows(&self) -> Result<Vec<CheckpointRow>, StorageError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, file_path, change_kind, old_content, new_content, created_at
                 FROM checkpoint_queue",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    let change_kind: String = row.get(3)?;
                    let created_at: String = row.get(6)?;
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        change_kind,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        created_at,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(id, project_id, file_path, change_kind, old_content, new_content, created_at)| {
                    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_at)
                        .map_err(|e| {
                            StorageError::invariant_violation(format!(
                                "checkpoint row {id} has unparseable timestamp: {e}"
                            ))
                        })?
                        .with_timezone(&Utc);
                    Ok(CheckpointRow {
                        id: CheckpointRowId(id),
                        project_id: ProjectId(project_id),
                        file_path,
                        change_kind: change_kind_from_str(&change_kind)?,
                        old_content,
                        new_content,
                        timestamp,
                    })
                })
                .collect()
        })
        .await
    }

    async fn upsert_file(
        &self,
        project_id: ProjectId,
        path: &str,
        language: &str,
        content_hash: &str,
    ) -> Result<File, StorageError> {
        let path = path.to_string();
        let language = language.to_string();
        let content_hash = content_hash.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO files (project_id, path, language, content_hash)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (project_id, path)
                 DO UPDATE SET language = excluded.language, content_hash = excluded.content_hash",
                params![project_id.0, path, language, content_hash],
            )?;
            conn.query_row(
                "SELECT id, project_id, path, language, content_hash FROM files
                 WHERE project_id = ?1 AND path = ?2",
                params![project_id.0, path],
                row_to_file,
            )
            .map_err(StorageError::from)
        })
        .await
    }

    async fn file_by_path(&self, project_id: ProjectId, path: &str) -> Result<Option<File>, StorageError> {
        let path = path.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, project_id, path, language, content_hash FROM files
                 WHERE project_id = ?1 AND path = ?2",
                params![project_id.0, path],
                row_to_file,
            )
            .optional()
            .map_err(StorageError::from)
        })
        .await
    }

    async fn connections_by_file(&self, file_id: FileId) -> Result<Vec<GraphConnection>, StorageError> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, file_id, direction, start_line, end_line, code_snippet, description, technology_name
                 FROM connections WHERE file_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![file_id.0], row_to_connection)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn all_projects(&self) -> Result<Vec<Project>, StorageError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, root_path, description FROM projects")?;
            let rows = stmt.query_map([], row_to_project)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn connections_by_direction(
        &self,
        direction: Direction,
    ) -> Result<Vec<ConnectionWithProject>, StorageError> {
        let direction_str = direction_to_str(direction);
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.file_id, c.direction, c.start_line, c.end_line, c.code_snippet,
                        c.description, c.technology_name, f.project_id
                 FROM connections c JOIN files f ON f.id = c.file_id
                 WHERE c.direction = ?1",
            )?;
            let rows = stmt
                .query_map(params![direction_str], |row| {
                    let connection = row_to_connection(row)?;
                    let project_id: i64 = row.get(8)?;
                    Ok(ConnectionWithProject {
                        connection,
                        project_id: ProjectId(project_id),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn commit_run(&self, plan: RunPlan) -> Result<(), StorageError> {
        self.blocking_mut(move |conn| {
            let tx = conn.transaction()?;

            for file_id in &plan.file_deletes {
                tx.execute("DELETE FROM files WHERE id = ?1", params![file_id.0])?;
            }

            for connection_id in &plan.connection_deletes {
                tx.execute("DELETE FROM connections WHERE id = ?1", params![connection_id.0])?;
            }

            for shift in &plan.survive_shifts {
                let updated = tx.execute(
                    "UPDATE connections SET start_line = ?1, end_line = ?2, code_snippet = ?3
                     WHERE id = ?4",
                    params![
                        shift.new_start_line,
                        shift.new_end_line,
                        shift.new_code_snippet,
                        shift.connection_id.0
                    ],
                )?;
                if updated == 0 {
                    return Err(StorageError::not_found("connection", shift.connection_id));
                }
            }

            for new_connection in &plan.new_connections {
                tx.execute(
                    "INSERT INTO connections
                     (file_id, direction, start_line, end_line, code_snippet, description, technology_name)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        new_connection.file_id.0,
                        direction_to_str(new_connection.direction),
                        new_connection.start_line,
                        new_connection.end_line,
                        new_connection.code_snippet,
                        new_connection.description,
                        new_connection.technology_name,
                    ],
                )?;
            }

            for mapping in &plan.new_mappings {
                tx.execute(
                    "INSERT INTO connection_mappings
                     (outgoing_id, incoming_id, confidence, technology_name, rationale)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        mapping.outgoing_connection_id.0,
                        mapping.incoming_connection_id.0,
                        mapping.confidence,
                        mapping.technology_name,
                        mapping.rationale,
                    ],
                )?;
            }

            if !plan.checkpoint_row_deletes.is_empty() {
                let placeholders = plan
                    .checkpoint_row_deletes
                    .iter()
                    .map(|_| "?")
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!("DELETE FROM checkpoint_queue WHERE id IN ({placeholders})");
                let ids: Vec<i64> = plan.checkpoint_row_deletes.iter().map(|id| id.0).collect();
                tx.execute(&sql, rusqlite::params_from_iter(ids))?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }
}

impl SqliteConnectionGraphStore {
    /// Seeds or inspects raw rows that `ConnectionGraphStore` deliberately doesn't expose (project
    /// creation, direct connection/mapping inserts) — used by integration tests in other crates
    /// that need fixtures the public port trait has no business providing. Mirrors the exact
    /// `conn.execute_batch` pattern this module's own unit tests already use internally.
    pub async fn execute_batch_for_tests(&self, sql: &str) -> Result<(), StorageError> {
        let sql = sql.to_string();
        self.blocking(move |conn| conn.execute_batch(&sql).map_err(StorageError::from)).await
    }

    /// Test-only readback for `connection_mappings`, which the port trait has no getter for (the
    /// Matcher only ever writes them via `commit_run`).
    pub async fn count_connection_mappings_for_tests(&self) -> Result<i64, StorageError> {
        self.blocking(|conn| {
            conn.query_row("SELECT COUNT(*) FROM connection_mappings", [], |row| row.get(0))
                .map_err(StorageError::from)
        })
        .await
    }
}
