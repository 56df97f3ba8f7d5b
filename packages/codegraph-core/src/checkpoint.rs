//! In-memory change set assembled from pending checkpoint rows (§3 ChangeSet, §4.2 coalescing).
//!
//! This module is the pure half of the Checkpoint Reader (C2): given the rows the store returned,
//! it validates them, applies the coalescing rule, and returns a `ChangeSet` plus the full set of
//! row IDs to delete on success. The I/O (reading rows from the store, deleting them on commit)
//! lives in `codegraph-orchestration`.

use std::collections::HashMap;

use crate::domain::{ChangeKind, CheckpointRow, CheckpointRowId, ProjectId};

/// The logical change for one `(project_id, file_path)` after coalescing all of its checkpoint
/// rows. Mirrors the Design Notes' tagged-variant replacement for the source's dict-of-dicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added { new_content: String },
    Modified { old_content: String, new_content: String },
    Deleted { old_content: String },
}

/// A checkpoint row whose contents are internally inconsistent (e.g. `modified` without
/// `old_content`). Corresponds to the `InputCorruption` error taxon.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("checkpoint row {row_id} is inconsistent: {reason}")]
pub struct InconsistentRow {
    pub row_id: CheckpointRowId,
    pub reason: String,
}

/// The coalesced set of pending changes, keyed by `(project_id, file_path)`.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: HashMap<(ProjectId, String), Change>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, project_id: ProjectId, file_path: &str) -> Option<&Change> {
        self.changes.get(&(project_id, file_path.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(ProjectId, String), &Change)> {
        self.changes.iter()
    }
}

fn validate_row(row: &CheckpointRow) -> Result<(), InconsistentRow> {
    match row.change_kind {
        ChangeKind::Added if row.new_content.is_none() => Err(InconsistentRow {
            row_id: row.id,
            reason: "added row missing new_content".to_string(),
        }),
        ChangeKind::Modified if row.old_content.is_none() || row.new_content.is_none() => {
            Err(InconsistentRow {
                row_id: row.id,
                reason: "modified row missing old_content or new_content".to_string(),
            })
        }
        ChangeKind::Deleted if row.old_content.is_none() => Err(InconsistentRow {
            row_id: row.id,
            reason: "deleted row missing old_content".to_string(),
        }),
        _ => Ok(()),
    }
}

/// Folds two change kinds observed in temporal order for the same file into the net kind, per
/// §3's coalescing rule. `None` means the net effect is a no-op (e.g. added then deleted within
/// the same run) — the rows are still consumed, but no `Change` is produced.
fn fold(state: Option<ChangeKind>, next: ChangeKind) -> Option<ChangeKind> {
    use ChangeKind::*;
    match (state, next) {
        (None, Added) => Some(Added),
        (None, Modified) => Some(Modified),
        (None, Deleted) => Some(Deleted),

        (Some(Added), Deleted) => None,
        (Some(Added), Added) | (Some(Added), Modified) => Some(Added),

        (Some(Modified), Deleted) => Some(Deleted),
        (Some(Modified), Added) | (Some(Modified), Modified) => Some(Modified),

        (Some(Deleted), Added) | (Some(Deleted), Modified) => Some(Modified),
        (Some(Deleted), Deleted) => Some(Deleted),
    }
}

/// Applies the coalescing rule of §3 to a batch of pending checkpoint rows.
///
/// Returns the coalesced `ChangeSet` and the full list of row IDs to delete once the run commits
/// — rows whose net effect coalesces to a no-op are still included in the delete set.
///
/// # Errors
///
/// Returns the first `InconsistentRow` found; callers should treat this as fatal (`InputCorruption`)
/// and abort the run without deleting any rows.
pub fn coalesce(mut rows: Vec<CheckpointRow>) -> Result<(ChangeSet, Vec<CheckpointRowId>), InconsistentRow> {
    for row in &rows {
        validate_row(row)?;
    }
    rows.sort_by_key(|row| row.timestamp);

    let mut row_ids = Vec::with_capacity(rows.len());
    let mut groups: HashMap<(ProjectId, String), Vec<CheckpointRow>> = HashMap::new();
    for row in rows {
        row_ids.push(row.id);
        groups
            .entry((row.project_id, row.file_path.clone()))
            .or_default()
            .push(row);
    }

    let mut changes = HashMap::new();
    for (key, group) in groups {
        let mut state: Option<ChangeKind> = None;
        let mut earliest_old: Option<String> = None;
        let mut latest_new: Option<String> = None;

        for row in &group {
            state = fold(state, row.change_kind);
            if earliest_old.is_none() {
                earliest_old = row.old_content.clone();
            }
            if row.new_content.is_some() {
                latest_new = row.new_content.clone();
            }
        }

        if let Some(kind) = state {
            let change = match kind {
                ChangeKind::Added => Change::Added {
                    new_content: latest_new.expect("validated: added implies new_content"),
                },
                ChangeKind::Modified => Change::Modified {
                    old_content: earliest_old.expect("validated: modified implies old_content"),
                    new_content: latest_new.expect("validated: modified implies new_content"),
                },
                ChangeKind::Deleted => Change::Deleted {
                    old_content: earliest_old.expect("validated: deleted implies old_content"),
                },
            };
            changes.insert(key, change);
        }
    }

    Ok((ChangeSet { changes }, row_ids))
}
