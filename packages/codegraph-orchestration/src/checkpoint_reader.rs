//! Checkpoint Reader (C2): the I/O half. Loads pending rows from the store, hands them to
//! `codegraph_core::checkpoint::coalesce`, and turns an `InconsistentRow` into the
//! `InputCorruption` error taxon (§7).

use codegraph_core::checkpoint::{coalesce, ChangeSet};
use codegraph_core::domain::CheckpointRowId;
use codegraph_core::ports::ConnectionGraphStore;

use crate::error::{OrchestratorError, Result};

/// `load() -> (ChangeSet, row_ids)` per §4.2: reads every pending row, coalesces it, and returns
/// both the logical change set and the physical row IDs to delete if the run succeeds.
pub async fn load<S: ConnectionGraphStore>(store: &S) -> Result<(ChangeSet, Vec<CheckpointRowId>)>
where
    OrchestratorError: From<S::Error>,
{
    let rows = store.list_checkpoint_rows().await?;
    coalesce(rows).map_err(|err| OrchestratorError::InputCorruption {
        row_id: err.row_id.0,
        reason: err.reason,
    })
}
