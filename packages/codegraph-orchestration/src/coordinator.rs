//! Run Coordinator (C8): `Idle -> Loading -> Diffing -> Reconciling -> Splitting -> Matching ->
//! Committing -> Idle` on success; any state may transition to `Aborting -> Idle` on fatal error.
//!
//! The state machine itself is modeled directly on `job.rs`'s `JobState`/`JobStateMachine` pattern:
//! an enum with one variant per named state, wrapped by a type exposing fallible transition methods
//! that reject illegal moves with `InvalidStateTransition{from, to}` rather than a bare enum mutated
//! ad hoc. Every transition logs at `info!` with the run identifier, per §1A/§4.8A.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use codegraph_core::batch::{plan_project_batches, Batch};
use codegraph_core::checkpoint::Change;
use codegraph_core::diff;
use codegraph_core::domain::{Connection, ConnectionId, File, FileId, ProjectId};
use codegraph_core::matcher::{match_connections, ProjectConnection, TokenOverlapSimilarity};
use codegraph_core::ports::{ConnectionGraphStore, ProjectDescriptionSource, RunPlan, SplitterClient};
use codegraph_core::reconcile::{self, SnippetJob, SurviveShift};

use crate::checkpoint_reader;
use crate::config::Configuration;
use crate::error::{OrchestratorError, Result};
use crate::splitter;

/// Outcome of one coordinator run, mapped to the exit codes of §6A by `bin/run.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Processed,
    NothingToDo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Loading,
    Diffing,
    Reconciling,
    Splitting,
    Matching,
    Committing,
    Aborting,
}

impl RunState {
    fn name(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Loading => "loading",
            RunState::Diffing => "diffing",
            RunState::Reconciling => "reconciling",
            RunState::Splitting => "splitting",
            RunState::Matching => "matching",
            RunState::Committing => "committing",
            RunState::Aborting => "aborting",
        }
    }
}

/// Wraps a `RunState` with fallible transition methods, matching `job.rs`'s `JobStateMachine`.
pub struct RunStateMachine {
    run_id: String,
    state: RunState,
}

impl RunStateMachine {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn legal(from: RunState, to: RunState) -> bool {
        use RunState::*;
        matches!(
            (from, to),
            (Idle, Loading)
                | (Loading, Idle)
                | (Loading, Diffing)
                | (Diffing, Reconciling)
                | (Reconciling, Splitting)
                | (Splitting, Matching)
                | (Matching, Committing)
                | (Committing, Idle)
                | (_, Aborting)
                | (Aborting, Idle)
        )
    }

    pub fn advance_to(&mut self, to: RunState) -> Result<()> {
        if !Self::legal(self.state, to) {
            return Err(OrchestratorError::InvalidStateTransition {
                from: self.state.name().to_string(),
                to: to.name().to_string(),
            });
        }
        info!(run_id = %self.run_id, from = self.state.name(), to = to.name(), "run state transition");
        self.state = to;
        Ok(())
    }

    /// `* -> Aborting -> Idle`; discards accumulated writes, leaves checkpoint rows intact.
    pub fn abort(&mut self) {
        if self.advance_to(RunState::Aborting).is_ok() {
            let _ = self.advance_to(RunState::Idle);
        }
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Best-effort language guess for newly added files, which carry no language in the checkpoint
/// row. Modified files reuse the language already recorded on their existing `File` row instead.
fn infer_language(path: &str) -> String {
    let ext = path.rsplit('.').next().unwrap_or("");
    match ext {
        "rs" => "rust",
        "go" => "go",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "kt" => "kotlin",
        "rb" => "ruby",
        other if !other.is_empty() => other,
        _ => "unknown",
    }
    .to_string()
}

struct ModifiedFileInput {
    file: File,
    old_content: String,
    new_content: String,
    connections: Vec<Connection>,
}

struct ModifiedFileOutput {
    project_id: ProjectId,
    survive_shifts: Vec<SurviveShift>,
    deletes: Vec<ConnectionId>,
    jobs: Vec<SnippetJob>,
}

/// Runs diff + reconcile for every modified file in parallel, bounded by `cpu_workers`, per §5A:
/// this work is synchronous and non-suspending, so it belongs on a `rayon` pool rather than the
/// async executor. The blocking pool construction and `par_iter` both run inside
/// `spawn_blocking` so they never stall the tokio runtime.
fn reconcile_modified_inputs(
    inputs: Vec<ModifiedFileInput>,
    adjacency: u32,
    cpu_workers: usize,
) -> Result<Vec<ModifiedFileOutput>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cpu_workers.max(1))
        .build()
        .map_err(|e| OrchestratorError::Config(format!("failed to build worker pool: {e}")))?;

    pool.install(|| {
        inputs
            .into_par_iter()
            .map(|input| {
                let d = diff::diff(&input.old_content, &input.new_content)?;
                let out = reconcile::reconcile_modified_file(
                    input.file.id,
                    &input.file.language,
                    &input.connections,
                    &d,
                    &input.new_content,
                    adjacency,
                );
                Ok(ModifiedFileOutput {
                    project_id: input.file.project_id,
                    survive_shifts: out.survive_shifts,
                    deletes: out.deletes,
                    jobs: out.snippet_jobs,
                })
            })
            .collect::<Result<Vec<_>>>()
    })
}

/// Drives C2 -> C3 -> C4 -> C5 -> C6 -> C7 -> commit, per §4.8.
///
/// Design note: `MatchCandidate` identifies connections by store-assigned `ConnectionId`, which only
/// exists after insert, but the Matcher contract requires pairing this run's newly-derived
/// connections against the rest of the graph. Rather than inventing provisional IDs, the final
/// transaction is split into two `commit_run` calls: the first lands survive-shifts, deletes and new
/// connections (so the Matcher can read their real IDs back via `connections_by_direction`); the
/// second lands new mappings and checkpoint-row deletions. This mirrors the granularity already
/// committed to at the batch level (§4.6: "a batch is all-or-nothing") rather than introducing a new
/// kind of partiality: if the second commit fails the run still reports failure and the checkpoint
/// rows remain pending, but the newly split connections are not rolled back.
pub async fn run<S, C, D>(
    store: &S,
    splitter_client: &C,
    descriptions: &D,
    config: &Configuration,
) -> Result<RunOutcome>
where
    S: ConnectionGraphStore,
    C: SplitterClient + Sync,
    D: ProjectDescriptionSource,
    OrchestratorError: From<S::Error> + From<D::Error>,
{
    run_with_cancellation(store, splitter_client, descriptions, config, &CancellationToken::new()).await
}

/// Same as `run`, but checks `cancellation` between batches (§5: "finish the current batch, then
/// abort cleanly"). A signal observed mid-run discards accumulated writes and leaves the checkpoint
/// rows pending, same as any other abort.
pub async fn run_with_cancellation<S, C, D>(
    store: &S,
    splitter_client: &C,
    descriptions: &D,
    config: &Configuration,
    cancellation: &CancellationToken,
) -> Result<RunOutcome>
where
    S: ConnectionGraphStore,
    C: SplitterClient + Sync,
    D: ProjectDescriptionSource,
    OrchestratorError: From<S::Error> + From<D::Error>,
{
    let run_id = format!("run-{}", std::process::id());
    let mut machine = RunStateMachine::new(run_id);

    match run_inner(store, splitter_client, descriptions, config, &mut machine, cancellation).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            error!(error = %err, category = %err.category(), "run aborted");
            machine.abort();
            Err(err)
        }
    }
}

async fn run_inner<S, C, D>(
    store: &S,
    splitter_client: &C,
    descriptions: &D,
    config: &Configuration,
    machine: &mut RunStateMachine,
    cancellation: &CancellationToken,
) -> Result<RunOutcome>
where
    S: ConnectionGraphStore,
    C: SplitterClient + Sync,
    D: ProjectDescriptionSource,
    OrchestratorError: From<S::Error> + From<D::Error>,
{
    machine.advance_to(RunState::Loading)?;
    let (changes, checkpoint_row_ids) = checkpoint_reader::load(store).await?;
    if changes.is_empty() {
        machine.advance_to(RunState::Idle)?;
        return Ok(RunOutcome::NothingToDo);
    }

    machine.advance_to(RunState::Diffing)?;
    let mut modified_inputs = Vec::new();
    let mut added_jobs: HashMap<ProjectId, Vec<SnippetJob>> = HashMap::new();
    let mut plan = RunPlan::default();
    let mut all_files: HashMap<FileId, File> = HashMap::new();
    let mut all_contents: HashMap<FileId, String> = HashMap::new();

    for ((project_id, path), change) in changes.iter() {
        match change {
            Change::Modified { old_content, new_content } => {
                let existing = store.file_by_path(*project_id, path).await?.ok_or_else(|| {
                    OrchestratorError::InputCorruption {
                        row_id: 0,
                        reason: format!("modified file {path} in project {project_id} has no File row"),
                    }
                })?;
                let file = store
                    .upsert_file(*project_id, path, &existing.language, &content_hash(new_content))
                    .await?;
                let connections = store.connections_by_file(file.id).await?;
                all_files.insert(file.id, file.clone());
                all_contents.insert(file.id, new_content.clone());
                modified_inputs.push(ModifiedFileInput {
                    file,
                    old_content: old_content.clone(),
                    new_content: new_content.clone(),
                    connections,
                });
            }
            Change::Added { new_content } => {
                let language = infer_language(path);
                let file = store
                    .upsert_file(*project_id, path, &language, &content_hash(new_content))
                    .await?;
                let job = reconcile::reconcile_added_file(file.id, &language, new_content);
                all_files.insert(file.id, file.clone());
                all_contents.insert(file.id, new_content.clone());
                added_jobs.entry(*project_id).or_default().push(job);
            }
            Change::Deleted { .. } => {
                if let Some(file) = store.file_by_path(*project_id, path).await? {
                    let connections = store.connections_by_file(file.id).await?;
                    plan.connection_deletes.extend(reconcile::reconcile_deleted_file(&connections));
                    plan.file_deletes.push(file.id);
                }
            }
        }
    }

    machine.advance_to(RunState::Reconciling)?;
    let cpu_workers = config.resolved_cpu_workers();
    let adjacency = config.adjacency_threshold;
    let reconcile_outputs = tokio::task::spawn_blocking(move || {
        reconcile_modified_inputs(modified_inputs, adjacency, cpu_workers)
    })
    .await
    .map_err(|e| OrchestratorError::Config(format!("reconcile worker pool panicked: {e}")))??;

    let mut modified_jobs: HashMap<ProjectId, Vec<SnippetJob>> = HashMap::new();
    for output in reconcile_outputs {
        plan.survive_shifts.extend(output.survive_shifts);
        plan.connection_deletes.extend(output.deletes);
        modified_jobs.entry(output.project_id).or_default().extend(output.jobs);
    }

    machine.advance_to(RunState::Splitting)?;
    let touched_projects: HashSet<ProjectId> =
        modified_jobs.keys().chain(added_jobs.keys()).copied().collect();

    let mut description_cache: HashMap<ProjectId, String> = HashMap::new();
    for project_id in &touched_projects {
        if cancellation.is_cancelled() {
            warn!(project_id = project_id.0, "cancellation observed before next batch, aborting run");
            return Err(OrchestratorError::Cancelled);
        }

        let batches: Vec<Batch> = plan_project_batches(
            *project_id,
            modified_jobs.remove(project_id).unwrap_or_default(),
            added_jobs.remove(project_id).unwrap_or_default(),
            config.batch_line_budget,
        );
        if batches.is_empty() {
            continue;
        }

        let description = match description_cache.get(project_id) {
            Some(d) => d.clone(),
            None => {
                let d = descriptions.description(*project_id).await?.unwrap_or_default();
                description_cache.insert(*project_id, d.clone());
                d
            }
        };

        debug!(project_id = project_id.0, batches = batches.len(), "splitting batches");
        let new_connections = splitter::run_batches_concurrently(
            splitter_client,
            &batches,
            &all_files,
            &all_contents,
            &description,
            config.splitter_retries,
            config.splitter_concurrency,
        )
        .await?;
        plan.new_connections.extend(new_connections);
    }

    // First commit: land survive-shifts, deletes and new connections so the Matcher can read
    // their store-assigned IDs back.
    machine.advance_to(RunState::Matching)?;
    let first_plan = RunPlan {
        file_deletes: std::mem::take(&mut plan.file_deletes),
        survive_shifts: std::mem::take(&mut plan.survive_shifts),
        connection_deletes: std::mem::take(&mut plan.connection_deletes),
        new_connections: std::mem::take(&mut plan.new_connections),
        new_mappings: Vec::new(),
        checkpoint_row_deletes: Vec::new(),
    };
    if !first_plan.is_empty() {
        store.commit_run(first_plan).await?;
    }

    let outgoing = store.connections_by_direction(codegraph_core::domain::Direction::Outgoing).await?;
    let incoming = store.connections_by_direction(codegraph_core::domain::Direction::Incoming).await?;
    let outgoing: Vec<ProjectConnection> = outgoing
        .into_iter()
        .map(|c| ProjectConnection {
            connection: c.connection,
            project_id: c.project_id,
        })
        .collect();
    let incoming: Vec<ProjectConnection> = incoming
        .into_iter()
        .map(|c| ProjectConnection {
            connection: c.connection,
            project_id: c.project_id,
        })
        .collect();
    let mappings = match_connections(&outgoing, &incoming, &TokenOverlapSimilarity, config.matcher_threshold);

    machine.advance_to(RunState::Committing)?;
    let second_plan = RunPlan {
        file_deletes: Vec::new(),
        survive_shifts: Vec::new(),
        connection_deletes: Vec::new(),
        new_connections: Vec::new(),
        new_mappings: mappings,
        checkpoint_row_deletes: checkpoint_row_ids,
    };
    store.commit_run(second_plan).await?;

    machine.advance_to(RunState::Idle)?;
    Ok(RunOutcome::Processed)
}
