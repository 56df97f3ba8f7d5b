//! Splitter Driver (C6): calls the external Splitter for one batch, retries transient failures,
//! validates the returned snippets against current file content, and converts the response into
//! `NewConnection` rows ready for `RunPlan`.
//!
//! Retry/backoff reuses `job.rs`'s `JobStateMachine::fail()` formula verbatim: `2u64.pow(attempt)`
//! seconds, gated on `ErrorCategory::Transient`, bounded by `max_retries`. Concurrency across
//! independent batches is bounded by a `tokio::sync::Semaphore`, following the same
//! `tokio::spawn` + `join_all` idiom used elsewhere in this crate for bounded concurrent I/O (§4.6A).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use codegraph_core::batch::Batch;
use codegraph_core::domain::{File, FileId};
use codegraph_core::error::{Categorized, ErrorCategory};
use codegraph_core::ports::{NewConnection, SplitterClient, SplitterRequest, SplitterSnippet};
use codegraph_core::text::extract_lines;

use crate::error::{OrchestratorError, Result};

/// Calls the Splitter once for `batch`, retrying transient errors up to `max_retries` times.
pub async fn run_batch<C: SplitterClient>(
    client: &C,
    batch: &Batch,
    files: &HashMap<FileId, File>,
    contents: &HashMap<FileId, String>,
    project_description: &str,
    max_retries: u32,
) -> Result<Vec<NewConnection>> {
    let snippets: Vec<SplitterSnippet> = batch
        .jobs
        .iter()
        .map(|job| {
            let file = files
                .get(&job.file_id)
                .expect("file must be upserted before its jobs are batched");
            SplitterSnippet {
                file_path: file.path.clone(),
                language: job.language.clone(),
                start_line: job.start_line,
                end_line: job.end_line,
                code: job.code.clone(),
                prior_description: job.prior_description.clone(),
            }
        })
        .collect();

    let request = SplitterRequest {
        project_description: project_description.to_string(),
        snippets,
    };

    let mut attempt = 0u32;
    loop {
        match client.split(request.clone()).await {
            Ok(response) => return validate_and_convert(&response.connections, batch, contents),
            Err(err) => {
                let category = err.category();
                if category == ErrorCategory::Transient && attempt < max_retries {
                    let backoff_secs = 2u64.pow(attempt);
                    tracing::warn!(
                        attempt,
                        backoff_secs,
                        project_id = batch.project_id.0,
                        "splitter call failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    attempt += 1;
                    continue;
                }
                let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(err);
                return Err(if category == ErrorCategory::Transient {
                    OrchestratorError::SplitterTransient { attempt, source: boxed }
                } else {
                    OrchestratorError::SplitterPermanent { source: boxed }
                });
            }
        }
    }
}

fn validate_and_convert(
    derived: &[codegraph_core::ports::DerivedConnection],
    batch: &Batch,
    contents: &HashMap<FileId, String>,
) -> Result<Vec<NewConnection>> {
    let mut out = Vec::with_capacity(derived.len());
    for d in derived {
        let job = batch.jobs.get(d.source_index).ok_or_else(|| {
            OrchestratorError::SplitterPermanent {
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("splitter returned unknown source_index {}", d.source_index),
                )),
            }
        })?;
        let content = contents.get(&job.file_id).ok_or_else(|| OrchestratorError::SplitterPermanent {
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no current content cached for file {}", job.file_id),
            )),
        })?;
        let expected = extract_lines(content, d.start_line, d.end_line);
        if expected != d.code_snippet {
            return Err(OrchestratorError::SplitterPermanent {
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "splitter code_snippet mismatch for file {} lines {}..{}",
                        job.file_id, d.start_line, d.end_line
                    ),
                )),
            });
        }
        out.push(NewConnection {
            file_id: job.file_id,
            direction: d.direction,
            start_line: d.start_line,
            end_line: d.end_line,
            code_snippet: d.code_snippet.clone(),
            description: d.description.clone(),
            technology_name: d.technology_name.clone(),
        });
    }
    Ok(out)
}

/// Runs every batch concurrently, bounded by `concurrency` permits (§5: "Splitter calls are
/// I/O-bound and may be issued concurrently up to a configurable concurrency limit, independent
/// of the CPU pool"). A batch is all-or-nothing: the first permanent failure short-circuits the
/// whole run via `?` at the call site, in line with §4.6's "partial batches are not persisted".
pub async fn run_batches_concurrently<C: SplitterClient + Sync>(
    client: &C,
    batches: &[Batch],
    files: &HashMap<FileId, File>,
    contents: &HashMap<FileId, String>,
    project_description: &str,
    max_retries: u32,
    concurrency: usize,
) -> Result<Vec<NewConnection>> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let futures = batches.iter().map(|batch| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");
            run_batch(client, batch, files, contents, project_description, max_retries).await
        }
    });

    let results = futures::future::join_all(futures).await;
    let mut connections = Vec::new();
    for outcome in results {
        connections.extend(outcome?);
    }
    Ok(connections)
}
