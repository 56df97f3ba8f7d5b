//! Batch Planner (C5): merges re-analysis ranges from modified files with whole-file content of
//! added files into batches that respect a per-batch maximum line budget.
//!
//! Greedy bin-packing, no teacher analogue — written in the same plain-function, unit-tested
//! style as the rest of the crate.

use crate::domain::ProjectId;
use crate::reconcile::SnippetJob;

/// An ordered group of `SnippetJob`s for one project whose total line count is within budget
/// (unless it holds exactly one oversized job, per the "a single job exceeding B forms its own
/// batch" exception).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub project_id: ProjectId,
    pub jobs: Vec<SnippetJob>,
}

impl Batch {
    pub fn total_lines(&self) -> u64 {
        self.jobs
            .iter()
            .map(|j| (j.end_line - j.start_line + 1) as u64)
            .sum()
    }
}

fn job_lines(job: &SnippetJob) -> u32 {
    job.end_line - job.start_line + 1
}

/// Packs `jobs` (already in the caller's desired order) into batches whose total line count is
/// `<= budget`, except that any single job whose own line count exceeds `budget` is placed alone
/// in its own batch.
fn pack(project_id: ProjectId, jobs: Vec<SnippetJob>, budget: u32) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Vec<SnippetJob> = Vec::new();
    let mut current_lines: u32 = 0;

    for job in jobs {
        let lines = job_lines(&job);

        if lines > budget {
            if !current.is_empty() {
                batches.push(Batch {
                    project_id,
                    jobs: std::mem::take(&mut current),
                });
                current_lines = 0;
            }
            batches.push(Batch {
                project_id,
                jobs: vec![job],
            });
            continue;
        }

        if !current.is_empty() && current_lines.saturating_add(lines) > budget {
            batches.push(Batch {
                project_id,
                jobs: std::mem::take(&mut current),
            });
            current_lines = 0;
        }

        current_lines += lines;
        current.push(job);
    }

    if !current.is_empty() {
        batches.push(Batch { project_id, jobs: current });
    }

    batches
}

/// Plans batches for one project's re-analysis queue. Modified-file jobs are packed before
/// added-file jobs, per §4.5's ordering guarantee (it gets the Matcher a reconciled view sooner).
/// Projects never share a batch — call this once per affected project and concatenate results in
/// any order.
pub fn plan_project_batches(
    project_id: ProjectId,
    modified_file_jobs: Vec<SnippetJob>,
    added_file_jobs: Vec<SnippetJob>,
    batch_line_budget: u32,
) -> Vec<Batch> {
    let mut jobs = modified_file_jobs;
    jobs.extend(added_file_jobs);
    pack(project_id, jobs, batch_line_budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FileId;

    fn job(file: i64, start: u32, end: u32) -> SnippetJob {
        SnippetJob {
            file_id: FileId(file),
            language: "go".to_string(),
            start_line: start,
            end_line: end,
            code: "x".repeat((end - start + 1) as usize),
            prior_description: None,
        }
    }

    #[test]
    fn packs_multiple_small_jobs_into_one_batch_under_budget() {
        let jobs = vec![job(1, 1, 10), job(1, 20, 30), job(1, 40, 45)];
        let batches = pack(ProjectId(1), jobs, 100);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].jobs.len(), 3);
    }

    #[test]
    fn splits_into_a_new_batch_once_the_budget_would_be_exceeded() {
        let jobs = vec![job(1, 1, 60), job(1, 100, 150)];
        let batches = pack(ProjectId(1), jobs, 100);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].jobs.len(), 1);
        assert_eq!(batches[1].jobs.len(), 1);
    }

    #[test]
    fn a_single_oversized_job_gets_its_own_batch() {
        let jobs = vec![job(1, 1, 5), job(1, 10, 5010), job(1, 6000, 6005)];
        let batches = pack(ProjectId(1), jobs, 5000);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].jobs.len(), 1);
        assert!(batches[1].total_lines() > 5000);
    }

    #[test]
    fn modified_jobs_are_ordered_before_added_jobs() {
        let modified = vec![job(1, 1, 10)];
        let added = vec![job(2, 1, 999)];
        let batches = plan_project_batches(ProjectId(1), modified, added, 5000);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].jobs[0].file_id, FileId(1));
        assert_eq!(batches[0].jobs[1].file_id, FileId(2));
    }

    #[test]
    fn empty_input_produces_no_batches() {
        let batches = plan_project_batches(ProjectId(1), vec![], vec![], 5000);
        assert!(batches.is_empty());
    }

    #[test]
    fn batch_total_lines_sums_inclusive_ranges() {
        let batch = Batch {
            project_id: ProjectId(1),
            jobs: vec![job(1, 1, 10), job(1, 20, 24)],
        };
        assert_eq!(batch.total_lines(), 10 + 5);
    }
}
