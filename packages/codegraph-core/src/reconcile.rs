//! Connection Reconciler (C4): applies a `Diff` to every connection anchored in a modified file,
//! classifying each into one of four overlap cases and producing the three output buckets the
//! spec calls for. No mutable flags live on `Connection` — the three `Vec`s below are the whole
//! output, computed by a pure function.

use std::collections::HashSet;

use crate::diff::Diff;
use crate::domain::{Connection, ConnectionId, FileId};
use crate::text::extract_lines;

/// A unit of code to send to the Splitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnippetJob {
    pub file_id: FileId,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    pub code: String,
    /// Set only when this job originates from a contained-replacement (case 3): gives the
    /// Splitter the old description as context.
    pub prior_description: Option<String>,
}

/// A connection whose line range shifted but whose code did not change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurviveShift {
    pub connection_id: ConnectionId,
    pub new_start_line: u32,
    pub new_end_line: u32,
    pub new_code_snippet: String,
}

/// The three outputs of reconciling one modified file's connections against its diff.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutput {
    pub survive_shifts: Vec<SurviveShift>,
    pub deletes: Vec<ConnectionId>,
    pub snippet_jobs: Vec<SnippetJob>,
}

const DEFAULT_ADJACENCY: u32 = 3;

fn classify_range(c_lo: u32, c_hi: u32, o_lo: u32, o_hi: u32) -> RangeClass {
    if o_hi < c_lo || o_lo > c_hi {
        RangeClass::NoOverlap
    } else if o_lo <= c_lo && o_hi >= c_hi {
        RangeClass::FullCover
    } else if c_lo < o_lo && o_hi < c_hi {
        RangeClass::StrictlyInside
    } else {
        RangeClass::ExtendsBeyond
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeClass {
    FullCover,
    ExtendsBeyond,
    StrictlyInside,
    NoOverlap,
}

/// Extends `[lo, hi]` to include any `added` line within `adjacency` lines of either boundary.
fn extend_with_adjacent_added(lo: u32, hi: u32, added: &HashSet<u32>, adjacency: u32) -> (u32, u32) {
    let window_lo_start = lo.saturating_sub(adjacency);
    let new_lo = (window_lo_start..lo).filter(|l| added.contains(l)).min().unwrap_or(lo);
    let window_hi_end = hi.saturating_add(adjacency);
    let new_hi = ((hi + 1)..=window_hi_end).filter(|l| added.contains(l)).max().unwrap_or(hi);
    (new_lo, new_hi)
}

/// Groups ascending, deduplicated line numbers into maximal runs, merging two runs whose gap is
/// at most `adjacency` lines into a single run.
fn group_with_adjacency(mut lines: Vec<u32>, adjacency: u32) -> Vec<(u32, u32)> {
    lines.sort_unstable();
    lines.dedup();
    let mut groups: Vec<(u32, u32)> = Vec::new();
    for line in lines {
        match groups.last_mut() {
            Some((_, end)) if line <= end.saturating_add(adjacency).saturating_add(1) => {
                *end = line;
            }
            _ => groups.push((line, line)),
        }
    }
    groups
}

/// Reconciles every connection anchored in one modified file against its `Diff`.
///
/// `connections` need not be pre-sorted; the output processes them in ascending connection-ID
/// order per the ordering guarantee in the concurrency model.
pub fn reconcile_modified_file(
    file_id: FileId,
    language: &str,
    connections: &[Connection],
    diff: &Diff,
    new_content: &str,
    adjacency: u32,
) -> ReconcileOutput {
    let mut sorted: Vec<&Connection> = connections.iter().collect();
    sorted.sort_by_key(|c| c.id);

    let mut out = ReconcileOutput::default();

    for connection in sorted {
        let c_lo = connection.start_line;
        let c_hi = connection.end_line;

        let mut overlapping: Vec<&(u32, u32, u32, u32)> = diff
            .replaced_ranges()
            .iter()
            .filter(|r| classify_range(c_lo, c_hi, r.0, r.1) != RangeClass::NoOverlap)
            .collect();
        overlapping.sort_by_key(|r| r.0);

        if overlapping.is_empty() {
            reconcile_no_replace_overlap(connection, language, diff, new_content, adjacency, &mut out);
            continue;
        }

        out.deletes.push(connection.id);

        let mut prior_description = None;
        let (mut new_lo, mut new_hi) = (u32::MAX, 0u32);

        if overlapping.len() == 1 {
            let r = overlapping[0];
            match classify_range(c_lo, c_hi, r.0, r.1) {
                RangeClass::FullCover => {
                    new_lo = r.2;
                    new_hi = r.3;
                }
                RangeClass::ExtendsBeyond => {
                    let map_c_lo = diff.nearest_surviving_image(c_lo).unwrap_or(r.2);
                    let map_c_hi = diff.nearest_surviving_image(c_hi).unwrap_or(r.3);
                    new_lo = r.2.min(map_c_lo);
                    new_hi = r.3.max(map_c_hi);
                }
                RangeClass::StrictlyInside => {
                    // c_lo/c_hi sit outside the replaced range, so they're on the equal side and
                    // have a direct mapping.
                    new_lo = diff.map_line(c_lo).unwrap_or(r.2);
                    new_hi = diff.map_line(c_hi).unwrap_or(r.3);
                    prior_description = Some(connection.description.clone());
                }
                RangeClass::NoOverlap => unreachable!("filtered above"),
            }
        } else {
            // Multiple replaced ranges touch this connection (e.g. one at each edge). A strictly
            // inside classification can't coexist with another overlap by construction, so every
            // contribution here is full-cover or extends-beyond; union their new-side ranges.
            for r in &overlapping {
                let (lo, hi) = match classify_range(c_lo, c_hi, r.0, r.1) {
                    RangeClass::FullCover => (r.2, r.3),
                    RangeClass::ExtendsBeyond => {
                        let map_c_lo = diff.nearest_surviving_image(c_lo).unwrap_or(r.2);
                        let map_c_hi = diff.nearest_surviving_image(c_hi).unwrap_or(r.3);
                        (r.2.min(map_c_lo), r.3.max(map_c_hi))
                    }
                    RangeClass::StrictlyInside => (r.2, r.3),
                    RangeClass::NoOverlap => unreachable!("filtered above"),
                };
                new_lo = new_lo.min(lo);
                new_hi = new_hi.max(hi);
            }
        }

        let (ext_lo, ext_hi) = extend_with_adjacent_added(new_lo, new_hi, diff.added(), adjacency);
        out.snippet_jobs.push(SnippetJob {
            file_id,
            language: language.to_string(),
            start_line: ext_lo,
            end_line: ext_hi,
            code: extract_lines(new_content, ext_lo, ext_hi),
            prior_description,
        });
    }

    emit_jobs_for_untouched_added_lines(file_id, language, new_content, diff, adjacency, &mut out);
    out
}

/// Handles a connection with no overlapping replaced range: either a clean shift (case 4) or,
/// when an insert landed inside its mapped footprint or either endpoint was deleted outright, a
/// case-2 fallback.
fn reconcile_no_replace_overlap(
    connection: &Connection,
    language: &str,
    diff: &Diff,
    new_content: &str,
    adjacency: u32,
    out: &mut ReconcileOutput,
) {
    let c_lo = connection.start_line;
    let c_hi = connection.end_line;
    let mapped_lo = diff.map_line(c_lo);
    let mapped_hi = diff.map_line(c_hi);

    let added_inside = match (mapped_lo, mapped_hi) {
        (Some(lo), Some(hi)) => diff.added().iter().any(|l| *l >= lo && *l <= hi),
        _ => false,
    };

    if let (Some(new_lo), Some(new_hi)) = (mapped_lo, mapped_hi) {
        if !added_inside {
            let refreshed = extract_lines(new_content, new_lo, new_hi);
            if refreshed == connection.code_snippet {
                out.survive_shifts.push(SurviveShift {
                    connection_id: connection.id,
                    new_start_line: new_lo,
                    new_end_line: new_hi,
                    new_code_snippet: refreshed,
                });
            } else {
                // Byte-exact comparison failed: promote to case 3.
                out.deletes.push(connection.id);
                out.snippet_jobs.push(SnippetJob {
                    file_id: connection.file_id,
                    language: language.to_string(),
                    start_line: new_lo,
                    end_line: new_hi,
                    code: refreshed,
                    prior_description: Some(connection.description.clone()),
                });
            }
            return;
        }
        // An insert landed inside the connection's own mapped footprint without any replaced
        // range touching it. Treated like case 2: re-derive, no prior description, extended by
        // adjacency at the boundaries.
        out.deletes.push(connection.id);
        let (ext_lo, ext_hi) = extend_with_adjacent_added(new_lo, new_hi, diff.added(), adjacency);
        out.snippet_jobs.push(SnippetJob {
            file_id: connection.file_id,
            language: language.to_string(),
            start_line: ext_lo,
            end_line: ext_hi,
            code: extract_lines(new_content, ext_lo, ext_hi),
            prior_description: None,
        });
        return;
    }

    // Either endpoint maps to bottom (deleted outright with no replacement record) — case 2
    // fallback using the nearest surviving images.
    let near_lo = diff.nearest_surviving_image(c_lo);
    let near_hi = diff.nearest_surviving_image(c_hi);
    out.deletes.push(connection.id);
    match (near_lo, near_hi) {
        (Some(lo), Some(hi)) => {
            let (ext_lo, ext_hi) = extend_with_adjacent_added(lo.min(hi), lo.max(hi), diff.added(), adjacency);
            out.snippet_jobs.push(SnippetJob {
                file_id: connection.file_id,
                language: language.to_string(),
                start_line: ext_lo,
                end_line: ext_hi,
                code: extract_lines(new_content, ext_lo, ext_hi),
                prior_description: None,
            });
        }
        // No surviving line exists anywhere in the file: the connection is deleted with no
        // SnippetJob (the boundary behavior for a one-line connection whose sole line vanishes).
        _ => {}
    }
}

/// Emits SnippetJobs for runs of `added` lines that fall outside every connection-derived range
/// already queued (survive-shifted connections and cases 1-3 re-analysis windows).
fn emit_jobs_for_untouched_added_lines(
    file_id: FileId,
    language: &str,
    new_content: &str,
    diff: &Diff,
    adjacency: u32,
    out: &mut ReconcileOutput,
) {
    let covered: Vec<(u32, u32)> = out
        .snippet_jobs
        .iter()
        .map(|j| (j.start_line, j.end_line))
        .chain(out.survive_shifts.iter().map(|s| (s.new_start_line, s.new_end_line)))
        .collect();

    let remaining: Vec<u32> = diff
        .added()
        .iter()
        .copied()
        .filter(|l| !covered.iter().any(|&(lo, hi)| *l >= lo && *l <= hi))
        .collect();

    for (lo, hi) in group_with_adjacency(remaining, adjacency) {
        out.snippet_jobs.push(SnippetJob {
            file_id,
            language: language.to_string(),
            start_line: lo,
            end_line: hi,
            code: extract_lines(new_content, lo, hi),
            prior_description: None,
        });
    }
}

/// An added file contributes exactly one SnippetJob covering the entire new content.
pub fn reconcile_added_file(file_id: FileId, language: &str, content: &str) -> SnippetJob {
    let line_count = content.lines().count() as u32;
    SnippetJob {
        file_id,
        language: language.to_string(),
        start_line: 1,
        end_line: line_count.max(1),
        code: content.to_string(),
        prior_description: None,
    }
}

/// A deleted file contributes no SnippetJob; every connection anchored in it is deleted
/// (mappings cascade at the store boundary).
pub fn reconcile_deleted_file(connections: &[Connection]) -> Vec<ConnectionId> {
    connections.iter().map(|c| c.id).collect()
}

pub const fn default_adjacency() -> u32 {
    DEFAULT_ADJACENCY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{diff, Diff};
    use crate::domain::Direction;
    use std::collections::HashMap;

    fn conn(id: i64, file_id: i64, start: u32, end: u32, code: &str, description: &str) -> Connection {
        Connection {
            id: ConnectionId(id),
            file_id: FileId(file_id),
            direction: Direction::Outgoing,
            start_line: start,
            end_line: end,
            code_snippet: code.to_string(),
            description: description.to_string(),
            technology_name: "HTTP".to_string(),
        }
    }

    #[test]
    fn s1_clean_shift_survives_with_shifted_range() {
        let old = "a\nb\nCONN\nd\n";
        let new = "a\na2\nb\nCONN\nd\n";
        let d = diff(old, new).unwrap();
        let c = conn(1, 1, 3, 3, "CONN", "X");

        let out = reconcile_modified_file(FileId(1), "go", &[c], &d, new, DEFAULT_ADJACENCY);

        assert_eq!(out.survive_shifts.len(), 1);
        assert!(out.deletes.is_empty());
        assert!(out.snippet_jobs.is_empty());
        let shift = &out.survive_shifts[0];
        assert_eq!(shift.new_start_line, 4);
        assert_eq!(shift.new_end_line, 4);
        assert_eq!(shift.new_code_snippet, "CONN");
    }

    #[test]
    fn s2_contained_replacement_emits_prior_description() {
        let mut old_lines = vec!["x".to_string(); 9];
        old_lines.extend(vec!["line".to_string(); 11]); // lines 10..=20 are the connection body
        let old = old_lines.join("\n") + "\n";

        let mut new_lines: Vec<String> = (1..=9).map(|_| "x".to_string()).collect();
        new_lines.push("line".to_string()); // line 10 unchanged
        new_lines.push("line".to_string()); // line 11 unchanged
        new_lines.push("line".to_string()); // line 12 unchanged
        new_lines.push("line".to_string()); // line 13 unchanged
        new_lines.push("line".to_string()); // line 14 unchanged
        new_lines.push("A".to_string());
        new_lines.push("B".to_string());
        new_lines.push("C".to_string()); // old line 15 replaced by A,B,C
        new_lines.extend(vec!["line".to_string(); 5]); // old lines 16..=20 unchanged
        let new = new_lines.join("\n") + "\n";

        let d = diff(&old, &new).unwrap();
        let c = conn(1, 1, 10, 20, "validates user body", "validates user");

        let out = reconcile_modified_file(FileId(1), "go", &[c], &d, &new, DEFAULT_ADJACENCY);

        assert_eq!(out.deletes, vec![ConnectionId(1)]);
        assert_eq!(out.snippet_jobs.len(), 1);
        let job = &out.snippet_jobs[0];
        assert_eq!(job.start_line, 10);
        assert_eq!(job.end_line, 22);
        assert_eq!(job.prior_description.as_deref(), Some("validates user"));
    }

    #[test]
    fn case3_promotion_by_byte_mismatch_carries_the_file_language() {
        // Hand-built Diff: line 2 maps cleanly to new line 2 with no replaced range touching it,
        // but the mapped text no longer matches the connection's recorded snippet byte-for-byte —
        // a case the line-based LCS diff can't itself produce (a changed line always shows up as
        // a replace), but the Reconciler must still promote to case 3 rather than survive-shift.
        let new = "a\nCONN-changed\nb\n";
        let mut line_map = HashMap::new();
        line_map.insert(1, Some(1));
        line_map.insert(2, Some(2));
        line_map.insert(3, Some(3));
        let d = Diff::for_test(line_map, HashSet::new(), HashSet::new(), Vec::new(), 3, 3);
        let c = conn(1, 1, 2, 2, "CONN", "old description");

        let out = reconcile_modified_file(FileId(1), "go", &[c], &d, new, DEFAULT_ADJACENCY);

        assert_eq!(out.deletes, vec![ConnectionId(1)]);
        assert_eq!(out.snippet_jobs.len(), 1);
        assert_eq!(out.snippet_jobs[0].language, "go");
        assert_eq!(out.snippet_jobs[0].prior_description.as_deref(), Some("old description"));
    }

    #[test]
    fn case1_full_cover_deletes_and_emits_no_prior_description() {
        let old = "a\nCONN1\nCONN2\nb\n";
        let new = "a\nX\nY\nZ\nb\n";
        let d = diff(old, new).unwrap();
        let c = conn(1, 1, 2, 3, "CONN1\nCONN2", "whole body replaced");

        let out = reconcile_modified_file(FileId(1), "go", &[c], &d, new, DEFAULT_ADJACENCY);

        assert_eq!(out.deletes, vec![ConnectionId(1)]);
        assert_eq!(out.snippet_jobs.len(), 1);
        assert!(out.snippet_jobs[0].prior_description.is_none());
        assert_eq!(out.snippet_jobs[0].start_line, 2);
        assert_eq!(out.snippet_jobs[0].end_line, 4);
    }

    #[test]
    fn whole_file_connection_any_replacement_triggers_case1() {
        // A connection spanning the entire (single-line) file has no room for a "strictly
        // inside" replacement — any non-empty replacement necessarily covers both of its edges.
        let old = "CONN\n";
        let new = "X\n";
        let d = diff(old, new).unwrap();
        let c = conn(1, 1, 1, 1, "CONN", "whole file");

        let out = reconcile_modified_file(FileId(1), "go", &[c], &d, new, DEFAULT_ADJACENCY);

        assert_eq!(out.deletes, vec![ConnectionId(1)]);
        assert_eq!(out.snippet_jobs.len(), 1);
        assert!(out.snippet_jobs[0].prior_description.is_none());
    }

    #[test]
    fn one_line_connection_deleted_without_replacement_falls_back_to_nearest() {
        let old = "a\nCONN\nb\n";
        let new = "a\nb\n";
        let d = diff(old, new).unwrap();
        let c = conn(1, 1, 2, 2, "CONN", "lone line");

        let out = reconcile_modified_file(FileId(1), "go", &[c], &d, new, DEFAULT_ADJACENCY);

        assert_eq!(out.deletes, vec![ConnectionId(1)]);
        assert_eq!(out.snippet_jobs.len(), 1);
    }

    #[test]
    fn one_line_connection_with_no_surviving_line_anywhere_has_no_snippet_job() {
        let old = "CONN\n";
        let new = "\n";
        let d = diff(old, new).unwrap();
        let c = conn(1, 1, 1, 1, "CONN", "sole line");

        let out = reconcile_modified_file(FileId(1), "go", &[c], &d, new, DEFAULT_ADJACENCY);

        assert_eq!(out.deletes, vec![ConnectionId(1)]);
        assert!(out.snippet_jobs.is_empty());
    }

    #[test]
    fn added_line_at_distance_one_extends_range_upward() {
        // A replacement ends at new line 4; an added line sits immediately after it (distance 1).
        // The extension rule must pull the boundary up to include it.
        let mut added = HashSet::new();
        added.insert(5);
        let (lo, hi) = extend_with_adjacent_added(2, 4, &added, DEFAULT_ADJACENCY);
        assert_eq!((lo, hi), (2, 5));
    }

    #[test]
    fn added_line_beyond_adjacency_is_not_pulled_in() {
        let mut added = HashSet::new();
        added.insert(9);
        let (_, hi) = extend_with_adjacent_added(2, 4, &added, DEFAULT_ADJACENCY);
        assert_eq!(hi, 4);
    }

    #[test]
    fn group_with_adjacency_merges_runs_within_the_gap() {
        let groups = group_with_adjacency(vec![10, 11, 15, 20, 21, 22], 3);
        assert_eq!(groups, vec![(10, 15), (20, 22)]);
    }

    #[test]
    fn added_file_covers_entire_content() {
        let content = "package main\n\nfunc main() {}\n";
        let job = reconcile_added_file(FileId(9), "go", content);
        assert_eq!(job.start_line, 1);
        assert_eq!(job.end_line, 3);
        assert!(job.prior_description.is_none());
    }

    #[test]
    fn deleted_file_returns_all_connection_ids_with_no_jobs() {
        let conns = vec![conn(1, 1, 1, 1, "a", "d1"), conn(2, 1, 2, 2, "b", "d2")];
        let ids = reconcile_deleted_file(&conns);
        assert_eq!(ids, vec![ConnectionId(1), ConnectionId(2)]);
    }

    #[test]
    fn unrelated_added_lines_get_their_own_snippet_job() {
        let old = "a\nb\n";
        let new = "a\nnew1\nnew2\nb\n";
        let d = diff(old, new).unwrap();
        let out = reconcile_modified_file(FileId(1), "go", &[], &d, new, DEFAULT_ADJACENCY);
        assert_eq!(out.snippet_jobs.len(), 1);
        assert_eq!(out.snippet_jobs[0].start_line, 2);
        assert_eq!(out.snippet_jobs[0].end_line, 3);
    }
}
