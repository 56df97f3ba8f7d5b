//! Line diff analyzer (C3).
//!
//! Wraps `similar`'s longest-common-subsequence line diff, whose `DiffOp::{Equal,Delete,Insert,
//! Replace}` op stream already matches the four-tag shape this module needs — this is a faithful
//! translation into the `Diff` record, not a hand-rolled LCS implementation.

use std::collections::{HashMap, HashSet};

use similar::{DiffOp, TextDiff};

use crate::error::{CoreError, Result};

/// A paired old/new line interval emitted when a block of lines is substituted. All four fields
/// are 1-indexed and inclusive.
pub type ReplacedRange = (u32, u32, u32, u32);

/// The result of diffing one file's old content against its new content.
///
/// - `line_map` holds one entry per old line (1-indexed) that equal/delete/replace touched,
///   mapping it to `Some(new_line)` if it survives, `None` if it was deleted or replaced away.
/// - `added` holds new lines (1-indexed) introduced by a pure insert (never a replace's new side).
/// - `removed` holds old lines (1-indexed) deleted outright or consumed by a replace.
/// - `replaced_ranges` holds the old/new interval pairs for each replace op.
#[derive(Debug, Clone)]
pub struct Diff {
    line_map: HashMap<u32, Option<u32>>,
    added: HashSet<u32>,
    removed: HashSet<u32>,
    replaced_ranges: Vec<ReplacedRange>,
    old_line_count: u32,
    new_line_count: u32,
}

impl Diff {
    pub fn line_map(&self) -> &HashMap<u32, Option<u32>> {
        &self.line_map
    }

    pub fn added(&self) -> &HashSet<u32> {
        &self.added
    }

    pub fn removed(&self) -> &HashSet<u32> {
        &self.removed
    }

    pub fn replaced_ranges(&self) -> &[ReplacedRange] {
        &self.replaced_ranges
    }

    pub fn old_line_count(&self) -> u32 {
        self.old_line_count
    }

    pub fn new_line_count(&self) -> u32 {
        self.new_line_count
    }

    /// Direct lookup: `Some(Some(n))` surviving at line `n`, `Some(None)` deleted, `None` if
    /// `old_line` is out of range or untouched by any op.
    pub fn map_line(&self, old_line: u32) -> Option<u32> {
        self.line_map.get(&old_line).copied().flatten()
    }

    /// The nearest surviving image of `old_line` under `line_map`, searching outward (lower
    /// distance first, ties broken toward the lower line) when `old_line` itself maps to bottom.
    /// Used by the Reconciler's Case 2 extension and Case-4-with-a-bottom-endpoint fallback.
    pub fn nearest_surviving_image(&self, old_line: u32) -> Option<u32> {
        if old_line < 1 || old_line > self.old_line_count {
            return None;
        }
        for distance in 0..=self.old_line_count {
            if distance <= old_line - 1 {
                let lower = old_line - distance;
                if let Some(Some(mapped)) = self.line_map.get(&lower) {
                    return Some(*mapped);
                }
            }
            if distance > 0 {
                let upper = old_line + distance;
                if upper <= self.old_line_count {
                    if let Some(Some(mapped)) = self.line_map.get(&upper) {
                        return Some(*mapped);
                    }
                }
            }
        }
        None
    }

    /// Builds a `Diff` from its parts directly, bypassing `diff()`'s line-based LCS. Used by
    /// other modules' tests to construct diff shapes the LCS algorithm itself can't produce (e.g.
    /// a line that maps cleanly but whose text no longer matches byte-for-byte).
    #[cfg(test)]
    pub(crate) fn for_test(
        line_map: HashMap<u32, Option<u32>>,
        added: HashSet<u32>,
        removed: HashSet<u32>,
        replaced_ranges: Vec<ReplacedRange>,
        old_line_count: u32,
        new_line_count: u32,
    ) -> Diff {
        Diff {
            line_map,
            added,
            removed,
            replaced_ranges,
            old_line_count,
            new_line_count,
        }
    }

    fn validate(&self) -> Result<()> {
        let mut seen_new_lines = HashSet::new();
        for value in self.line_map.values().flatten() {
            if !seen_new_lines.insert(*value) {
                return Err(CoreError::DiffInvariantViolation {
                    old_line_count: self.old_line_count as usize,
                    new_line_count: self.new_line_count as usize,
                    message: format!("line_map is not injective: new line {value} has multiple old preimages"),
                });
            }
        }
        for old_line in &self.removed {
            if self.line_map.get(old_line) != Some(&None) {
                return Err(CoreError::DiffInvariantViolation {
                    old_line_count: self.old_line_count as usize,
                    new_line_count: self.new_line_count as usize,
                    message: format!("removed line {old_line} does not map to bottom"),
                });
            }
        }
        for new_line in &self.added {
            if seen_new_lines.contains(new_line) {
                return Err(CoreError::DiffInvariantViolation {
                    old_line_count: self.old_line_count as usize,
                    new_line_count: self.new_line_count as usize,
                    message: format!("added line {new_line} is also in the image of line_map"),
                });
            }
            for &(_, _, n_lo, n_hi) in &self.replaced_ranges {
                if *new_line >= n_lo && *new_line <= n_hi {
                    return Err(CoreError::DiffInvariantViolation {
                        old_line_count: self.old_line_count as usize,
                        new_line_count: self.new_line_count as usize,
                        message: format!("added line {new_line} falls inside replaced range [{n_lo},{n_hi}]"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Diffs `old` against `new`, both split into lines with a trailing newline not producing an
/// empty trailing line (the same convention `str::lines()` uses).
pub fn diff(old: &str, new: &str) -> Result<Diff> {
    let old_line_count = old.lines().count() as u32;
    let new_line_count = new.lines().count() as u32;

    let text_diff = TextDiff::from_lines(old, new);

    let mut line_map = HashMap::new();
    let mut added = HashSet::new();
    let mut removed = HashSet::new();
    let mut replaced_ranges = Vec::new();

    for op in text_diff.ops() {
        match *op {
            DiffOp::Equal {
                old_index,
                new_index,
                len,
            } => {
                for k in 0..len {
                    let old_line = old_index as u32 + k as u32 + 1;
                    let new_line = new_index as u32 + k as u32 + 1;
                    line_map.insert(old_line, Some(new_line));
                }
            }
            DiffOp::Delete {
                old_index, old_len, ..
            } => {
                for k in 0..old_len {
                    let old_line = old_index as u32 + k as u32 + 1;
                    line_map.insert(old_line, None);
                    removed.insert(old_line);
                }
            }
            DiffOp::Insert {
                new_index, new_len, ..
            } => {
                for k in 0..new_len {
                    added.insert(new_index as u32 + k as u32 + 1);
                }
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                for k in 0..old_len {
                    let old_line = old_index as u32 + k as u32 + 1;
                    line_map.insert(old_line, None);
                    removed.insert(old_line);
                }
                replaced_ranges.push((
                    old_index as u32 + 1,
                    old_index as u32 + old_len as u32,
                    new_index as u32 + 1,
                    new_index as u32 + new_len as u32,
                ));
            }
        }
    }

    let diff = Diff {
        line_map,
        added,
        removed,
        replaced_ranges,
        old_line_count,
        new_line_count,
    };
    diff.validate()?;
    Ok(diff)
}
