//! Line deltas between two snapshots of a file
//!
//! Uses `similar` for the line diff and folds each contiguous change into one
//! [`Edit`]. Texts are normalised before diffing so that line-ending changes
//! do not show up as whole-file rewrites.

use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, Algorithm, DiffTag};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeltaError {
    /// A hunk starts before the previous one ends
    #[error("overlapping hunks: {side} line {start} is before end of previous hunk ({prev_end})")]
    Overlap {
        side: &'static str,
        start: u32,
        prev_end: u32,
    },
}

/// One contiguous line replacement.
///
/// `del_length` lines starting at `del_start` in the old text were replaced by
/// `add_length` lines starting at `add_start` in the new text. Rows are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edit {
    pub del_start: u32,
    pub del_length: u32,
    pub add_start: u32,
    pub add_length: u32,
    pub dels: Vec<String>,
    pub adds: Vec<String>,
}

impl Edit {
    /// Swaps the old and new sides
    pub fn reversed(&self) -> Edit {
        Edit {
            del_start: self.add_start,
            del_length: self.add_length,
            add_start: self.del_start,
            add_length: self.del_length,
            dels: self.adds.clone(),
            adds: self.dels.clone(),
        }
    }

    /// First old row after the deleted span
    pub fn del_end(&self) -> u32 {
        self.del_start + self.del_length
    }

    pub fn add_end(&self) -> u32 {
        self.add_start + self.add_length
    }
}

/// Ordered, non-overlapping edits sorted by `del_start`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub edits: Vec<Edit>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}

/// Inverts an edit list so a forward transform maps new rows back to old rows
pub fn reverse_edits(edits: &[Edit]) -> Vec<Edit> {
    edits.iter().map(Edit::reversed).collect()
}

/// A raw hunk from the line diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u32,
    pub new_start: u32,
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

/// Canonicalises line endings to `\n` and drops one trailing newline
pub fn normalize_text(text: &str) -> String {
    let mut normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    if normalized.ends_with('\n') {
        normalized.pop();
    }
    normalized
}

/// Line diff of two already-normalised texts.
///
/// Consecutive non-equal operations are merged so each hunk is one
/// contiguous replacement.
pub fn diff_hunks(old: &str, new: &str) -> Vec<Hunk> {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let ops = capture_diff_slices(Algorithm::Myers, &old_lines, &new_lines);

    let mut hunks = Vec::new();
    let mut current: Option<(std::ops::Range<usize>, std::ops::Range<usize>)> = None;

    for op in ops {
        if op.tag() == DiffTag::Equal {
            if let Some((old_range, new_range)) = current.take() {
                hunks.push(make_hunk(&old_lines, &new_lines, old_range, new_range));
            }
            continue;
        }

        current = match current {
            Some((old_range, new_range)) => Some((
                old_range.start..op.old_range().end,
                new_range.start..op.new_range().end,
            )),
            None => Some((op.old_range(), op.new_range())),
        };
    }

    if let Some((old_range, new_range)) = current {
        hunks.push(make_hunk(&old_lines, &new_lines, old_range, new_range));
    }

    hunks
}

fn make_hunk(
    old_lines: &[&str],
    new_lines: &[&str],
    old_range: std::ops::Range<usize>,
    new_range: std::ops::Range<usize>,
) -> Hunk {
    Hunk {
        old_start: old_range.start as u32 + 1,
        new_start: new_range.start as u32 + 1,
        removed: old_lines[old_range].iter().map(|l| l.to_string()).collect(),
        added: new_lines[new_range].iter().map(|l| l.to_string()).collect(),
    }
}

/// Turns diff hunks into a validated [`Delta`]
pub struct DeltaBuilder {
    hunks: Vec<Hunk>,
}

impl DeltaBuilder {
    pub fn new(hunks: Vec<Hunk>) -> Self {
        Self { hunks }
    }

    /// Diff two raw snapshots, normalising both first
    pub fn from_texts(old_text: &str, new_text: &str) -> Self {
        let old = normalize_text(old_text);
        let new = normalize_text(new_text);
        Self::new(diff_hunks(&old, &new))
    }

    pub fn build(self) -> Result<Delta, DeltaError> {
        let mut edits: Vec<Edit> = Vec::with_capacity(self.hunks.len());

        for hunk in self.hunks {
            let edit = Edit {
                del_start: hunk.old_start,
                del_length: hunk.removed.len() as u32,
                add_start: hunk.new_start,
                add_length: hunk.added.len() as u32,
                dels: hunk.removed,
                adds: hunk.added,
            };

            if let Some(prev) = edits.last() {
                if edit.del_start < prev.del_end() {
                    return Err(DeltaError::Overlap {
                        side: "old",
                        start: edit.del_start,
                        prev_end: prev.del_end(),
                    });
                }
                if edit.add_start < prev.add_end() {
                    return Err(DeltaError::Overlap {
                        side: "new",
                        start: edit.add_start,
                        prev_end: prev.add_end(),
                    });
                }
            }

            edits.push(edit);
        }

        Ok(Delta { edits })
    }
}

/// Delta between two snapshots of the same file
pub fn delta_between(old_text: &str, new_text: &str) -> Result<Delta, DeltaError> {
    DeltaBuilder::from_texts(old_text, new_text).build()
}
