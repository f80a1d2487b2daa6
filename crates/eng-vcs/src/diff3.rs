//! Line-level three-way merge.

use similar::{capture_diff_slices, Algorithm, DiffOp, DiffTag};
use std::ops::Range;

/// Labels written on conflict marker lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeLabels {
    /// Label for the branch being merged into.
    pub target: String,
    /// Label for the branch being merged.
    pub source: String,
}

impl MergeLabels {
    /// Creates labels from branch names.
    pub fn new(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: source.into(),
        }
    }
}

impl Default for MergeLabels {
    fn default() -> Self {
        Self::new("target", "source")
    }
}

/// Result of merging three texts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedText {
    /// Merged text, with conflict markers around each conflicting region.
    pub text: String,
    /// Number of conflicting regions.
    pub conflicts: usize,
}

impl MergedText {
    /// Returns true if no region conflicted.
    pub fn is_clean(&self) -> bool {
        self.conflicts == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Target,
    Source,
}

#[derive(Debug, Clone)]
struct Hunk {
    side: Side,
    base: Range<usize>,
    changed: Range<usize>,
}

fn hunks(base: &[&str], other: &[&str], side: Side) -> Vec<Hunk> {
    capture_diff_slices(Algorithm::Myers, base, other)
        .iter()
        .filter(|op| op.tag() != DiffTag::Equal)
        .map(|op: &DiffOp| Hunk {
            side,
            base: op.old_range(),
            changed: op.new_range(),
        })
        .collect()
}

/// Maps a base range onto one side, given that side's hunks inside it.
fn side_range(region: &Range<usize>, hunks: &[&Hunk]) -> Range<usize> {
    match (hunks.first(), hunks.last()) {
        (Some(first), Some(last)) => {
            let start = first.changed.start - (first.base.start - region.start);
            let end = last.changed.end + (region.end - last.base.end);
            start..end
        }
        _ => region.clone(),
    }
}

fn push_lines(out: &mut String, lines: &[&str]) {
    for line in lines {
        out.push_str(line);
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

/// Writes one conflict block.
///
/// A `None` side was deleted and is written as an empty section whose
/// marker line carries `(deleted)`.
pub(crate) fn write_conflict(
    out: &mut String,
    labels: &MergeLabels,
    target: Option<&[&str]>,
    base: Option<&[&str]>,
    source: Option<&[&str]>,
) {
    let deleted = |side: Option<&[&str]>| if side.is_none() { " (deleted)" } else { "" };

    out.push_str(&format!("<<<<<<< {}{}\n", labels.target, deleted(target)));
    push_lines(out, target.unwrap_or_default());
    out.push_str(&format!("||||||| base{}\n", deleted(base)));
    push_lines(out, base.unwrap_or_default());
    out.push_str("=======\n");
    push_lines(out, source.unwrap_or_default());
    out.push_str(&format!(">>>>>>> {}{}\n", labels.source, deleted(source)));
}

/// Splits text into lines, keeping line terminators.
pub(crate) fn lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Merges `target` and `source`, both derived from `base`, line by line.
///
/// Regions changed on one side only take that side. Regions changed on both
/// sides take the shared result if the edits are identical and otherwise
/// become a conflict block. Edits that touch or abut each other are treated
/// as one region.
pub fn merge_text(base: &str, target: &str, source: &str, labels: &MergeLabels) -> MergedText {
    let base_lines = lines(base);
    let target_lines = lines(target);
    let source_lines = lines(source);

    let mut all = hunks(&base_lines, &target_lines, Side::Target);
    all.extend(hunks(&base_lines, &source_lines, Side::Source));
    all.sort_by_key(|h| (h.base.start, h.base.end));

    let mut out = String::new();
    let mut conflicts = 0;
    let mut cursor = 0;
    let mut i = 0;

    while i < all.len() {
        let mut region = all[i].base.clone();
        let mut j = i + 1;
        while j < all.len() && all[j].base.start <= region.end {
            region.end = region.end.max(all[j].base.end);
            j += 1;
        }
        let group = &all[i..j];
        i = j;

        for line in &base_lines[cursor..region.start] {
            out.push_str(line);
        }
        cursor = region.end;

        let target_hunks: Vec<&Hunk> = group.iter().filter(|h| h.side == Side::Target).collect();
        let source_hunks: Vec<&Hunk> = group.iter().filter(|h| h.side == Side::Source).collect();
        let target_part = &target_lines[side_range(&region, &target_hunks)];
        let source_part = &source_lines[side_range(&region, &source_hunks)];

        if source_hunks.is_empty() || target_part == source_part {
            target_part.iter().for_each(|line| out.push_str(line));
        } else if target_hunks.is_empty() {
            source_part.iter().for_each(|line| out.push_str(line));
        } else {
            conflicts += 1;
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            write_conflict(
                &mut out,
                labels,
                Some(target_part),
                Some(&base_lines[region]),
                Some(source_part),
            );
        }
    }

    for line in &base_lines[cursor..] {
        out.push_str(line);
    }

    MergedText {
        text: out,
        conflicts,
    }
}
