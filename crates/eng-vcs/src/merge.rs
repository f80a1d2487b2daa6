//! Three-way tree merge and conflict records.

use crate::diff3::{lines, merge_text, write_conflict, MergeLabels};
use crate::{Result, VcsError};
use eng_storage::{ContentId, ObjectStore, Tree, TreeEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Granularity at which concurrent edits to the same file are reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Any file changed differently on both sides is a conflict.
    #[default]
    Path,
    /// Text files changed on both sides are merged hunk by hunk.
    Line,
}

impl std::str::FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "path" => Ok(MergeStrategy::Path),
            "line" => Ok(MergeStrategy::Line),
            other => Err(format!("unknown merge strategy: {other}")),
        }
    }
}

/// Why a path could not be merged automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides edited the same text differently.
    Content,
    /// One side edited the file, the other deleted it.
    ModifyDelete,
    /// Both sides added the path with different content.
    AddAdd,
    /// Both sides changed a binary file differently.
    Binary,
}

/// Resolution state of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    /// Awaiting a human decision.
    Unresolved,
    /// A resolution has been recorded.
    Resolved,
}

/// A human decision for a conflicting path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the path with this blob as its content.
    Content(ContentId),
    /// Remove the path.
    Delete,
}

/// A path that diverged on both sides of a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    /// Conflicting path.
    pub file_path: String,
    /// Conflict classification.
    pub kind: ConflictKind,
    /// Both versions rendered with conflict markers.
    pub conflict_markers: String,
    /// Whether a resolution has been recorded.
    pub status: ConflictStatus,
    /// Content at the merge base.
    pub base: Option<ContentId>,
    /// Content on the source branch.
    pub source: Option<ContentId>,
    /// Content on the target branch.
    pub target: Option<ContentId>,
    /// Recorded resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl MergeConflict {
    /// Records a resolution.
    pub fn resolve(&mut self, resolution: Resolution) {
        self.resolution = Some(resolution);
        self.status = ConflictStatus::Resolved;
    }

    /// Returns true once a resolution has been recorded.
    pub fn is_resolved(&self) -> bool {
        self.status == ConflictStatus::Resolved
    }

    /// Returns true if both conflicts describe the same divergence.
    pub fn same_divergence(&self, other: &MergeConflict) -> bool {
        self.file_path == other.file_path
            && self.kind == other.kind
            && self.conflict_markers == other.conflict_markers
    }
}

/// Result of a three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Merged tree. Conflicting paths are absent.
    pub tree: Tree,
    /// Paths that need a human decision, sorted by path.
    pub conflicts: Vec<MergeConflict>,
}

impl MergeOutcome {
    /// Returns true if the merge produced no conflicts.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Applies resolutions and returns the final tree.
    ///
    /// Fails with [`VcsError::UnresolvedConflicts`] if any conflicting path
    /// has neither a resolution in `resolutions` nor a recorded one.
    pub fn resolve(
        self,
        store: &ObjectStore,
        resolutions: &BTreeMap<String, Resolution>,
    ) -> Result<Tree> {
        let unresolved: Vec<String> = self
            .conflicts
            .iter()
            .filter(|c| c.resolution.is_none() && !resolutions.contains_key(&c.file_path))
            .map(|c| c.file_path.clone())
            .collect();
        if !unresolved.is_empty() {
            return Err(VcsError::UnresolvedConflicts { paths: unresolved });
        }

        let mut tree = self.tree;
        for conflict in &self.conflicts {
            let resolution = resolutions
                .get(&conflict.file_path)
                .copied()
                .or(conflict.resolution);
            match resolution {
                Some(Resolution::Content(id)) => {
                    let content = store.get(&id)?;
                    tree.insert(conflict.file_path.clone(), TreeEntry::for_content(id, &content));
                }
                Some(Resolution::Delete) | None => {
                    tree.remove(&conflict.file_path);
                }
            }
        }
        Ok(tree)
    }
}

fn content_id(entry: Option<&TreeEntry>) -> Option<ContentId> {
    entry.map(|e| e.content_id)
}

fn read_text(store: &ObjectStore, entry: Option<&TreeEntry>) -> Result<Option<String>> {
    entry
        .map(|e| {
            let bytes = store.get(&e.content_id)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        })
        .transpose()
}

fn binary_line(entry: Option<&TreeEntry>) -> Option<String> {
    entry.map(|e| format!("binary {} ({} bytes)\n", e.content_id, e.size))
}

/// Renders whole-file conflict markers.
fn render_markers(
    store: &ObjectStore,
    kind: ConflictKind,
    labels: &MergeLabels,
    base: Option<&TreeEntry>,
    source: Option<&TreeEntry>,
    target: Option<&TreeEntry>,
) -> Result<String> {
    let (t, b, s) = if kind == ConflictKind::Binary || [base, source, target].iter().flatten().any(|e| e.binary) {
        (binary_line(target), binary_line(base), binary_line(source))
    } else {
        (
            read_text(store, target)?,
            read_text(store, base)?,
            read_text(store, source)?,
        )
    };

    let t_lines = t.as_deref().map(lines);
    let s_lines = s.as_deref().map(lines);
    // An add/add conflict has no base version; that is not a deletion.
    let b_lines = match (b.as_deref(), kind) {
        (None, ConflictKind::AddAdd) => Some(Vec::new()),
        (b, _) => b.map(lines),
    };

    let mut out = String::new();
    write_conflict(
        &mut out,
        labels,
        t_lines.as_deref(),
        b_lines.as_deref(),
        s_lines.as_deref(),
    );
    Ok(out)
}

/// Merges `source` into `target` relative to their common ancestor `base`.
///
/// For each path: if only one side changed it relative to base, that side
/// wins; if both changed it identically, either is taken; otherwise the path
/// is a conflict and is left out of the merged tree. With
/// [`MergeStrategy::Line`], text files changed on both sides are first
/// merged line by line and only conflict if their hunks overlap.
pub fn three_way_merge(
    store: &ObjectStore,
    base: &Tree,
    source: &Tree,
    target: &Tree,
    strategy: MergeStrategy,
    labels: &MergeLabels,
) -> Result<MergeOutcome> {
    let mut paths: Vec<&String> = base
        .entries
        .keys()
        .chain(source.entries.keys())
        .chain(target.entries.keys())
        .collect();
    paths.sort();
    paths.dedup();

    let mut tree = Tree::new();
    let mut conflicts = Vec::new();

    for path in paths {
        let b = base.get(path);
        let s = source.get(path);
        let t = target.get(path);
        let (bid, sid, tid) = (content_id(b), content_id(s), content_id(t));

        let taken = if sid == tid {
            Some(s)
        } else if sid == bid {
            Some(t)
        } else if tid == bid {
            Some(s)
        } else {
            None
        };

        if let Some(entry) = taken {
            if let Some(entry) = entry {
                tree.insert(path.clone(), *entry);
            }
            continue;
        }

        let kind = match (b, s, t) {
            (None, _, _) => ConflictKind::AddAdd,
            (_, None, _) | (_, _, None) => ConflictKind::ModifyDelete,
            _ if [b, s, t].iter().flatten().any(|e| e.binary) => ConflictKind::Binary,
            _ => ConflictKind::Content,
        };

        let markers = match (strategy, kind, b, s, t) {
            (MergeStrategy::Line, ConflictKind::Content, Some(b), Some(s), Some(t)) => {
                let merged = merge_text(
                    &String::from_utf8_lossy(&store.get(&b.content_id)?),
                    &String::from_utf8_lossy(&store.get(&t.content_id)?),
                    &String::from_utf8_lossy(&store.get(&s.content_id)?),
                    labels,
                );
                if merged.is_clean() {
                    let id = store.put(merged.text.as_bytes())?;
                    tree.insert(path.clone(), TreeEntry::for_content(id, merged.text.as_bytes()));
                    debug!(path = %path, "Line merge resolved both-sided edit");
                    continue;
                }
                merged.text
            }
            _ => render_markers(store, kind, labels, b, s, t)?,
        };

        conflicts.push(MergeConflict {
            file_path: path.clone(),
            kind,
            conflict_markers: markers,
            status: ConflictStatus::Unresolved,
            base: bid,
            source: sid,
            target: tid,
            resolution: None,
        });
    }

    Ok(MergeOutcome { tree, conflicts })
}
