//! Object types: blobs, trees and commits.

use crate::{ContentId, Result, StorageError};
use eng_types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How many leading bytes are inspected by [`is_binary`].
const BINARY_SNIFF_LEN: usize = 8000;

/// Kinds of stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// File content.
    Blob,
    /// Path listing.
    Tree,
    /// Commit record.
    Commit,
}

impl ObjectKind {
    /// Returns the string used in object headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
        }
    }

    /// Parses an object kind from its header string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(Self::Blob),
            "tree" => Ok(Self::Tree),
            "commit" => Ok(Self::Commit),
            _ => Err(StorageError::InvalidObject(format!(
                "unknown object kind: {}",
                s
            ))),
        }
    }
}

/// Returns true if content should be treated as binary.
///
/// Content is binary when it contains a NUL byte near the start or is not
/// valid UTF-8. Binary files are never diffed or merged line by line.
pub fn is_binary(content: &[u8]) -> bool {
    let sniff = &content[..content.len().min(BINARY_SNIFF_LEN)];
    sniff.contains(&0) || std::str::from_utf8(content).is_err()
}

/// A file entry in a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Blob holding the file content.
    pub content_id: ContentId,
    /// Content size in bytes.
    pub size: u64,
    /// Whether the content is binary.
    pub binary: bool,
}

impl TreeEntry {
    /// Describes a blob's content.
    pub fn for_content(content_id: ContentId, content: &[u8]) -> Self {
        Self {
            content_id,
            size: content.len() as u64,
            binary: is_binary(content),
        }
    }
}

/// A flat snapshot of a project: path to file entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    /// Entries sorted by path.
    pub entries: BTreeMap<String, TreeEntry>,
}

impl Tree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a path.
    pub fn get(&self, path: &str) -> Option<&TreeEntry> {
        self.entries.get(path)
    }

    /// Inserts or replaces a path.
    pub fn insert(&mut self, path: impl Into<String>, entry: TreeEntry) -> Option<TreeEntry> {
        self.entries.insert(path.into(), entry)
    }

    /// Removes a path.
    pub fn remove(&mut self, path: &str) -> Option<TreeEntry> {
        self.entries.remove(path)
    }

    /// Number of files in the tree.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the tree holds no files.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(path, entry)` pairs in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &TreeEntry)> {
        self.entries.iter()
    }

    /// Canonical encoding (sorted keys, compact JSON).
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub(crate) fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Type of change made to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// File did not exist before.
    Added,
    /// File content changed.
    Modified,
    /// File was removed.
    Deleted,
    /// File moved to a new path with identical content.
    Renamed,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Added => write!(f, "added"),
            ChangeType::Modified => write!(f, "modified"),
            ChangeType::Deleted => write!(f, "deleted"),
            ChangeType::Renamed => write!(f, "renamed"),
        }
    }
}

/// A single file-level change recorded in a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Path after the change (the removed path for deletions).
    pub path: String,
    /// Previous path, for renames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    /// Kind of change.
    pub change_type: ChangeType,
    /// Lines added (zero for binary files).
    pub lines_added: u64,
    /// Lines removed (zero for binary files).
    pub lines_removed: u64,
    /// Size before the change in bytes.
    pub size_before: u64,
    /// Size after the change in bytes.
    pub size_after: u64,
    /// Whether either side of the change is binary.
    pub binary: bool,
    /// Content before the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_content: Option<ContentId>,
    /// Content after the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_content: Option<ContentId>,
}

/// Fields of a commit that determine its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDraft {
    /// Parent commits; empty for a root commit, two for a merge.
    pub parents: Vec<ContentId>,
    /// Author handle.
    pub author: UserId,
    /// Commit message.
    pub message: String,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Snapshot this commit records.
    pub tree_id: ContentId,
    /// Changes relative to the first parent.
    pub file_changes: Vec<FileChange>,
}

impl CommitDraft {
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// An immutable, stored commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Content hash of the commit record.
    pub id: ContentId,
    /// Parent commits; empty for a root commit, two for a merge.
    pub parents: Vec<ContentId>,
    /// Author handle.
    pub author: UserId,
    /// Commit message.
    pub message: String,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Snapshot this commit records.
    pub tree_id: ContentId,
    /// Changes relative to the first parent.
    pub file_changes: Vec<FileChange>,
}

impl Commit {
    pub(crate) fn from_draft(id: ContentId, draft: CommitDraft) -> Self {
        Self {
            id,
            parents: draft.parents,
            author: draft.author,
            message: draft.message,
            timestamp: draft.timestamp,
            tree_id: draft.tree_id,
            file_changes: draft.file_changes,
        }
    }

    pub(crate) fn decode(id: ContentId, payload: &[u8]) -> Result<Self> {
        let draft: CommitDraft = serde_json::from_slice(payload)?;
        Ok(Self::from_draft(id, draft))
    }

    /// Returns true for commits with more than one parent.
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// First parent, if any.
    pub fn first_parent(&self) -> Option<ContentId> {
        self.parents.first().copied()
    }
}
