//! Tree diffing and change application.

use crate::{Result, VcsError};
use eng_storage::{ChangeType, ContentId, FileChange, ObjectStore, Tree, TreeEntry};
use similar::{ChangeTag, TextDiff};
use std::collections::{BTreeMap, HashMap};

/// Counts lines added and removed between two texts.
pub fn line_stats(old: &str, new: &str) -> (u64, u64) {
    let diff = TextDiff::from_lines(old, new);
    let mut added = 0;
    let mut removed = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }
    (added, removed)
}

fn text_of(store: &ObjectStore, entry: Option<&TreeEntry>) -> Result<String> {
    match entry {
        Some(entry) => {
            let bytes = store.get(&entry.content_id)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        None => Ok(String::new()),
    }
}

/// Computes the file changes that turn `from` into `to`.
///
/// Output is sorted by path. Unchanged paths are omitted. Line counts are
/// computed for text files only; binary files report sizes.
pub fn diff_trees(store: &ObjectStore, from: &Tree, to: &Tree) -> Result<Vec<FileChange>> {
    let mut paths: Vec<&String> = from.entries.keys().chain(to.entries.keys()).collect();
    paths.sort();
    paths.dedup();

    let mut changes = Vec::new();
    for path in paths {
        let old = from.get(path);
        let new = to.get(path);

        let change_type = match (old, new) {
            (None, Some(_)) => ChangeType::Added,
            (Some(_), None) => ChangeType::Deleted,
            (Some(o), Some(n)) if o.content_id != n.content_id => ChangeType::Modified,
            _ => continue,
        };

        let binary = old.is_some_and(|e| e.binary) || new.is_some_and(|e| e.binary);
        let (lines_added, lines_removed) = if binary {
            (0, 0)
        } else {
            line_stats(&text_of(store, old)?, &text_of(store, new)?)
        };

        changes.push(FileChange {
            path: path.clone(),
            old_path: None,
            change_type,
            lines_added,
            lines_removed,
            size_before: old.map_or(0, |e| e.size),
            size_after: new.map_or(0, |e| e.size),
            binary,
            old_content: old.map(|e| e.content_id),
            new_content: new.map(|e| e.content_id),
        });
    }
    Ok(changes)
}

/// Folds add/delete pairs with identical content into renames.
///
/// Each deleted file pairs with at most one added file; pairing follows path
/// order so the result is deterministic.
pub fn detect_renames(changes: Vec<FileChange>) -> Vec<FileChange> {
    let mut deleted: BTreeMap<String, FileChange> = BTreeMap::new();
    let mut rest = Vec::new();
    for change in changes {
        if change.change_type == ChangeType::Deleted {
            deleted.insert(change.path.clone(), change);
        } else {
            rest.push(change);
        }
    }

    let mut by_content: HashMap<ContentId, Vec<String>> = HashMap::new();
    for (path, change) in &deleted {
        if let Some(id) = change.old_content {
            by_content.entry(id).or_default().push(path.clone());
        }
    }
    for paths in by_content.values_mut() {
        paths.reverse();
    }

    let mut out = Vec::new();
    for change in rest {
        let source = match (change.change_type, change.new_content) {
            (ChangeType::Added, Some(id)) => by_content.get_mut(&id).and_then(Vec::pop),
            _ => None,
        };
        match source.and_then(|from| deleted.remove(&from)) {
            Some(removed) => out.push(FileChange {
                path: change.path,
                old_path: Some(removed.path),
                change_type: ChangeType::Renamed,
                lines_added: 0,
                lines_removed: 0,
                size_before: removed.size_before,
                size_after: change.size_after,
                binary: change.binary,
                old_content: removed.old_content,
                new_content: change.new_content,
            }),
            None => out.push(change),
        }
    }
    out.extend(deleted.into_values());
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

fn entry_for(store: &ObjectStore, change: &FileChange, id: ContentId) -> Result<TreeEntry> {
    let binary = if change.binary {
        eng_storage::is_binary(&store.get(&id)?)
    } else {
        false
    };
    Ok(TreeEntry {
        content_id: id,
        size: change.size_after,
        binary,
    })
}

fn reject(path: &str, reason: &str) -> VcsError {
    VcsError::PatchDoesNotApply {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn expect_content(tree: &Tree, path: &str, expected: Option<ContentId>) -> Result<()> {
    match (tree.get(path), expected) {
        (None, _) => Err(reject(path, "path does not exist")),
        (Some(entry), Some(id)) if entry.content_id != id => {
            Err(reject(path, "content differs from the recorded version"))
        }
        _ => Ok(()),
    }
}

/// Applies file changes to a tree. This is the inverse of [`diff_trees`].
///
/// Every change is checked against the tree first: deletions and
/// modifications must find the recorded old content, additions and rename
/// targets must find the path free.
pub fn apply_changes(store: &ObjectStore, tree: &Tree, changes: &[FileChange]) -> Result<Tree> {
    let mut result = tree.clone();

    for change in changes {
        match change.change_type {
            ChangeType::Deleted => {
                expect_content(&result, &change.path, change.old_content)?;
                result.remove(&change.path);
            }
            ChangeType::Renamed => {
                let from = change
                    .old_path
                    .as_deref()
                    .ok_or_else(|| reject(&change.path, "rename without a source path"))?;
                expect_content(&result, from, change.old_content)?;
                result.remove(from);
            }
            ChangeType::Added | ChangeType::Modified => {}
        }
    }

    for change in changes {
        match change.change_type {
            ChangeType::Added | ChangeType::Renamed => {
                if result.get(&change.path).is_some() {
                    return Err(reject(&change.path, "path already exists"));
                }
            }
            ChangeType::Modified => expect_content(&result, &change.path, change.old_content)?,
            ChangeType::Deleted => continue,
        }
        let id = change
            .new_content
            .ok_or_else(|| reject(&change.path, "change carries no new content"))?;
        let entry = entry_for(store, change, id)?;
        result.insert(change.path.clone(), entry);
    }

    Ok(result)
}
