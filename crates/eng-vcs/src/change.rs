//! Commit input: the edits a caller wants applied to a branch.

use crate::{Result, VcsError};
use bytes::Bytes;
use eng_storage::{ObjectStore, Tree, TreeEntry};
use serde::{Deserialize, Serialize};

/// A single edit to apply when creating a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    /// Create or overwrite a file.
    Put {
        path: String,
        #[serde(with = "content_bytes")]
        content: Bytes,
    },
    /// Remove a file.
    Delete { path: String },
    /// Move a file, keeping its content.
    Rename { from: String, to: String },
}

impl Change {
    /// Convenience constructor for [`Change::Put`].
    pub fn put(path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Change::Put {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Convenience constructor for [`Change::Delete`].
    pub fn delete(path: impl Into<String>) -> Self {
        Change::Delete { path: path.into() }
    }

    /// Convenience constructor for [`Change::Rename`].
    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        Change::Rename {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Checks every path this change touches.
    pub fn validate(&self) -> Result<()> {
        match self {
            Change::Put { path, .. } | Change::Delete { path } => validate_path(path),
            Change::Rename { from, to } => {
                validate_path(from)?;
                validate_path(to)
            }
        }
    }
}

/// Validates a project-relative file path.
pub fn validate_path(path: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(VcsError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        })
    };

    if path.is_empty() {
        return reject("must not be empty");
    }
    if path.starts_with('/') {
        return reject("must be relative");
    }
    if path.contains('\\') {
        return reject("backslashes are not allowed");
    }
    if path.contains('\0') {
        return reject("NUL bytes are not allowed");
    }
    for segment in path.split('/') {
        match segment {
            "" => return reject("empty path segment"),
            "." | ".." => return reject("relative segments are not allowed"),
            _ => {}
        }
    }
    Ok(())
}

/// Applies edits to a tree, storing new file content as blobs.
///
/// Edits apply in order, so a later edit sees the effect of earlier ones.
pub fn apply_edits(store: &ObjectStore, base: &Tree, changes: &[Change]) -> Result<Tree> {
    let mut tree = base.clone();
    for change in changes {
        match change {
            Change::Put { path, content } => {
                let id = store.put(content)?;
                tree.insert(path.clone(), TreeEntry::for_content(id, content));
            }
            Change::Delete { path } => {
                tree.remove(path)
                    .ok_or_else(|| VcsError::PathNotFound(path.clone()))?;
            }
            Change::Rename { from, to } => {
                if tree.get(to).is_some() {
                    return Err(VcsError::AlreadyExists {
                        kind: "path",
                        name: to.clone(),
                    });
                }
                let entry = tree
                    .remove(from)
                    .ok_or_else(|| VcsError::PathNotFound(from.clone()))?;
                tree.insert(to.clone(), entry);
            }
        }
    }
    Ok(tree)
}

/// Serde helper that carries raw bytes as a JSON array of numbers.
mod content_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        Vec::<u8>::deserialize(deserializer).map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        for ok in ["part.cad", "assemblies/gearbox/housing.step", "docs/readme.md", ".gitignore"] {
            assert!(validate_path(ok).is_ok(), "{ok}");
        }
    }

    #[test]
    fn test_invalid_paths() {
        for bad in ["", "/etc/passwd", "a/../b", "..", "./a", "a//b", "a/", "dir\\file"] {
            assert!(
                matches!(validate_path(bad), Err(VcsError::InvalidPath { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_rename_validates_both_sides() {
        assert!(Change::rename("a.cad", "b.cad").validate().is_ok());
        assert!(Change::rename("a.cad", "../b.cad").validate().is_err());
        assert!(Change::rename("", "b.cad").validate().is_err());
    }

    #[test]
    fn test_apply_edits() {
        let store = ObjectStore::in_memory();
        let tree = apply_edits(
            &store,
            &Tree::new(),
            &[
                Change::put("a.txt", "one\n"),
                Change::put("b.txt", "two\n"),
                Change::rename("a.txt", "docs/a.txt"),
                Change::delete("b.txt"),
            ],
        )
        .unwrap();

        assert_eq!(tree.len(), 1);
        let entry = tree.get("docs/a.txt").unwrap();
        assert_eq!(store.get(&entry.content_id).unwrap().as_ref(), b"one\n");
    }

    #[test]
    fn test_apply_edits_errors() {
        let store = ObjectStore::in_memory();
        let base = apply_edits(&store, &Tree::new(), &[Change::put("a", "1"), Change::put("b", "2")]).unwrap();

        assert!(matches!(
            apply_edits(&store, &base, &[Change::delete("missing")]),
            Err(VcsError::PathNotFound(_))
        ));
        assert!(matches!(
            apply_edits(&store, &base, &[Change::rename("a", "b")]),
            Err(VcsError::AlreadyExists { kind: "path", .. })
        ));
        assert!(matches!(
            apply_edits(&store, &base, &[Change::rename("zzz", "c")]),
            Err(VcsError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_change_serde_shape() {
        let change = Change::delete("old.step");
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["op"], "delete");
        assert_eq!(json["path"], "old.step");

        let put: Change = serde_json::from_str(r#"{"op":"put","path":"a.txt","content":[104,105]}"#).unwrap();
        assert_eq!(put, Change::put("a.txt", &b"hi"[..]));
    }
}
