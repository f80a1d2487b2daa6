//! Typed, content-addressed object store.

use crate::id::{frame, unframe};
use crate::{
    Commit, CommitDraft, ContentId, FsBackend, MemoryBackend, ObjectKind, ObjectStoreBackend,
    Result, StorageError, Tree,
};
use bytes::Bytes;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Content-addressed object store.
///
/// Objects are write-once: storing identical bytes twice yields the same id
/// and the second write is a no-op. There is no update or delete.
#[derive(Clone)]
pub struct ObjectStore {
    backend: Arc<dyn ObjectStoreBackend>,
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore").finish_non_exhaustive()
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ObjectStore {
    /// Creates a store over the given backend.
    pub fn new(backend: Arc<dyn ObjectStoreBackend>) -> Self {
        Self { backend }
    }

    /// Creates a store backed by memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Opens a filesystem-backed store rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(FsBackend::open(path)?)))
    }

    /// Stores file content and returns its id.
    pub fn put(&self, content: impl AsRef<[u8]>) -> Result<ContentId> {
        self.put_object(ObjectKind::Blob, content.as_ref())
    }

    /// Retrieves file content by id.
    pub fn get(&self, id: &ContentId) -> Result<Bytes> {
        self.get_kind(id, ObjectKind::Blob)
    }

    /// Checks if an object exists.
    pub fn contains(&self, id: &ContentId) -> Result<bool> {
        self.backend.contains(id)
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> Result<usize> {
        self.backend.len()
    }

    /// Returns true if nothing has been stored.
    pub fn is_empty(&self) -> Result<bool> {
        self.backend.is_empty()
    }

    /// Stores a tree and returns its id.
    pub fn put_tree(&self, tree: &Tree) -> Result<ContentId> {
        self.put_object(ObjectKind::Tree, &tree.encode()?)
    }

    /// Retrieves a tree by id.
    pub fn get_tree(&self, id: &ContentId) -> Result<Tree> {
        Tree::decode(&self.get_kind(id, ObjectKind::Tree)?)
    }

    /// Stores a commit record, returning the commit with its id.
    pub fn put_commit(&self, draft: CommitDraft) -> Result<Commit> {
        let id = self.put_object(ObjectKind::Commit, &draft.encode()?)?;
        Ok(Commit::from_draft(id, draft))
    }

    /// Retrieves a commit by id.
    pub fn get_commit(&self, id: &ContentId) -> Result<Commit> {
        Commit::decode(*id, &self.get_kind(id, ObjectKind::Commit)?)
    }

    /// Stores a payload of the given kind.
    pub fn put_object(&self, kind: ObjectKind, payload: &[u8]) -> Result<ContentId> {
        let framed = frame(kind, payload);
        let id = ContentId::hash_framed(&framed);
        if self.backend.put_raw(id, &framed)? {
            debug!(object = %id.short(), kind = kind.as_str(), size = payload.len(), "Stored object");
        }
        Ok(id)
    }

    /// Retrieves an object's kind and payload, verifying its hash.
    pub fn get_object(&self, id: &ContentId) -> Result<(ObjectKind, Bytes)> {
        let framed = self
            .backend
            .get_raw(id)?
            .ok_or_else(|| StorageError::NotFound(id.to_hex()))?;

        if ContentId::hash_framed(&framed) != *id {
            return Err(StorageError::Corruption(format!(
                "object {} does not match its content hash",
                id
            )));
        }

        let (kind, payload) = unframe(&framed)?;
        let offset = framed.len() - payload.len();
        Ok((kind, framed.slice(offset..)))
    }

    fn get_kind(&self, id: &ContentId, expected: ObjectKind) -> Result<Bytes> {
        let (kind, payload) = self.get_object(id)?;
        if kind != expected {
            return Err(StorageError::WrongKind {
                id: id.to_hex(),
                expected: expected.as_str(),
                actual: kind.as_str(),
            });
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChangeType, FileChange, TreeEntry};
    use eng_types::UserId;
    use proptest::prelude::*;

    /// Backend that returns whatever bytes it was seeded with.
    #[derive(Default)]
    struct TamperedBackend(MemoryBackend);

    impl ObjectStoreBackend for TamperedBackend {
        fn put_raw(&self, id: ContentId, _framed: &[u8]) -> Result<bool> {
            self.0.put_raw(id, b"blob 8\0tampered")
        }
        fn get_raw(&self, id: &ContentId) -> Result<Option<Bytes>> {
            self.0.get_raw(id)
        }
        fn contains(&self, id: &ContentId) -> Result<bool> {
            self.0.contains(id)
        }
        fn len(&self) -> Result<usize> {
            self.0.len()
        }
    }

    #[test]
    fn test_put_get_blob() {
        let store = ObjectStore::in_memory();
        let id = store.put(b"gear ratio 3:1").unwrap();
        assert_eq!(store.get(&id).unwrap().as_ref(), b"gear ratio 3:1");
    }

    #[test]
    fn test_put_is_idempotent() {
        let store = ObjectStore::in_memory();
        let a = store.put(b"same").unwrap();
        let b = store.put(b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_get_missing() {
        let store = ObjectStore::in_memory();
        let result = store.get(&ContentId::from_bytes([3; 32]));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_wrong_kind() {
        let store = ObjectStore::in_memory();
        let tree_id = store.put_tree(&Tree::new()).unwrap();
        assert!(matches!(
            store.get(&tree_id),
            Err(StorageError::WrongKind { expected: "blob", actual: "tree", .. })
        ));
    }

    #[test]
    fn test_detects_corruption() {
        let store = ObjectStore::new(Arc::new(TamperedBackend::default()));
        let id = store.put(b"original").unwrap();
        assert!(matches!(store.get(&id), Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_tree_and_commit_roundtrip() {
        let store = ObjectStore::in_memory();
        let blob = store.put(b"line 1\n").unwrap();

        let mut tree = Tree::new();
        tree.insert("notes.txt", TreeEntry::for_content(blob, b"line 1\n"));
        let tree_id = store.put_tree(&tree).unwrap();
        assert_eq!(store.get_tree(&tree_id).unwrap(), tree);

        let commit = store
            .put_commit(CommitDraft {
                parents: vec![],
                author: UserId::parse("ada").unwrap(),
                message: "Initial design".into(),
                timestamp: 1_700_000_000,
                tree_id,
                file_changes: vec![FileChange {
                    path: "notes.txt".into(),
                    old_path: None,
                    change_type: ChangeType::Added,
                    lines_added: 1,
                    lines_removed: 0,
                    size_before: 0,
                    size_after: 7,
                    binary: false,
                    old_content: None,
                    new_content: Some(blob),
                }],
            })
            .unwrap();

        let loaded = store.get_commit(&commit.id).unwrap();
        assert_eq!(loaded, commit);
        assert!(!loaded.is_merge());
    }

    #[test]
    fn test_filesystem_store() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = ObjectStore::open(dir.path()).unwrap();
            store.put(b"persisted").unwrap()
        };
        let store = ObjectStore::open(dir.path()).unwrap();
        assert_eq!(store.get(&id).unwrap().as_ref(), b"persisted");
    }

    proptest! {
        #[test]
        fn prop_blob_roundtrip(content in proptest::collection::vec(any::<u8>(), 0..512)) {
            let store = ObjectStore::in_memory();
            let id = store.put(&content).unwrap();
            let fetched = store.get(&id).unwrap();
            prop_assert_eq!(fetched.as_ref(), content.as_slice());
            prop_assert_eq!(store.put(&content).unwrap(), id);
        }
    }
}
