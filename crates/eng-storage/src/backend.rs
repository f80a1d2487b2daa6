//! Storage backend traits.
//!
//! Defines the interface that object backends implement, enabling
//! pluggable storage strategies. Backends only see framed bytes; hashing,
//! framing and integrity checks live in [`crate::ObjectStore`].

use crate::{ContentId, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait for object storage backends.
///
/// Backends are append-only: there is no update or delete. Writing an id
/// that already exists must be a no-op.
pub trait ObjectStoreBackend: Send + Sync {
    /// Stores framed object bytes under `id`.
    ///
    /// Returns `true` if the object was newly written.
    fn put_raw(&self, id: ContentId, framed: &[u8]) -> Result<bool>;

    /// Retrieves framed object bytes.
    fn get_raw(&self, id: &ContentId) -> Result<Option<Bytes>>;

    /// Checks if an object exists.
    fn contains(&self, id: &ContentId) -> Result<bool>;

    /// Returns the number of objects in the store.
    fn len(&self) -> Result<usize>;

    /// Returns true if the store is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl<T: ObjectStoreBackend> ObjectStoreBackend for Arc<T> {
    fn put_raw(&self, id: ContentId, framed: &[u8]) -> Result<bool> {
        (**self).put_raw(id, framed)
    }

    fn get_raw(&self, id: &ContentId) -> Result<Option<Bytes>> {
        (**self).get_raw(id)
    }

    fn contains(&self, id: &ContentId) -> Result<bool> {
        (**self).contains(id)
    }

    fn len(&self) -> Result<usize> {
        (**self).len()
    }
}

/// In-memory backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<ContentId, Bytes>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStoreBackend for MemoryBackend {
    fn put_raw(&self, id: ContentId, framed: &[u8]) -> Result<bool> {
        let mut objects = self.objects.write();
        if objects.contains_key(&id) {
            return Ok(false);
        }
        objects.insert(id, Bytes::copy_from_slice(framed));
        Ok(true)
    }

    fn get_raw(&self, id: &ContentId) -> Result<Option<Bytes>> {
        Ok(self.objects.read().get(id).cloned())
    }

    fn contains(&self, id: &ContentId) -> Result<bool> {
        Ok(self.objects.read().contains_key(id))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.objects.read().len())
    }
}
