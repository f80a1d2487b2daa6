//! Object storage for eng.com.
//!
//! This crate provides write-once, content-addressed storage for the
//! objects the version-control engine is built on: blobs (file contents),
//! trees (path listings) and commits.

mod backend;
mod error;
mod fs;
mod id;
mod object;
mod store;

pub use backend::{MemoryBackend, ObjectStoreBackend};
pub use error::StorageError;
pub use fs::FsBackend;
pub use id::ContentId;
pub use object::{
    is_binary, ChangeType, Commit, CommitDraft, FileChange, ObjectKind, Tree, TreeEntry,
};
pub use store::ObjectStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
