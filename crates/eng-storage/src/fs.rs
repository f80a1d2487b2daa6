//! Filesystem backend storing zlib-compressed loose objects.
//!
//! Objects live at `<root>/objects/<first two hex chars>/<remaining hex>`.
//! Each write goes to a temporary file in the same directory and is renamed
//! into place, so an object path either does not exist or holds a complete
//! object.

use crate::{ContentId, ObjectStoreBackend, Result, StorageError};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loose-object backend rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsBackend {
    objects_dir: PathBuf,
}

impl FsBackend {
    /// Opens (creating if needed) a backend under `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let objects_dir = root.as_ref().join("objects");
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir })
    }

    fn object_path(&self, id: &ContentId) -> PathBuf {
        let hex = id.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    fn compress(framed: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(framed)
            .map_err(|e| StorageError::Compression(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| StorageError::Compression(e.to_string()))
    }

    fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(compressed);
        let mut framed = Vec::new();
        decoder
            .read_to_end(&mut framed)
            .map_err(|e| StorageError::Compression(e.to_string()))?;
        Ok(framed)
    }
}

impl ObjectStoreBackend for FsBackend {
    fn put_raw(&self, id: ContentId, framed: &[u8]) -> Result<bool> {
        let path = self.object_path(&id);
        if path.exists() {
            return Ok(false);
        }

        let dir = path
            .parent()
            .ok_or_else(|| StorageError::InvalidObject(format!("bad object path for {}", id)))?;
        fs::create_dir_all(dir)?;

        let compressed = Self::compress(framed)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&compressed)?;
        tmp.as_file().sync_all()?;

        // A concurrent writer of the same id may win the rename; both wrote
        // identical bytes, so either result is correct.
        tmp.persist(&path).map_err(|e| StorageError::Io(e.error))?;
        debug!(object = %id.short(), bytes = compressed.len(), "Object written");
        Ok(true)
    }

    fn get_raw(&self, id: &ContentId) -> Result<Option<Bytes>> {
        let compressed = match fs::read(self.object_path(id)) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Bytes::from(Self::decompress(&compressed)?)))
    }

    fn contains(&self, id: &ContentId) -> Result<bool> {
        Ok(self.object_path(id).exists())
    }

    fn len(&self) -> Result<usize> {
        let mut count = 0;
        for fanout in fs::read_dir(&self.objects_dir)? {
            let fanout = fanout?;
            if !fanout.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(fanout.path())? {
                let entry = entry?;
                // Skip in-flight temporary files.
                if entry.file_name().to_string_lossy().starts_with(".tmp") {
                    continue;
                }
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).unwrap();
        let id = ContentId::from_bytes([0xcd; 32]);

        assert!(backend.put_raw(id, b"blob 5\0hello").unwrap());
        assert!(!backend.put_raw(id, b"blob 5\0hello").unwrap());
        assert!(backend.contains(&id).unwrap());
        assert_eq!(backend.len().unwrap(), 1);

        let raw = backend.get_raw(&id).unwrap().unwrap();
        assert_eq!(raw.as_ref(), b"blob 5\0hello");

        let hex = id.to_hex();
        assert!(dir.path().join("objects").join(&hex[..2]).join(&hex[2..]).exists());
    }

    #[test]
    fn test_fs_backend_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).unwrap();
        assert!(backend.get_raw(&ContentId::from_bytes([1; 32])).unwrap().is_none());
        assert!(backend.is_empty().unwrap());
    }

    #[test]
    fn test_fs_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = ContentId::from_bytes([9; 32]);
        FsBackend::open(dir.path())
            .unwrap()
            .put_raw(id, b"blob 1\0x")
            .unwrap();

        let reopened = FsBackend::open(dir.path()).unwrap();
        assert_eq!(reopened.get_raw(&id).unwrap().unwrap().as_ref(), b"blob 1\0x");
    }
}
