//! Content identifiers.

use crate::{ObjectKind, Result, StorageError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 content identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId([u8; 32]);

impl Serialize for ContentId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ContentId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl ContentId {
    /// The length of a content id in bytes.
    pub const LEN: usize = 32;

    /// Creates a ContentId from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Creates a ContentId from a hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != Self::LEN * 2 {
            return Err(StorageError::InvalidObject(format!(
                "invalid content id length: {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|e| StorageError::InvalidObject(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the first 12 hex characters, for log output.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    /// Hashes a payload together with its kind header.
    ///
    /// The framed form is `"<kind> <len>\0<payload>"`, so a blob and a tree
    /// with identical payloads never share an id.
    pub fn hash_object(kind: ObjectKind, payload: &[u8]) -> Self {
        Self::hash_framed(&frame(kind, payload))
    }

    /// Hashes already-framed object bytes.
    pub(crate) fn hash_framed(framed: &[u8]) -> Self {
        let digest = Sha256::digest(framed);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }
}

/// Prepends the kind header to a payload.
pub(crate) fn frame(kind: ObjectKind, payload: &[u8]) -> Vec<u8> {
    let header = format!("{} {}\0", kind.as_str(), payload.len());
    let mut framed = Vec::with_capacity(header.len() + payload.len());
    framed.extend_from_slice(header.as_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Splits framed bytes into kind and payload, checking the declared length.
pub(crate) fn unframe(framed: &[u8]) -> Result<(ObjectKind, &[u8])> {
    let null_pos = framed
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| StorageError::InvalidObject("missing null byte in header".to_string()))?;

    let header = std::str::from_utf8(&framed[..null_pos])
        .map_err(|_| StorageError::InvalidObject("header is not utf-8".to_string()))?;
    let (kind, size) = header
        .split_once(' ')
        .ok_or_else(|| StorageError::InvalidObject(format!("invalid header: {}", header)))?;

    let kind = ObjectKind::parse(kind)?;
    let size: usize = size
        .parse()
        .map_err(|_| StorageError::InvalidObject("invalid size".to_string()))?;

    let payload = &framed[null_pos + 1..];
    if payload.len() != size {
        return Err(StorageError::InvalidObject(format!(
            "size mismatch: header says {}, payload has {}",
            size,
            payload.len()
        )));
    }
    Ok((kind, payload))
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.short())
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for ContentId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_deterministic() {
        let a = ContentId::hash_object(ObjectKind::Blob, b"bracket v2");
        let b = ContentId::hash_object(ObjectKind::Blob, b"bracket v2");
        assert_eq!(a, b);
        assert_ne!(a, ContentId::hash_object(ObjectKind::Blob, b"bracket v3"));
    }

    #[test]
    fn test_kind_is_part_of_identity() {
        let blob = ContentId::hash_object(ObjectKind::Blob, b"{}");
        let tree = ContentId::hash_object(ObjectKind::Tree, b"{}");
        assert_ne!(blob, tree);
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = ContentId::hash_object(ObjectKind::Blob, b"test");
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(ContentId::from_hex(&hex).unwrap(), id);
        assert_eq!(hex.parse::<ContentId>().unwrap(), id);
    }

    #[test]
    fn test_invalid_hex() {
        assert!(ContentId::from_hex("abc").is_err());
        assert!(ContentId::from_hex(&"z".repeat(64)).is_err());
    }

    #[test]
    fn test_frame_unframe() {
        let framed = frame(ObjectKind::Tree, b"payload");
        assert!(framed.starts_with(b"tree 7\0"));

        let (kind, payload) = unframe(&framed).unwrap();
        assert_eq!(kind, ObjectKind::Tree);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_unframe_rejects_truncated_payload() {
        let mut framed = frame(ObjectKind::Blob, b"abcdef");
        framed.truncate(framed.len() - 2);
        assert!(unframe(&framed).is_err());
        assert!(unframe(b"blob 3").is_err());
    }

    #[test]
    fn test_serialization() {
        let id = ContentId::from_bytes([0xab; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let parsed: ContentId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_debug_is_short() {
        let id = ContentId::from_bytes([0u8; 32]);
        assert_eq!(format!("{:?}", id), "ContentId(000000000000)");
    }
}
