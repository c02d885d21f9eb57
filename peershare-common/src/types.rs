use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Fixed chunking policy: every chunk except the last is exactly this size.
pub const CHUNK_SIZE: u64 = 512 * 1024;

/// A SHA-256 digest identifying either a whole file or a single chunk.
///
/// Serialized as a lowercase hex string everywhere it appears (wire
/// messages, `metadata.json`, tracker state), which also makes it usable
/// directly as a chunk-directory name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn new(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// Hash a complete in-memory buffer.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create a ContentHash from a slice (returns None if not exactly 32 bytes)
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() == 32 {
            let mut array = [0u8; 32];
            array.copy_from_slice(slice);
            Some(Self(array))
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        Self::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }
}

impl From<[u8; 32]> for ContentHash {
    fn from(hash: [u8; 32]) -> Self {
        Self::new(hash)
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Metadata for a single chunk of a shared file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub index: u32,
    pub hash: ContentHash,
    pub size: u64,
}

/// The full chunk manifest of a file, as written to `metadata.json` in the
/// local chunk store and as carried in `upload_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkManifest {
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: ContentHash,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub chunks: Vec<ChunkInfo>,
}

/// `get_file_info` reply: the manifest plus the addresses of logged-in
/// owners a downloader can fetch chunks from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_name: String,
    pub file_hash: ContentHash,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub chunks: Vec<ChunkInfo>,
    #[serde(default)]
    pub peers: Vec<String>,
}

/// One row of a `list_files` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub file_name: String,
    pub file_size: u64,
    pub uploader: String,
}

/// `create_group` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCreated {
    pub group_id: String,
    pub owner: String,
    pub message: String,
}

/// `upload_file` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAck {
    pub message: String,
    pub file_name: String,
    pub group_id: String,
    pub file_size: u64,
    pub uploader: String,
    pub file_hash: ContentHash,
    pub total_chunks: u32,
}

impl FileInfo {
    pub fn manifest(&self) -> ChunkManifest {
        ChunkManifest {
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            file_hash: self.file_hash,
            chunk_size: self.chunk_size,
            total_chunks: self.total_chunks,
            chunks: self.chunks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_hex_round_trip() {
        let hash = ContentHash::digest(b"Hello");
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(ContentHash::from_hex(&hex).unwrap(), hash);
    }

    #[test]
    fn content_hash_rejects_wrong_length() {
        assert!(ContentHash::from_hex("abcd").is_err());
        assert!(ContentHash::from_slice(&[0u8; 20]).is_none());
    }

    #[test]
    fn content_hash_serializes_as_hex_string() {
        let hash = ContentHash::digest(b"Hello");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn known_sha256_vector() {
        // sha256("Hello")
        let hash = ContentHash::digest(b"Hello");
        assert_eq!(
            hash.to_hex(),
            "185f8db32271fe25f561a6fc938b2e264306ec304eda518007d1764826381969"
        );
    }
}
