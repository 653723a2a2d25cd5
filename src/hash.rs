//! SHA-256 hashing of document content.

use crate::error::{Result, SignError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// The size of a SHA-256 digest in bytes.
pub const HASH_SIZE: usize = 32;

/// A SHA-256 hash of the exact bytes of a document.
///
/// This is the content address of a [`SignatureRecord`](crate::signature::SignatureRecord).
/// It serializes as standard (padded) base64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentHash([u8; HASH_SIZE]);

impl DocumentHash {
    /// Create a hash from raw bytes.
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of the hash.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Encode the hash as a base64 string.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Decode a hash from a base64 string.
    pub fn from_base64(s: &str) -> Result<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD.decode(s.trim())?;
        if bytes.len() != HASH_SIZE {
            return Err(SignError::InvalidInput(format!(
                "Invalid hash length: expected {}, got {}",
                HASH_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; HASH_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Encode the hash as a hexadecimal string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for DocumentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for DocumentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for DocumentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DocumentHash::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// Compute the SHA-256 hash of a byte slice.
pub fn hash_bytes(data: &[u8]) -> DocumentHash {
    DocumentHash(Sha256::digest(data).into())
}

/// Compute the SHA-256 hash of a file using streaming (memory efficient).
pub fn hash_file<P: AsRef<Path>>(path: P) -> Result<DocumentHash> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    hash_reader(&mut reader)
}

/// Compute the SHA-256 hash from any reader using streaming.
pub fn hash_reader<R: Read>(reader: &mut R) -> Result<DocumentHash> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(DocumentHash(hasher.finalize().into()))
}
