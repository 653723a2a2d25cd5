//! Error types for the rust-pdf-sign library.

use thiserror::Error;

/// The main error type for rust-pdf-sign operations.
///
/// A signature that simply fails to verify is not an error: it is reported
/// as a negative [`VerificationResult`](crate::verifier::VerificationResult).
#[derive(Error, Debug)]
pub enum SignError {
    /// Error reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error with JSON serialization/deserialization.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error with base64 encoding/decoding.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Error from the RSA primitive (key construction, signing).
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    /// Malformed configuration file.
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Malformed bytes, missing metadata or a violated limit.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested RSA modulus size is not in the allow-list.
    #[error("Invalid key size: {0} bits (allowed: 1024, 2048, 3072, 4096, 8192)")]
    InvalidKeySize(u32),

    /// Invalid key format or inconsistent key components.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Staged bytes no longer hash to the value bound at prepare time.
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// The signature handed to embed does not verify over the staged hash.
    #[error("Signature rejected: {0}")]
    SignatureRejected(String),

    /// Unknown handle, hash or record id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The document content already has a signature record.
    #[error("Document already signed: {0}")]
    AlreadySigned(String),

    /// The persistence backend failed.
    #[error("Signature store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Result type alias for rust-pdf-sign operations.
pub type Result<T> = std::result::Result<T, SignError>;

impl<T> From<std::sync::PoisonError<T>> for SignError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        SignError::StoreUnavailable(format!("lock poisoned: {}", err))
    }
}
