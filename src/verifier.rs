//! Signature verification.
//!
//! Two distinct modes:
//!
//! - **Direct**: the caller supplies the signature. Pure cryptography over
//!   the recomputed hash; the store is not consulted.
//! - **Lookup**: no signature is supplied. The record for the document hash
//!   is fetched from the store and its signature is checked against the
//!   *caller's* public key, never the key stored in the record. The record
//!   proves a signature exists for the content; the caller's key decides
//!   whom it came from.
//!
//! A failed check is a normal result (`valid == false`), not an error. Only
//! store failures are returned as `Err`.

use crate::error::{Result, SignError};
use crate::hash::{hash_bytes, DocumentHash};
use crate::keys::PublicKey;
use crate::signature::{Signature, SignerMetadata};
use crate::store::SignatureStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a verification was performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    Direct,
    Lookup,
}

/// Why a verification came out negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// No record exists for the document hash.
    NotFound,

    /// The signature could not be decoded or has the wrong length.
    MalformedSignature(String),

    /// The signature does not verify under the given key and hash.
    InvalidSignature(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotFound => write!(f, "NotFound: no signature recorded for this document"),
            FailureReason::MalformedSignature(detail) => write!(f, "MalformedSignature: {}", detail),
            FailureReason::InvalidSignature(detail) => write!(f, "InvalidSignature: {}", detail),
        }
    }
}

/// Outcome of verifying one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the signature is valid.
    pub valid: bool,

    /// Which branch produced the result.
    pub mode: VerificationMode,

    /// The recomputed document hash.
    pub document_hash: DocumentHash,

    /// Why verification failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,

    /// Matching record id (lookup mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    /// Signer details from the matched record, only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<SignerMetadata>,

    /// When the matched record was created, only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
}

impl VerificationResult {
    fn valid(mode: VerificationMode, document_hash: DocumentHash) -> Self {
        Self {
            valid: true,
            mode,
            document_hash,
            reason: None,
            record_id: None,
            signer: None,
            signed_at: None,
        }
    }

    pub(crate) fn invalid(mode: VerificationMode, document_hash: DocumentHash, reason: FailureReason) -> Self {
        Self {
            valid: false,
            mode,
            document_hash,
            reason: Some(reason),
            record_id: None,
            signer: None,
            signed_at: None,
        }
    }

    /// True if the failure was a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self.reason, Some(FailureReason::NotFound))
    }
}

/// A length mismatch means a malformed input when the caller supplied the
/// signature, but a wrong key when the signature came from the store.
fn classify(err: SignError, mode: VerificationMode) -> FailureReason {
    match (err, mode) {
        (SignError::InvalidInput(msg), VerificationMode::Direct) => {
            FailureReason::MalformedSignature(msg)
        }
        (other, _) => FailureReason::InvalidSignature(other.to_string()),
    }
}

/// Verifier for document signatures.
pub struct Verifier<'a> {
    store: &'a dyn SignatureStore,
}

impl<'a> Verifier<'a> {
    /// Create a verifier that can look records up in `store`.
    pub fn new(store: &'a dyn SignatureStore) -> Self {
        Self { store }
    }

    /// Verify a supplied signature over a document (direct mode).
    pub fn verify_signature(
        data: &[u8],
        public_key: &PublicKey,
        signature: &Signature,
    ) -> VerificationResult {
        Self::verify_hash_signature(hash_bytes(data), public_key, signature)
    }

    /// Verify a supplied signature against a known hash (direct mode).
    pub fn verify_hash_signature(
        document_hash: DocumentHash,
        public_key: &PublicKey,
        signature: &Signature,
    ) -> VerificationResult {
        let result = match public_key.verify_hash(&document_hash, signature.as_bytes()) {
            Ok(()) => VerificationResult::valid(VerificationMode::Direct, document_hash),
            Err(e) => {
                VerificationResult::invalid(
                    VerificationMode::Direct,
                    document_hash,
                    classify(e, VerificationMode::Direct),
                )
            }
        };
        log::debug!(
            "Direct verification of {}: valid={}",
            document_hash,
            result.valid
        );
        result
    }

    /// Verify a document, directly if `signature` is given, else by lookup.
    pub fn verify(
        &self,
        data: &[u8],
        public_key: &PublicKey,
        signature: Option<&Signature>,
    ) -> Result<VerificationResult> {
        match signature {
            Some(signature) => Ok(Self::verify_signature(data, public_key, signature)),
            None => self.verify_lookup(data, public_key),
        }
    }

    /// Verify a document against its stored record using the caller's key.
    pub fn verify_lookup(&self, data: &[u8], public_key: &PublicKey) -> Result<VerificationResult> {
        let document_hash = hash_bytes(data);

        let record = match self.store.get_by_hash(&document_hash)? {
            Some(record) => record,
            None => {
                log::info!("No signature record for {}", document_hash);
                return Ok(VerificationResult::invalid(
                    VerificationMode::Lookup,
                    document_hash,
                    FailureReason::NotFound,
                ));
            }
        };

        let mut result = match record.verify_with(public_key, &document_hash) {
            Ok(()) => {
                let mut result = VerificationResult::valid(VerificationMode::Lookup, document_hash);
                result.signer = Some(record.signer.clone());
                result.signed_at = Some(record.created_at);
                result
            }
            Err(e) => VerificationResult::invalid(
                VerificationMode::Lookup,
                document_hash,
                classify(e, VerificationMode::Lookup),
            ),
        };
        result.record_id = Some(record.id.clone());

        log::info!(
            "Lookup verification of {} against record {}: valid={}",
            document_hash,
            record.id,
            result.valid
        );
        Ok(result)
    }

    /// Quick check that a supplied signature is valid for the bytes.
    pub fn is_valid_bytes(data: &[u8], public_key: &PublicKey, signature: &Signature) -> bool {
        Self::verify_signature(data, public_key, signature).valid
    }
}

/// Convenience function to verify bytes against a supplied signature.
pub fn verify_bytes(data: &[u8], public_key: &PublicKey, signature: &Signature) -> VerificationResult {
    Verifier::verify_signature(data, public_key, signature)
}
