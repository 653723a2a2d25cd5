//! Boundary operations in transport-friendly form.
//!
//! [`SignatureService`] wires a store, a staging area and the signing
//! protocol together and speaks in base64 strings and JWKs, ready to be put
//! behind any request/response transport.

use crate::config::ServiceConfig;
use crate::error::{Result, SignError};
use crate::hash::{hash_bytes, DocumentHash};
use crate::keys::{KeyPair, KeySize, PublicJwk, PublicKey};
use crate::protocol::{EmbedRequest, PreparedDocument, SignedDocument, SigningProtocol};
use crate::signature::{RecordSummary, Signature, SignatureRecord, SignerMetadata};
use crate::staging::{DirStaging, Handle, MemoryStaging, StagingArea};
use crate::store::{JsonFileStore, MemoryStore, SignatureStore, StoreStats};
use crate::verifier::{FailureReason, VerificationMode, VerificationResult, Verifier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Response of `prepare`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub handle: String,
    /// Base64 SHA-256 of the document; this is what must be signed.
    pub hash: String,
    pub filename: String,
}

impl From<PreparedDocument> for PrepareResponse {
    fn from(prepared: PreparedDocument) -> Self {
        Self {
            handle: prepared.handle.to_string(),
            hash: prepared.hash.to_base64(),
            filename: prepared.filename,
        }
    }
}

/// Payload of `embed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedPayload {
    pub handle: String,
    /// Base64 signature bytes.
    pub signature: String,
    pub public_key: PublicJwk,
    pub metadata: SignerMetadata,
    /// Base64 hash the signer believes it signed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
}

impl EmbedPayload {
    fn into_request(self) -> Result<EmbedRequest> {
        let expected_hash = self
            .expected_hash
            .as_deref()
            .map(DocumentHash::from_base64)
            .transpose()?;
        Ok(EmbedRequest {
            handle: Handle::from(self.handle),
            signature: Signature::from_base64(&self.signature)?,
            public_key: self.public_key,
            metadata: self.metadata,
            expected_hash,
        })
    }
}

impl From<EmbedRequest> for EmbedPayload {
    fn from(request: EmbedRequest) -> Self {
        Self {
            handle: request.handle.to_string(),
            signature: request.signature.to_base64(),
            public_key: request.public_key,
            metadata: request.metadata,
            expected_hash: request.expected_hash.map(|h| h.to_base64()),
        }
    }
}

/// Response of `verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_metadata: Option<SignerMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
    /// Base64 hash of the verified document.
    pub document_hash: String,
}

impl From<VerificationResult> for VerifyResponse {
    fn from(result: VerificationResult) -> Self {
        Self {
            valid: result.valid,
            reason: result.reason.map(|r| r.to_string()),
            signer_metadata: result.signer,
            signed_at: result.signed_at,
            document_hash: result.document_hash.to_base64(),
        }
    }
}

/// The signing and verification service.
pub struct SignatureService {
    store: Arc<dyn SignatureStore>,
    protocol: SigningProtocol,
    default_key_size: KeySize,
}

impl SignatureService {
    /// Build a service over an existing store and staging area.
    pub fn new(
        store: Arc<dyn SignatureStore>,
        staging: Box<dyn StagingArea>,
        config: &ServiceConfig,
    ) -> Self {
        let protocol = SigningProtocol::with_config(store.clone(), staging, config);
        Self {
            store,
            protocol,
            default_key_size: config.default_key_size,
        }
    }

    /// Build a service from configuration, choosing file or memory backends.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn SignatureStore> = match &config.store_path {
            Some(path) => Arc::new(JsonFileStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };
        let staging: Box<dyn StagingArea> = match &config.staging_dir {
            Some(dir) => Box::new(DirStaging::new(dir, config.staging_ttl())?),
            None => Box::new(MemoryStaging::new(config.staging_ttl())),
        };

        Ok(Self::new(store, staging, config))
    }

    /// The underlying store.
    pub fn store(&self) -> &dyn SignatureStore {
        self.store.as_ref()
    }

    /// The underlying protocol.
    pub fn protocol(&self) -> &SigningProtocol {
        &self.protocol
    }

    /// Generate a signing keypair of the configured default size.
    ///
    /// The pair belongs to the caller; the service keeps no copy.
    pub fn generate_keypair(&self) -> Result<KeyPair> {
        KeyPair::generate(self.default_key_size)
    }

    /// Stage a document and return the hash to sign.
    pub fn prepare(
        &self,
        document: Vec<u8>,
        metadata: Option<SignerMetadata>,
    ) -> Result<PrepareResponse> {
        Ok(self.protocol.prepare(document, metadata)?.into())
    }

    /// Attach a signature to a staged document and store the record.
    pub fn embed(&self, payload: EmbedPayload) -> Result<SignatureRecord> {
        Ok(self.embed_document(payload)?.record)
    }

    /// Like [`SignatureService::embed`], also returning the original bytes.
    pub fn embed_document(&self, payload: EmbedPayload) -> Result<SignedDocument> {
        self.protocol.embed(payload.into_request()?)
    }

    /// Verify a document against a public key given as JSON (bare JWK or export
    /// file). Without a signature the stored record is used.
    ///
    /// A signature that is not valid base64 yields `valid = false`; a
    /// malformed key is an [`SignError::InvalidKey`] error.
    pub fn verify(
        &self,
        document: &[u8],
        public_key_json: &str,
        signature: Option<&str>,
    ) -> Result<VerifyResponse> {
        let public_key = PublicKey::from_json(public_key_json).map_err(|e| match e {
            SignError::Json(err) => SignError::InvalidKey(err.to_string()),
            other => other,
        })?;
        self.verify_with_key(document, &public_key, signature)
    }

    /// Verify a document against an already parsed public key.
    pub fn verify_with_key(
        &self,
        document: &[u8],
        public_key: &PublicKey,
        signature: Option<&str>,
    ) -> Result<VerifyResponse> {
        let result = match signature {
            Some(encoded) => match Signature::from_base64(encoded) {
                Ok(signature) => Verifier::verify_signature(document, public_key, &signature),
                Err(e) => VerificationResult::invalid(
                    VerificationMode::Direct,
                    hash_bytes(document),
                    FailureReason::MalformedSignature(e.to_string()),
                ),
            },
            None => Verifier::new(self.store.as_ref()).verify_lookup(document, public_key)?,
        };
        Ok(result.into())
    }

    /// All records, newest first.
    pub fn list_records(&self) -> Result<Vec<SignatureRecord>> {
        self.store.list()
    }

    /// Condensed listing, newest first.
    pub fn list_summaries(&self) -> Result<Vec<RecordSummary>> {
        Ok(self.store.list()?.iter().map(SignatureRecord::summary).collect())
    }

    /// Fetch a record by id.
    pub fn get_record(&self, id: &str) -> Result<SignatureRecord> {
        self.store
            .get(id)?
            .ok_or_else(|| SignError::NotFound(format!("signature record '{}'", id)))
    }

    /// Permanently delete a record by id.
    pub fn delete_record(&self, id: &str) -> Result<()> {
        match self.store.delete(id)? {
            Some(record) => {
                log::info!("Deleted signature record {} ({})", id, record.document_hash);
                Ok(())
            }
            None => Err(SignError::NotFound(format!("signature record '{}'", id))),
        }
    }

    /// Store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }

    /// Drop abandoned staged documents.
    pub fn purge_expired(&self) -> Result<usize> {
        self.protocol.purge_expired()
    }
}
