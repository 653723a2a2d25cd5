//! Two-phase document signing.
//!
//! 1. [`SigningProtocol::prepare`] stages the raw bytes under a handle and
//!    returns the SHA-256 hash the signer must sign.
//! 2. The signer signs that hash locally (see [`Signer`](crate::signer::Signer)).
//! 3. [`SigningProtocol::embed`] resolves the handle, re-hashes the staged
//!    bytes, checks the signature and stores a [`SignatureRecord`].
//!
//! The private key is never an input to this module.

use crate::config::{ResignPolicy, ServiceConfig};
use crate::error::{Result, SignError};
use crate::hash::{hash_bytes, DocumentHash};
use crate::keys::{PublicJwk, PublicKey};
use crate::signature::{Signature, SignatureRecord, SignerMetadata};
use crate::staging::{Handle, StagedDocument, StagingArea};
use crate::store::SignatureStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of the prepare phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedDocument {
    /// Handle to pass back to `embed`.
    pub handle: Handle,

    /// The hash to sign (base64 encoded).
    pub hash: DocumentHash,

    /// Filename the document was staged under.
    pub filename: String,
}

/// Input of the embed phase.
#[derive(Debug, Clone)]
pub struct EmbedRequest {
    /// Handle returned by `prepare`.
    pub handle: Handle,

    /// Signature produced over the prepared hash.
    pub signature: Signature,

    /// Public key matching the signing key.
    pub public_key: PublicJwk,

    /// Signer details to store with the record.
    pub metadata: SignerMetadata,

    /// The hash the caller believes it signed.
    pub expected_hash: Option<DocumentHash>,
}

/// Output of the embed phase.
#[derive(Debug, Clone)]
pub struct SignedDocument {
    /// The stored record.
    pub record: SignatureRecord,

    /// The original document bytes, unmodified.
    pub document: Vec<u8>,
}

/// Orchestrates prepare and embed over a staging area and a store.
pub struct SigningProtocol {
    store: Arc<dyn SignatureStore>,
    staging: Box<dyn StagingArea>,
    max_document_bytes: usize,
    resign_policy: ResignPolicy,
    verify_on_embed: bool,
}

impl SigningProtocol {
    /// Create a protocol with default settings.
    pub fn new(store: Arc<dyn SignatureStore>, staging: Box<dyn StagingArea>) -> Self {
        Self::with_config(store, staging, &ServiceConfig::default())
    }

    /// Create a protocol using the limits and policies from `config`.
    pub fn with_config(
        store: Arc<dyn SignatureStore>,
        staging: Box<dyn StagingArea>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            store,
            staging,
            max_document_bytes: config.max_document_bytes,
            resign_policy: config.resign_policy,
            verify_on_embed: config.verify_on_embed,
        }
    }

    /// The staging area used between phases.
    pub fn staging(&self) -> &dyn StagingArea {
        self.staging.as_ref()
    }

    /// Phase 1: stage the document and return the hash to sign.
    pub fn prepare(
        &self,
        document: Vec<u8>,
        metadata: Option<SignerMetadata>,
    ) -> Result<PreparedDocument> {
        self.purge_expired()?;

        if document.len() > self.max_document_bytes {
            return Err(SignError::InvalidInput(format!(
                "Document is {} bytes, limit is {}",
                document.len(),
                self.max_document_bytes
            )));
        }

        let hash = hash_bytes(&document);
        self.check_resign(&hash)?;

        let filename = metadata
            .as_ref()
            .map(|m| m.filename_or_default().to_string())
            .unwrap_or_else(|| crate::signature::DEFAULT_FILENAME.to_string());

        let handle = self.staging.stage(StagedDocument {
            bytes: document,
            hash,
            filename: filename.clone(),
            metadata,
            staged_at: Utc::now(),
        })?;

        log::info!("Prepared {} ({}) as handle {}", filename, hash, handle);
        Ok(PreparedDocument {
            handle,
            hash,
            filename,
        })
    }

    /// Phase 2: bind a signature to the staged document and store the record.
    ///
    /// The staged bytes are re-hashed; any difference from the hash bound at
    /// prepare time, or from `expected_hash`, is a [`SignError::HashMismatch`].
    /// The handle is taken out of staging for the duration of the call: on
    /// success it is consumed, on failure it is put back until its TTL runs out.
    pub fn embed(&self, request: EmbedRequest) -> Result<SignedDocument> {
        self.purge_expired()?;

        let handle = request.handle.clone();
        let staged = self.staging.take(&handle, Utc::now())?;

        match self.bind(request, &staged) {
            Ok(record) => Ok(SignedDocument {
                record,
                document: staged.bytes,
            }),
            Err(e) => {
                if let Err(restore_err) = self.staging.restore(&handle, staged) {
                    log::warn!("Failed to restore staged handle {}: {}", handle, restore_err);
                }
                Err(e)
            }
        }
    }

    fn bind(&self, request: EmbedRequest, staged: &StagedDocument) -> Result<SignatureRecord> {
        let actual = hash_bytes(&staged.bytes);
        if actual != staged.hash {
            log::warn!(
                "Staged bytes for handle {} changed since prepare ({} -> {})",
                request.handle,
                staged.hash,
                actual
            );
            return Err(SignError::HashMismatch {
                expected: staged.hash.to_hex(),
                actual: actual.to_hex(),
            });
        }
        match request.expected_hash {
            Some(expected) if expected != actual => {
                return Err(SignError::HashMismatch {
                    expected: expected.to_hex(),
                    actual: actual.to_hex(),
                });
            }
            None if !self.verify_on_embed => {
                return Err(SignError::InvalidInput(
                    "expected_hash is required when signatures are not verified on embed"
                        .to_string(),
                ));
            }
            _ => {}
        }

        let mut metadata =
            merge_metadata(request.metadata, staged.metadata.as_ref(), &staged.filename);
        metadata.validate()?;

        let public_key = PublicKey::from_jwk(&request.public_key)?;
        if self.verify_on_embed {
            public_key
                .verify_hash(&actual, request.signature.as_bytes())
                .map_err(|e| SignError::SignatureRejected(e.to_string()))?;
        }
        metadata.key_size = Some(public_key.key_size_bits());

        let record = SignatureRecord::new(actual, request.signature, public_key.to_jwk(), metadata);
        match self.resign_policy {
            ResignPolicy::Overwrite => {
                if let Some(replaced) = self.store.put(record.clone())? {
                    log::info!("Record {} replaced by {} for {}", replaced.id, record.id, actual);
                }
            }
            ResignPolicy::Reject => self.store.put_if_absent(record.clone())?,
        }

        log::info!(
            "Stored signature record {} for {} (signer key {})",
            record.id,
            actual,
            public_key.thumbprint()
        );
        Ok(record)
    }

    /// Drop staged documents whose TTL has passed.
    pub fn purge_expired(&self) -> Result<usize> {
        let evicted = self.staging.evict_expired(Utc::now())?;
        if evicted > 0 {
            log::debug!("Evicted {} abandoned staged documents", evicted);
        }
        Ok(evicted)
    }

    fn check_resign(&self, hash: &DocumentHash) -> Result<()> {
        if self.resign_policy == ResignPolicy::Reject && self.store.get_by_hash(hash)?.is_some() {
            return Err(SignError::AlreadySigned(hash.to_hex()));
        }
        Ok(())
    }
}

/// Fill blank fields of the embed metadata from what was given at prepare.
fn merge_metadata(
    mut metadata: SignerMetadata,
    staged: Option<&SignerMetadata>,
    staged_filename: &str,
) -> SignerMetadata {
    if let Some(staged) = staged {
        for (field, fallback) in [
            (&mut metadata.name, &staged.name),
            (&mut metadata.location, &staged.location),
            (&mut metadata.reason, &staged.reason),
        ] {
            if field.trim().is_empty() {
                field.clone_from(fallback);
            }
        }
        if metadata.contact.is_none() {
            metadata.contact.clone_from(&staged.contact);
        }
    }
    if metadata.filename.as_deref().map_or(true, |f| f.trim().is_empty()) {
        metadata.filename = Some(staged_filename.to_string());
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyPair, KeySize};
    use crate::signer::Signer;
    use crate::staging::MemoryStaging;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn metadata() -> SignerMetadata {
        SignerMetadata::new("Alice")
            .with_location("Poznan")
            .with_reason("Approval")
    }

    fn protocol() -> (Arc<MemoryStore>, SigningProtocol) {
        let store = Arc::new(MemoryStore::new());
        let staging = Box::new(MemoryStaging::new(Duration::minutes(15)));
        let protocol = SigningProtocol::new(store.clone(), staging);
        (store, protocol)
    }

    #[test]
    fn test_prepare_returns_hash_of_bytes() {
        let (_, protocol) = protocol();
        let document = b"%PDF-1.7 prepare".to_vec();

        let prepared = protocol
            .prepare(document.clone(), Some(metadata().with_filename("a.pdf")))
            .unwrap();

        assert_eq!(prepared.hash, hash_bytes(&document));
        assert_eq!(prepared.filename, "a.pdf");
        assert_eq!(protocol.staging().len().unwrap(), 1);
    }

    #[test]
    fn test_prepare_default_filename() {
        let (_, protocol) = protocol();
        let prepared = protocol.prepare(b"x".to_vec(), None).unwrap();
        assert_eq!(prepared.filename, "document.pdf");
    }

    #[test]
    fn test_prepare_accepts_empty_document() {
        let (_, protocol) = protocol();
        let prepared = protocol.prepare(Vec::new(), None).unwrap();
        assert_eq!(prepared.hash, hash_bytes(b""));
    }

    #[test]
    fn test_prepare_rejects_oversized_document() {
        let store = Arc::new(MemoryStore::new());
        let config = ServiceConfig {
            max_document_bytes: 8,
            ..ServiceConfig::default()
        };
        let protocol = SigningProtocol::with_config(
            store,
            Box::new(MemoryStaging::new(Duration::minutes(1))),
            &config,
        );

        let err = protocol.prepare(vec![0; 9], None).unwrap_err();
        assert!(matches!(err, SignError::InvalidInput(_)));
    }

    #[test]
    fn test_embed_stores_record_and_consumes_handle() {
        let (store, protocol) = protocol();
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let document = b"%PDF-1.7 embed".to_vec();

        let prepared = protocol.prepare(document.clone(), None).unwrap();
        let request = Signer::new(&keypair)
            .with_metadata(metadata())
            .sign_prepared(&prepared)
            .unwrap();

        let signed = protocol.embed(request.clone()).unwrap();
        assert_eq!(signed.document, document);
        assert_eq!(signed.record.document_hash, prepared.hash);
        assert_eq!(signed.record.signer.key_size, Some(1024));
        assert_eq!(
            store.get_by_hash(&prepared.hash).unwrap(),
            Some(signed.record.clone())
        );

        assert!(matches!(protocol.embed(request), Err(SignError::NotFound(_))));
    }

    #[test]
    fn test_embed_unknown_handle() {
        let (_, protocol) = protocol();
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let prepared = PreparedDocument {
            handle: Handle::from("nope"),
            hash: hash_bytes(b"x"),
            filename: "x.pdf".to_string(),
        };
        let request = Signer::new(&keypair)
            .with_metadata(metadata())
            .sign_prepared(&prepared)
            .unwrap();

        assert!(matches!(protocol.embed(request), Err(SignError::NotFound(_))));
    }

    #[test]
    fn test_embed_rejects_wrong_expected_hash() {
        let (store, protocol) = protocol();
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();

        let prepared = protocol.prepare(b"real".to_vec(), None).unwrap();
        let mut request = Signer::new(&keypair)
            .with_metadata(metadata())
            .sign_prepared(&prepared)
            .unwrap();
        request.expected_hash = Some(hash_bytes(b"substituted"));

        assert!(matches!(
            protocol.embed(request),
            Err(SignError::HashMismatch { .. })
        ));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_embed_rejects_signature_over_other_hash() {
        let (_, protocol) = protocol();
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();

        let prepared = protocol.prepare(b"real".to_vec(), None).unwrap();
        let mut request = Signer::new(&keypair)
            .with_metadata(metadata())
            .sign_prepared(&prepared)
            .unwrap();
        request.signature = Signature::from_bytes(keypair.sign_hash(&hash_bytes(b"other")).unwrap());

        assert!(matches!(
            protocol.embed(request),
            Err(SignError::SignatureRejected(_))
        ));
        // handle survives a failed embed
        assert_eq!(protocol.staging().len().unwrap(), 1);
    }

    #[test]
    fn test_embed_requires_metadata() {
        let (_, protocol) = protocol();
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();

        let prepared = protocol.prepare(b"doc".to_vec(), None).unwrap();
        let request = Signer::new(&keypair)
            .with_metadata(SignerMetadata::new("Alice"))
            .sign_prepared(&prepared)
            .unwrap();

        assert!(matches!(
            protocol.embed(request),
            Err(SignError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_embed_uses_prepare_metadata_as_fallback() {
        let (_, protocol) = protocol();
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();

        let prepared = protocol
            .prepare(b"doc".to_vec(), Some(metadata().with_contact("a@example.com")))
            .unwrap();
        let request = Signer::new(&keypair).sign_prepared(&prepared).unwrap();

        let signed = protocol.embed(request).unwrap();
        assert_eq!(signed.record.signer.name, "Alice");
        assert_eq!(signed.record.signer.contact.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn test_resign_overwrites_by_default() {
        let (store, protocol) = protocol();
        let alice = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let bob = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let document = b"%PDF signed twice".to_vec();

        for (key, name) in [(&alice, "Alice"), (&bob, "Bob")] {
            let prepared = protocol.prepare(document.clone(), None).unwrap();
            let request = Signer::new(key)
                .with_metadata(metadata().with_location("Lodz"))
                .sign_prepared(&prepared)
                .map(|mut r| {
                    r.metadata.name = name.to_string();
                    r
                })
                .unwrap();
            protocol.embed(request).unwrap();
        }

        let records = store.list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].signer.name, "Bob");
        assert_eq!(records[0].public_key, bob.public_key().to_jwk());
    }

    #[test]
    fn test_resign_rejected_by_policy() {
        let store = Arc::new(MemoryStore::new());
        let config = ServiceConfig {
            resign_policy: ResignPolicy::Reject,
            ..ServiceConfig::default()
        };
        let protocol = SigningProtocol::with_config(
            store,
            Box::new(MemoryStaging::new(Duration::minutes(15))),
            &config,
        );
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();

        let prepared = protocol.prepare(b"once".to_vec(), None).unwrap();
        let request = Signer::new(&keypair)
            .with_metadata(metadata())
            .sign_prepared(&prepared)
            .unwrap();
        protocol.embed(request).unwrap();

        assert!(matches!(
            protocol.prepare(b"once".to_vec(), None),
            Err(SignError::AlreadySigned(_))
        ));
    }

    #[test]
    fn test_resign_rejected_when_embeds_overlap() {
        let store = Arc::new(MemoryStore::new());
        let config = ServiceConfig {
            resign_policy: ResignPolicy::Reject,
            ..ServiceConfig::default()
        };
        let protocol = SigningProtocol::with_config(
            store.clone(),
            Box::new(MemoryStaging::new(Duration::minutes(15))),
            &config,
        );
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();

        // Both prepared before either is embedded, so prepare cannot refuse.
        let requests: Vec<EmbedRequest> = (0..2)
            .map(|_| {
                let prepared = protocol.prepare(b"twice".to_vec(), None).unwrap();
                Signer::new(&keypair)
                    .with_metadata(metadata())
                    .sign_prepared(&prepared)
                    .unwrap()
            })
            .collect();

        let mut results = requests.into_iter().map(|r| protocol.embed(r));
        assert!(results.next().unwrap().is_ok());
        assert!(matches!(
            results.next().unwrap(),
            Err(SignError::AlreadySigned(_))
        ));
        assert_eq!(store.list().unwrap().len(), 1);
        // the refused handle is still staged
        assert_eq!(protocol.staging().len().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_embeds_of_one_handle() {
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();

        for _ in 0..10 {
            let (store, protocol) = protocol();
            let prepared = protocol.prepare(b"%PDF-1.7 race".to_vec(), None).unwrap();
            let request = Signer::new(&keypair)
                .with_metadata(metadata())
                .sign_prepared(&prepared)
                .unwrap();
            let barrier = std::sync::Barrier::new(2);

            let successes = std::thread::scope(|scope| {
                let workers: Vec<_> = (0..2)
                    .map(|_| {
                        let (protocol, barrier, request) = (&protocol, &barrier, request.clone());
                        scope.spawn(move || {
                            barrier.wait();
                            protocol.embed(request)
                        })
                    })
                    .collect();
                workers
                    .into_iter()
                    .map(|w| w.join().unwrap())
                    .filter(|r| r.is_ok())
                    .count()
            });

            assert_eq!(successes, 1);
            assert_eq!(store.list().unwrap().len(), 1);
            assert!(protocol.staging().is_empty().unwrap());
        }
    }

    #[test]
    fn test_unverified_embed_requires_expected_hash() {
        let store = Arc::new(MemoryStore::new());
        let config = ServiceConfig {
            verify_on_embed: false,
            ..ServiceConfig::default()
        };
        let protocol = SigningProtocol::with_config(
            store.clone(),
            Box::new(MemoryStaging::new(Duration::minutes(15))),
            &config,
        );
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();

        let prepared = protocol.prepare(b"real document".to_vec(), None).unwrap();
        let mut request = Signer::new(&keypair)
            .with_metadata(metadata())
            .sign_prepared(&prepared)
            .unwrap();
        request.signature = Signature::from_bytes(
            keypair
                .sign_hash(&hash_bytes(b"substituted document"))
                .unwrap(),
        );
        request.expected_hash = None;

        assert!(matches!(
            protocol.embed(request.clone()),
            Err(SignError::InvalidInput(_))
        ));
        assert!(store.list().unwrap().is_empty());

        request.expected_hash = Some(prepared.hash);
        assert!(protocol.embed(request).is_ok());
    }

    #[test]
    fn test_key_size_taken_from_public_key() {
        let (_, protocol) = protocol();
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();

        let prepared = protocol.prepare(b"sized".to_vec(), None).unwrap();
        let mut request = Signer::new(&keypair)
            .with_metadata(metadata())
            .sign_prepared(&prepared)
            .unwrap();
        request.metadata.key_size = Some(4096);

        let signed = protocol.embed(request).unwrap();
        assert_eq!(signed.record.signer.key_size, Some(1024));
    }

    #[test]
    fn test_abandoned_prepare_is_evicted() {
        let store = Arc::new(MemoryStore::new());
        let protocol = SigningProtocol::new(
            store,
            Box::new(MemoryStaging::new(Duration::zero())),
        );

        protocol.prepare(b"abandoned".to_vec(), None).unwrap();
        assert_eq!(protocol.purge_expired().unwrap(), 1);
        assert!(protocol.staging().is_empty().unwrap());
    }
}
