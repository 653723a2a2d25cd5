//! # rust-pdf-sign
//!
//! Detached digital signatures for PDF documents using SHA-256 and RSA-PSS.
//!
//! ## Features
//!
//! - **SHA-256 hashing** of the exact document bytes, nothing normalised
//! - **RSA-PSS signatures** (SHA-256, MGF1-SHA-256, 32-byte salt) with keys
//!   of 1024, 2048, 3072, 4096 or 8192 bits
//! - **Two-phase signing**: `prepare` stages a document and hands out its
//!   hash, `embed` binds a signature made elsewhere to the staged bytes
//! - **Signature store** keyed by document hash, in memory or as a JSON file
//! - **Two verification modes**: with a supplied signature, or by looking the
//!   stored record up and checking it against the caller's key
//! - **JWK** import and export of keys
//!
//! ## Quick Start
//!
//! ### Generate a Keypair
//!
//! ```rust
//! use rust_pdf_sign::{KeyPair, KeySize};
//!
//! let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
//! let jwk = keypair.public_key().to_jwk();
//! assert_eq!(jwk.kty, "RSA");
//! // keypair.save_to_file("signing_key.json").unwrap();
//! ```
//!
//! ### Sign and Verify Directly
//!
//! ```rust
//! use rust_pdf_sign::{verify_bytes, KeyPair, KeySize, Signer};
//!
//! let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
//! let document = b"%PDF-1.7 Important document content";
//!
//! let detached = Signer::new(&keypair).sign_bytes(document).unwrap();
//!
//! let result = verify_bytes(document, &keypair.public_key(), &detached.signature);
//! assert!(result.valid);
//! ```
//!
//! ### Two-Phase Signing
//!
//! ```rust
//! use rust_pdf_sign::{KeyPair, KeySize, ServiceConfig, SignatureService, Signer, SignerMetadata};
//!
//! let service = SignatureService::from_config(&ServiceConfig::default()).unwrap();
//! let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
//! let document = b"%PDF-1.7 Contract".to_vec();
//!
//! // Phase 1: the service stages the bytes and returns the hash to sign.
//! let prepared = service.protocol().prepare(document.clone(), None).unwrap();
//!
//! // The signer signs the hash with a key the service never sees.
//! let request = Signer::new(&keypair)
//!     .with_metadata(
//!         SignerMetadata::new("Alice")
//!             .with_location("Gdansk")
//!             .with_reason("Approval"),
//!     )
//!     .sign_prepared(&prepared)
//!     .unwrap();
//!
//! // Phase 2: the signature is bound to the staged bytes and stored.
//! let signed = service.protocol().embed(request).unwrap();
//! assert_eq!(signed.document, document);
//!
//! // Later, anyone holding the document and the public key can check it.
//! let key_json = keypair.public_key().export_json(None).unwrap();
//! let response = service.verify(&document, &key_json, None).unwrap();
//! assert!(response.valid);
//! assert_eq!(response.signer_metadata.unwrap().name, "Alice");
//! ```

pub mod config;
pub mod error;
pub mod hash;
pub mod keys;
pub mod protocol;
pub mod service;
pub mod signature;
pub mod signer;
pub mod staging;
pub mod store;
pub mod verifier;

// Re-export main types for convenience
pub use config::{ResignPolicy, ServiceConfig};
pub use error::{Result, SignError};
pub use hash::{hash_bytes, hash_file, hash_reader, DocumentHash};
pub use keys::{KeyPair, KeySize, PrivateJwk, PublicJwk, PublicKey, PublicKeyExport};
pub use protocol::{EmbedRequest, PreparedDocument, SignedDocument, SigningProtocol};
pub use service::{EmbedPayload, PrepareResponse, SignatureService, VerifyResponse};
pub use signature::{RecordSummary, Signature, SignatureRecord, SignerMetadata};
pub use signer::{sign_hash, DetachedSignature, Signer};
pub use staging::{DirStaging, Handle, MemoryStaging, StagedDocument, StagingArea};
pub use store::{JsonFileStore, MemoryStore, SignatureStore, StoreStats};
pub use verifier::{verify_bytes, FailureReason, VerificationMode, VerificationResult, Verifier};
