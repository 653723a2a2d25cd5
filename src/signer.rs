//! Client-side signing.
//!
//! A [`Signer`] borrows a [`KeyPair`] for the duration of the call and only
//! ever emits the signature and the public key, so the private half stays
//! with whoever owns the pair.

use crate::error::Result;
use crate::hash::{hash_bytes, hash_reader, DocumentHash};
use crate::keys::{KeyPair, PublicJwk};
use crate::protocol::{EmbedRequest, PreparedDocument};
use crate::signature::{Signature, SignerMetadata};
use std::io::Read;

/// A signature detached from the content it covers.
#[derive(Debug, Clone)]
pub struct DetachedSignature {
    /// The hash that was signed.
    pub document_hash: DocumentHash,

    /// RSA-PSS signature over the hash.
    pub signature: Signature,

    /// Public key matching the signing key.
    pub public_key: PublicJwk,
}

/// A builder for producing signatures with a borrowed keypair.
#[derive(Debug)]
pub struct Signer<'a> {
    keypair: &'a KeyPair,
    metadata: SignerMetadata,
}

impl<'a> Signer<'a> {
    /// Create a new signer with the given keypair.
    pub fn new(keypair: &'a KeyPair) -> Self {
        Self {
            keypair,
            metadata: SignerMetadata::default(),
        }
    }

    /// Attach signer metadata for [`Signer::sign_prepared`].
    pub fn with_metadata(mut self, metadata: SignerMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sign an already computed document hash.
    pub fn sign_hash(&self, hash: &DocumentHash) -> Result<DetachedSignature> {
        let signature = self.keypair.sign_hash(hash)?;
        Ok(DetachedSignature {
            document_hash: *hash,
            signature: Signature::from_bytes(signature),
            public_key: self.keypair.public_key().to_jwk(),
        })
    }

    /// Hash and sign a byte slice.
    pub fn sign_bytes(&self, data: &[u8]) -> Result<DetachedSignature> {
        self.sign_hash(&hash_bytes(data))
    }

    /// Hash and sign data from a reader (streaming).
    pub fn sign_reader<R: Read>(&self, reader: &mut R) -> Result<DetachedSignature> {
        let hash = hash_reader(reader)?;
        self.sign_hash(&hash)
    }

    /// Sign the hash returned by `prepare` and build the matching embed request.
    pub fn sign_prepared(&self, prepared: &PreparedDocument) -> Result<EmbedRequest> {
        let detached = self.sign_hash(&prepared.hash)?;

        let mut metadata = self.metadata.clone();
        if metadata.filename.is_none() {
            metadata.filename = Some(prepared.filename.clone());
        }
        metadata.key_size = Some(self.keypair.key_size().bits());

        Ok(EmbedRequest {
            handle: prepared.handle.clone(),
            signature: detached.signature,
            public_key: detached.public_key,
            metadata,
            expected_hash: Some(prepared.hash),
        })
    }
}

/// Convenience function to sign a hash with a keypair.
pub fn sign_hash(keypair: &KeyPair, hash: &DocumentHash) -> Result<DetachedSignature> {
    Signer::new(keypair).sign_hash(hash)
}
