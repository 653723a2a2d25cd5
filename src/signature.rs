//! Signature records and their JSON form.

use crate::error::{Result, SignError};
use crate::hash::DocumentHash;
use crate::keys::{PublicJwk, PublicKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Filename recorded when the caller supplies none.
pub const DEFAULT_FILENAME: &str = "document.pdf";

/// Length of the hash and signature previews in a [`RecordSummary`].
pub const PREVIEW_LEN: usize = 32;

/// Raw detached signature bytes. Serialized as standard base64.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Wrap raw signature bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get the raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encode the signature as a base64 string.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.0)
    }

    /// Decode a signature from a base64 string.
    pub fn from_base64(s: &str) -> Result<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD.decode(s.trim())?;
        if bytes.is_empty() {
            return Err(SignError::InvalidInput("Signature is empty".to_string()));
        }
        Ok(Self(bytes))
    }

    /// Number of signature bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no signature bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Signature {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Signature::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// Descriptive information about the signer.
///
/// Not cryptographically bound to the signature; it is stored next to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_size: Option<u32>,
}

impl SignerMetadata {
    /// Create metadata for the named signer.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set where the document was signed.
    pub fn with_location<S: Into<String>>(mut self, location: S) -> Self {
        self.location = location.into();
        self
    }

    /// Set why the document was signed.
    pub fn with_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set contact details for the signer.
    pub fn with_contact<S: Into<String>>(mut self, contact: S) -> Self {
        self.contact = Some(contact.into());
        self
    }

    /// Set the original filename.
    pub fn with_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Record the signing key's modulus size.
    pub fn with_key_size(mut self, bits: u32) -> Self {
        self.key_size = Some(bits);
        self
    }

    /// Check that name, location and reason are present.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("name", &self.name),
            ("location", &self.location),
            ("reason", &self.reason),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SignError::InvalidInput(format!(
                "Missing signer metadata: {}",
                missing.join(", ")
            )))
        }
    }

    /// The original filename, or [`DEFAULT_FILENAME`].
    pub fn filename_or_default(&self) -> &str {
        self.filename
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(DEFAULT_FILENAME)
    }
}

/// A persisted signature over one document hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    /// Unique record id (UUID v4).
    pub id: String,

    /// SHA-256 of the signed document (base64 encoded).
    pub document_hash: DocumentHash,

    /// RSA-PSS signature over the hash (base64 encoded).
    pub signature: Signature,

    /// Public key supplied by the signer.
    pub public_key: PublicJwk,

    /// Descriptive signer information.
    pub signer: SignerMetadata,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl SignatureRecord {
    /// Create a new record with a fresh id and the current time.
    pub fn new(
        document_hash: DocumentHash,
        signature: Signature,
        public_key: PublicJwk,
        signer: SignerMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_hash,
            signature,
            public_key,
            signer,
            created_at: Utc::now(),
        }
    }

    /// Decode the stored public key.
    pub fn get_public_key(&self) -> Result<PublicKey> {
        PublicKey::from_jwk(&self.public_key)
    }

    /// Verify the stored signature against a hash with the given key.
    pub fn verify_with(&self, public_key: &PublicKey, document_hash: &DocumentHash) -> Result<()> {
        public_key.verify_hash(document_hash, self.signature.as_bytes())
    }

    /// Parse a record from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let record: Self = serde_json::from_str(json)?;
        Ok(record)
    }

    /// Serialize the record to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        let json = serde_json::to_string_pretty(self)?;
        Ok(json)
    }

    /// Condensed view for listings.
    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            id: self.id.clone(),
            file_hash: preview(&self.document_hash.to_base64()),
            signature_preview: preview(&self.signature.to_base64()),
            signer_name: self.signer.name.clone(),
            signer_location: self.signer.location.clone(),
            signer_reason: self.signer.reason.clone(),
            signer_contact: self.signer.contact.clone(),
            original_filename: self.signer.filename_or_default().to_string(),
            created_at: self.created_at,
        }
    }
}

/// Listing row with truncated hash and signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub id: String,
    pub file_hash: String,
    pub signature_preview: String,
    pub signer_name: String,
    pub signer_location: String,
    pub signer_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_contact: Option<String>,
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
}

fn preview(s: &str) -> String {
    if s.len() > PREVIEW_LEN {
        format!("{}...", &s[..PREVIEW_LEN])
    } else {
        s.to_string()
    }
}
