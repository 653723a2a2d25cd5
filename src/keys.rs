//! RSA-PSS key generation, JWK interchange and key files.
//!
//! Keys travel as JSON Web Keys: `kty = "RSA"` with base64url (unpadded)
//! big-endian integers. A private JWK carries `d` and the CRT parameters;
//! the public half is always rebuilt from its `n`/`e`, so a private JWK
//! alone is enough to restore a [`KeyPair`].

use crate::error::{Result, SignError};
use crate::hash::DocumentHash;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, Pss, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Public exponent used for every generated key.
pub const PUBLIC_EXPONENT: u32 = 65537;

/// PSS salt length in bytes; equal to the SHA-256 digest size.
pub const PSS_SALT_LEN: usize = 32;

/// JWK `alg` value for RSA-PSS with SHA-256.
pub const JWK_ALG: &str = "PS256";

/// Version tag written into key files.
pub const KEY_FILE_VERSION: &str = "1.0";

const MAX_MODULUS_BITS: usize = 8192;

/// Allowed RSA modulus sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum KeySize {
    Rsa1024,
    #[default]
    Rsa2048,
    Rsa3072,
    Rsa4096,
    Rsa8192,
}

impl KeySize {
    /// Every supported size, smallest first.
    pub const ALL: [KeySize; 5] = [
        KeySize::Rsa1024,
        KeySize::Rsa2048,
        KeySize::Rsa3072,
        KeySize::Rsa4096,
        KeySize::Rsa8192,
    ];

    /// Modulus length in bits.
    pub fn bits(self) -> u32 {
        match self {
            KeySize::Rsa1024 => 1024,
            KeySize::Rsa2048 => 2048,
            KeySize::Rsa3072 => 3072,
            KeySize::Rsa4096 => 4096,
            KeySize::Rsa8192 => 8192,
        }
    }
}

impl TryFrom<u32> for KeySize {
    type Error = SignError;

    fn try_from(bits: u32) -> Result<Self> {
        KeySize::ALL
            .into_iter()
            .find(|size| size.bits() == bits)
            .ok_or(SignError::InvalidKeySize(bits))
    }
}

impl From<KeySize> for u32 {
    fn from(size: KeySize) -> u32 {
        size.bits()
    }
}

impl fmt::Display for KeySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Public half of an RSA key in JWK form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    pub kty: String,
    pub n: String,
    pub e: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ops: Option<Vec<String>>,
}

/// Private RSA key in JWK form. Wiped from memory on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PrivateJwk {
    pub kty: String,
    pub n: String,
    pub e: String,
    pub d: String,
    pub p: String,
    pub q: String,
    pub dp: String,
    pub dq: String,
    pub qi: String,
    #[zeroize(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[zeroize(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<bool>,
    #[zeroize(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ops: Option<Vec<String>>,
}

impl fmt::Debug for PrivateJwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateJwk")
            .field("kty", &self.kty)
            .field("n", &self.n)
            .field("e", &self.e)
            .finish_non_exhaustive()
    }
}

impl PrivateJwk {
    /// The public JWK carried inside this private key.
    pub fn public_jwk(&self) -> PublicJwk {
        PublicJwk {
            kty: self.kty.clone(),
            n: self.n.clone(),
            e: self.e.clone(),
            alg: self.alg.clone(),
            ext: self.ext,
            key_ops: Some(vec!["verify".to_string()]),
        }
    }
}

fn encode_uint(value: &BigUint) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(value.to_bytes_be())
}

fn decode_uint(field: &str, value: &str) -> Result<BigUint> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(value.trim().trim_end_matches('='))
        .map_err(|e| SignError::InvalidKey(format!("JWK field '{}': {}", field, e)))?;
    if bytes.is_empty() {
        return Err(SignError::InvalidKey(format!("JWK field '{}' is empty", field)));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}

fn check_jwk_header(kty: &str, alg: Option<&str>) -> Result<()> {
    if kty != "RSA" {
        return Err(SignError::InvalidKey(format!(
            "Unsupported key type '{}', expected 'RSA'",
            kty
        )));
    }
    match alg {
        Some(alg) if alg != JWK_ALG => Err(SignError::InvalidKey(format!(
            "Unsupported JWK algorithm '{}', expected '{}'",
            alg, JWK_ALG
        ))),
        _ => Ok(()),
    }
}

/// SHA-256 digest of the hash bytes; this is what PSS actually encodes.
fn pss_digest(hash: &DocumentHash) -> Vec<u8> {
    Sha256::digest(hash.as_bytes()).to_vec()
}

fn pss_scheme() -> Pss {
    Pss::new_with_salt::<Sha256>(PSS_SALT_LEN)
}

/// An RSA keypair held by the signing principal.
///
/// The private key never needs to leave this value: hand a `&KeyPair` to a
/// [`Signer`](crate::signer::Signer) for the duration of a signing call.
/// The underlying key material is zeroized when the pair is dropped.
pub struct KeyPair {
    private_key: RsaPrivateKey,
    key_size: KeySize,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_size", &self.key_size)
            .field("thumbprint", &self.public_key().thumbprint())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a new random keypair of the given size.
    pub fn generate(key_size: KeySize) -> Result<Self> {
        log::debug!("Generating {} RSA keypair", key_size);
        let private_key = RsaPrivateKey::new(&mut OsRng, key_size.bits() as usize)?;
        Ok(Self {
            private_key,
            key_size,
        })
    }

    /// Generate a keypair from a raw bit count.
    ///
    /// Sizes outside the allow-list fail with [`SignError::InvalidKeySize`]
    /// before any prime search starts.
    pub fn generate_bits(bits: u32) -> Result<Self> {
        let key_size = KeySize::try_from(bits)?;
        Self::generate(key_size)
    }

    /// Generate a 2048-bit keypair.
    pub fn generate_default() -> Result<Self> {
        Self::generate(KeySize::default())
    }

    /// The modulus size of this pair.
    pub fn key_size(&self) -> KeySize {
        self.key_size
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: self.private_key.to_public_key(),
        }
    }

    /// Sign a document hash with RSA-PSS (SHA-256, MGF1-SHA-256, 32-byte salt).
    pub fn sign_hash(&self, hash: &DocumentHash) -> Result<Vec<u8>> {
        let digest = pss_digest(hash);
        let signature = self
            .private_key
            .sign_with_rng(&mut OsRng, pss_scheme(), &digest)?;
        Ok(signature)
    }

    /// Export the private key as a JWK.
    pub fn to_private_jwk(&self) -> Result<PrivateJwk> {
        let primes = self.private_key.primes();
        if primes.len() != 2 {
            return Err(SignError::InvalidKey(format!(
                "Expected a two-prime key, found {} primes",
                primes.len()
            )));
        }
        let (p, q) = (&primes[0], &primes[1]);
        let one = BigUint::from(1u32);
        let d = self.private_key.d();
        let qi = self.private_key.crt_coefficient().ok_or_else(|| {
            SignError::InvalidKey("Key has no precomputed CRT coefficient".to_string())
        })?;

        Ok(PrivateJwk {
            kty: "RSA".to_string(),
            n: encode_uint(self.private_key.n()),
            e: encode_uint(self.private_key.e()),
            d: encode_uint(d),
            p: encode_uint(p),
            q: encode_uint(q),
            dp: encode_uint(&(d % &(p - &one))),
            dq: encode_uint(&(d % &(q - &one))),
            qi: encode_uint(&qi),
            alg: Some(JWK_ALG.to_string()),
            ext: Some(true),
            key_ops: Some(vec!["sign".to_string()]),
        })
    }

    /// Restore a keypair from a private JWK alone.
    ///
    /// The public key is rebuilt from the JWK's `n` and `e`.
    pub fn from_private_jwk(jwk: &PrivateJwk) -> Result<Self> {
        check_jwk_header(&jwk.kty, jwk.alg.as_deref())?;

        let n = decode_uint("n", &jwk.n)?;
        let e = decode_uint("e", &jwk.e)?;
        let d = decode_uint("d", &jwk.d)?;
        let p = decode_uint("p", &jwk.p)?;
        let q = decode_uint("q", &jwk.q)?;

        let bits = n.bits();
        let key_size = KeySize::try_from(bits as u32)?;

        let one = BigUint::from(1u32);
        if p <= one || q <= one || p == q {
            return Err(SignError::InvalidKey(
                "Private key primes must be distinct and greater than one".to_string(),
            ));
        }
        if &p * &q != n {
            return Err(SignError::InvalidKey(
                "Private key primes do not multiply to the modulus".to_string(),
            ));
        }
        let ed = &e * &d;
        if &ed % &(&p - &one) != one || &ed % &(&q - &one) != one {
            return Err(SignError::InvalidKey(
                "Private exponent does not match the public exponent".to_string(),
            ));
        }

        let private_key = RsaPrivateKey::from_components(n, e, d, vec![p, q])?;
        Ok(Self {
            private_key,
            key_size,
        })
    }

    /// Restore a keypair from both halves, checking that they belong together.
    pub fn from_jwk_pair(public: &PublicJwk, private: &PrivateJwk) -> Result<Self> {
        let pair = Self::from_private_jwk(private)?;
        let claimed = PublicKey::from_jwk(public)?;
        if claimed != pair.public_key() {
            return Err(SignError::InvalidKey(
                "Public key does not match the private key".to_string(),
            ));
        }
        Ok(pair)
    }

    /// Save the keypair to a JSON key file.
    ///
    /// The file holds `version`, `publicKey`, `privateKey`, `keySize` and
    /// `createdAt`. Permissions are set to 0o600 on Unix.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bundle = KeyBundle {
            version: KEY_FILE_VERSION.to_string(),
            public_key: self.public_key().to_jwk(),
            private_key: self.to_private_jwk()?,
            key_size: self.key_size,
            created_at: Utc::now(),
        };
        let mut json = serde_json::to_string_pretty(&bundle)?;
        fs::write(path, &json)?;
        json.zeroize();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Load a keypair from a JSON key file written by [`KeyPair::save_to_file`].
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut content = fs::read_to_string(path)?;
        let parsed: std::result::Result<KeyBundle, _> = serde_json::from_str(&content);
        content.zeroize();
        let bundle = parsed?;

        if bundle.version != KEY_FILE_VERSION {
            return Err(SignError::InvalidKey(format!(
                "Unsupported key file version '{}'",
                bundle.version
            )));
        }

        let pair = Self::from_jwk_pair(&bundle.public_key, &bundle.private_key)?;
        if pair.key_size != bundle.key_size {
            return Err(SignError::InvalidKey(format!(
                "Key file declares {} but the modulus is {}",
                bundle.key_size, pair.key_size
            )));
        }
        Ok(pair)
    }
}

/// On-disk form of a keypair.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyBundle {
    version: String,
    public_key: PublicJwk,
    private_key: PrivateJwk,
    key_size: KeySize,
    created_at: DateTime<Utc>,
}

/// Shareable export of a public key, as handed to verifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyExport {
    pub version: String,
    pub public_key: PublicJwk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PublicKeyDocument {
    Export(PublicKeyExport),
    Bare(PublicJwk),
}

/// An RSA public key for verifying signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    key: RsaPublicKey,
}

impl PublicKey {
    /// Build a public key from its JWK form.
    pub fn from_jwk(jwk: &PublicJwk) -> Result<Self> {
        check_jwk_header(&jwk.kty, jwk.alg.as_deref())?;
        let n = decode_uint("n", &jwk.n)?;
        let e = decode_uint("e", &jwk.e)?;
        KeySize::try_from(n.bits() as u32)?;
        let key = RsaPublicKey::new_with_max_size(n, e, MAX_MODULUS_BITS)?;
        Ok(Self { key })
    }

    /// Parse a public key from JSON: either a bare JWK or a
    /// [`PublicKeyExport`] wrapper.
    pub fn from_json(json: &str) -> Result<Self> {
        match serde_json::from_str::<PublicKeyDocument>(json)? {
            PublicKeyDocument::Export(export) => Self::from_jwk(&export.public_key),
            PublicKeyDocument::Bare(jwk) => Self::from_jwk(&jwk),
        }
    }

    /// Export as a JWK.
    pub fn to_jwk(&self) -> PublicJwk {
        PublicJwk {
            kty: "RSA".to_string(),
            n: encode_uint(self.key.n()),
            e: encode_uint(self.key.e()),
            alg: Some(JWK_ALG.to_string()),
            ext: Some(true),
            key_ops: Some(vec!["verify".to_string()]),
        }
    }

    /// Export as a pretty-printed [`PublicKeyExport`] document.
    pub fn export_json(&self, filename: Option<&str>) -> Result<String> {
        let export = PublicKeyExport {
            version: KEY_FILE_VERSION.to_string(),
            public_key: self.to_jwk(),
            key_size: Some(self.key_size_bits()),
            created_at: Some(Utc::now()),
            description: Some("Public key for verifying document signatures".to_string()),
            filename: filename.map(str::to_string),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Modulus length in bits.
    pub fn key_size_bits(&self) -> u32 {
        self.key.n().bits() as u32
    }

    /// RFC 7638 JWK thumbprint (base64url SHA-256 of the canonical members).
    pub fn thumbprint(&self) -> String {
        use base64::Engine;
        let canonical = format!(
            r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
            encode_uint(self.key.e()),
            encode_uint(self.key.n())
        );
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }

    /// Verify an RSA-PSS signature over a document hash.
    pub fn verify_hash(&self, hash: &DocumentHash, signature: &[u8]) -> Result<()> {
        let expected_len = self.key.size();
        if signature.len() != expected_len {
            return Err(SignError::InvalidInput(format!(
                "Signature is {} bytes, expected {} for a {}-bit key",
                signature.len(),
                expected_len,
                self.key_size_bits()
            )));
        }
        let digest = pss_digest(hash);
        self.key.verify(pss_scheme(), &digest, signature)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use tempfile::tempdir;

    #[test]
    fn test_key_size_allow_list() {
        for bits in [1024, 2048, 3072, 4096, 8192] {
            assert_eq!(KeySize::try_from(bits).unwrap().bits(), bits);
        }
        for bits in [0, 512, 1023, 2047, 16384] {
            assert!(matches!(
                KeySize::try_from(bits),
                Err(SignError::InvalidKeySize(b)) if b == bits
            ));
        }
    }

    #[test]
    fn test_generate_rejects_512_bits() {
        let err = KeyPair::generate_bits(512).unwrap_err();
        assert!(matches!(err, SignError::InvalidKeySize(512)));
    }

    #[test]
    fn test_key_size_serde_as_number() {
        assert_eq!(serde_json::to_string(&KeySize::Rsa3072).unwrap(), "3072");
        let size: KeySize = serde_json::from_str("4096").unwrap();
        assert_eq!(size, KeySize::Rsa4096);
        assert!(serde_json::from_str::<KeySize>("512").is_err());
    }

    #[test]
    fn test_sign_and_verify_hash() {
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let hash = hash_bytes(b"%PDF-1.4 test");

        let signature = keypair.sign_hash(&hash).unwrap();
        assert_eq!(signature.len(), 128);
        assert!(keypair.public_key().verify_hash(&hash, &signature).is_ok());
    }

    #[test]
    fn test_signatures_are_randomized() {
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let hash = hash_bytes(b"same content");

        let sig1 = keypair.sign_hash(&hash).unwrap();
        let sig2 = keypair.sign_hash(&hash).unwrap();
        assert_ne!(sig1, sig2);
    }

    #[test]
    fn test_invalid_signature_fails() {
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let other = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let hash = hash_bytes(b"Test message");

        let signature = other.sign_hash(&hash).unwrap();
        assert!(keypair.public_key().verify_hash(&hash, &signature).is_err());
    }

    #[test]
    fn test_private_jwk_only_import() {
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let jwk = keypair.to_private_jwk().unwrap();

        let restored = KeyPair::from_private_jwk(&jwk).unwrap();
        assert_eq!(restored.public_key(), keypair.public_key());
        assert_eq!(restored.key_size(), KeySize::Rsa1024);

        let hash = hash_bytes(b"restored");
        let signature = restored.sign_hash(&hash).unwrap();
        assert!(keypair.public_key().verify_hash(&hash, &signature).is_ok());
    }

    #[test]
    fn test_jwk_pair_mismatch_rejected() {
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let other = KeyPair::generate(KeySize::Rsa1024).unwrap();

        let err = KeyPair::from_jwk_pair(
            &other.public_key().to_jwk(),
            &keypair.to_private_jwk().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, SignError::InvalidKey(_)));
    }

    #[test]
    fn test_tampered_private_jwk_rejected() {
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let other = KeyPair::generate(KeySize::Rsa1024).unwrap();

        let mut jwk = keypair.to_private_jwk().unwrap();
        jwk.q = other.to_private_jwk().unwrap().q.clone();
        assert!(matches!(
            KeyPair::from_private_jwk(&jwk),
            Err(SignError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_degenerate_primes_rejected() {
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();

        // p = 1, q = n satisfies p * q == n
        let mut jwk = keypair.to_private_jwk().unwrap();
        jwk.p = "AQ".to_string();
        jwk.q = jwk.n.clone();
        assert!(matches!(
            KeyPair::from_private_jwk(&jwk),
            Err(SignError::InvalidKey(_))
        ));

        let mut jwk = keypair.to_private_jwk().unwrap();
        jwk.q = jwk.p.clone();
        assert!(matches!(
            KeyPair::from_private_jwk(&jwk),
            Err(SignError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_public_jwk_fields() {
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let jwk = keypair.public_key().to_jwk();

        assert_eq!(jwk.kty, "RSA");
        // 65537 = 0x010001
        assert_eq!(jwk.e, "AQAB");
        assert!(!jwk.n.contains('='));

        let json = serde_json::to_value(&jwk).unwrap();
        assert!(json.get("d").is_none());
    }

    #[test]
    fn test_public_key_rejects_non_rsa() {
        let jwk = PublicJwk {
            kty: "EC".to_string(),
            n: "AQAB".to_string(),
            e: "AQAB".to_string(),
            alg: None,
            ext: None,
            key_ops: None,
        };
        assert!(matches!(PublicKey::from_jwk(&jwk), Err(SignError::InvalidKey(_))));
    }

    #[test]
    fn test_public_key_from_json_bare_and_export() {
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let public_key = keypair.public_key();

        let bare = serde_json::to_string(&public_key.to_jwk()).unwrap();
        assert_eq!(PublicKey::from_json(&bare).unwrap(), public_key);

        let export = public_key.export_json(Some("contract.pdf")).unwrap();
        assert!(export.contains("\"publicKey\""));
        assert!(export.contains("\"keySize\": 1024"));
        assert_eq!(PublicKey::from_json(&export).unwrap(), public_key);
    }

    #[test]
    fn test_thumbprint_is_stable() {
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let restored = PublicKey::from_jwk(&keypair.public_key().to_jwk()).unwrap();
        assert_eq!(keypair.public_key().thumbprint(), restored.thumbprint());
        assert_eq!(restored.thumbprint().len(), 43);
    }

    #[test]
    fn test_key_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("signer.json");

        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
        keypair.save_to_file(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"privateKey\""));
        assert!(content.contains("\"keySize\": 1024"));

        let restored = KeyPair::load_from_file(&path).unwrap();
        assert_eq!(restored.public_key(), keypair.public_key());
    }

    #[test]
    fn test_debug_does_not_leak_private_exponent() {
        let keypair = KeyPair::generate(KeySize::Rsa1024).unwrap();
        let jwk = keypair.to_private_jwk().unwrap();

        assert!(!format!("{:?}", jwk).contains(&jwk.d));
        assert!(!format!("{:?}", keypair).contains(&jwk.d));
    }
}
