//! Service configuration loaded from TOML.
//!
//! ```toml
//! staging_ttl_secs = 900
//! staging_dir = "/var/lib/pdf-sign/staging"
//! store_path = "/var/lib/pdf-sign/signatures.json"
//! max_document_bytes = 52428800
//! resign_policy = "overwrite"
//! verify_on_embed = true
//! default_key_size = 2048
//! ```

use crate::error::{Result, SignError};
use crate::keys::KeySize;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a config file for [`ServiceConfig::load_default`].
pub const CONFIG_ENV_VAR: &str = "RUST_PDF_SIGN_CONFIG";

/// What to do when a document that already has a record is signed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResignPolicy {
    /// Replace the existing record (last write wins).
    #[default]
    Overwrite,
    /// Refuse with `AlreadySigned`.
    Reject,
}

/// Settings for the signing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// How long a prepared document waits for `embed`.
    pub staging_ttl_secs: u64,

    /// Directory for staged files; in memory when unset.
    pub staging_dir: Option<PathBuf>,

    /// JSON file backing the signature store; in memory when unset.
    pub store_path: Option<PathBuf>,

    /// Largest document accepted by `prepare`.
    pub max_document_bytes: usize,

    pub resign_policy: ResignPolicy,

    /// Check the signature against the staged hash before storing it.
    pub verify_on_embed: bool,

    /// Key size for generated keys.
    pub default_key_size: KeySize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            staging_ttl_secs: 15 * 60,
            staging_dir: None,
            store_path: None,
            max_document_bytes: 50 * 1024 * 1024,
            resign_policy: ResignPolicy::default(),
            verify_on_embed: true,
            default_key_size: KeySize::default(),
        }
    }
}

impl ServiceConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from the file named by [`CONFIG_ENV_VAR`], or fall back to defaults.
    pub fn load_default() -> Result<Self> {
        match env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::load(path.trim()),
            _ => Ok(Self::default()),
        }
    }

    /// Reject settings that would disable a limit.
    pub fn validate(&self) -> Result<()> {
        if self.staging_ttl_secs == 0 {
            return Err(SignError::InvalidInput(
                "staging_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.staging_ttl_secs > i64::MAX as u64 / 1000 {
            return Err(SignError::InvalidInput(format!(
                "staging_ttl_secs {} is too large",
                self.staging_ttl_secs
            )));
        }
        if self.max_document_bytes == 0 {
            return Err(SignError::InvalidInput(
                "max_document_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Staging TTL as a duration.
    pub fn staging_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staging_ttl_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.staging_ttl(), chrono::Duration::minutes(15));
        assert_eq!(config.resign_policy, ResignPolicy::Overwrite);
        assert_eq!(config.default_key_size, KeySize::Rsa2048);
        assert!(config.verify_on_embed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = ServiceConfig::from_toml_str(
            r#"
            staging_ttl_secs = 60
            resign_policy = "reject"
            default_key_size = 4096
            "#,
        )
        .unwrap();

        assert_eq!(config.staging_ttl_secs, 60);
        assert_eq!(config.resign_policy, ResignPolicy::Reject);
        assert_eq!(config.default_key_size, KeySize::Rsa4096);
        assert_eq!(config.max_document_bytes, ServiceConfig::default().max_document_bytes);
    }

    #[test]
    fn test_rejects_bad_key_size() {
        let err = ServiceConfig::from_toml_str("default_key_size = 512").unwrap_err();
        assert!(matches!(err, SignError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_field() {
        assert!(ServiceConfig::from_toml_str("stagin_ttl = 5").is_err());
    }

    #[test]
    fn test_rejects_zero_limits() {
        assert!(matches!(
            ServiceConfig::from_toml_str("staging_ttl_secs = 0"),
            Err(SignError::InvalidInput(_))
        ));
        assert!(matches!(
            ServiceConfig::from_toml_str("max_document_bytes = 0"),
            Err(SignError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_load_default_follows_env_var() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("from-env.toml");
        fs::write(&path, "staging_ttl_secs = 42\nresign_policy = \"reject\"\n").unwrap();

        env::set_var(CONFIG_ENV_VAR, &path);
        let config = ServiceConfig::load_default();
        env::remove_var(CONFIG_ENV_VAR);

        let config = config.unwrap();
        assert_eq!(config.staging_ttl_secs, 42);
        assert_eq!(config.resign_policy, ResignPolicy::Reject);

        assert_eq!(ServiceConfig::load_default().unwrap(), ServiceConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pdf-sign.toml");
        fs::write(
            &path,
            "store_path = \"signatures.json\"\nverify_on_embed = false\n",
        )
        .unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.store_path, Some(PathBuf::from("signatures.json")));
        assert!(!config.verify_on_embed);
    }
}
