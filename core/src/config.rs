//! Registry configuration.
//!
//! Configuration values are supplied by the application (typically
//! deserialized from a file or environment), never hardcoded in the registry.

use crate::catalog::{TicketCatalog, TicketDefinition};
use crate::cipher::{AesGcmCipher, CipherExecutor, NoOpCipher};
use crate::error::{RegistryError, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Ticket registry configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Ticket types to register. Empty means the standard catalog.
    pub ticket_definitions: Vec<TicketDefinition>,

    /// Payload and id protection.
    pub crypto: CryptoConfig,
}

impl RegistryConfig {
    /// Register `definition` in addition to the configured ones.
    #[must_use]
    pub fn with_definition(mut self, definition: TicketDefinition) -> Self {
        self.ticket_definitions.push(definition);
        self
    }

    /// Set the crypto configuration.
    #[must_use]
    pub fn with_crypto(mut self, crypto: CryptoConfig) -> Self {
        self.crypto = crypto;
        self
    }

    /// Build the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Configuration`] if a definition is invalid.
    pub fn build_catalog(&self) -> Result<TicketCatalog> {
        if self.ticket_definitions.is_empty() {
            return Ok(TicketCatalog::default());
        }
        TicketCatalog::from_definitions(self.ticket_definitions.iter().cloned())
    }

    /// Build the cipher.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Configuration`] if encryption is enabled
    /// without a usable key.
    pub fn build_cipher(&self) -> Result<Arc<dyn CipherExecutor>> {
        if !self.crypto.enabled {
            return Ok(Arc::new(NoOpCipher));
        }
        let key = self.crypto.encryption_key.as_deref().ok_or_else(|| {
            RegistryError::Configuration("Encryption enabled but no key configured".to_string())
        })?;
        let cipher = AesGcmCipher::from_base64(key)
            .map_err(|e| RegistryError::Configuration(e.to_string()))?;
        Ok(Arc::new(cipher))
    }
}

/// Crypto settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Encrypt payloads and digest ids.
    pub enabled: bool,

    /// Base64-encoded 32-byte AES key.
    pub encryption_key: Option<String>,
}

impl CryptoConfig {
    /// Encryption enabled with `encryption_key` (base64).
    #[must_use]
    pub fn encrypted(encryption_key: impl Into<String>) -> Self {
        Self {
            enabled: true,
            encryption_key: Some(encryption_key.into()),
        }
    }
}

/// Cleaner scheduling.
///
/// Defaults: enabled, first run after 20 seconds, then every 120 seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// Run the cleaner at all.
    pub enabled: bool,

    /// Delay before the first run.
    pub start_delay_seconds: u64,

    /// Interval between runs.
    pub repeat_interval_seconds: u64,

    /// Cluster lock settings.
    pub lock: LockConfig,
}

impl CleanerConfig {
    /// Enable or disable the cleaner.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the start delay.
    #[must_use]
    pub const fn with_start_delay(mut self, seconds: u64) -> Self {
        self.start_delay_seconds = seconds;
        self
    }

    /// Set the repeat interval.
    #[must_use]
    pub const fn with_repeat_interval(mut self, seconds: u64) -> Self {
        self.repeat_interval_seconds = seconds;
        self
    }

    /// Delay before the first run.
    #[must_use]
    pub const fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_seconds)
    }

    /// Interval between runs, at least one second.
    #[must_use]
    pub const fn repeat_interval(&self) -> Duration {
        if self.repeat_interval_seconds == 0 {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(self.repeat_interval_seconds)
        }
    }
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_delay_seconds: 20,
            repeat_interval_seconds: 120,
            lock: LockConfig::default(),
        }
    }
}

/// Cluster lock settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Name of the lock shared by all nodes.
    pub application_id: String,

    /// This node's owner id. Generated when absent.
    pub owner_id: Option<String>,

    /// How long a hold lasts before another node may take over.
    pub ttl_seconds: u64,
}

impl LockConfig {
    /// How long a hold lasts. Zero is read as one second.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        if self.ttl_seconds == 0 {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(self.ttl_seconds)
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            application_id: "ticket-registry-cleaner".to_string(),
            owner_id: None,
            ttl_seconds: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;
    use crate::expiration::ExpirationPolicy;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    #[test]
    fn empty_definitions_use_standard_catalog() {
        let catalog = RegistryConfig::default().build_catalog().unwrap();
        assert_eq!(catalog, TicketCatalog::default());
    }

    #[test]
    fn configured_definitions_replace_standard_catalog() {
        let config = RegistryConfig::default().with_definition(TicketDefinition::new(
            "OTP",
            "one_time_tokens",
            false,
            ExpirationPolicy::hard_timeout(Duration::from_secs(60)),
        ));
        let catalog = config.build_catalog().unwrap();
        assert_eq!(catalog.find_all().len(), 1);
        assert!(catalog.find("OTP-1").is_some());
        assert!(catalog.find("TGT-1").is_none());
    }

    #[test]
    fn cipher_is_disabled_by_default() {
        let cipher = RegistryConfig::default().build_cipher().unwrap();
        assert!(!cipher.is_enabled());
    }

    #[test]
    fn encryption_requires_a_valid_key() {
        let missing = RegistryConfig::default().with_crypto(CryptoConfig {
            enabled: true,
            encryption_key: None,
        });
        assert!(matches!(
            missing.build_cipher(),
            Err(RegistryError::Configuration(_))
        ));

        let short = RegistryConfig::default().with_crypto(CryptoConfig::encrypted("c2hvcnQ="));
        assert!(short.build_cipher().is_err());

        let valid = RegistryConfig::default()
            .with_crypto(CryptoConfig::encrypted(STANDARD.encode([9u8; 32])));
        assert!(valid.build_cipher().unwrap().is_enabled());
    }

    #[test]
    fn cleaner_defaults() {
        let config = CleanerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.start_delay(), Duration::from_secs(20));
        assert_eq!(config.repeat_interval(), Duration::from_secs(120));
        assert_eq!(config.lock.ttl(), Duration::from_secs(3600));
        assert_eq!(config.with_repeat_interval(0).repeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn deserializes_partial_configuration() {
        let config: CleanerConfig =
            serde_json::from_str(r#"{"enabled": false, "lock": {"ttl_seconds": 60}}"#).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.repeat_interval_seconds, 120);
        assert_eq!(config.lock.application_id, "ticket-registry-cleaner");
        assert_eq!(config.lock.ttl_seconds, 60);
    }

    #[test]
    fn zero_lock_ttl_reads_as_one_second() {
        let config: LockConfig = serde_json::from_str(r#"{"ttl_seconds": 0}"#).unwrap();
        assert_eq!(config.ttl(), Duration::from_secs(1));
    }
}
