//! Broker connection and instance key material.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ConfigError, KEY_LEN, decode_key};

/// Default bound on every broker call.
fn default_operation_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Connection settings and key material of one instance.
///
/// `signing_key` is the base64 ed25519 secret this instance signs its
/// messages with. `encryption_key` is the base64 AES-256 master key from
/// which per-topic payload keys are derived; every instance sharing a
/// topic must hold the same value.
///
/// # Example
///
/// ```no_run
/// # use ironvault_types::config::{BrokerConfig, encode_key};
/// let config = BrokerConfig::builder()
///     .endpoints(vec!["kafka-0:9093".to_string()])
///     .signing_key(encode_key(&[1; 32]))
///     .encryption_key(encode_key(&[2; 32]))
///     .build()
///     .expect("valid broker config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BrokerConfig {
    /// Broker bootstrap endpoints (`host:port`).
    ///
    /// Must contain at least one non-blank entry. The replication factor of
    /// created topics equals the number of endpoints.
    pub endpoints: Vec<String>,
    /// Upper bound on each broker call.
    ///
    /// Must be > 0.
    #[serde(default = "default_operation_timeout", with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub operation_timeout: Duration,
    /// Base64 ed25519 secret key.
    pub signing_key: String,
    /// Base64 AES-256 master key.
    pub encryption_key: String,
}

#[bon::bon]
impl BrokerConfig {
    /// Creates a new broker configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is invalid.
    #[builder]
    pub fn new(
        endpoints: Vec<String>,
        #[builder(default = default_operation_timeout())] operation_timeout: Duration,
        signing_key: String,
        encryption_key: String,
    ) -> Result<Self, ConfigError> {
        let config = Self { endpoints, operation_timeout, signing_key, encryption_key };
        config.validate()?;
        Ok(config)
    }
}

impl BrokerConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Validation {
                message: "endpoints must not be empty".to_string(),
            });
        }
        if self.endpoints.iter().any(|e| e.trim().is_empty()) {
            return Err(ConfigError::Validation {
                message: "endpoints must not contain blank entries".to_string(),
            });
        }
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::Validation {
                message: "operation_timeout must be > 0".to_string(),
            });
        }
        decode_key("signing_key", &self.signing_key)?;
        decode_key("encryption_key", &self.encryption_key)?;
        Ok(())
    }

    /// Decoded ed25519 secret key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the stored value is malformed.
    pub fn signing_key_bytes(&self) -> Result<[u8; KEY_LEN], ConfigError> {
        decode_key("signing_key", &self.signing_key)
    }

    /// Decoded AES-256 master key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the stored value is malformed.
    pub fn encryption_key_bytes(&self) -> Result<[u8; KEY_LEN], ConfigError> {
        decode_key("encryption_key", &self.encryption_key)
    }
}
