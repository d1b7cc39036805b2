//! Configuration types for ironvault.
//!
//! All config structs validate their values at construction time via
//! fallible builders. Post-deserialization validation is available via
//! the `validate()` method on each struct.

// The schemars `JsonSchema` derive macro internally uses `.unwrap()` in its
// expansions.
#![allow(clippy::disallowed_methods)]

mod broker;
mod consumer;
mod topics;

use base64::{Engine, engine::general_purpose::STANDARD};
pub use broker::*;
pub use consumer::*;
use snafu::Snafu;
pub use topics::*;

use crate::error::{ErrorCode, HasErrorCode};

/// Configuration validation error.
///
/// Returned when a configuration value is outside its valid range or
/// violates a cross-field constraint.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

impl HasErrorCode for ConfigError {
    fn code(&self) -> ErrorCode {
        ErrorCode::AppConfig
    }
}

/// Length in bytes of every key this workspace handles (ed25519 and AES-256).
pub const KEY_LEN: usize = 32;

/// Decodes a base64 key and checks it is exactly [`KEY_LEN`] bytes.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] naming `field` if the value is not
/// valid base64 or has the wrong length.
pub fn decode_key(field: &str, value: &str) -> Result<[u8; KEY_LEN], ConfigError> {
    let bytes = STANDARD.decode(value.trim()).map_err(|e| ConfigError::Validation {
        message: format!("{field} is not valid base64: {e}"),
    })?;
    <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| ConfigError::Validation {
        message: format!("{field} must decode to {KEY_LEN} bytes, got {}", bytes.len()),
    })
}

/// Encodes key bytes as base64 for storage in configuration.
#[must_use]
pub fn encode_key(bytes: &[u8; KEY_LEN]) -> String {
    STANDARD.encode(bytes)
}

/// Duration serialization using humantime format.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn key(byte: u8) -> String {
        encode_key(&[byte; KEY_LEN])
    }

    // =========================================================================
    // Key material
    // =========================================================================

    #[test]
    fn test_decode_key_roundtrip() {
        let decoded = decode_key("k", &key(7)).expect("valid key");
        assert_eq!(decoded, [7; KEY_LEN]);
    }

    #[test]
    fn test_decode_key_wrong_length() {
        let short = STANDARD.encode([1u8; 16]);
        let err = decode_key("signing_key", &short).expect_err("too short");
        assert!(err.to_string().contains("signing_key must decode to 32 bytes, got 16"));
    }

    #[test]
    fn test_decode_key_not_base64() {
        assert!(decode_key("k", "***").is_err());
    }

    // =========================================================================
    // BrokerConfig
    // =========================================================================

    #[test]
    fn test_broker_config_defaults() {
        let config = BrokerConfig::builder()
            .endpoints(vec!["localhost:9092".to_string()])
            .signing_key(key(1))
            .encryption_key(key(2))
            .build()
            .expect("valid broker config");
        assert_eq!(config.operation_timeout, Duration::from_secs(10));
        assert_eq!(config.signing_key_bytes().expect("signing"), [1; KEY_LEN]);
        assert_eq!(config.encryption_key_bytes().expect("encryption"), [2; KEY_LEN]);
    }

    #[test]
    fn test_broker_config_rejects_empty_endpoints() {
        let result = BrokerConfig::builder()
            .endpoints(vec![])
            .signing_key(key(1))
            .encryption_key(key(2))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_broker_config_rejects_blank_endpoint() {
        let result = BrokerConfig::builder()
            .endpoints(vec!["localhost:9092".to_string(), " ".to_string()])
            .signing_key(key(1))
            .encryption_key(key(2))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_broker_config_rejects_zero_timeout() {
        let result = BrokerConfig::builder()
            .endpoints(vec!["localhost:9092".to_string()])
            .operation_timeout(Duration::ZERO)
            .signing_key(key(1))
            .encryption_key(key(2))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_broker_config_humantime_deserialize() {
        let value = serde_json::json!({
            "endpoints": ["a:9092", "b:9092"],
            "operation_timeout": "3s",
            "signing_key": key(1),
            "encryption_key": key(2),
        });
        let config: BrokerConfig = serde_json::from_value(value).expect("parse");
        assert_eq!(config.operation_timeout, Duration::from_secs(3));
        assert_eq!(config.endpoints.len(), 2);
        config.validate().expect("valid");
    }

    #[test]
    fn test_broker_config_timeout_defaults_when_absent() {
        let value = serde_json::json!({
            "endpoints": ["a:9092"],
            "signing_key": key(1),
            "encryption_key": key(2),
        });
        let config: BrokerConfig = serde_json::from_value(value).expect("parse");
        assert_eq!(config.operation_timeout, Duration::from_secs(10));
    }

    // =========================================================================
    // TopicsConfig
    // =========================================================================

    #[test]
    fn test_topics_config_valid() {
        let config = TopicsConfig::builder()
            .self_topic_name("auth_self".to_string())
            .root_topic_name("root_source.auth".to_string())
            .root_public_key(key(3))
            .peers_public_keys(vec![key(4)])
            .build()
            .expect("valid topics config");
        assert!(!config.publish_quota_usage);
        assert!(!config.skip_on_wrong_signature);
        assert_eq!(config.root_source_name(), "root_source");
        assert_eq!(config.peer_keys().expect("peers"), vec![[4; KEY_LEN]]);
    }

    #[test]
    fn test_topics_config_rejects_three_segment_root() {
        let result = TopicsConfig::builder()
            .self_topic_name("auth_self".to_string())
            .root_topic_name("a.b.c".to_string())
            .root_public_key(key(3))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_topics_config_rejects_bad_peer_key() {
        let result = TopicsConfig::builder()
            .self_topic_name("auth_self".to_string())
            .root_topic_name("root.auth".to_string())
            .root_public_key(key(3))
            .peers_public_keys(vec!["short".to_string()])
            .build();
        assert!(result.is_err());
    }

    // =========================================================================
    // ConsumerConfig
    // =========================================================================

    #[test]
    fn test_consumer_config_defaults() {
        let config = ConsumerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(200));
        assert_eq!(config.min_backoff, Duration::from_millis(1));
        assert_eq!(config.max_backoff, Duration::from_secs(30));
        assert_eq!(config.batch_size, 100);
        config.validate().expect("defaults valid");
    }

    #[test]
    fn test_consumer_config_rejects_inverted_backoff() {
        let result = ConsumerConfig::builder()
            .min_backoff(Duration::from_secs(60))
            .max_backoff(Duration::from_secs(1))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_consumer_config_rejects_zero_batch() {
        assert!(ConsumerConfig::builder().batch_size(0).build().is_err());
    }
}
