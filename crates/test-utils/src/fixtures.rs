//! Key material and configuration for tests.

#![allow(clippy::expect_used)]

use std::time::Duration;

use ed25519_dalek::SigningKey;
use ironvault_types::config::{BrokerConfig, ConsumerConfig, TopicsConfig, encode_key};

/// Random signing and encryption keys for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestKeys {
    /// ed25519 seed.
    pub signing_seed: [u8; 32],
    /// AES-256 master key.
    pub encryption_key: [u8; 32],
}

impl TestKeys {
    /// Generates fresh keys.
    #[must_use]
    pub fn generate() -> Self {
        Self { signing_seed: rand::random(), encryption_key: rand::random() }
    }

    /// ed25519 public key of the signing seed.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        SigningKey::from_bytes(&self.signing_seed).verifying_key().to_bytes()
    }

    /// Base64 public key as stored in configuration.
    #[must_use]
    pub fn public_key_b64(&self) -> String {
        encode_key(&self.public_key())
    }

    /// Base64 signing seed as stored in configuration.
    #[must_use]
    pub fn signing_seed_b64(&self) -> String {
        encode_key(&self.signing_seed)
    }

    /// Base64 encryption key as stored in configuration.
    #[must_use]
    pub fn encryption_key_b64(&self) -> String {
        encode_key(&self.encryption_key)
    }
}

/// Single-endpoint broker configuration using `keys`.
///
/// # Panics
///
/// Panics if the configuration fails validation.
#[must_use]
pub fn test_broker_config(keys: &TestKeys) -> BrokerConfig {
    BrokerConfig::builder()
        .endpoints(vec!["memory://local".to_string()])
        .operation_timeout(Duration::from_secs(2))
        .signing_key(keys.signing_seed_b64())
        .encryption_key(keys.encryption_key_b64())
        .build()
        .expect("valid test broker config")
}

/// Topic configuration trusting the public key of `root`.
///
/// # Panics
///
/// Panics if the configuration fails validation.
#[must_use]
pub fn test_topics_config(root_topic: &str, self_topic: &str, root: &TestKeys) -> TopicsConfig {
    TopicsConfig::builder()
        .root_topic_name(root_topic.to_string())
        .self_topic_name(self_topic.to_string())
        .root_public_key(root.public_key_b64())
        .build()
        .expect("valid test topics config")
}

/// Consumer settings tuned for fast tests.
///
/// # Panics
///
/// Panics if the configuration fails validation.
#[must_use]
pub fn test_consumer_config() -> ConsumerConfig {
    ConsumerConfig::builder()
        .poll_interval(Duration::from_millis(5))
        .min_backoff(Duration::from_millis(1))
        .max_backoff(Duration::from_millis(20))
        .batch_size(16)
        .build()
        .expect("valid test consumer config")
}
