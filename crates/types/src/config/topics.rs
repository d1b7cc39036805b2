//! Topic names and the public keys used to verify incoming messages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ConfigError, KEY_LEN, decode_key};
use crate::topic;

/// Topic wiring of one plugin instance.
///
/// Messages on the root topic must be signed by `root_public_key`.
/// Messages on the generation topic may come from this instance or any of
/// `peers_public_keys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TopicsConfig {
    /// Topic this instance writes its own tables to and restores from.
    pub self_topic_name: String,
    /// Topic replicated from the authoritative source,
    /// `"<root-source-name>.<replica-name>"`.
    pub root_topic_name: String,
    /// Base64 ed25519 public key of the authoritative source.
    pub root_public_key: String,
    /// Base64 ed25519 public keys of peer instances.
    #[serde(default)]
    pub peers_public_keys: Vec<String>,
    /// Publish quota usage reports.
    #[serde(default, rename = "publish_quota")]
    pub publish_quota_usage: bool,
    /// Skip messages failing signature verification instead of blocking the topic.
    #[serde(default)]
    pub skip_on_wrong_signature: bool,
}

#[bon::bon]
impl TopicsConfig {
    /// Creates a new topics configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if a topic name or key is invalid.
    #[builder]
    pub fn new(
        self_topic_name: String,
        root_topic_name: String,
        root_public_key: String,
        #[builder(default)] peers_public_keys: Vec<String>,
        #[builder(default)] publish_quota_usage: bool,
        #[builder(default)] skip_on_wrong_signature: bool,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            self_topic_name,
            root_topic_name,
            root_public_key,
            peers_public_keys,
            publish_quota_usage,
            skip_on_wrong_signature,
        };
        config.validate()?;
        Ok(config)
    }
}

impl TopicsConfig {
    /// Validates topic names and key material.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        topic::validate_self_topic(&self.self_topic_name)
            .map_err(|e| ConfigError::Validation { message: e.to_string() })?;
        topic::validate_root_topic(&self.root_topic_name)
            .map_err(|e| ConfigError::Validation { message: e.to_string() })?;
        if self.self_topic_name == self.root_topic_name {
            return Err(ConfigError::Validation {
                message: "self_topic_name must differ from root_topic_name".to_string(),
            });
        }
        decode_key("root_public_key", &self.root_public_key)?;
        self.peer_keys()?;
        Ok(())
    }

    /// First segment of the root topic name.
    #[must_use]
    pub fn root_source_name(&self) -> &str {
        self.root_topic_name.split('.').next().unwrap_or_default()
    }

    /// Decoded root public key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the stored value is malformed.
    pub fn root_key(&self) -> Result<[u8; KEY_LEN], ConfigError> {
        decode_key("root_public_key", &self.root_public_key)
    }

    /// Decoded peer public keys in configuration order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first malformed key.
    pub fn peer_keys(&self) -> Result<Vec<[u8; KEY_LEN]>, ConfigError> {
        self.peers_public_keys
            .iter()
            .enumerate()
            .map(|(i, k)| decode_key(&format!("peers_public_keys[{i}]"), k))
            .collect()
    }
}
