use ironvault_types::{
    codec,
    config::{BrokerConfig, ConsumerConfig, TopicsConfig},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{ConfigSnafu, Result, SealSnafu};

/// Everything an instance needs to join its topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BackendConfig {
    /// Broker connection and instance key material.
    pub broker: BrokerConfig,
    /// Topic names and trusted public keys.
    pub topics: TopicsConfig,
    /// Consumer polling and backoff.
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

impl BackendConfig {
    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::Config`](crate::IamError::Config) on the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.broker.validate().context(ConfigSnafu)?;
        self.topics.validate().context(ConfigSnafu)?;
        self.consumer.validate().context(ConfigSnafu)?;
        Ok(())
    }

    /// Encodes the configuration into the blob kept in host storage.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::Seal`](crate::IamError::Seal) if encoding fails.
    pub fn seal(&self) -> Result<Vec<u8>> {
        codec::encode(self).context(SealSnafu)
    }

    /// Decodes and validates a blob produced by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Returns [`IamError::Seal`](crate::IamError::Seal) for corrupt blobs and
    /// [`IamError::Config`](crate::IamError::Config) for invalid contents.
    pub fn unseal(blob: &[u8]) -> Result<Self> {
        let config: Self = codec::decode(blob).context(SealSnafu)?;
        config.validate()?;
        Ok(config)
    }
}
