//! Consumer loop pacing and retry backoff.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

fn default_poll_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_min_backoff() -> Duration {
    Duration::from_millis(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_batch_size() -> usize {
    100
}

/// Pacing of the per-topic consumer tasks.
///
/// A failed message is redelivered with exponential backoff between
/// `min_backoff` and `max_backoff` until it succeeds or the task is
/// cancelled. An idle consumer wakes on new appends or after
/// `poll_interval`, whichever comes first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConsumerConfig {
    /// Longest idle wait between reads.
    #[serde(default = "default_poll_interval", with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub poll_interval: Duration,
    /// First retry delay.
    #[serde(default = "default_min_backoff", with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub min_backoff: Duration,
    /// Retry delay ceiling.
    #[serde(default = "default_max_backoff", with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub max_backoff: Duration,
    /// Maximum records fetched per read.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            min_backoff: default_min_backoff(),
            max_backoff: default_max_backoff(),
            batch_size: default_batch_size(),
        }
    }
}

#[bon::bon]
impl ConsumerConfig {
    /// Creates a new consumer configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    #[builder]
    pub fn new(
        #[builder(default = default_poll_interval())] poll_interval: Duration,
        #[builder(default = default_min_backoff())] min_backoff: Duration,
        #[builder(default = default_max_backoff())] max_backoff: Duration,
        #[builder(default = default_batch_size())] batch_size: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self { poll_interval, min_backoff, max_backoff, batch_size };
        config.validate()?;
        Ok(config)
    }
}

impl ConsumerConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Validation {
                message: "poll_interval must be > 0".to_string(),
            });
        }
        if self.min_backoff.is_zero() {
            return Err(ConfigError::Validation {
                message: "min_backoff must be > 0".to_string(),
            });
        }
        if self.min_backoff > self.max_backoff {
            return Err(ConfigError::Validation {
                message: format!(
                    "min_backoff ({:?}) must be <= max_backoff ({:?})",
                    self.min_backoff, self.max_backoff
                ),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation { message: "batch_size must be > 0".to_string() });
        }
        Ok(())
    }
}
