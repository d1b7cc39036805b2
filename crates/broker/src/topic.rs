//! Topic creation parameters.

use std::{collections::BTreeMap, time::Duration};

use ironvault_types::GENERATION_TOPIC;

/// Retention of the generation topic.
pub const GENERATION_RETENTION: Duration = Duration::from_secs(31 * 24 * 60 * 60);

/// Log cleanup policy of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Drop records older than the retention.
    Delete,
    /// Keep only the latest record per key.
    Compact,
    /// Compact, and drop records older than the retention.
    CompactDelete,
}

impl CleanupPolicy {
    /// Broker configuration value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Compact => "compact",
            Self::CompactDelete => "compact,delete",
        }
    }

    /// Whether records superseded by a later record with the same key may be dropped.
    #[must_use]
    pub const fn compacts(self) -> bool {
        matches!(self, Self::Compact | Self::CompactDelete)
    }
}

/// Everything needed to create a topic.
///
/// Topics always have one partition so every consumer sees one total order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    /// Topic name.
    pub name: String,
    /// Partition count; always 1.
    pub partitions: u32,
    /// Copies of each record, equal to the number of broker endpoints.
    pub replication_factor: u16,
    /// Replicas that must acknowledge a write.
    pub min_insync_replicas: u16,
    /// Cleanup policy.
    pub cleanup_policy: CleanupPolicy,
    /// Retention bound, `None` for unlimited.
    pub retention: Option<Duration>,
}

impl TopicSpec {
    /// Spec for an ordinary append-only topic on a cluster of `endpoints` brokers.
    pub fn new(name: impl Into<String>, endpoints: usize) -> Self {
        let replication_factor = u16::try_from(endpoints.max(1)).unwrap_or(u16::MAX);
        Self {
            name: name.into(),
            partitions: 1,
            replication_factor,
            min_insync_replicas: replication_factor.saturating_sub(1).max(1),
            cleanup_policy: CleanupPolicy::Delete,
            retention: None,
        }
    }

    /// Spec for the generation-number topic.
    #[must_use]
    pub fn generation(endpoints: usize) -> Self {
        Self {
            cleanup_policy: CleanupPolicy::CompactDelete,
            retention: Some(GENERATION_RETENTION),
            ..Self::new(GENERATION_TOPIC, endpoints)
        }
    }

    /// Broker-side topic configuration entries.
    #[must_use]
    pub fn config_entries(&self) -> BTreeMap<&'static str, String> {
        let mut entries = BTreeMap::new();
        entries.insert("cleanup.policy", self.cleanup_policy.as_str().to_string());
        entries.insert("min.insync.replicas", self.min_insync_replicas.to_string());
        let retention_ms = self.retention.map_or(-1_i128, |r| i128::try_from(r.as_millis()).unwrap_or(-1));
        entries.insert("retention.ms", retention_ms.to_string());
        entries
    }
}
