//! Routing of committed changes to topics.

use ironvault_memdb::{Change, TableRecord};
use ironvault_types::GENERATION_TOPIC;

use crate::model::{AuthSource, Entity, EntityAlias, GenerationNumber};

const SELF_TABLES: [&str; 3] = [Entity::TABLE, EntityAlias::TABLE, AuthSource::TABLE];

/// Tables the authoritative source replicates to every registered replica.
pub const REPLICATED_TABLES: [&str; 10] = [
    "tenant",
    "user",
    "service_account",
    "project",
    "group",
    "role_binding",
    "identity_sharing",
    "multipass",
    "feature_flag",
    "service_pack",
];

/// Where a change is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Target topic.
    pub topic: String,
    /// Whether the payload is encrypted.
    pub encrypt: bool,
}

/// Decides which topics a committed change goes to.
pub trait Destination: Send + Sync + std::fmt::Debug {
    /// Routes for `change`; empty when the destination ignores it.
    fn routes(&self, change: &Change) -> Vec<Route>;
}

/// Publishes this instance's own tables to its self topic.
#[derive(Debug, Clone)]
pub struct SelfDestination {
    topic: String,
}

impl SelfDestination {
    /// Destination publishing to `topic`.
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into() }
    }
}

impl Destination for SelfDestination {
    fn routes(&self, change: &Change) -> Vec<Route> {
        if SELF_TABLES.contains(&change.table.as_str()) {
            vec![Route { topic: self.topic.clone(), encrypt: true }]
        } else {
            Vec::new()
        }
    }
}

/// Publishes authoritative objects to `"<root-source>.<replica>"` for every replica.
#[derive(Debug, Clone)]
pub struct ReplicaDestination {
    topics: Vec<String>,
}

impl ReplicaDestination {
    /// Destination for the given replica topics.
    #[must_use]
    pub fn new(topics: Vec<String>) -> Self {
        Self { topics }
    }
}

impl Destination for ReplicaDestination {
    fn routes(&self, change: &Change) -> Vec<Route> {
        if !REPLICATED_TABLES.contains(&change.table.as_str()) {
            return Vec::new();
        }
        self.topics.iter().map(|topic| Route { topic: topic.clone(), encrypt: true }).collect()
    }
}

/// Publishes generation numbers, signed but in the clear.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationDestination;

impl Destination for GenerationDestination {
    fn routes(&self, change: &Change) -> Vec<Route> {
        if change.table == GenerationNumber::TABLE {
            vec![Route { topic: GENERATION_TOPIC.to_string(), encrypt: false }]
        } else {
            Vec::new()
        }
    }
}
