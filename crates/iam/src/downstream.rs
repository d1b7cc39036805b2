//! Deferred actions against the external identity system.
//!
//! Self-topic writes of [`Entity`] and [`EntityAlias`] rows each derive
//! exactly one [`DownstreamAction`]. Actions run after the local transaction
//! committed and before the consumer offset advances, so they are retried on
//! failure and must be idempotent.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use ironvault_memdb::Reader;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    error::{ConsistencySnafu, DownstreamSnafu, Result},
    model::{Entity, EntityAlias},
    repo::EntityRepo,
};

/// The identity system entities and aliases are mirrored into.
///
/// Every call is idempotent: creating an existing object or deleting an
/// absent one succeeds.
#[async_trait]
pub trait IdentitySystem: Send + Sync + fmt::Debug + 'static {
    /// Creates or renames the entity `uuid`.
    async fn create_entity(&self, uuid: &str, name: &str) -> Result<()>;

    /// Deletes the entity `uuid` and its aliases.
    async fn delete_entity(&self, uuid: &str) -> Result<()>;

    /// Identity-system id of the entity named `name`.
    async fn entity_id(&self, name: &str) -> Result<Option<String>>;

    /// Creates or updates the alias `uuid` of `entity_id` under the mount `mount_accessor`.
    async fn create_alias(&self, uuid: &str, name: &str, entity_id: &str, mount_accessor: &str) -> Result<()>;

    /// Deletes the alias `uuid`.
    async fn delete_alias(&self, uuid: &str) -> Result<()>;

    /// Mount accessor of the auth source `source_name`.
    async fn mount_accessor(&self, source_name: &str) -> Result<String>;
}

/// One deferred identity-system call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownstreamAction {
    /// Create or rename an entity.
    CreateEntity {
        /// Entity row UUID.
        uuid: String,
        /// Entity name.
        name: String,
    },
    /// Delete an entity.
    DeleteEntity {
        /// Entity row UUID.
        uuid: String,
    },
    /// Create or update an alias.
    CreateAlias {
        /// Alias row UUID.
        uuid: String,
        /// Alias name.
        name: String,
        /// Name of the entity the alias belongs to.
        entity_name: String,
        /// Auth source whose mount the alias lives in.
        source_name: String,
    },
    /// Delete an alias.
    DeleteAlias {
        /// Alias row UUID.
        uuid: String,
    },
}

impl DownstreamAction {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CreateEntity { .. } => "create_entity",
            Self::DeleteEntity { .. } => "delete_entity",
            Self::CreateAlias { .. } => "create_alias",
            Self::DeleteAlias { .. } => "delete_alias",
        }
    }

    /// Runs the action.
    ///
    /// # Errors
    ///
    /// Returns the identity-system error. An alias whose entity the identity
    /// system does not know yet fails with a retryable
    /// [`IamError::Downstream`](crate::IamError::Downstream).
    pub async fn execute(&self, identity: &dyn IdentitySystem) -> Result<()> {
        match self {
            Self::CreateEntity { uuid, name } => identity.create_entity(uuid, name).await?,
            Self::DeleteEntity { uuid } => identity.delete_entity(uuid).await?,
            Self::CreateAlias { uuid, name, entity_name, source_name } => {
                let entity_id = identity.entity_id(entity_name).await?.ok_or_else(|| {
                    DownstreamSnafu { message: format!("entity {entity_name:?} is not known yet") }.build()
                })?;
                let accessor = identity.mount_accessor(source_name).await?;
                identity.create_alias(uuid, name, &entity_id, &accessor).await?;
            },
            Self::DeleteAlias { uuid } => identity.delete_alias(uuid).await?,
        }
        debug!(action = self.kind(), "downstream action executed");
        Ok(())
    }
}

/// Derives downstream actions from self-topic entity and alias writes.
pub struct EntityDownstream;

impl EntityDownstream {
    /// Action for a written entity.
    #[must_use]
    pub fn entity_upserted(entity: &Entity) -> Vec<DownstreamAction> {
        vec![DownstreamAction::CreateEntity { uuid: entity.uuid.clone(), name: entity.name.clone() }]
    }

    /// Action for a deleted entity.
    #[must_use]
    pub fn entity_deleted(uuid: &str) -> Vec<DownstreamAction> {
        vec![DownstreamAction::DeleteEntity { uuid: uuid.to_string() }]
    }

    /// Action for a written alias, attached to the local entity of the
    /// alias' principal.
    ///
    /// # Errors
    ///
    /// Returns a retryable [`IamError::Downstream`](crate::IamError::Downstream)
    /// while that entity is missing locally.
    pub fn alias_upserted<R: Reader>(reader: &R, alias: &EntityAlias) -> Result<Vec<DownstreamAction>> {
        let Some(entity) = EntityRepo::by_user(reader, &alias.user_id)? else {
            return DownstreamSnafu {
                message: format!("alias {} has no local entity for principal {}", alias.uuid, alias.user_id),
            }
            .fail();
        };
        Ok(vec![DownstreamAction::CreateAlias {
            uuid: alias.uuid.clone(),
            name: alias.name.clone(),
            entity_name: entity.name,
            source_name: alias.source_name.clone(),
        }])
    }

    /// Action for a deleted alias.
    #[must_use]
    pub fn alias_deleted(uuid: &str) -> Vec<DownstreamAction> {
        vec![DownstreamAction::DeleteAlias { uuid: uuid.to_string() }]
    }

    /// The one action of an entity or alias write.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::Consistency`](crate::IamError::Consistency) for
    /// zero or several actions.
    pub fn single(object_type: &str, id: &str, mut actions: Vec<DownstreamAction>) -> Result<DownstreamAction> {
        match actions.len() {
            1 => actions.pop().ok_or_else(|| ConsistencySnafu { message: "action vanished" }.build()),
            n => ConsistencySnafu { message: format!("{object_type}/{id} derived {n} downstream actions, expected 1") }
                .fail(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Entity uuid to (identity-system id, name).
    entities: BTreeMap<String, (String, String)>,
    /// Alias uuid to (name, entity id, mount accessor).
    aliases: BTreeMap<String, (String, String, String)>,
    fail_next: usize,
    calls: usize,
}

/// In-process identity system for tests and standalone servers.
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentitySystem {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryIdentitySystem {
    /// Empty identity system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` calls with a retryable error.
    pub fn fail_next_calls(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    /// Entity names by entity uuid.
    #[must_use]
    pub fn entities(&self) -> BTreeMap<String, String> {
        self.state.lock().entities.iter().map(|(uuid, (_, name))| (uuid.clone(), name.clone())).collect()
    }

    /// Alias names by alias uuid.
    #[must_use]
    pub fn aliases(&self) -> BTreeMap<String, String> {
        self.state.lock().aliases.iter().map(|(uuid, (name, _, _))| (uuid.clone(), name.clone())).collect()
    }

    /// Number of successful calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.state.lock().calls
    }

    fn call<T>(&self, operation: &str, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T> {
        let mut state = self.state.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return DownstreamSnafu { message: format!("{operation}: injected failure") }.fail();
        }
        state.calls += 1;
        Ok(f(&mut state))
    }
}

fn mount_accessor_of(source_name: &str) -> String {
    format!("auth_{source_name}")
}

#[async_trait]
impl IdentitySystem for MemoryIdentitySystem {
    async fn create_entity(&self, uuid: &str, name: &str) -> Result<()> {
        self.call("create_entity", |state| {
            let id = state.entities.get(uuid).map_or_else(|| format!("entity-{uuid}"), |(id, _)| id.clone());
            state.entities.insert(uuid.to_string(), (id, name.to_string()));
        })?;
        info!(uuid, name, "entity created");
        Ok(())
    }

    async fn delete_entity(&self, uuid: &str) -> Result<()> {
        self.call("delete_entity", |state| {
            if let Some((id, _)) = state.entities.remove(uuid) {
                state.aliases.retain(|_, (_, entity_id, _)| *entity_id != id);
            }
        })
    }

    async fn entity_id(&self, name: &str) -> Result<Option<String>> {
        self.call("entity_id", |state| {
            state.entities.values().find(|(_, entity_name)| entity_name == name).map(|(id, _)| id.clone())
        })
    }

    async fn create_alias(&self, uuid: &str, name: &str, entity_id: &str, mount_accessor: &str) -> Result<()> {
        self.call("create_alias", |state| {
            state
                .aliases
                .insert(uuid.to_string(), (name.to_string(), entity_id.to_string(), mount_accessor.to_string()));
        })
    }

    async fn delete_alias(&self, uuid: &str) -> Result<()> {
        self.call("delete_alias", |state| {
            state.aliases.remove(uuid);
        })
    }

    async fn mount_accessor(&self, source_name: &str) -> Result<String> {
        self.call("mount_accessor", |_| mount_accessor_of(source_name))
    }
}
