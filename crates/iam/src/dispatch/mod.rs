//! Routing of log messages to apply functions.
//!
//! A [`Registry`] built once at startup maps `(scope, type tag)` to a
//! [`Registration`]: how to decode the payload and how to apply it inside a
//! write transaction. The envelope's `deleted` flag selects the branch: the
//! apply function receives the decoded row for upserts and `None` for
//! deletions. Unknown tags are skipped.

mod apply;
mod handler;

use std::{collections::HashMap, fmt, sync::Arc};

use ironvault_memdb::{Record, TableRecord, WriteTxn};
use ironvault_types::Envelope;
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

pub use handler::Dispatcher;

use crate::{
    codec::{DecodeFn, RecordCodec},
    downstream::{DownstreamAction, EntityDownstream},
    error::Result,
    model::{
        AuthSource, Entity, EntityAlias, FeatureFlag, GenerationNumber, Group, IdentitySharing, Multipass,
        Project, RoleBinding, ServiceAccount, ServicePack, Tenant, User,
    },
};

/// Which log a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The authoritative source's topic for this instance.
    Root,
    /// This instance's own topic.
    Local,
    /// The shared generation-number topic.
    Generation,
    /// Cold-start replay of any topic.
    Restore,
}

impl Scope {
    /// Name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Local => "self",
            Self::Generation => "generation",
            Self::Restore => "restore",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write transaction of one message, plus the actions it derived.
pub struct ApplyContext<'t, 'db> {
    /// Transaction the message is applied in.
    pub txn: &'t mut WriteTxn<'db>,
    /// Downstream actions to run after commit.
    pub actions: Vec<DownstreamAction>,
}

impl<'t, 'db> ApplyContext<'t, 'db> {
    /// Context over `txn` with no actions.
    pub fn new(txn: &'t mut WriteTxn<'db>) -> Self {
        Self { txn, actions: Vec::new() }
    }

    /// Records the single action an entity or alias write derives.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::Consistency`](crate::IamError::Consistency) unless
    /// `derived` holds exactly one action.
    pub fn derive(&mut self, envelope: &Envelope, derived: Vec<DownstreamAction>) -> Result<()> {
        let action = EntityDownstream::single(&envelope.object_type, &envelope.id, derived)?;
        self.actions.push(action);
        Ok(())
    }
}

/// Applies a decoded message. `object` is `None` for deletions.
pub type ApplyFn = fn(&mut ApplyContext<'_, '_>, &Envelope, Option<Arc<dyn Record>>) -> Result<()>;

/// How one type tag is handled in one scope.
#[derive(Clone, Copy)]
pub struct Registration {
    /// Payload decoder.
    pub decode: DecodeFn,
    /// Apply function.
    pub apply: ApplyFn,
    /// Whether the resulting transaction is published.
    pub publishes: bool,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("publishes", &self.publishes).finish_non_exhaustive()
    }
}

/// Result of applying one message.
#[derive(Debug, Default)]
pub struct Applied {
    /// Actions to run after commit.
    pub actions: Vec<DownstreamAction>,
    /// Whether the transaction must be published.
    pub publishes: bool,
}

/// Registrations by scope and type tag.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: HashMap<Scope, HashMap<&'static str, Registration>>,
}

impl Registry {
    /// Every handler of the root, self, generation and restore scopes.
    #[must_use]
    pub fn standard() -> Self {
        Self::default()
            .with::<Tenant>(Scope::Root, apply::upsert_or_remove, true)
            .with::<User>(Scope::Root, apply::root_user, true)
            .with::<ServiceAccount>(Scope::Root, apply::root_service_account, true)
            .with::<Project>(Scope::Root, apply::upsert_or_remove, true)
            .with::<Group>(Scope::Root, apply::upsert_or_remove, true)
            .with::<RoleBinding>(Scope::Root, apply::upsert_or_remove, true)
            .with::<IdentitySharing>(Scope::Root, apply::upsert_or_remove, true)
            .with::<Multipass>(Scope::Root, apply::root_multipass, true)
            .with::<FeatureFlag>(Scope::Root, apply::upsert_or_remove, true)
            .with::<ServicePack>(Scope::Root, apply::upsert_or_remove, true)
            .with::<Entity>(Scope::Local, apply::local_entity, false)
            .with::<EntityAlias>(Scope::Local, apply::local_entity_alias, false)
            .with::<AuthSource>(Scope::Local, apply::local_auth_source, true)
            .with::<GenerationNumber>(Scope::Generation, apply::generation_number, false)
            .with::<Tenant>(Scope::Restore, apply::raw, false)
            .with::<User>(Scope::Restore, apply::raw, false)
            .with::<ServiceAccount>(Scope::Restore, apply::raw, false)
            .with::<Project>(Scope::Restore, apply::raw, false)
            .with::<Group>(Scope::Restore, apply::raw, false)
            .with::<RoleBinding>(Scope::Restore, apply::raw, false)
            .with::<IdentitySharing>(Scope::Restore, apply::raw, false)
            .with::<Multipass>(Scope::Restore, apply::raw, false)
            .with::<FeatureFlag>(Scope::Restore, apply::raw, false)
            .with::<ServicePack>(Scope::Restore, apply::raw, false)
            .with::<Entity>(Scope::Restore, apply::raw, false)
            .with::<EntityAlias>(Scope::Restore, apply::raw, false)
            .with::<AuthSource>(Scope::Restore, apply::raw, false)
            .with::<GenerationNumber>(Scope::Restore, apply::generation_number, false)
    }

    /// Registers `apply` for `T` in `scope`, decoding JSON payloads.
    #[must_use]
    pub fn with<T: TableRecord + Serialize + DeserializeOwned>(
        mut self,
        scope: Scope,
        apply: ApplyFn,
        publishes: bool,
    ) -> Self {
        let decode = RecordCodec::json::<T>().decode;
        self.entries.entry(scope).or_default().insert(T::TABLE, Registration { decode, apply, publishes });
        self
    }

    /// Registration of a type tag in a scope.
    #[must_use]
    pub fn get(&self, scope: Scope, object_type: &str) -> Option<Registration> {
        self.entries.get(&scope)?.get(object_type).copied()
    }

    /// Type tags registered in `scope`, sorted.
    #[must_use]
    pub fn tags(&self, scope: Scope) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.entries.get(&scope).map(|e| e.keys().copied().collect()).unwrap_or_default();
        tags.sort_unstable();
        tags
    }

    /// Decodes and applies one message in `txn`. Returns `None` for tags not
    /// registered in `scope`.
    ///
    /// # Errors
    ///
    /// Returns decode and apply errors; the caller aborts the transaction.
    pub fn apply(&self, scope: Scope, txn: &mut WriteTxn<'_>, envelope: &Envelope) -> Result<Option<Applied>> {
        let Some(registration) = self.get(scope, &envelope.object_type) else {
            debug!(scope = %scope, object_type = %envelope.object_type, id = %envelope.id, "no handler, skipping");
            return Ok(None);
        };
        let object = if envelope.is_delete() { None } else { Some((registration.decode)(envelope)?) };
        let mut ctx = ApplyContext::new(txn);
        (registration.apply)(&mut ctx, envelope, object)?;
        Ok(Some(Applied { actions: ctx.actions, publishes: registration.publishes }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::{codec::RecordCodecs, destination::REPLICATED_TABLES};

    #[test]
    fn test_every_root_table_has_a_root_handler() {
        let registry = Registry::standard();
        let mut replicated = REPLICATED_TABLES.to_vec();
        replicated.sort_unstable();
        assert_eq!(registry.tags(Scope::Root), replicated);
    }

    #[test]
    fn test_self_and_generation_scopes() {
        let registry = Registry::standard();
        assert_eq!(registry.tags(Scope::Local), vec!["auth_source", "entity", "entity_alias"]);
        assert_eq!(registry.tags(Scope::Generation), vec!["multipass_generation_number"]);
        assert!(registry.get(Scope::Local, "user").is_none());
    }

    #[test]
    fn test_restore_covers_every_codec() {
        let registry = Registry::standard();
        let codecs = RecordCodecs::standard();
        for tag in registry.tags(Scope::Restore) {
            assert!(codecs.get(tag).is_some(), "{tag} has no codec");
        }
        assert_eq!(registry.tags(Scope::Restore).len(), 14);
        assert!(registry.get(Scope::Restore, "entity").is_some_and(|r| !r.publishes));
    }
}
