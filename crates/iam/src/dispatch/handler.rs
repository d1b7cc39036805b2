use std::sync::Arc;

use async_trait::async_trait;
use ironvault_broker::{Delivery, MessageHandler};
use ironvault_types::Envelope;
use tracing::{debug, warn};

use super::{Registry, Scope};
use crate::{
    downstream::{DownstreamAction, IdentitySystem},
    error::{IamError, Result},
    store::IamStore,
};

/// Applies the messages of one consumed topic.
///
/// Each message is applied in its own write transaction. Derived downstream
/// actions run after the commit; their failure fails the delivery, which the
/// consumer retries without advancing the offset.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    scope: Scope,
    store: Arc<IamStore>,
    registry: Arc<Registry>,
    identity: Arc<dyn IdentitySystem>,
}

impl Dispatcher {
    /// Dispatcher for `scope` writing to `store`.
    pub fn new(scope: Scope, store: Arc<IamStore>, registry: Arc<Registry>, identity: Arc<dyn IdentitySystem>) -> Self {
        Self { scope, store, registry, identity }
    }

    /// Scope this dispatcher applies.
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Applies and commits `envelope`, returning the actions it derived.
    ///
    /// # Errors
    ///
    /// Returns decode, apply and publish errors; the transaction is aborted.
    pub fn apply(&self, envelope: &Envelope) -> Result<Vec<DownstreamAction>> {
        let mut txn = self.store.write()?;
        let applied = match self.registry.apply(self.scope, &mut txn, envelope) {
            Ok(Some(applied)) => applied,
            Ok(None) => {
                txn.abort();
                return Ok(Vec::new());
            },
            Err(e) => {
                warn!(
                    scope = %self.scope,
                    object_type = %envelope.object_type,
                    id = %envelope.id,
                    error = %e,
                    "apply failed, aborting transaction"
                );
                txn.abort();
                return Err(e);
            },
        };
        if applied.publishes {
            self.store.commit(txn)?;
        } else {
            self.store.commit_unpublished(txn);
        }
        Ok(applied.actions)
    }

    /// Applies `envelope`, then runs its downstream actions in order.
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply); also returns the first failing action's error.
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<()> {
        let actions = self.apply(envelope)?;
        for action in &actions {
            action.execute(self.identity.as_ref()).await?;
        }
        if !actions.is_empty() {
            debug!(scope = %self.scope, key = %envelope.key(), actions = actions.len(), "downstream actions done");
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    type Error = IamError;

    async fn handle(&self, delivery: &Delivery) -> Result<()> {
        self.dispatch(&delivery.envelope).await
    }
}
