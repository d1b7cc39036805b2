//! Cold-start restore of local tables from the logs.
//!
//! Each topic is replayed from offset 0 up to the end offset captured when
//! the replay starts, into one write transaction committed at the end. The
//! restore scope only performs raw inserts and removals: no projection, no
//! downstream actions and no publishing.

use ironvault_broker::{LogBroker, MessageDecoder, ReplayOutcome, ReplayStats, Replayer};
use tracing::info;

use crate::{
    dispatch::{Registry, Scope},
    error::{IamError, Result},
    store::IamStore,
};

/// Replays topics into a store.
#[derive(bon::Builder)]
pub struct Restorer<'a> {
    store: &'a IamStore,
    registry: &'a Registry,
    broker: &'a dyn LogBroker,
    /// Records read per broker call.
    #[builder(default = 500)]
    batch_size: usize,
    /// Skip records whose signature does not verify instead of failing.
    #[builder(default)]
    skip_on_wrong_signature: bool,
}

impl Restorer<'_> {
    /// Replays `topic`, verifying records with `decoder`.
    ///
    /// # Errors
    ///
    /// Returns the first broker, decode or apply error. Nothing from the
    /// topic is committed in that case.
    pub fn restore(&self, topic: &str, decoder: &MessageDecoder) -> Result<ReplayStats> {
        let mut txn = self.store.write()?;
        let replayed = Replayer::builder()
            .broker(self.broker)
            .decoder(decoder)
            .topic(topic)
            .batch_size(self.batch_size)
            .skip_on_wrong_signature(self.skip_on_wrong_signature)
            .build()
            .replay(|_offset, envelope| -> Result<ReplayOutcome, IamError> {
                Ok(match self.registry.apply(Scope::Restore, &mut txn, &envelope)? {
                    Some(_) => ReplayOutcome::Applied,
                    None => ReplayOutcome::Skipped,
                })
            });
        match replayed {
            Ok(stats) => {
                self.store.commit_unpublished(txn);
                info!(
                    topic,
                    applied = stats.applied,
                    skipped = stats.skipped,
                    end_offset = stats.end_offset,
                    "topic restored"
                );
                Ok(stats)
            },
            Err(e) => {
                txn.abort();
                Err(e)
            },
        }
    }
}
