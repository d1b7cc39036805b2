//! Cold-start replay of a topic.

use ironvault_types::Envelope;
use tracing::{debug, info, warn};

use crate::{
    codec::MessageDecoder,
    error::BrokerError,
    log::LogBroker,
};

/// What an apply callback did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The record changed local state.
    Applied,
    /// The record was ignored, e.g. an unknown type tag.
    Skipped,
}

/// Counters reported by [`Replayer::replay`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records applied.
    pub applied: u64,
    /// Records skipped by the callback or for an untrusted signature.
    pub skipped: u64,
    /// End offset captured when the replay started.
    pub end_offset: u64,
}

/// Replays a topic from offset 0 up to the end offset captured at start.
#[derive(bon::Builder)]
pub struct Replayer<'a> {
    broker: &'a dyn LogBroker,
    decoder: &'a MessageDecoder,
    #[builder(into)]
    topic: String,
    #[builder(default = 500)]
    batch_size: usize,
    #[builder(default)]
    skip_on_wrong_signature: bool,
}

impl Replayer<'_> {
    /// Feeds every record to `apply` in log order.
    ///
    /// Records appended after the replay started are left for the consumer.
    /// The first callback error aborts the replay.
    pub fn replay<F, E>(&self, mut apply: F) -> std::result::Result<ReplayStats, E>
    where
        F: FnMut(u64, Envelope) -> std::result::Result<ReplayOutcome, E>,
        E: From<BrokerError>,
    {
        let end_offset = self.broker.end_offset(&self.topic)?;
        let mut stats = ReplayStats { end_offset, ..ReplayStats::default() };
        if end_offset == 0 {
            debug!(topic = %self.topic, "nothing to replay");
            return Ok(stats);
        }

        let mut next = 0;
        while next < end_offset {
            let entries = self.broker.read(&self.topic, next, self.batch_size.max(1))?;
            let Some(last) = entries.last() else {
                break;
            };
            next = last.offset + 1;

            for entry in entries.into_iter().take_while(|entry| entry.offset < end_offset) {
                let envelope = match self.decoder.decode(&self.topic, &entry.record) {
                    Ok(envelope) => envelope,
                    Err(e @ BrokerError::Signature { .. }) if self.skip_on_wrong_signature => {
                        warn!(topic = %self.topic, offset = entry.offset, error = %e, "skipping record");
                        stats.skipped += 1;
                        continue;
                    },
                    Err(e) => return Err(e.into()),
                };
                match apply(entry.offset, envelope)? {
                    ReplayOutcome::Applied => stats.applied += 1,
                    ReplayOutcome::Skipped => stats.skipped += 1,
                }
            }
        }

        info!(
            topic = %self.topic,
            applied = stats.applied,
            skipped = stats.skipped,
            end_offset,
            "replayed topic"
        );
        Ok(stats)
    }
}
