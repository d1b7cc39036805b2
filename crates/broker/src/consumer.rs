//! Long-running topic consumers.
//!
//! A [`TopicConsumer`] owns one topic. It reads from the group's committed
//! offset, decodes each record and hands it to a [`MessageHandler`]. The offset
//! is committed only after the handler succeeded, so delivery is
//! at-least-once and handlers must be idempotent.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use ironvault_types::{Envelope, HasErrorCode, config::ConsumerConfig};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    codec::MessageDecoder,
    error::{BrokerError, CancelledSnafu, HandlerSnafu, Result},
    log::{LogBroker, LogEntry},
};

/// A decoded record together with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the record was read from.
    pub topic: String,
    /// Offset of the record.
    pub offset: u64,
    /// Decoded envelope.
    pub envelope: Envelope,
}

/// Applies delivered messages.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handler error. Retryable codes are retried with backoff; anything else
    /// stops the consumer.
    type Error: std::error::Error + HasErrorCode + Send + Sync + 'static;

    /// Applies one message. Must be idempotent.
    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), Self::Error>;
}

/// Consumes one topic until cancelled or until a fatal error.
#[derive(bon::Builder)]
pub struct TopicConsumer<H: MessageHandler> {
    /// Log the topic lives in.
    broker: Arc<dyn LogBroker>,
    /// Applies decoded messages.
    handler: Arc<H>,
    /// Verifies and decrypts records.
    decoder: MessageDecoder,
    /// Topic to consume.
    #[builder(into)]
    topic: String,
    /// Consumer group the offset is committed under.
    #[builder(into)]
    group: String,
    /// Polling and backoff settings.
    #[builder(default)]
    config: ConsumerConfig,
    /// Skip records whose signature does not verify instead of stopping.
    #[builder(default)]
    skip_on_wrong_signature: bool,
    /// Stops the consumer.
    cancellation_token: CancellationToken,
}

impl<H: MessageHandler> TopicConsumer<H> {
    /// Spawns the consumer.
    ///
    /// The handle resolves to `Ok(())` after cancellation and to the fatal
    /// error otherwise.
    pub fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            match self.run().await {
                Err(BrokerError::Cancelled { topic }) => {
                    info!(topic, "consumer stopped");
                    Ok(())
                },
                Err(e) => {
                    error!(topic = %self.topic, code = %e.code(), error = %e, "consumer failed");
                    Err(e)
                },
                Ok(()) => Ok(()),
            }
        })
    }

    async fn run(&self) -> Result<()> {
        let broker = Arc::clone(&self.broker);
        let topic = self.topic.as_str();
        let group = self.group.as_str();

        let mut end = self.retrying("subscribe", || std::future::ready(broker.subscribe(topic))).await?;
        let mut next = self
            .retrying("committed_offset", || std::future::ready(broker.committed_offset(group, topic)))
            .await?;
        info!(topic, group, offset = next, "consumer started");

        loop {
            if self.cancellation_token.is_cancelled() {
                return CancelledSnafu { topic }.fail();
            }

            let batch = self.config.batch_size;
            let entries =
                self.retrying("read", || std::future::ready(broker.read(topic, next, batch))).await?;
            if entries.is_empty() {
                self.wait_for_records(&mut end).await?;
                continue;
            }

            for entry in &entries {
                self.process(entry).await?;
                next = entry.offset + 1;
                self.retrying("commit_offset", || {
                    std::future::ready(broker.commit_offset(group, topic, next))
                })
                .await?;
            }
        }
    }

    async fn wait_for_records(&self, end: &mut watch::Receiver<u64>) -> Result<()> {
        let poll_interval = self.config.poll_interval;
        tokio::select! {
            biased;
            () = self.cancellation_token.cancelled() => CancelledSnafu { topic: &self.topic }.fail(),
            changed = tokio::time::timeout(poll_interval, end.changed()) => {
                if let Ok(Err(_)) = changed {
                    // Topic was dropped; fall back to plain polling.
                    tokio::time::sleep(poll_interval).await;
                }
                Ok(())
            },
        }
    }

    async fn process(&self, entry: &LogEntry) -> Result<()> {
        let envelope = match self.decoder.decode(&self.topic, &entry.record) {
            Ok(envelope) => envelope,
            Err(e @ BrokerError::Signature { .. }) if self.skip_on_wrong_signature => {
                warn!(topic = %self.topic, offset = entry.offset, error = %e, "skipping record");
                return Ok(());
            },
            Err(e) => return Err(e),
        };
        debug!(
            topic = %self.topic,
            offset = entry.offset,
            object_type = %envelope.object_type,
            id = %envelope.id,
            deleted = envelope.deleted,
            "delivering message"
        );

        let delivery = Delivery { topic: self.topic.clone(), offset: entry.offset, envelope };
        let delivery = &delivery;
        let handler = &self.handler;
        self.retrying("handle", move || async move {
            handler.handle(delivery).await.map_err(|e| {
                HandlerSnafu {
                    topic: &delivery.topic,
                    offset: delivery.offset,
                    message: e.to_string(),
                    code: e.code(),
                }
                .build()
            })
        })
        .await
    }

    /// Runs `attempt` until it succeeds, fails fatally or the consumer is cancelled.
    async fn retrying<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delays = ExponentialBuilder::default()
            .with_min_delay(self.config.min_backoff)
            .with_max_delay(self.config.max_backoff)
            .with_max_times(usize::MAX)
            .with_jitter()
            .build();
        let mut attempts: u32 = 0;

        loop {
            let result = tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => {
                    return CancelledSnafu { topic: &self.topic }.fail();
                }
                result = attempt() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            attempts = attempts.saturating_add(1);
            let backoff = delays.next().unwrap_or(self.config.max_backoff);
            warn!(
                topic = %self.topic,
                operation,
                attempt = attempts,
                backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                code = %err.code(),
                error = %err,
                "retrying after backoff"
            );

            tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => {
                    return CancelledSnafu { topic: &self.topic }.fail();
                }
                () = tokio::time::sleep(backoff) => {}
            }
        }
    }
}
