//! Change-log broker for ironvault.
//!
//! - [`LogBroker`]: ordered, replayable single-partition topics with committed offsets
//! - [`MessageEncoder`] / [`MessageDecoder`]: envelope records signed with ed25519, payloads
//!   sealed with AES-256-GCM
//! - [`TopicConsumer`]: one cancellable task per topic, commit after apply
//! - [`Replayer`]: bounded cold-start replay

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod consumer;
pub mod crypto;
mod error;
pub mod log;
pub mod replay;
pub mod topic;

pub use codec::{MessageDecoder, MessageEncoder};
pub use consumer::{Delivery, MessageHandler, TopicConsumer};
pub use crypto::{PayloadCipher, RecordSigner, SignedHeader, VerifierSet, encryption_disabled};
pub use error::{BrokerError, Result};
pub use log::{LogBroker, LogEntry, LogRecord, MemoryBroker};
pub use replay::{ReplayOutcome, ReplayStats, Replayer};
pub use topic::{CleanupPolicy, TopicSpec};
