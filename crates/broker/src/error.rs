//! Error types for the log broker and the message codec.

use ironvault_types::{EnvelopeError, ErrorCode, HasErrorCode};
use snafu::Snafu;

/// Result type alias for broker operations.
pub type Result<T, E = BrokerError> = std::result::Result<T, E>;

/// Errors produced by log brokers, the codec and the consumer loop.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BrokerError {
    /// Topic does not exist.
    #[snafu(display("topic {topic:?} not found"))]
    TopicNotFound {
        /// Topic name.
        topic: String,
    },

    /// The topic name or its settings are invalid.
    #[snafu(display("invalid topic {topic:?}: {message}"))]
    InvalidTopic {
        /// Topic name.
        topic: String,
        /// What is wrong.
        message: String,
    },

    /// A batch was rejected as a whole.
    #[snafu(display("append to {topic:?} rejected: {message}"))]
    Append {
        /// Topic name.
        topic: String,
        /// Why the batch was rejected.
        message: String,
    },

    /// A broker call did not complete within the operation timeout.
    #[snafu(display("{operation} on {topic:?} timed out after {timeout_ms} ms"))]
    Timeout {
        /// Operation name.
        operation: &'static str,
        /// Topic name.
        topic: String,
        /// Configured bound.
        timeout_ms: u64,
    },

    /// Signature header missing or not produced by any trusted key.
    #[snafu(display("message {key:?} on {topic:?}: {message}"))]
    Signature {
        /// Topic name.
        topic: String,
        /// Record key.
        key: String,
        /// Verification failure.
        message: String,
    },

    /// Key material could not be loaded.
    #[snafu(display("invalid key material: {message}"))]
    KeyMaterial {
        /// What is wrong with the key.
        message: String,
    },

    /// Payload encryption or decryption failed.
    #[snafu(display("payload crypto on {topic:?} failed: {message}"))]
    Crypto {
        /// Topic name.
        topic: String,
        /// Failure description.
        message: String,
    },

    /// Record key or headers do not form a valid envelope.
    #[snafu(display("malformed record on {topic:?}: {source}"))]
    Envelope {
        /// Topic name.
        topic: String,
        /// Underlying envelope error.
        source: EnvelopeError,
    },

    /// The handler failed to apply a message.
    #[snafu(display("handler failed on {topic:?} at offset {offset}: {message}"))]
    Handler {
        /// Topic name.
        topic: String,
        /// Offset of the failing record.
        offset: u64,
        /// Handler error rendered for logs.
        message: String,
        /// Classification reported by the handler.
        code: ErrorCode,
    },

    /// The consumer was cancelled.
    #[snafu(display("consumer of {topic:?} cancelled"))]
    Cancelled {
        /// Topic name.
        topic: String,
    },
}

impl HasErrorCode for BrokerError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::TopicNotFound { .. } | Self::InvalidTopic { .. } => ErrorCode::BrokerTopic,
            Self::Append { .. } => ErrorCode::BrokerLog,
            Self::Timeout { .. } => ErrorCode::BrokerTimeout,
            Self::Signature { .. } => ErrorCode::BrokerSignature,
            Self::KeyMaterial { .. } => ErrorCode::AppConfig,
            Self::Crypto { .. } => ErrorCode::BrokerCrypto,
            Self::Envelope { source, .. } => source.code(),
            Self::Handler { code, .. } => *code,
            Self::Cancelled { .. } => ErrorCode::AppInternal,
        }
    }
}
