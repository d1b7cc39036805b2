//! Error types for the identity and access layer.

use ironvault_broker::BrokerError;
use ironvault_types::{
    EnvelopeError, ErrorCode, HasErrorCode, ValidationError, codec::CodecError, config::ConfigError,
};
use snafu::Snafu;

/// Result type alias for identity and access operations.
pub type Result<T, E = IamError> = std::result::Result<T, E>;

/// Errors produced by repositories, dispatch, restore and the backend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IamError {
    /// The table store refused an operation.
    #[snafu(display("store: {source}"))]
    Store {
        /// Underlying store error.
        source: ironvault_memdb::Error,
    },

    /// Publishing or consuming failed.
    #[snafu(display("broker: {source}"))]
    Broker {
        /// Underlying broker error.
        source: BrokerError,
    },

    /// An envelope payload did not decode into its registered type.
    #[snafu(display("decoding message: {source}"))]
    Decode {
        /// Underlying envelope error.
        source: EnvelopeError,
    },

    /// A record could not be serialized for publication or storage.
    #[snafu(display("serializing {object_type}: {message}"))]
    Serialize {
        /// Type tag of the record.
        object_type: String,
        /// Failure description.
        message: String,
    },

    /// The sealed configuration blob could not be encoded or decoded.
    #[snafu(display("sealed configuration: {source}"))]
    Seal {
        /// Underlying codec error.
        source: CodecError,
    },

    /// Object does not exist.
    #[snafu(display("{object_type}/{id} not found"))]
    NotFound {
        /// Type tag.
        object_type: String,
        /// Object identifier.
        id: String,
    },

    /// Object exists already.
    #[snafu(display("{object_type}/{id} already exists"))]
    AlreadyExists {
        /// Type tag.
        object_type: String,
        /// Object identifier.
        id: String,
    },

    /// The presented `resource_version` is not the stored one.
    #[snafu(display("{object_type}/{id}: bad version, expected {expected:?}, got {presented:?}"))]
    BadVersion {
        /// Type tag.
        object_type: String,
        /// Object identifier.
        id: String,
        /// Stored version.
        expected: String,
        /// Version carried by the request.
        presented: String,
    },

    /// The presented generation number is not the stored one.
    #[snafu(display("generation mismatch for {uuid}: stored {stored}, presented {presented}"))]
    GenerationMismatch {
        /// Token-bearing record.
        uuid: String,
        /// Current generation.
        stored: u64,
        /// Generation carried by the credential.
        presented: u64,
    },

    /// Malformed input.
    #[snafu(display("invalid argument: {message}"))]
    InvalidArgument {
        /// What is wrong.
        message: String,
    },

    /// The backend has no live configuration.
    #[snafu(display("backend is not configured ({phase})"))]
    NotConfigured {
        /// Phase the backend is in.
        phase: &'static str,
    },

    /// Backend configuration is invalid.
    #[snafu(display("configuration: {source}"))]
    Config {
        /// Underlying validation error.
        source: ConfigError,
    },

    /// Derived downstream actions violate the one-action contract.
    #[snafu(display("consistency: {message}"))]
    Consistency {
        /// Description of the mismatch.
        message: String,
    },

    /// The identity system failed a call.
    #[snafu(display("identity system: {message}"))]
    Downstream {
        /// Failure description.
        message: String,
    },

    /// Host configuration storage failed.
    #[snafu(display("config storage at {path}: {source}"))]
    Storage {
        /// Path or key involved.
        path: String,
        /// Underlying io error.
        source: std::io::Error,
    },

    /// A background task panicked or was aborted.
    #[snafu(display("task {task:?} did not finish: {message}"))]
    Task {
        /// Task name.
        task: String,
        /// Join failure.
        message: String,
    },
}

impl HasErrorCode for IamError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::Store { source } => source.code(),
            Self::Broker { source } => source.code(),
            Self::Decode { source } => source.code(),
            Self::Serialize { .. } | Self::Seal { .. } => ErrorCode::AppSerialization,
            Self::NotFound { .. } => ErrorCode::ObjectNotFound,
            Self::AlreadyExists { .. } => ErrorCode::ObjectAlreadyExists,
            Self::BadVersion { .. } => ErrorCode::ObjectBadVersion,
            Self::GenerationMismatch { .. } => ErrorCode::ObjectGenerationMismatch,
            Self::InvalidArgument { .. } => ErrorCode::ObjectInvalidArgument,
            Self::NotConfigured { .. } => ErrorCode::ObjectNotConfigured,
            Self::Config { .. } => ErrorCode::AppConfig,
            Self::Consistency { .. } => ErrorCode::DispatchConsistency,
            Self::Downstream { .. } => ErrorCode::DispatchDownstream,
            Self::Storage { .. } | Self::Task { .. } => ErrorCode::AppInternal,
        }
    }
}

impl From<ironvault_memdb::Error> for IamError {
    fn from(source: ironvault_memdb::Error) -> Self {
        Self::Store { source }
    }
}

impl From<BrokerError> for IamError {
    fn from(source: BrokerError) -> Self {
        Self::Broker { source }
    }
}

impl From<ValidationError> for IamError {
    fn from(e: ValidationError) -> Self {
        Self::InvalidArgument { message: e.to_string() }
    }
}

impl IamError {
    /// Whether the store rejected the operation because dependent rows exist.
    #[must_use]
    pub fn is_not_empty_relation(&self) -> bool {
        matches!(self, Self::Store { source: ironvault_memdb::Error::NotEmptyRelation { .. } })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_keep_their_code() {
        let err = IamError::from(ironvault_memdb::Error::IsArchived {
            table: "user".to_string(),
            id: "u".to_string(),
        });
        assert_eq!(err.code(), ErrorCode::ObjectIsArchived);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_consistency_is_fatal() {
        let err = IamError::Consistency { message: "two actions".to_string() };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_downstream_is_retryable() {
        let err = IamError::Downstream { message: "unavailable".to_string() };
        assert_eq!(err.code(), ErrorCode::DispatchDownstream);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_empty_relation_detection() {
        let err = IamError::from(ironvault_memdb::Error::NotEmptyRelation {
            table: "role_binding".to_string(),
            details: "x".to_string(),
        });
        assert!(err.is_not_empty_relation());
        assert!(!IamError::NotConfigured { phase: "unconfigured" }.is_not_empty_relation());
    }
}
