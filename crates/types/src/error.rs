//! Error codes shared by every ironvault crate.
//!
//! Each crate defines its own snafu error enum; every variant maps to an
//! [`ErrorCode`] with a unique numeric identifier, a retryability
//! classification and a suggested recovery action. The consumer loop uses
//! [`ErrorCode::is_retryable`] to decide between redelivery and stopping.

use core::fmt;

use snafu::Snafu;

/// Machine-readable error codes for programmatic error handling.
///
/// | Range       | Domain    | Examples                                         |
/// |-------------|-----------|--------------------------------------------------|
/// | 1000–1099   | Store     | Schema, transaction, index, unique constraint    |
/// | 1100–1199   | Cascade   | Non-empty relation, foreign key, not archivable  |
/// | 2000–2099   | Broker    | Topic, append, timeout, signature, decryption    |
/// | 2100–2199   | Dispatch  | Payload decode, consistency, downstream          |
/// | 3000–3099   | Objects   | Not found, bad version, archive preconditions    |
/// | 3200–3299   | Ambient   | Serialization, config, internal                  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // --- Store (1000–1099) ---
    /// Schema construction or validation failed.
    StoreSchema = 1000,
    /// Transaction could not be opened or committed.
    StoreTransaction = 1001,
    /// Unknown table or index, or malformed index arguments.
    StoreIndex = 1002,
    /// A unique secondary index already holds the value for another row.
    StoreUniqueConstraint = 1003,

    // --- Cascade (1100–1199) ---
    /// Dependent rows still exist under a declared relation.
    CascadeNotEmptyRelation = 1100,
    /// A mandatory foreign key does not resolve.
    CascadeForeignKey = 1101,
    /// The record type carries no archive mark.
    CascadeNotArchivable = 1102,

    // --- Broker (2000–2099) ---
    /// Topic creation, deletion or lookup failed.
    BrokerTopic = 2000,
    /// Appending to or reading from a topic failed.
    BrokerLog = 2001,
    /// A broker call exceeded its timeout.
    BrokerTimeout = 2002,
    /// Message signature missing or invalid.
    BrokerSignature = 2003,
    /// Payload encryption or decryption failed.
    BrokerCrypto = 2004,
    /// Record key or headers are malformed.
    BrokerEnvelope = 2005,

    // --- Dispatch (2100–2199) ---
    /// Object payload could not be decoded into its registered type.
    DispatchDecode = 2100,
    /// Derived downstream actions violate the one-action contract.
    DispatchConsistency = 2101,
    /// The external identity system rejected or failed a call.
    DispatchDownstream = 2102,

    // --- Objects (3000–3099) ---
    /// Row not found.
    ObjectNotFound = 3000,
    /// Row already exists.
    ObjectAlreadyExists = 3001,
    /// Optimistic-concurrency conflict on `resource_version`.
    ObjectBadVersion = 3002,
    /// Operation requires a live row but the row is archived.
    ObjectIsArchived = 3003,
    /// Operation requires an archived row but the row is live.
    ObjectIsNotArchived = 3004,
    /// Malformed input.
    ObjectInvalidArgument = 3005,
    /// Required configuration is absent.
    ObjectNotConfigured = 3006,
    /// Presented generation number differs from the stored one.
    ObjectGenerationMismatch = 3007,

    // --- Ambient (3200–3299) ---
    /// Serialization or deserialization error.
    AppSerialization = 3200,
    /// Configuration error.
    AppConfig = 3201,
    /// Internal error (unexpected state, invariant violation).
    AppInternal = 3204,
}

impl ErrorCode {
    /// Returns the numeric code value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Converts a numeric code to an `ErrorCode`, returning `None` for unknown values.
    #[must_use]
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::StoreSchema),
            1001 => Some(Self::StoreTransaction),
            1002 => Some(Self::StoreIndex),
            1003 => Some(Self::StoreUniqueConstraint),
            1100 => Some(Self::CascadeNotEmptyRelation),
            1101 => Some(Self::CascadeForeignKey),
            1102 => Some(Self::CascadeNotArchivable),
            2000 => Some(Self::BrokerTopic),
            2001 => Some(Self::BrokerLog),
            2002 => Some(Self::BrokerTimeout),
            2003 => Some(Self::BrokerSignature),
            2004 => Some(Self::BrokerCrypto),
            2005 => Some(Self::BrokerEnvelope),
            2100 => Some(Self::DispatchDecode),
            2101 => Some(Self::DispatchConsistency),
            2102 => Some(Self::DispatchDownstream),
            3000 => Some(Self::ObjectNotFound),
            3001 => Some(Self::ObjectAlreadyExists),
            3002 => Some(Self::ObjectBadVersion),
            3003 => Some(Self::ObjectIsArchived),
            3004 => Some(Self::ObjectIsNotArchived),
            3005 => Some(Self::ObjectInvalidArgument),
            3006 => Some(Self::ObjectNotConfigured),
            3007 => Some(Self::ObjectGenerationMismatch),
            3200 => Some(Self::AppSerialization),
            3201 => Some(Self::AppConfig),
            3204 => Some(Self::AppInternal),
            _ => None,
        }
    }

    /// Whether a message that failed with this code should be redelivered.
    ///
    /// Retryable errors may succeed on a subsequent attempt, typically after
    /// backoff, because the input is fine but the environment was not ready
    /// (a parent row not replicated yet, the identity system down).
    /// Non-retryable errors stop the consumer and need operator attention.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(
            self,
            Self::StoreSchema
                | Self::BrokerSignature
                | Self::BrokerCrypto
                | Self::BrokerEnvelope
                | Self::DispatchDecode
                | Self::DispatchConsistency
                | Self::ObjectNotConfigured
                | Self::AppConfig
                | Self::AppInternal
        )
    }

    /// Suggested recovery action for this error code.
    #[must_use]
    pub const fn suggested_action(self) -> &'static str {
        match self {
            Self::StoreSchema => {
                "Fix the table or relation declarations. The store refuses to start with an invalid schema."
            },
            Self::StoreTransaction => "Retry the transaction. Only one writer may be active at a time.",
            Self::StoreIndex => "Check the table and index names and the number of index arguments.",
            Self::StoreUniqueConstraint => {
                "Choose a different value for the unique field or remove the conflicting row."
            },
            Self::CascadeNotEmptyRelation => {
                "Archive or delete the dependent rows first, then retry."
            },
            Self::CascadeForeignKey => {
                "Create or restore the referenced row before writing the dependent row."
            },
            Self::CascadeNotArchivable => "Use delete instead of archive for this record type.",
            Self::BrokerTopic => "Verify the topic exists and the broker endpoints are reachable.",
            Self::BrokerLog => "Retry with backoff. The broker may be rebalancing.",
            Self::BrokerTimeout => "Retry with backoff and check broker latency.",
            Self::BrokerSignature => {
                "Check the configured root and peer public keys match the publishing instances."
            },
            Self::BrokerCrypto => {
                "Check every instance shares the same encryption key and the debug toggle is unset."
            },
            Self::BrokerEnvelope => "The message was not produced by a compatible publisher.",
            Self::DispatchDecode => {
                "The payload does not match the registered type. Check publisher and consumer versions."
            },
            Self::DispatchConsistency => {
                "Local state and the log disagree. Inspect the object and resync from the log."
            },
            Self::DispatchDownstream => "Retry after the identity system becomes available.",
            Self::ObjectNotFound => "Verify the identifier or create the object first.",
            Self::ObjectAlreadyExists => "Use update instead of create.",
            Self::ObjectBadVersion => "Re-read the object and retry with its current resource_version.",
            Self::ObjectIsArchived => "Restore the object before modifying it.",
            Self::ObjectIsNotArchived => "The object is live. Nothing to restore.",
            Self::ObjectInvalidArgument => "Fix the request parameters and resubmit.",
            Self::ObjectNotConfigured => "Write the broker configuration before starting the backend.",
            Self::ObjectGenerationMismatch => {
                "The credential was revoked. Issue a new token for the current generation."
            },
            Self::AppSerialization => {
                "Codec bug or data corruption. Report as an issue with serialized data context."
            },
            Self::AppConfig => "Fix the configuration value and restart.",
            Self::AppInternal => {
                "Unexpected state or invariant violation. Collect context and report as an issue."
            },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Implemented by every crate error so callers can classify failures uniformly.
pub trait HasErrorCode {
    /// Returns the machine-readable code of this error.
    fn code(&self) -> ErrorCode;

    /// Shorthand for `self.code().is_retryable()`.
    fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// Error returned when a topic or object identifier violates naming rules.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("{field}: {constraint}"))]
pub struct ValidationError {
    /// The field that failed validation.
    pub field: String,
    /// Description of the violated constraint.
    pub constraint: String,
}

impl HasErrorCode for ValidationError {
    fn code(&self) -> ErrorCode {
        ErrorCode::ObjectInvalidArgument
    }
}
