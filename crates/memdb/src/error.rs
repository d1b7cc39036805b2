//! Error types for the table store.

use ironvault_types::{ErrorCode, HasErrorCode};
use snafu::Snafu;

/// Result type alias for store operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the table store and the cascade engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Schema declarations are inconsistent.
    #[snafu(display("invalid schema: {message}"))]
    InvalidSchema {
        /// Description of the inconsistency.
        message: String,
    },

    /// Schemas could not be merged.
    #[snafu(display("merging schemas: {message}"))]
    MergeSchema {
        /// Description of the conflict.
        message: String,
    },

    /// Table is not declared in the schema.
    #[snafu(display("table {table:?} not found"))]
    UnknownTable {
        /// Requested table.
        table: String,
    },

    /// Index is not declared on the table.
    #[snafu(display("index {index:?} not found at table {table:?}"))]
    UnknownIndex {
        /// Table name.
        table: String,
        /// Requested index.
        index: String,
    },

    /// Lookup arguments do not fit the index.
    #[snafu(display("index {index:?} at table {table:?}: {message}"))]
    IndexArgs {
        /// Table name.
        table: String,
        /// Index name.
        index: String,
        /// What was wrong with the arguments.
        message: String,
    },

    /// A record produced an unusable value for an index.
    #[snafu(display("indexing {table}/{id} by {index:?}: {message}"))]
    IndexValue {
        /// Table name.
        table: String,
        /// Primary key of the record, when it could be computed.
        id: String,
        /// Index name.
        index: String,
        /// What was wrong with the value.
        message: String,
    },

    /// A unique index or unique constraint already holds the value.
    #[snafu(display("unique constraint {index:?} at table {table:?} violated by value {value:?}"))]
    UniqueViolation {
        /// Table name.
        table: String,
        /// Index name.
        index: String,
        /// Conflicting value.
        value: String,
    },

    /// A mandatory foreign key does not resolve.
    #[snafu(display("foreign key at table {table:?}: {details}"))]
    ForeignKey {
        /// Table of the inserted record.
        table: String,
        /// Every failed reference, `;`-separated.
        details: String,
    },

    /// Dependent rows still exist.
    #[snafu(display("not empty relation at table {table:?}: {details}"))]
    NotEmptyRelation {
        /// Table of the record being archived or deleted.
        table: String,
        /// Every non-empty relation, `;`-separated.
        details: String,
    },

    /// The record type carries no archive mark.
    #[snafu(display("records of table {table:?} are not archivable"))]
    NotArchivable {
        /// Table name.
        table: String,
    },

    /// Archiving a record that is already archived.
    #[snafu(display("{table}/{id} is archived"))]
    IsArchived {
        /// Table name.
        table: String,
        /// Primary key.
        id: String,
    },

    /// Restoring a record that is live.
    #[snafu(display("{table}/{id} is not archived"))]
    IsNotArchived {
        /// Table name.
        table: String,
        /// Primary key.
        id: String,
    },

    /// Deleting a record that is not stored.
    #[snafu(display("{table}/{id} not found"))]
    NotFound {
        /// Table name.
        table: String,
        /// Primary key.
        id: String,
    },

    /// A previous writer panicked while holding the write lock.
    #[snafu(display("write lock poisoned"))]
    Poisoned,
}

impl HasErrorCode for Error {
    fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidSchema { .. } | Self::MergeSchema { .. } => ErrorCode::StoreSchema,
            Self::UnknownTable { .. } | Self::UnknownIndex { .. } | Self::IndexArgs { .. } => {
                ErrorCode::StoreIndex
            },
            Self::IndexValue { .. } => ErrorCode::ObjectInvalidArgument,
            Self::UniqueViolation { .. } => ErrorCode::StoreUniqueConstraint,
            Self::ForeignKey { .. } => ErrorCode::CascadeForeignKey,
            Self::NotEmptyRelation { .. } => ErrorCode::CascadeNotEmptyRelation,
            Self::NotArchivable { .. } => ErrorCode::CascadeNotArchivable,
            Self::IsArchived { .. } => ErrorCode::ObjectIsArchived,
            Self::IsNotArchived { .. } => ErrorCode::ObjectIsNotArchived,
            Self::NotFound { .. } => ErrorCode::ObjectNotFound,
            Self::Poisoned => ErrorCode::StoreTransaction,
        }
    }
}
