//! Wire envelope for replicated objects.
//!
//! Every log record carries one envelope: the object type tag, its
//! identifier, the serialized payload and a `deleted` flag. An empty payload
//! means deletion; the flag is a redundant confirmation carried in a header.

use serde::{Serialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu, ensure};

use crate::error::{ErrorCode, HasErrorCode};

/// Errors produced while building or parsing envelopes.
#[derive(Debug, Snafu)]
pub enum EnvelopeError {
    /// Record key is not `"<type>/<id>"`.
    #[snafu(display("invalid record key {key:?}: expected \"<type>/<id>\""))]
    InvalidKey {
        /// The offending key.
        key: String,
    },

    /// Payload could not be encoded or decoded as JSON.
    #[snafu(display("payload of {object_type}/{id} is not valid JSON: {source}"))]
    Json {
        /// Object type tag.
        object_type: String,
        /// Object identifier.
        id: String,
        /// The underlying serde_json error.
        source: serde_json::Error,
    },

    /// A record carries a payload but is flagged deleted.
    #[snafu(display("record {key:?} is flagged deleted but carries a payload"))]
    DeletedWithPayload {
        /// The offending key.
        key: String,
    },
}

impl HasErrorCode for EnvelopeError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidKey { .. } | Self::DeletedWithPayload { .. } => ErrorCode::BrokerEnvelope,
            Self::Json { .. } => ErrorCode::DispatchDecode,
        }
    }
}

/// A replicated object as it travels through the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Type tag, equal to the table name of the object.
    pub object_type: String,
    /// Stable identifier of the object.
    pub id: String,
    /// Serialized payload. Empty for deletions.
    pub data: Vec<u8>,
    /// Redundant deletion marker.
    pub deleted: bool,
}

impl Envelope {
    /// Creates an upsert envelope from raw payload bytes.
    pub fn upsert(object_type: impl Into<String>, id: impl Into<String>, data: Vec<u8>) -> Self {
        let deleted = data.is_empty();
        Self { object_type: object_type.into(), id: id.into(), data, deleted }
    }

    /// Creates a deletion envelope.
    pub fn tombstone(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self { object_type: object_type.into(), id: id.into(), data: Vec::new(), deleted: true }
    }

    /// Serializes `object` as JSON into an upsert envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Json`] if serialization fails.
    pub fn from_object<T: Serialize>(
        object_type: impl Into<String>,
        id: impl Into<String>,
        object: &T,
    ) -> Result<Self, EnvelopeError> {
        let object_type = object_type.into();
        let id = id.into();
        let data = serde_json::to_vec(object)
            .context(JsonSnafu { object_type: object_type.clone(), id: id.clone() })?;
        Ok(Self::upsert(object_type, id, data))
    }

    /// Whether this envelope deletes its object. Determined by the payload alone.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.data.is_empty()
    }

    /// Decodes the JSON payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Json`] if the payload does not match `T`.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        serde_json::from_slice(&self.data)
            .context(JsonSnafu { object_type: self.object_type.clone(), id: self.id.clone() })
    }

    /// Record key `"<type>/<id>"`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.object_type, self.id)
    }
}

/// Splits a record key into `(object_type, id)`.
///
/// # Errors
///
/// Returns [`EnvelopeError::InvalidKey`] unless the key has exactly two
/// non-empty `/`-separated segments.
pub fn parse_key(key: &str) -> Result<(&str, &str), EnvelopeError> {
    let mut parts = key.split('/');
    let (object_type, id) = match (parts.next(), parts.next(), parts.next()) {
        (Some(object_type), Some(id), None) => (object_type, id),
        _ => return InvalidKeySnafu { key }.fail(),
    };
    ensure!(!object_type.is_empty() && !id.is_empty(), InvalidKeySnafu { key });
    Ok((object_type, id))
}

/// Whether a record with `value` is a deletion.
///
/// Only an empty value deletes. The `deleted` flag confirms a deletion and
/// is never enough by itself.
///
/// # Errors
///
/// Returns [`EnvelopeError::DeletedWithPayload`] if `deleted_flag` is set on
/// a non-empty value.
pub fn is_delete_record(key: &str, value: &[u8], deleted_flag: bool) -> Result<bool, EnvelopeError> {
    ensure!(value.is_empty() || !deleted_flag, DeletedWithPayloadSnafu { key });
    Ok(value.is_empty())
}
