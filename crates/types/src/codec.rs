//! Serialization helpers shared across crates.
//!
//! Two formats are in use: postcard for compact opaque blobs (the sealed
//! backend configuration) and JSON for replicated object payloads, which
//! must stay readable by every publisher version.

use serde::{Serialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu};

use crate::error::{ErrorCode, HasErrorCode};

/// Error type for codec operations.
#[derive(Debug, Snafu)]
pub enum CodecError {
    /// Postcard encoding failed.
    #[snafu(display("Encoding failed: {source}"))]
    Encode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// Postcard decoding failed.
    #[snafu(display("Decoding failed: {source}"))]
    Decode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// JSON encoding or decoding failed.
    #[snafu(display("JSON codec failed for {type_name}: {source}"))]
    Json {
        /// Name of the Rust type being processed.
        type_name: &'static str,
        /// The underlying serde_json error.
        source: serde_json::Error,
    },
}

impl HasErrorCode for CodecError {
    fn code(&self) -> ErrorCode {
        ErrorCode::AppSerialization
    }
}

/// Encodes a value to bytes using postcard serialization.
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).context(EncodeSnafu)
}

/// Decodes bytes to a value using postcard deserialization.
///
/// # Errors
///
/// Returns `CodecError::Decode` if deserialization fails.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).context(DecodeSnafu)
}

/// Encodes a value as JSON bytes.
///
/// # Errors
///
/// Returns `CodecError::Json` if serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).context(JsonSnafu { type_name: std::any::type_name::<T>() })
}

/// Decodes JSON bytes into a value.
///
/// # Errors
///
/// Returns `CodecError::Json` if the bytes are not valid JSON for `T`.
pub fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).context(JsonSnafu { type_name: std::any::type_name::<T>() })
}
