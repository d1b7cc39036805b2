//! Shared types for ironvault.
//!
//! This crate provides the foundations used by every other crate:
//! - the [`ErrorCode`] catalog and the [`HasErrorCode`] classification trait
//! - the wire [`Envelope`] and record key format
//! - topic naming rules
//! - configuration structs for the broker, topics and consumers
//! - postcard and JSON codec helpers

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod topic;

pub use envelope::{Envelope, EnvelopeError, is_delete_record, parse_key};
pub use error::{ErrorCode, HasErrorCode, ValidationError};
pub use topic::GENERATION_TOPIC;
