//! Topic naming rules.
//!
//! - Root topics are named `"<root-source-name>.<replica-name>"`: exactly two
//!   dot-separated, non-empty segments.
//! - Self topics are operator-chosen: non-empty, no whitespace.
//! - The generation topic has the fixed name [`GENERATION_TOPIC`].

use crate::error::ValidationError;

/// Fixed name of the topic carrying generation-number rows.
pub const GENERATION_TOPIC: &str = "multipass_generation_num";

/// Longest topic name accepted by the log brokers we target.
pub const MAX_TOPIC_NAME_BYTES: usize = 249;

fn invalid(field: &str, constraint: impl Into<String>) -> ValidationError {
    ValidationError { field: field.to_string(), constraint: constraint.into() }
}

fn validate_common(field: &str, name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    if name.len() > MAX_TOPIC_NAME_BYTES {
        return Err(invalid(
            field,
            format!("length {} bytes exceeds maximum {MAX_TOPIC_NAME_BYTES} bytes", name.len()),
        ));
    }
    if let Some(pos) = name.find(char::is_whitespace) {
        return Err(invalid(field, format!("contains whitespace at byte offset {pos}")));
    }
    Ok(())
}

/// Validates a root topic name and returns its `(root_source, replica)` segments.
///
/// # Errors
///
/// Returns [`ValidationError`] unless the name has exactly two non-empty
/// dot-separated segments and no whitespace.
pub fn split_root_topic(name: &str) -> Result<(&str, &str), ValidationError> {
    validate_common("root_topic_name", name)?;
    let mut parts = name.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(source), Some(replica), None) if !source.is_empty() && !replica.is_empty() => {
            Ok((source, replica))
        },
        _ => Err(invalid(
            "root_topic_name",
            format!("{name:?} must be \"<root-source-name>.<replica-name>\""),
        )),
    }
}

/// Validates a root topic name.
///
/// # Errors
///
/// See [`split_root_topic`].
pub fn validate_root_topic(name: &str) -> Result<(), ValidationError> {
    split_root_topic(name).map(|_| ())
}

/// Validates an operator-chosen self topic name.
///
/// # Errors
///
/// Returns [`ValidationError`] if the name is empty, too long or contains whitespace.
pub fn validate_self_topic(name: &str) -> Result<(), ValidationError> {
    validate_common("self_topic_name", name)
}

/// Builds the topic an authoritative source publishes to for one replica.
///
/// # Errors
///
/// Returns [`ValidationError`] if the resulting name is not a valid root topic,
/// which happens when either part is empty or contains a dot.
pub fn replica_topic(root_source: &str, replica: &str) -> Result<String, ValidationError> {
    let name = format!("{root_source}.{replica}");
    validate_root_topic(&name)?;
    Ok(name)
}
