//! Secondary index declarations and key extraction.
//!
//! Index keys are strings. Compound keys join their parts with `'\0'`, so a
//! prefix lookup over the leading parts of a compound index is a plain string
//! prefix scan. An empty string counts as a missing value.

use crate::record::{FieldValue, Record};

/// Separator between the parts of a compound key.
pub const KEY_SEPARATOR: char = '\0';

/// Name of the mandatory primary index of every table.
pub const PRIMARY_INDEX: &str = "id";

/// Broad classification of an indexer, used by schema validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Single string field.
    String,
    /// Single UUID-formatted string field.
    Uuid,
    /// String-list field; one key per element.
    List,
    /// Boolean field.
    Bool,
    /// Concatenation of single-valued parts.
    Compound,
}

/// Extracts index keys from records and lookup keys from arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indexer {
    /// String field, optionally case-folded.
    Field {
        /// Source field.
        field: String,
        /// Lowercase values and arguments.
        lowercase: bool,
    },
    /// String field that must hold a UUID.
    Uuid {
        /// Source field.
        field: String,
    },
    /// String-list field.
    List {
        /// Source field.
        field: String,
        /// Lowercase values and arguments.
        lowercase: bool,
    },
    /// Boolean field; keys are `"true"`/`"false"`.
    Bool {
        /// Source field.
        field: String,
    },
    /// Ordered single-valued parts. Missing if any part is missing.
    Compound(Vec<Indexer>),
}

impl Indexer {
    /// String indexer over `field`.
    pub fn field(field: impl Into<String>) -> Self {
        Self::Field { field: field.into(), lowercase: false }
    }

    /// Case-insensitive string indexer over `field`.
    pub fn field_lowercase(field: impl Into<String>) -> Self {
        Self::Field { field: field.into(), lowercase: true }
    }

    /// UUID indexer over `field`.
    pub fn uuid(field: impl Into<String>) -> Self {
        Self::Uuid { field: field.into() }
    }

    /// String-list indexer over `field`.
    pub fn list(field: impl Into<String>) -> Self {
        Self::List { field: field.into(), lowercase: false }
    }

    /// Boolean indexer over `field`.
    pub fn bool(field: impl Into<String>) -> Self {
        Self::Bool { field: field.into() }
    }

    /// Classification of this indexer.
    #[must_use]
    pub fn kind(&self) -> IndexKind {
        match self {
            Self::Field { .. } => IndexKind::String,
            Self::Uuid { .. } => IndexKind::Uuid,
            Self::List { .. } => IndexKind::List,
            Self::Bool { .. } => IndexKind::Bool,
            Self::Compound(_) => IndexKind::Compound,
        }
    }

    /// Every record field this indexer reads.
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Self::Field { field, .. }
            | Self::Uuid { field }
            | Self::List { field, .. }
            | Self::Bool { field } => vec![field.as_str()],
            Self::Compound(parts) => parts.iter().flat_map(Indexer::fields).collect(),
        }
    }

    /// Number of lookup arguments an exact match takes.
    #[must_use]
    pub fn arity(&self) -> usize {
        match self {
            Self::Compound(parts) => parts.len(),
            _ => 1,
        }
    }

    /// Keys a record contributes to this index. An empty result means the
    /// value is missing.
    pub(crate) fn keys(&self, record: &dyn Record) -> Result<Vec<String>, String> {
        match self {
            Self::Field { field, lowercase } => {
                let value = single(record, field)?;
                Ok(value.map(|v| fold(v, *lowercase)).into_iter().collect())
            },
            Self::Uuid { field } => match single(record, field)? {
                Some(v) => {
                    uuid::Uuid::parse_str(&v)
                        .map_err(|e| format!("field {field:?} value {v:?} is not a UUID: {e}"))?;
                    Ok(vec![v.to_lowercase()])
                },
                None => Ok(Vec::new()),
            },
            Self::List { field, lowercase } => match lookup(record, field)? {
                FieldValue::List(items) => {
                    let mut keys: Vec<String> = items
                        .into_iter()
                        .filter(|s| !s.is_empty())
                        .map(|s| fold(s, *lowercase))
                        .collect();
                    keys.sort();
                    keys.dedup();
                    Ok(keys)
                },
                FieldValue::Absent => Ok(Vec::new()),
                other => Err(format!("field {field:?} is not a list: {other:?}")),
            },
            Self::Bool { field } => match lookup(record, field)? {
                FieldValue::Bool(b) => Ok(vec![b.to_string()]),
                other => Err(format!("field {field:?} is not a bool: {other:?}")),
            },
            Self::Compound(parts) => {
                let mut joined = Vec::with_capacity(parts.len());
                for part in parts {
                    let mut keys = part.keys(record)?;
                    match keys.len() {
                        0 => return Ok(Vec::new()),
                        1 => joined.push(keys.remove(0)),
                        _ => return Err("compound parts must be single-valued".to_string()),
                    }
                }
                Ok(vec![joined.join(&KEY_SEPARATOR.to_string())])
            },
        }
    }

    /// Lookup key for an exact match.
    pub(crate) fn exact_key(&self, args: &[&str]) -> Result<String, String> {
        if args.len() != self.arity() {
            return Err(format!("expected {} argument(s), got {}", self.arity(), args.len()));
        }
        self.key_from_args(args)
    }

    /// Lookup key for a prefix scan. Compound indexes accept any number of
    /// leading parts; the last one may itself be partial.
    pub(crate) fn prefix_key(&self, args: &[&str]) -> Result<String, String> {
        if args.is_empty() || args.len() > self.arity() {
            return Err(format!("expected 1..={} argument(s), got {}", self.arity(), args.len()));
        }
        self.key_from_args(args)
    }

    fn key_from_args(&self, args: &[&str]) -> Result<String, String> {
        match self {
            Self::Compound(parts) => {
                let mut out = Vec::with_capacity(args.len());
                for (part, arg) in parts.iter().zip(args) {
                    out.push(part.key_from_args(std::slice::from_ref(arg))?);
                }
                Ok(out.join(&KEY_SEPARATOR.to_string()))
            },
            Self::Field { lowercase, .. } | Self::List { lowercase, .. } => {
                Ok(fold(args[0].to_string(), *lowercase))
            },
            Self::Uuid { .. } => Ok(args[0].to_lowercase()),
            Self::Bool { .. } => match args[0] {
                "true" | "false" => Ok(args[0].to_string()),
                other => Err(format!("bool index argument must be \"true\" or \"false\", got {other:?}")),
            },
        }
    }
}

fn fold(value: String, lowercase: bool) -> String {
    if lowercase { value.to_lowercase() } else { value }
}

fn lookup(record: &dyn Record, field: &str) -> Result<FieldValue, String> {
    record.field(field).ok_or_else(|| format!("record has no field {field:?}"))
}

fn single(record: &dyn Record, field: &str) -> Result<Option<String>, String> {
    match lookup(record, field)? {
        FieldValue::Str(s) if s.is_empty() => Ok(None),
        FieldValue::Str(s) => Ok(Some(s)),
        FieldValue::Int(i) => Ok(Some(i.to_string())),
        FieldValue::Absent => Ok(None),
        other => Err(format!("field {field:?} is not a string: {other:?}")),
    }
}

/// Declaration of one index on a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    /// Index name, unique within the table.
    pub name: String,
    /// At most one row per key, archived rows included.
    pub unique: bool,
    /// Rows with a missing value are accepted and simply not indexed.
    pub allow_missing: bool,
    /// Key extraction.
    pub indexer: Indexer,
}

impl IndexSchema {
    /// Non-unique index that rejects missing values.
    pub fn new(name: impl Into<String>, indexer: Indexer) -> Self {
        Self { name: name.into(), unique: false, allow_missing: false, indexer }
    }

    /// Primary index over a UUID field.
    pub fn primary_uuid(field: impl Into<String>) -> Self {
        Self::new(PRIMARY_INDEX, Indexer::uuid(field)).unique()
    }

    /// Primary index over a plain string field.
    pub fn primary(field: impl Into<String>) -> Self {
        Self::new(PRIMARY_INDEX, Indexer::field(field)).unique()
    }

    /// Marks the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Accepts rows with missing values.
    #[must_use]
    pub fn allow_missing(mut self) -> Self {
        self.allow_missing = true;
        self
    }
}
