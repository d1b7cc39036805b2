//! Record abstraction and archive marks.
//!
//! The store holds type-erased [`Record`]s. Domain types implement the trait
//! through [`impl_record!`](crate::impl_record), which also declares the
//! static field list schema validation checks relations against.

use std::{any::Any, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// Archive state of a record. A zero timestamp means live.
///
/// Serialized flattened into the owning object as `archiving_timestamp` and
/// `archiving_hash`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveMark {
    /// Unix seconds of the archive operation; 0 when live.
    #[serde(rename = "archiving_timestamp", default)]
    pub timestamp: i64,
    /// Random tag shared by every row archived in the same operation.
    #[serde(rename = "archiving_hash", default)]
    pub hash: i64,
}

impl ArchiveMark {
    /// The live mark.
    pub const LIVE: Self = Self { timestamp: 0, hash: 0 };

    /// A fresh mark stamped with the current time and a random hash.
    #[must_use]
    pub fn new() -> Self {
        Self { timestamp: chrono::Utc::now().timestamp().max(1), hash: rand::random::<i64>() }
    }

    /// Builds a mark from explicit parts.
    #[must_use]
    pub const fn at(timestamp: i64, hash: i64) -> Self {
        Self { timestamp, hash }
    }

    /// Whether the mark denotes a live record.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.timestamp == 0
    }
}

/// Value of one record field as seen by indexers and relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Single string (UUIDs are strings too).
    Str(String),
    /// String list.
    List(Vec<String>),
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Optional field holding nothing.
    Absent,
}

impl FieldValue {
    /// Individual string values, for relation traversal. Empty strings are skipped.
    #[must_use]
    pub fn strings(&self) -> Vec<String> {
        match self {
            Self::Str(s) if !s.is_empty() => vec![s.clone()],
            Self::List(items) => items.iter().filter(|s| !s.is_empty()).cloned().collect(),
            Self::Bool(b) => vec![b.to_string()],
            Self::Int(i) => vec![i.to_string()],
            _ => Vec::new(),
        }
    }
}

/// Conversion of a struct field into a [`FieldValue`], plus in-place list edits.
pub trait Field {
    /// Current value of the field.
    fn field_value(&self) -> FieldValue;

    /// Removes every occurrence of `value` from list fields. Returns whether
    /// anything changed; scalar fields never change.
    fn remove_list_value(&mut self, _value: &str) -> bool {
        false
    }
}

impl Field for String {
    fn field_value(&self) -> FieldValue {
        FieldValue::Str(self.clone())
    }
}

impl Field for Option<String> {
    fn field_value(&self) -> FieldValue {
        self.as_ref().map_or(FieldValue::Absent, |s| FieldValue::Str(s.clone()))
    }
}

impl Field for Vec<String> {
    fn field_value(&self) -> FieldValue {
        FieldValue::List(self.clone())
    }

    fn remove_list_value(&mut self, value: &str) -> bool {
        let before = self.len();
        self.retain(|item| item != value);
        self.len() != before
    }
}

impl Field for bool {
    fn field_value(&self) -> FieldValue {
        FieldValue::Bool(*self)
    }
}

impl Field for i64 {
    fn field_value(&self) -> FieldValue {
        FieldValue::Int(*self)
    }
}

impl Field for u64 {
    fn field_value(&self) -> FieldValue {
        FieldValue::Int(i64::try_from(*self).unwrap_or(i64::MAX))
    }
}

/// A row stored in a table.
pub trait Record: fmt::Debug + Send + Sync + 'static {
    /// Table (type tag) the record belongs to.
    fn table(&self) -> &'static str;

    /// Value of a named field, or `None` when the type has no such field.
    fn field(&self, name: &str) -> Option<FieldValue>;

    /// Archive mark, or `None` for non-archivable types.
    fn archive_mark(&self) -> Option<ArchiveMark>;

    /// Copy of the record carrying `mark`, or `None` for non-archivable types.
    fn with_archive_mark(&self, mark: ArchiveMark) -> Option<Arc<dyn Record>>;

    /// Copy of the record with `value` removed from the list field `field`,
    /// or `None` when nothing changed.
    fn without_list_value(&self, field: &str, value: &str) -> Option<Arc<dyn Record>>;

    /// Downcasting support.
    fn as_any(&self) -> &dyn Any;

    /// Structural equality with another type-erased record.
    fn eq_record(&self, other: &dyn Record) -> bool;

    /// Whether the record is live. Non-archivable records are always live.
    fn is_live(&self) -> bool {
        self.archive_mark().is_none_or(|m| m.is_live())
    }
}

/// Statically typed record with a fixed table name and field list.
pub trait TableRecord: Record + Clone + PartialEq {
    /// Table name.
    const TABLE: &'static str;
    /// Field names usable by indexes and relations.
    const FIELDS: &'static [&'static str];
}

/// Implements [`Record`] and [`TableRecord`] for a struct.
///
/// ```ignore
/// impl_record!(Tenant, table = "tenant", fields = [uuid, identifier], archivable);
/// impl_record!(Entity, table = "entity", fields = [uuid, name, user_id]);
/// ```
///
/// The `archivable` form expects an `archive_mark: ArchiveMark` field.
#[macro_export]
macro_rules! impl_record {
    (@list_edit $($field:ident),*) => {
        fn without_list_value(
            &self,
            field: &str,
            value: &str,
        ) -> ::core::option::Option<::std::sync::Arc<dyn $crate::Record>> {
            let mut copy = self.clone();
            let changed = match field {
                $(stringify!($field) => $crate::Field::remove_list_value(&mut copy.$field, value),)*
                _ => false,
            };
            if changed { Some(::std::sync::Arc::new(copy)) } else { None }
        }
    };

    (@common $ty:ty, $table:expr, [$($field:ident),*]) => {
        impl $crate::TableRecord for $ty {
            const TABLE: &'static str = $table;
            const FIELDS: &'static [&'static str] = &[$(stringify!($field)),*];
        }
    };

    ($ty:ty, table = $table:expr, fields = [$($field:ident),* $(,)?], archivable) => {
        $crate::impl_record!(@common $ty, $table, [$($field),*]);

        impl $crate::Record for $ty {
            fn table(&self) -> &'static str {
                $table
            }

            fn field(&self, name: &str) -> ::core::option::Option<$crate::FieldValue> {
                match name {
                    $(stringify!($field) => Some($crate::Field::field_value(&self.$field)),)*
                    _ => None,
                }
            }

            fn archive_mark(&self) -> ::core::option::Option<$crate::ArchiveMark> {
                Some(self.archive_mark)
            }

            fn with_archive_mark(
                &self,
                mark: $crate::ArchiveMark,
            ) -> ::core::option::Option<::std::sync::Arc<dyn $crate::Record>> {
                let mut copy = self.clone();
                copy.archive_mark = mark;
                Some(::std::sync::Arc::new(copy))
            }

            $crate::impl_record!(@list_edit $($field),*);

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn eq_record(&self, other: &dyn $crate::Record) -> bool {
                other.as_any().downcast_ref::<Self>().is_some_and(|o| o == self)
            }
        }
    };

    ($ty:ty, table = $table:expr, fields = [$($field:ident),* $(,)?]) => {
        $crate::impl_record!(@common $ty, $table, [$($field),*]);

        impl $crate::Record for $ty {
            fn table(&self) -> &'static str {
                $table
            }

            fn field(&self, name: &str) -> ::core::option::Option<$crate::FieldValue> {
                match name {
                    $(stringify!($field) => Some($crate::Field::field_value(&self.$field)),)*
                    _ => None,
                }
            }

            fn archive_mark(&self) -> ::core::option::Option<$crate::ArchiveMark> {
                None
            }

            fn with_archive_mark(
                &self,
                _mark: $crate::ArchiveMark,
            ) -> ::core::option::Option<::std::sync::Arc<dyn $crate::Record>> {
                None
            }

            $crate::impl_record!(@list_edit $($field),*);

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn eq_record(&self, other: &dyn $crate::Record) -> bool {
                other.as_any().downcast_ref::<Self>().is_some_and(|o| o == self)
            }
        }
    };

}
