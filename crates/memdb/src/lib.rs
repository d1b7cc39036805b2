//! Indexed in-memory transactional table store.
//!
//! - [`MemDb`] holds every table in an immutable snapshot swapped atomically on
//!   commit. Readers never block; one writer at a time.
//! - Tables are declared with [`TableSchema`] and [`IndexSchema`]; relations
//!   between tables with [`Relation`] inside a [`DbSchema`].
//! - [`WriteTxn`] enforces mandatory foreign keys and unique constraints on
//!   insert and implements the cascade engine: `delete`, `cascade_delete`,
//!   `archive`, `cascade_archive`, `restore` and `cascade_restore`.
//! - Every write transaction tracks coalesced [`Change`]s so callers can
//!   publish exactly what a commit changed.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cascade;
mod db;
mod error;
mod index;
mod record;
mod schema;
mod table;

pub use db::{Change, MemDb, ReadTxn, Reader, WriteTxn, downcast};
pub use error::{Error, Result};
pub use index::{IndexKind, IndexSchema, Indexer, KEY_SEPARATOR, PRIMARY_INDEX};
pub use record::{ArchiveMark, Field, FieldValue, Record, TableRecord};
pub use schema::{DbSchema, Relation, TableSchema};
