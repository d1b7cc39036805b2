//! Database and transaction management.
//!
//! Provides snapshot-isolated transactions over the declared tables. Uses a
//! single-writer model: readers capture the committed snapshot without
//! locking, the one writer works on a private copy and publishes it
//! atomically on commit.
//!
//! # Example
//!
//! ```ignore
//! let db = MemDb::new(schema)?;
//!
//! {
//!     let mut txn = db.write()?;
//!     txn.insert(tenant)?;
//!     txn.commit();
//! }
//!
//! let txn = db.read();
//! let tenant = txn.first_as::<Tenant>("id", &[&uuid])?;
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, MutexGuard},
};

use arc_swap::ArcSwap;
use snafu::ensure;
use tracing::trace;

use crate::{
    error::{
        Error, ForeignKeySnafu, IndexArgsSnafu, IndexValueSnafu, NotFoundSnafu, Result,
        UniqueViolationSnafu, UnknownIndexSnafu, UnknownTableSnafu,
    },
    index::{IndexSchema, PRIMARY_INDEX},
    record::{Record, TableRecord},
    schema::{DbSchema, TableSchema},
    table::{Snapshot, TableData},
};

/// The in-memory database handle.
///
/// Thread-safe with interior mutability. Supports concurrent reads and
/// exclusive writes.
pub struct MemDb {
    schema: Arc<DbSchema>,
    /// Current committed state (atomically swapped on commit).
    committed: ArcSwap<Snapshot>,
    /// Ensures only one write transaction at a time.
    write_lock: std::sync::Mutex<()>,
}

impl std::fmt::Debug for MemDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemDb").field("tables", &self.schema.tables.len()).finish_non_exhaustive()
    }
}

impl MemDb {
    /// Creates an empty database for `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchema`] if schema validation fails.
    pub fn new(schema: DbSchema) -> Result<Self> {
        schema.validate()?;
        let tables = schema
            .tables
            .keys()
            .map(|name| (name.clone(), Arc::new(TableData::default())))
            .collect();
        Ok(Self {
            schema: Arc::new(schema),
            committed: ArcSwap::from_pointee(Snapshot { tables }),
            write_lock: std::sync::Mutex::new(()),
        })
    }

    /// The validated schema.
    #[must_use]
    pub fn schema(&self) -> &DbSchema {
        &self.schema
    }

    /// Begins a read transaction over the latest committed snapshot.
    #[must_use]
    pub fn read(&self) -> ReadTxn {
        ReadTxn { schema: Arc::clone(&self.schema), snapshot: self.committed.load_full() }
    }

    /// Begins the write transaction, blocking while another is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Poisoned`] if the write lock is poisoned.
    pub fn write(&self) -> Result<WriteTxn<'_>> {
        let guard = self.write_lock.lock().map_err(|_| Error::Poisoned)?;
        let snapshot = (*self.committed.load_full()).clone();
        Ok(WriteTxn {
            db: self,
            schema: Arc::clone(&self.schema),
            snapshot,
            changes: Vec::new(),
            change_index: HashMap::new(),
            _write_guard: guard,
        })
    }
}

/// Lookup operations shared by read and write transactions.
pub trait Reader {
    #[doc(hidden)]
    fn view(&self) -> (&DbSchema, &Snapshot);

    /// First row whose `index` key equals `args`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tables or indexes and malformed arguments.
    fn first(&self, table: &str, index: &str, args: &[&str]) -> Result<Option<Arc<dyn Record>>> {
        Ok(self.get(table, index, args)?.into_iter().next())
    }

    /// Every row whose `index` key equals `args`, in primary-key order.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tables or indexes and malformed arguments.
    fn get(&self, table: &str, index: &str, args: &[&str]) -> Result<Vec<Arc<dyn Record>>> {
        let (schema, snapshot) = self.view();
        let (data, index_schema) = lookup_index(schema, snapshot, table, index)?;
        let key = index_schema.indexer.exact_key(args).map_err(|message| {
            IndexArgsSnafu { table, index, message }.build()
        })?;
        Ok(data.exact(index, &key).filter_map(|pk| data.rows.get(pk).cloned()).collect())
    }

    /// Every row whose `index` key starts with `args`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tables or indexes and malformed arguments.
    fn get_prefix(&self, table: &str, index: &str, args: &[&str]) -> Result<Vec<Arc<dyn Record>>> {
        let (schema, snapshot) = self.view();
        let (data, index_schema) = lookup_index(schema, snapshot, table, index)?;
        let prefix = index_schema.indexer.prefix_key(args).map_err(|message| {
            IndexArgsSnafu { table, index, message }.build()
        })?;
        let mut seen = std::collections::HashSet::new();
        Ok(data
            .prefixed(index, &prefix)
            .filter(|pk| seen.insert(pk.as_str()))
            .filter_map(|pk| data.rows.get(pk).cloned())
            .collect())
    }

    /// Every row of `table`, in primary-key order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTable`] for undeclared tables.
    fn list(&self, table: &str) -> Result<Vec<Arc<dyn Record>>> {
        let (_, snapshot) = self.view();
        let data = snapshot.tables.get(table).ok_or_else(|| UnknownTableSnafu { table }.build())?;
        Ok(data.rows.values().cloned().collect())
    }

    /// Typed [`first`](Self::first) on `T`'s table.
    ///
    /// # Errors
    ///
    /// See [`first`](Self::first).
    fn first_as<T: TableRecord>(&self, index: &str, args: &[&str]) -> Result<Option<T>>
    where
        Self: Sized,
    {
        Ok(self.first(T::TABLE, index, args)?.and_then(|r| downcast::<T>(&r)))
    }

    /// Typed [`get`](Self::get) on `T`'s table.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    fn get_as<T: TableRecord>(&self, index: &str, args: &[&str]) -> Result<Vec<T>>
    where
        Self: Sized,
    {
        Ok(self.get(T::TABLE, index, args)?.iter().filter_map(downcast::<T>).collect())
    }

    /// Typed [`list`](Self::list) on `T`'s table.
    ///
    /// # Errors
    ///
    /// See [`list`](Self::list).
    fn list_as<T: TableRecord>(&self) -> Result<Vec<T>>
    where
        Self: Sized,
    {
        Ok(self.list(T::TABLE)?.iter().filter_map(downcast::<T>).collect())
    }
}

/// Clones the concrete record out of a type-erased row.
pub fn downcast<T: TableRecord>(record: &Arc<dyn Record>) -> Option<T> {
    record.as_any().downcast_ref::<T>().cloned()
}

fn lookup_index<'a>(
    schema: &'a DbSchema,
    snapshot: &'a Snapshot,
    table: &str,
    index: &str,
) -> Result<(&'a TableData, &'a IndexSchema)> {
    let table_schema = schema.tables.get(table).ok_or_else(|| UnknownTableSnafu { table }.build())?;
    let index_schema =
        table_schema.indexes.get(index).ok_or_else(|| UnknownIndexSnafu { table, index }.build())?;
    let data = snapshot.tables.get(table).ok_or_else(|| UnknownTableSnafu { table }.build())?;
    Ok((data, index_schema))
}

/// A read-only, point-in-time view. Never blocked by writers.
#[derive(Debug, Clone)]
pub struct ReadTxn {
    schema: Arc<DbSchema>,
    snapshot: Arc<Snapshot>,
}

impl Reader for ReadTxn {
    fn view(&self) -> (&DbSchema, &Snapshot) {
        (&self.schema, &self.snapshot)
    }
}

/// One coalesced row change of a write transaction.
#[derive(Debug, Clone)]
pub struct Change {
    /// Table of the row.
    pub table: String,
    /// Primary key of the row.
    pub id: String,
    /// Row before the transaction, if it existed.
    pub before: Option<Arc<dyn Record>>,
    /// Row after the transaction, or `None` when deleted.
    pub after: Option<Arc<dyn Record>>,
}

impl Change {
    /// Whether the row was removed.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.after.is_none()
    }

    fn is_noop(&self) -> bool {
        match (&self.before, &self.after) {
            (None, None) => true,
            (Some(before), Some(after)) => before.eq_record(after.as_ref()),
            _ => false,
        }
    }
}

/// The single in-flight write transaction.
///
/// Dropping it without [`commit`](Self::commit) discards every write.
pub struct WriteTxn<'db> {
    db: &'db MemDb,
    schema: Arc<DbSchema>,
    snapshot: Snapshot,
    changes: Vec<Change>,
    change_index: HashMap<(String, String), usize>,
    _write_guard: MutexGuard<'db, ()>,
}

impl std::fmt::Debug for WriteTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTxn").field("changes", &self.changes.len()).finish_non_exhaustive()
    }
}

impl Reader for WriteTxn<'_> {
    fn view(&self) -> (&DbSchema, &Snapshot) {
        (&self.schema, &self.snapshot)
    }
}

impl WriteTxn<'_> {
    /// Inserts or replaces a row, checking mandatory foreign keys, unique
    /// indexes and unique constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ForeignKey`] if a mandatory reference does not resolve,
    /// [`Error::UniqueViolation`] on duplicate unique values and
    /// [`Error::IndexValue`] if the row cannot be indexed.
    pub fn insert<R: Record>(&mut self, record: R) -> Result<()> {
        self.insert_arc(Arc::new(record))
    }

    /// [`insert`](Self::insert) for an already type-erased row.
    ///
    /// # Errors
    ///
    /// See [`insert`](Self::insert).
    pub fn insert_arc(&mut self, record: Arc<dyn Record>) -> Result<()> {
        self.check_foreign_keys(record.as_ref())?;
        self.put(record)
    }

    /// Inserts a row skipping foreign-key checks. Unique constraints still
    /// apply. Used when loading a log whose compaction may have reordered
    /// parents after their children.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UniqueViolation`] on duplicate unique values and
    /// [`Error::IndexValue`] if the row cannot be indexed.
    pub fn insert_unchecked(&mut self, record: Arc<dyn Record>) -> Result<()> {
        self.put(record)
    }

    /// Removes a row by primary key without relation checks. Returns the
    /// removed row; absent rows are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTable`] for undeclared tables.
    pub fn remove(&mut self, table: &str, id: &str) -> Result<Option<Arc<dyn Record>>> {
        let schema = Arc::clone(&self.schema);
        let table_schema = schema_table(&schema, table)?;
        let Some(data) = self.snapshot.tables.get_mut(table) else {
            return UnknownTableSnafu { table }.fail();
        };
        if !data.rows.contains_key(id) {
            return Ok(None);
        }
        let data = Arc::make_mut(data);
        let Some(old) = data.rows.remove(id) else {
            return Ok(None);
        };
        for (name, index) in &table_schema.indexes {
            let keys = index.indexer.keys(old.as_ref()).unwrap_or_default();
            data.remove_entries(name, &keys, id);
        }
        trace!(table, id, "row removed");
        self.record_change(table, id, Some(Arc::clone(&old)), None);
        Ok(Some(old))
    }

    /// Coalesced changes made so far, in first-mutation order. Rows whose
    /// final state equals their initial state are omitted.
    #[must_use]
    pub fn changes(&self) -> Vec<Change> {
        self.changes.iter().filter(|c| !c.is_noop()).cloned().collect()
    }

    /// Atomically publishes every write.
    pub fn commit(self) {
        let changes = self.changes.iter().filter(|c| !c.is_noop()).count();
        self.db.committed.store(Arc::new(self.snapshot));
        trace!(changes, "write transaction committed");
    }

    /// Discards every write.
    pub fn abort(self) {
        trace!(changes = self.changes.len(), "write transaction aborted");
    }

    /// Primary key of `record` according to its table's `"id"` index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexValue`] if the record has no usable primary key.
    pub fn primary_key(&self, record: &dyn Record) -> Result<String> {
        primary_key(&self.schema, record)
    }

    /// Stored version of `record`, looked up by primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if the record has no usable primary key.
    pub fn stored(&self, record: &dyn Record) -> Result<Option<Arc<dyn Record>>> {
        let id = self.primary_key(record)?;
        Ok(self
            .snapshot
            .tables
            .get(record.table())
            .and_then(|data| data.rows.get(&id))
            .cloned())
    }

    pub(crate) fn schema_arc(&self) -> Arc<DbSchema> {
        Arc::clone(&self.schema)
    }

    pub(crate) fn require_stored(&self, record: &dyn Record) -> Result<(String, Arc<dyn Record>)> {
        let id = self.primary_key(record)?;
        let table = record.table();
        let stored = self
            .snapshot
            .tables
            .get(table)
            .and_then(|data| data.rows.get(&id))
            .cloned();
        match stored {
            Some(row) => Ok((id, row)),
            None => NotFoundSnafu { table, id }.fail(),
        }
    }

    fn check_foreign_keys(&self, record: &dyn Record) -> Result<()> {
        let table = record.table();
        let Some(relations) = self.schema.mandatory_foreign_keys.get(table) else {
            return Ok(());
        };
        let live = record.is_live();
        let mut failures = Vec::new();
        for relation in relations {
            let values = match record.field(&relation.source_field) {
                Some(crate::FieldValue::List(items)) => items,
                Some(value) => vec![value.strings().into_iter().next().unwrap_or_default()],
                None => vec![String::new()],
            };
            for value in values {
                let related = if value.is_empty() {
                    None
                } else {
                    self.first(&relation.related_table, &relation.related_index, &[&value])?
                };
                let ok = match &related {
                    Some(row) => !live || row.is_live(),
                    None => false,
                };
                if !ok {
                    failures.push(format!(
                        "FK violation: '{value}' not found at table '{}' at index '{}'",
                        relation.related_table, relation.related_index
                    ));
                }
            }
        }
        ensure!(failures.is_empty(), ForeignKeySnafu { table, details: failures.join(";") });
        Ok(())
    }

    /// Stores a row and maintains indexes, with uniqueness checks but no
    /// foreign-key checks.
    pub(crate) fn put(&mut self, record: Arc<dyn Record>) -> Result<()> {
        let table = record.table();
        let schema = Arc::clone(&self.schema);
        let table_schema = schema_table(&schema, table)?;
        let id = primary_key(&schema, record.as_ref())?;

        let mut new_keys: Vec<(String, Vec<String>)> = Vec::with_capacity(table_schema.indexes.len());
        for (name, index) in &table_schema.indexes {
            let keys = index.indexer.keys(record.as_ref()).map_err(|message| {
                IndexValueSnafu { table, id: id.clone(), index: name.clone(), message }.build()
            })?;
            ensure!(
                !keys.is_empty() || index.allow_missing,
                IndexValueSnafu {
                    table,
                    id: id.clone(),
                    index: name.clone(),
                    message: "missing value".to_string(),
                }
            );
            new_keys.push((name.clone(), keys));
        }

        let Some(current) = self.snapshot.tables.get(table) else {
            return UnknownTableSnafu { table }.fail();
        };
        let unique_among_live = schema.unique_constraints.get(table);
        for (name, keys) in &new_keys {
            let Some(index) = table_schema.indexes.get(name) else { continue };
            let live_only = unique_among_live.is_some_and(|names| names.contains(name));
            if !index.unique && !(live_only && record.is_live()) {
                continue;
            }
            for key in keys {
                let conflict = current.exact(name, key).any(|other| {
                    other != &id
                        && (index.unique
                            || current.rows.get(other).is_some_and(|row| row.is_live()))
                });
                ensure!(
                    !conflict,
                    UniqueViolationSnafu { table, index: name.clone(), value: key.clone() }
                );
            }
        }

        let Some(data) = self.snapshot.tables.get_mut(table) else {
            return UnknownTableSnafu { table }.fail();
        };
        let data = Arc::make_mut(data);
        let old = data.rows.insert(id.clone(), Arc::clone(&record));
        if let Some(old) = &old {
            for (name, index) in &table_schema.indexes {
                let keys = index.indexer.keys(old.as_ref()).unwrap_or_default();
                data.remove_entries(name, &keys, &id);
            }
        }
        for (name, keys) in &new_keys {
            data.add_entries(name, keys, &id);
        }
        trace!(table, id = %id, "row stored");
        self.record_change(table, &id, old, Some(record));
        Ok(())
    }

    fn record_change(
        &mut self,
        table: &str,
        id: &str,
        before: Option<Arc<dyn Record>>,
        after: Option<Arc<dyn Record>>,
    ) {
        let key = (table.to_string(), id.to_string());
        if let Some(&pos) = self.change_index.get(&key) {
            if let Some(change) = self.changes.get_mut(pos) {
                change.after = after;
            }
            return;
        }
        self.change_index.insert(key, self.changes.len());
        self.changes.push(Change { table: table.to_string(), id: id.to_string(), before, after });
    }
}

fn schema_table<'a>(schema: &'a DbSchema, table: &str) -> Result<&'a TableSchema> {
    schema.tables.get(table).ok_or_else(|| UnknownTableSnafu { table }.build())
}

pub(crate) fn primary_key(schema: &DbSchema, record: &dyn Record) -> Result<String> {
    let table = record.table();
    let table_schema = schema_table(schema, table)?;
    let index = table_schema
        .indexes
        .get(PRIMARY_INDEX)
        .ok_or_else(|| UnknownIndexSnafu { table, index: PRIMARY_INDEX }.build())?;
    let keys = index.indexer.keys(record).map_err(|message| {
        IndexValueSnafu { table, id: String::new(), index: PRIMARY_INDEX, message }.build()
    })?;
    keys.into_iter().next().ok_or_else(|| {
        IndexValueSnafu {
            table,
            id: String::new(),
            index: PRIMARY_INDEX,
            message: "missing primary key".to_string(),
        }
        .build()
    })
}
