//! The replicated table store and publish-on-commit.
//!
//! [`IamStore`] wraps the [`MemDb`] with the full schema. Committing through
//! [`IamStore::commit`] hands every coalesced change to the registered
//! [`Destination`]s and appends the resulting records before the snapshot is
//! published. A failed append aborts the transaction.

use std::sync::Arc;

use ironvault_broker::{LogBroker, LogRecord, MessageEncoder};
use ironvault_memdb::{DbSchema, MemDb, ReadTxn, WriteTxn};
use tracing::{debug, warn};

use crate::{
    codec::RecordCodecs,
    destination::Destination,
    error::Result,
    schema,
};

/// Turns committed changes into signed log records.
pub struct Publisher {
    broker: Arc<dyn LogBroker>,
    encoder: MessageEncoder,
    plain: MessageEncoder,
    codecs: RecordCodecs,
    destinations: Vec<Box<dyn Destination>>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("encrypts", &self.encoder.encrypts())
            .field("destinations", &self.destinations)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    /// Publisher appending to `broker` with `encoder`.
    #[must_use]
    pub fn new(broker: Arc<dyn LogBroker>, encoder: MessageEncoder) -> Self {
        let plain = encoder.clone().unencrypted();
        Self { broker, encoder, plain, codecs: RecordCodecs::standard(), destinations: Vec::new() }
    }

    /// Adds a destination.
    #[must_use]
    pub fn destination(mut self, destination: impl Destination + 'static) -> Self {
        self.destinations.push(Box::new(destination));
        self
    }

    /// Encodes and appends `txn`'s changes. Returns the number of records written.
    fn publish(&self, txn: &WriteTxn<'_>) -> Result<usize> {
        let mut batches: Vec<(String, Vec<LogRecord>)> = Vec::new();
        for change in txn.changes() {
            let routes: Vec<_> = self.destinations.iter().flat_map(|d| d.routes(&change)).collect();
            if routes.is_empty() {
                continue;
            }
            let envelope = self.codecs.envelope(&change)?;
            for route in routes {
                let encoder = if route.encrypt { &self.encoder } else { &self.plain };
                let record = encoder.encode(&route.topic, &envelope)?;
                match batches.iter_mut().find(|(topic, _)| *topic == route.topic) {
                    Some((_, records)) => records.push(record),
                    None => batches.push((route.topic, vec![record])),
                }
            }
        }

        let mut published = 0;
        for (topic, records) in batches {
            let count = records.len();
            let first = self.broker.append(&topic, records)?;
            debug!(topic, first_offset = first, count, "published changes");
            published += count;
        }
        Ok(published)
    }
}

/// The table store of one instance.
#[derive(Debug)]
pub struct IamStore {
    db: MemDb,
    publisher: Option<Publisher>,
}

impl IamStore {
    /// Opens an empty store over the full schema, without publishing.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is invalid.
    pub fn open() -> Result<Self> {
        Self::with_schema(schema::full_schema()?)
    }

    /// Opens an empty store over `schema`.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is invalid.
    pub fn with_schema(schema: DbSchema) -> Result<Self> {
        Ok(Self { db: MemDb::new(schema)?, publisher: None })
    }

    /// Publishes future commits through `publisher`.
    #[must_use]
    pub fn publishing(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Snapshot of the latest commit.
    #[must_use]
    pub fn read(&self) -> ReadTxn {
        self.db.read()
    }

    /// Begins the write transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the write lock is poisoned.
    pub fn write(&self) -> Result<WriteTxn<'_>> {
        Ok(self.db.write()?)
    }

    /// Publishes the changes of `txn`, then commits it. Returns the number of
    /// records appended.
    ///
    /// # Errors
    ///
    /// Returns an error, with the transaction aborted, if a change cannot be
    /// encoded or an append fails. Appends to earlier topics of the same
    /// commit are not rolled back.
    pub fn commit(&self, txn: WriteTxn<'_>) -> Result<usize> {
        let Some(publisher) = &self.publisher else {
            txn.commit();
            return Ok(0);
        };
        match publisher.publish(&txn) {
            Ok(published) => {
                txn.commit();
                Ok(published)
            },
            Err(e) => {
                warn!(error = %e, "publishing failed, aborting transaction");
                txn.abort();
                Err(e)
            },
        }
    }

    /// Commits `txn` without publishing anything.
    pub fn commit_unpublished(&self, txn: WriteTxn<'_>) {
        txn.commit();
    }
}
