//! Copy-on-write table storage.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use crate::record::Record;

/// Rows and index entries of one table.
///
/// Cloned on the first write of a transaction through [`Arc::make_mut`], so
/// readers keep the version they started with.
#[derive(Debug, Clone, Default)]
pub struct TableData {
    /// Rows by primary key.
    pub(crate) rows: BTreeMap<String, Arc<dyn Record>>,
    /// Index name → key → primary keys.
    pub(crate) indexes: HashMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl TableData {
    /// Primary keys stored under `key` of `index`.
    pub(crate) fn exact(&self, index: &str, key: &str) -> impl Iterator<Item = &String> {
        self.indexes.get(index).and_then(|entries| entries.get(key)).into_iter().flatten()
    }

    /// Primary keys stored under keys starting with `prefix`, in key order.
    pub(crate) fn prefixed<'a>(
        &'a self,
        index: &str,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a String> + 'a {
        self.indexes
            .get(index)
            .into_iter()
            .flat_map(move |entries| {
                entries
                    .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
                    .take_while(move |(k, _)| k.starts_with(prefix))
                    .flat_map(|(_, pks)| pks.iter())
            })
    }

    pub(crate) fn add_entries(&mut self, index: &str, keys: &[String], pk: &str) {
        let entries = self.indexes.entry(index.to_string()).or_default();
        for key in keys {
            entries.entry(key.clone()).or_default().insert(pk.to_string());
        }
    }

    pub(crate) fn remove_entries(&mut self, index: &str, keys: &[String], pk: &str) {
        if let Some(entries) = self.indexes.get_mut(index) {
            for key in keys {
                if let Some(pks) = entries.get_mut(key) {
                    pks.remove(pk);
                    if pks.is_empty() {
                        entries.remove(key);
                    }
                }
            }
        }
    }
}

/// Immutable view of every table at one commit.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub(crate) tables: HashMap<String, Arc<TableData>>,
}
