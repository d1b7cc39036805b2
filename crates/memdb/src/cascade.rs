//! Archive, restore and delete along declared relations.
//!
//! Relations are processed in declaration order and every match of one
//! relation is handled before the next relation. Cascading operations check
//! the whole subtree before mutating anything, so a refused operation leaves
//! the transaction untouched.

use std::{collections::HashSet, sync::Arc};

use snafu::ensure;
use tracing::debug;

use crate::{
    db::{Reader, WriteTxn, primary_key},
    error::{IsArchivedSnafu, IsNotArchivedSnafu, NotArchivableSnafu, NotEmptyRelationSnafu, Result},
    index::IndexKind,
    record::{ArchiveMark, Record},
    schema::Relation,
};

type Visited = HashSet<(&'static str, String)>;

impl WriteTxn<'_> {
    /// Removes a row that has no live dependents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) if the row is not
    /// stored and [`Error::NotEmptyRelation`](crate::Error::NotEmptyRelation)
    /// if any cascade or checking relation has live matches.
    pub fn delete(&mut self, record: &dyn Record) -> Result<()> {
        let (id, stored) = self.require_stored(record)?;
        let table = record.table();
        let schema = self.schema_arc();
        let mut failures = self.violations(stored.as_ref(), schema.cascade_deletes.get(table))?;
        failures.extend(self.violations(stored.as_ref(), schema.checking_relations.get(table))?);
        ensure!(failures.is_empty(), NotEmptyRelationSnafu { table, details: failures.join(";") });
        self.remove(table, &id)?;
        Ok(())
    }

    /// Removes a row together with every cascaded child, children first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) if the row is not
    /// stored and [`Error::NotEmptyRelation`](crate::Error::NotEmptyRelation)
    /// if a checking relation anywhere in the subtree has live matches.
    pub fn cascade_delete(&mut self, record: &dyn Record) -> Result<()> {
        let (id, stored) = self.require_stored(record)?;
        let table = record.table();
        let mut visited = Visited::from([(table, id)]);
        let mut failures = Vec::new();
        self.collect_blockers(stored.as_ref(), true, &mut visited, &mut failures)?;
        ensure!(failures.is_empty(), NotEmptyRelationSnafu { table, details: failures.join(";") });

        let mut visited = Visited::from([(table, self.primary_key(stored.as_ref())?)]);
        self.delete_subtree(stored.as_ref(), &mut visited)
    }

    /// Archives one row that has no live dependents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotArchivable`](crate::Error::NotArchivable),
    /// [`Error::IsArchived`](crate::Error::IsArchived) or
    /// [`Error::NotEmptyRelation`](crate::Error::NotEmptyRelation) without
    /// mutating anything.
    pub fn archive(&mut self, record: &dyn Record, mark: ArchiveMark) -> Result<()> {
        self.ensure_live(record)?;
        let table = record.table();
        let schema = self.schema_arc();
        let mut failures = self.violations(record, schema.cascade_deletes.get(table))?;
        failures.extend(self.violations(record, schema.checking_relations.get(table))?);
        ensure!(failures.is_empty(), NotEmptyRelationSnafu { table, details: failures.join(";") });
        let archived = record.with_archive_mark(mark).ok_or_else(|| NotArchivableSnafu { table }.build())?;
        self.insert_arc(archived)
    }

    /// Archives a row and every live cascaded child with the same mark.
    /// Children that are already archived keep their own marks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotArchivable`](crate::Error::NotArchivable),
    /// [`Error::IsArchived`](crate::Error::IsArchived) or
    /// [`Error::NotEmptyRelation`](crate::Error::NotEmptyRelation) (a checking
    /// relation in the subtree has live matches) without mutating anything.
    pub fn cascade_archive(&mut self, record: &dyn Record, mark: ArchiveMark) -> Result<()> {
        let id = self.ensure_live(record)?;
        let table = record.table();
        let mut visited = Visited::from([(table, id.clone())]);
        let mut failures = Vec::new();
        self.collect_blockers(record, false, &mut visited, &mut failures)?;
        ensure!(failures.is_empty(), NotEmptyRelationSnafu { table, details: failures.join(";") });

        let mut visited = Visited::from([(table, id)]);
        self.archive_subtree(record, mark, &mut visited)?;
        debug!(table, touched = visited.len(), "cascade archive");
        Ok(())
    }

    /// Clears the archive mark of one row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotArchivable`](crate::Error::NotArchivable),
    /// [`Error::IsNotArchived`](crate::Error::IsNotArchived) or
    /// [`Error::ForeignKey`](crate::Error::ForeignKey) when a parent is not live.
    pub fn restore(&mut self, record: &dyn Record) -> Result<()> {
        self.ensure_archived(record)?;
        let restored = record
            .with_archive_mark(ArchiveMark::LIVE)
            .ok_or_else(|| NotArchivableSnafu { table: record.table() }.build())?;
        self.insert_arc(restored)
    }

    /// Restores a row and every transitively cascaded child archived with the
    /// same mark, parent first.
    ///
    /// # Errors
    ///
    /// See [`restore`](Self::restore). On error the transaction holds a
    /// partially restored subtree and must be aborted.
    pub fn cascade_restore(&mut self, record: &dyn Record) -> Result<()> {
        let (id, mark) = self.ensure_archived(record)?;
        let table = record.table();
        let mut visited = Visited::from([(table, id)]);
        self.restore_subtree(record, mark, &mut visited)?;
        debug!(table, touched = visited.len(), "cascade restore");
        Ok(())
    }

    /// Removes the row's value from every live child linked through a
    /// string-list cascade relation, so archiving the row no longer reaches
    /// those children.
    ///
    /// # Errors
    ///
    /// Returns an error if a rewritten child cannot be stored.
    pub fn clean_children_slice_indexes(&mut self, record: &dyn Record) -> Result<()> {
        let table = record.table();
        let schema = self.schema_arc();
        for relation in schema.cascade_deletes.get(table).into_iter().flatten() {
            let Some(index) = schema
                .tables
                .get(&relation.related_table)
                .and_then(|t| t.indexes.get(&relation.related_index))
            else {
                continue;
            };
            if index.indexer.kind() != IndexKind::List {
                continue;
            }
            let Some(list_field) = index.indexer.fields().first().map(|f| (*f).to_string()) else {
                continue;
            };
            let values = record.field(&relation.source_field).map(|v| v.strings()).unwrap_or_default();
            for child in self.matches(record, relation)? {
                if !child.is_live() {
                    continue;
                }
                let mut edited: Option<Arc<dyn Record>> = None;
                for value in &values {
                    let current = edited.as_ref().unwrap_or(&child);
                    if let Some(next) = current.without_list_value(&list_field, value) {
                        edited = Some(next);
                    }
                }
                if let Some(edited) = edited {
                    self.insert_arc(edited)?;
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Traversal helpers
    // ---------------------------------------------------------------------

    fn ensure_live(&self, record: &dyn Record) -> Result<String> {
        let table = record.table();
        let Some(mark) = record.archive_mark() else {
            return NotArchivableSnafu { table }.fail();
        };
        let id = self.primary_key(record)?;
        let stored_live = self.stored(record)?.is_none_or(|row| row.is_live());
        ensure!(mark.is_live() && stored_live, IsArchivedSnafu { table, id });
        Ok(id)
    }

    fn ensure_archived(&self, record: &dyn Record) -> Result<(String, ArchiveMark)> {
        let table = record.table();
        let Some(mark) = record.archive_mark() else {
            return NotArchivableSnafu { table }.fail();
        };
        let id = self.primary_key(record)?;
        ensure!(!mark.is_live(), IsNotArchivedSnafu { table, id });
        Ok((id, mark))
    }

    /// Rows of the related table linked to `record` through `relation`,
    /// deduplicated, in value order then primary-key order.
    fn matches(&self, record: &dyn Record, relation: &Relation) -> Result<Vec<Arc<dyn Record>>> {
        let values = record.field(&relation.source_field).map(|v| v.strings()).unwrap_or_default();
        let schema = self.schema_arc();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for value in values {
            for row in self.get(&relation.related_table, &relation.related_index, &[&value])? {
                if seen.insert(primary_key(&schema, row.as_ref())?) {
                    out.push(row);
                }
            }
        }
        Ok(out)
    }

    fn violations(&self, record: &dyn Record, relations: Option<&Vec<Relation>>) -> Result<Vec<String>> {
        let mut failures = Vec::new();
        for relation in relations.into_iter().flatten() {
            let live = self.matches(record, relation)?.iter().filter(|r| r.is_live()).count();
            if live > 0 {
                let value = record.field(&relation.source_field).map(|v| v.strings().join(",")).unwrap_or_default();
                failures.push(format!(
                    "relation should be empty: '{value}' found at table '{}' by index '{}'",
                    relation.related_table, relation.related_index
                ));
            }
        }
        Ok(failures)
    }

    /// Walks the cascade subtree collecting live checking-relation matches.
    /// Archive walks only live children and also refuses non-archivable ones.
    fn collect_blockers(
        &self,
        record: &dyn Record,
        for_delete: bool,
        visited: &mut Visited,
        failures: &mut Vec<String>,
    ) -> Result<()> {
        let table = record.table();
        let schema = self.schema_arc();
        failures.extend(self.violations(record, schema.checking_relations.get(table))?);
        for relation in schema.cascade_deletes.get(table).into_iter().flatten() {
            for child in self.matches(record, relation)? {
                if !for_delete && !child.is_live() {
                    continue;
                }
                ensure!(
                    for_delete || child.archive_mark().is_some(),
                    NotArchivableSnafu { table: child.table() }
                );
                if visited.insert((child.table(), primary_key(&schema, child.as_ref())?)) {
                    self.collect_blockers(child.as_ref(), for_delete, visited, failures)?;
                }
            }
        }
        Ok(())
    }

    fn delete_subtree(&mut self, record: &dyn Record, visited: &mut Visited) -> Result<()> {
        let table = record.table();
        let schema = self.schema_arc();
        for relation in schema.cascade_deletes.get(table).into_iter().flatten() {
            for child in self.matches(record, relation)? {
                let child_id = primary_key(&schema, child.as_ref())?;
                if visited.insert((child.table(), child_id)) {
                    self.delete_subtree(child.as_ref(), visited)?;
                }
            }
        }
        let id = primary_key(&schema, record)?;
        self.remove(table, &id)?;
        Ok(())
    }

    fn archive_subtree(&mut self, record: &dyn Record, mark: ArchiveMark, visited: &mut Visited) -> Result<()> {
        let table = record.table();
        let schema = self.schema_arc();
        for relation in schema.cascade_deletes.get(table).into_iter().flatten() {
            for child in self.matches(record, relation)? {
                if !child.is_live() {
                    continue;
                }
                let child_id = primary_key(&schema, child.as_ref())?;
                if visited.insert((child.table(), child_id)) {
                    self.archive_subtree(child.as_ref(), mark, visited)?;
                }
            }
        }
        let archived = record.with_archive_mark(mark).ok_or_else(|| NotArchivableSnafu { table }.build())?;
        self.insert_arc(archived)
    }

    fn restore_subtree(&mut self, record: &dyn Record, mark: ArchiveMark, visited: &mut Visited) -> Result<()> {
        let table = record.table();
        let restored =
            record.with_archive_mark(ArchiveMark::LIVE).ok_or_else(|| NotArchivableSnafu { table }.build())?;
        self.insert_arc(restored)?;
        let schema = self.schema_arc();
        for relation in schema.cascade_deletes.get(table).into_iter().flatten() {
            for child in self.matches(record, relation)? {
                if child.archive_mark() != Some(mark) {
                    continue;
                }
                let child_id = primary_key(&schema, child.as_ref())?;
                if visited.insert((child.table(), child_id)) {
                    self.restore_subtree(child.as_ref(), mark, visited)?;
                }
            }
        }
        Ok(())
    }
}
