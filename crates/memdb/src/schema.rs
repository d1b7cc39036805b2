//! Table and relation declarations.
//!
//! A [`DbSchema`] is declared once at startup and validated by
//! [`MemDb::new`](crate::MemDb::new). Relation graphs are plain data so tests
//! can check them against each record type's static field list.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use snafu::ensure;

use crate::{
    error::{InvalidSchemaSnafu, MergeSchemaSnafu, Result},
    index::{IndexKind, IndexSchema, PRIMARY_INDEX},
    record::TableRecord,
};

/// Declaration of one table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Table name, equal to the record type tag.
    pub name: String,
    /// Indexes by name. Must contain the unique primary index `"id"`.
    pub indexes: BTreeMap<String, IndexSchema>,
    /// Fields of the record type that indexes and relations may reference.
    pub fields: &'static [&'static str],
}

impl TableSchema {
    /// Table for record type `T` with no indexes yet.
    #[must_use]
    pub fn of<T: TableRecord>() -> Self {
        Self { name: T::TABLE.to_string(), indexes: BTreeMap::new(), fields: T::FIELDS }
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: IndexSchema) -> Self {
        self.indexes.insert(index.name.clone(), index);
        self
    }
}

/// A link from a field of one table to an index of another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Relation {
    /// Field of the owning record holding the linked value(s).
    pub source_field: String,
    /// Table the value points into.
    pub related_table: String,
    /// Index of the related table the value is looked up in.
    pub related_index: String,
}

impl Relation {
    /// Builds a relation.
    pub fn new(
        source_field: impl Into<String>,
        related_table: impl Into<String>,
        related_index: impl Into<String>,
    ) -> Self {
        Self {
            source_field: source_field.into(),
            related_table: related_table.into(),
            related_index: related_index.into(),
        }
    }

    /// Foreign key to the primary index of `related_table`.
    pub fn foreign_key(source_field: impl Into<String>, related_table: impl Into<String>) -> Self {
        Self::new(source_field, related_table, PRIMARY_INDEX)
    }
}

type Relations = BTreeMap<String, Vec<Relation>>;

/// Complete store schema.
#[derive(Debug, Clone, Default)]
pub struct DbSchema {
    /// Tables by name.
    pub tables: BTreeMap<String, TableSchema>,
    /// Checked on insert: each value must resolve in the related table.
    pub mandatory_foreign_keys: Relations,
    /// Children archived, restored and deleted together with their parent.
    pub cascade_deletes: Relations,
    /// Children that block archive and delete of their parent while live.
    pub checking_relations: Relations,
    /// Secondary indexes whose values must be unique among live rows.
    pub unique_constraints: BTreeMap<String, Vec<String>>,
}

impl DbSchema {
    /// Adds a table.
    #[must_use]
    pub fn table(mut self, table: TableSchema) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Declares a mandatory foreign key of `table`.
    #[must_use]
    pub fn foreign_key(mut self, table: &str, relation: Relation) -> Self {
        self.mandatory_foreign_keys.entry(table.to_string()).or_default().push(relation);
        self
    }

    /// Declares a cascade relation from `table`.
    #[must_use]
    pub fn cascade(mut self, table: &str, relation: Relation) -> Self {
        self.cascade_deletes.entry(table.to_string()).or_default().push(relation);
        self
    }

    /// Declares a checking relation from `table`.
    #[must_use]
    pub fn checking(mut self, table: &str, relation: Relation) -> Self {
        self.checking_relations.entry(table.to_string()).or_default().push(relation);
        self
    }

    /// Declares a live-rows unique constraint on `index` of `table`.
    #[must_use]
    pub fn unique_among_live(mut self, table: &str, index: &str) -> Self {
        self.unique_constraints.entry(table.to_string()).or_default().push(index.to_string());
        self
    }

    /// Merges several schemas. Relations of the same table are concatenated
    /// in argument order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MergeSchema`](crate::Error::MergeSchema) if two schemas
    /// declare the same table or the merged schema is invalid.
    pub fn merge(schemas: impl IntoIterator<Item = DbSchema>) -> Result<Self> {
        let mut merged = DbSchema::default();
        for schema in schemas {
            for (name, table) in schema.tables {
                ensure!(
                    !merged.tables.contains_key(&name),
                    MergeSchemaSnafu { message: format!("table {name:?} already there") }
                );
                merged.tables.insert(name, table);
            }
            extend(&mut merged.mandatory_foreign_keys, schema.mandatory_foreign_keys);
            extend(&mut merged.cascade_deletes, schema.cascade_deletes);
            extend(&mut merged.checking_relations, schema.checking_relations);
            for (table, indexes) in schema.unique_constraints {
                merged.unique_constraints.entry(table).or_default().extend(indexes);
            }
        }
        merged
            .validate()
            .map_err(|e| MergeSchemaSnafu { message: e.to_string() }.build())?;
        Ok(merged)
    }

    /// Removes every relation, keeping tables, indexes and unique constraints.
    #[must_use]
    pub fn drop_relations(mut self) -> Self {
        self.mandatory_foreign_keys.clear();
        self.cascade_deletes.clear();
        self.checking_relations.clear();
        self
    }

    /// Validates tables, indexes and relation graphs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchema`](crate::Error::InvalidSchema) describing
    /// the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.validate_tables()?;
        for (kind, relations) in [
            ("mandatory foreign key", &self.mandatory_foreign_keys),
            ("cascade relation", &self.cascade_deletes),
            ("checking relation", &self.checking_relations),
        ] {
            self.validate_relations(kind, relations)?;
        }
        for (table, relations) in &self.mandatory_foreign_keys {
            for relation in relations {
                ensure!(
                    relation.related_index == PRIMARY_INDEX,
                    InvalidSchemaSnafu {
                        message: format!(
                            "foreign key {relation:?} of table {table:?} must target index \
                             {PRIMARY_INDEX:?}"
                        ),
                    }
                );
            }
        }
        if let Err(chain) = find_cycle(&self.mandatory_foreign_keys) {
            return InvalidSchemaSnafu { message: format!("cyclic dependency: {chain}") }.fail();
        }
        let children = self.child_relations()?;
        if let Err(chain) = find_cycle(&children) {
            return InvalidSchemaSnafu { message: format!("cyclic dependency: {chain}") }.fail();
        }
        Ok(())
    }

    fn validate_tables(&self) -> Result<()> {
        for (name, table) in &self.tables {
            ensure!(
                *name == table.name,
                InvalidSchemaSnafu {
                    message: format!("table registered as {name:?} is named {:?}", table.name),
                }
            );
            let Some(primary) = table.indexes.get(PRIMARY_INDEX) else {
                return InvalidSchemaSnafu {
                    message: format!("table {name:?} has no {PRIMARY_INDEX:?} index"),
                }
                .fail();
            };
            ensure!(
                primary.unique && !primary.allow_missing,
                InvalidSchemaSnafu {
                    message: format!("index {PRIMARY_INDEX:?} of table {name:?} must be unique and required"),
                }
            );
            ensure!(
                matches!(primary.indexer.kind(), IndexKind::String | IndexKind::Uuid),
                InvalidSchemaSnafu {
                    message: format!("index {PRIMARY_INDEX:?} of table {name:?} must be single-valued"),
                }
            );
            for (index_name, index) in &table.indexes {
                ensure!(
                    *index_name == index.name,
                    InvalidSchemaSnafu {
                        message: format!(
                            "index registered as {index_name:?} at table {name:?} is named {:?}",
                            index.name
                        ),
                    }
                );
                for field in index.indexer.fields() {
                    ensure!(
                        table.fields.contains(&field),
                        InvalidSchemaSnafu {
                            message: format!(
                                "index {index_name:?} at table {name:?} reads unknown field {field:?}"
                            ),
                        }
                    );
                }
            }
        }
        for (table, indexes) in &self.unique_constraints {
            let Some(schema) = self.tables.get(table) else {
                return InvalidSchemaSnafu {
                    message: format!("unique constraint on absent table {table:?}"),
                }
                .fail();
            };
            for index in indexes {
                ensure!(
                    schema.indexes.contains_key(index),
                    InvalidSchemaSnafu {
                        message: format!("unique constraint on absent index {index:?} at table {table:?}"),
                    }
                );
            }
        }
        Ok(())
    }

    fn validate_relations(&self, kind: &str, relations: &Relations) -> Result<()> {
        for (table, rels) in relations {
            let Some(source) = self.tables.get(table) else {
                return InvalidSchemaSnafu {
                    message: format!("{kind} declared for table {table:?}, which is absent in schema"),
                }
                .fail();
            };
            for relation in rels {
                ensure!(
                    source.fields.contains(&relation.source_field.as_str()),
                    InvalidSchemaSnafu {
                        message: format!(
                            "{kind} of table {table:?} uses unknown field {:?}",
                            relation.source_field
                        ),
                    }
                );
                let Some(related) = self.tables.get(&relation.related_table) else {
                    return InvalidSchemaSnafu {
                        message: format!(
                            "{kind} of table {table:?} points to table {:?}, which is absent in schema",
                            relation.related_table
                        ),
                    }
                    .fail();
                };
                let Some(index) = related.indexes.get(&relation.related_index) else {
                    return InvalidSchemaSnafu {
                        message: format!(
                            "index named {:?} not found at table {:?}, passed as relation to field \
                             {:?} of table {table:?}",
                            relation.related_index, relation.related_table, relation.source_field
                        ),
                    }
                    .fail();
                };
                ensure!(
                    matches!(
                        index.indexer.kind(),
                        IndexKind::String | IndexKind::Uuid | IndexKind::List
                    ),
                    InvalidSchemaSnafu {
                        message: format!(
                            "index named {:?} at table {:?}, passed as relation to field {:?} of \
                             table {table:?} has inappropriate type (allowed: string, uuid, string list)",
                            relation.related_index, relation.related_table, relation.source_field
                        ),
                    }
                );
            }
        }
        Ok(())
    }

    /// Union of cascade and checking relations, rejecting any relation that
    /// appears in both or twice.
    fn child_relations(&self) -> Result<Relations> {
        let mut all = Relations::new();
        let mut seen: HashSet<(&str, &Relation)> = HashSet::new();
        for source in [&self.cascade_deletes, &self.checking_relations] {
            for (table, rels) in source {
                for relation in rels {
                    ensure!(
                        seen.insert((table.as_str(), relation)),
                        InvalidSchemaSnafu {
                            message: format!("relation {relation:?} is repeated for table {table:?}"),
                        }
                    );
                    all.entry(table.clone()).or_default().push(relation.clone());
                }
            }
        }
        Ok(all)
    }
}

fn extend(into: &mut Relations, from: Relations) {
    for (table, rels) in from {
        into.entry(table).or_default().extend(rels);
    }
}

/// Depth-first search for a cycle in the table graph. Self links are allowed.
/// Returns the offending chain as `"a=>b=>a"`.
fn find_cycle(relations: &Relations) -> std::result::Result<(), String> {
    fn visit<'a>(
        table: &'a str,
        relations: &'a Relations,
        path: &mut Vec<&'a str>,
        done: &mut BTreeSet<&'a str>,
    ) -> std::result::Result<(), String> {
        if let Some(pos) = path.iter().position(|t| *t == table) {
            let mut chain: Vec<&str> = path[pos..].to_vec();
            chain.push(table);
            return Err(format!("dependencies chain:{}", chain.join("=>")));
        }
        if done.contains(table) {
            return Ok(());
        }
        path.push(table);
        let children: BTreeSet<&str> = relations
            .get(table)
            .into_iter()
            .flatten()
            .map(|r| r.related_table.as_str())
            .filter(|child| *child != table)
            .collect();
        for child in children {
            visit(child, relations, path, done)?;
        }
        path.pop();
        done.insert(table);
        Ok(())
    }

    let mut done = BTreeSet::new();
    for table in relations.keys() {
        visit(table, relations, &mut Vec::new(), &mut done)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::{Error, index::Indexer};

    fn table(name: &str, fields: &'static [&'static str]) -> TableSchema {
        TableSchema { name: name.to_string(), indexes: BTreeMap::new(), fields }
            .index(IndexSchema::primary_uuid("uuid"))
    }

    fn three_tables() -> DbSchema {
        DbSchema::default()
            .table(table("t1", &["uuid", "t2_uuid"]).index(IndexSchema::new("t2_uuid", Indexer::field("t2_uuid"))))
            .table(table("t2", &["uuid", "t3_uuid"]).index(IndexSchema::new("t3_uuid", Indexer::field("t3_uuid"))))
            .table(table("t3", &["uuid", "t1_uuid"]).index(IndexSchema::new("t1_uuid", Indexer::field("t1_uuid"))))
    }

    fn assert_invalid(schema: &DbSchema, needle: &str) {
        match schema.validate() {
            Err(Error::InvalidSchema { message }) => {
                assert!(message.contains(needle), "message {message:?} lacks {needle:?}")
            },
            other => panic!("expected InvalidSchema, got {other:?}"),
        }
    }

    #[test]
    fn test_acyclic_foreign_keys_ok() {
        let schema = three_tables()
            .foreign_key("t1", Relation::foreign_key("t2_uuid", "t2"))
            .foreign_key("t2", Relation::foreign_key("t3_uuid", "t3"));
        schema.validate().expect("acyclic");
    }

    #[test]
    fn test_cyclic_foreign_keys_rejected() {
        let schema = three_tables()
            .foreign_key("t1", Relation::foreign_key("t2_uuid", "t2"))
            .foreign_key("t2", Relation::foreign_key("t3_uuid", "t3"))
            .foreign_key("t3", Relation::foreign_key("t1_uuid", "t1"));
        assert_invalid(&schema, "dependencies chain:t1=>t2=>t3=>t1");
    }

    #[test]
    fn test_self_link_allowed() {
        let schema = DbSchema::default()
            .table(table("g", &["uuid", "parent"]).index(IndexSchema::new("parent", Indexer::field("parent"))))
            .cascade("g", Relation::new("uuid", "g", "parent"));
        schema.validate().expect("self link");
    }

    #[test]
    fn test_foreign_key_must_target_primary() {
        let schema = three_tables().foreign_key("t1", Relation::new("t2_uuid", "t2", "t3_uuid"));
        assert_invalid(&schema, "must target index \"id\"");
    }

    #[test]
    fn test_repeated_child_relation_rejected() {
        let rel = Relation::new("uuid", "t2", "t3_uuid");
        let schema = three_tables().cascade("t1", rel.clone()).checking("t1", rel);
        assert_invalid(&schema, "is repeated");
    }

    #[test]
    fn test_missing_related_index_rejected() {
        let schema = three_tables().cascade("t1", Relation::new("uuid", "t2", "nope"));
        assert_invalid(&schema, "index named \"nope\" not found at table \"t2\"");
    }

    #[test]
    fn test_unknown_source_field_rejected() {
        let schema = three_tables().cascade("t1", Relation::new("ghost", "t2", "t3_uuid"));
        assert_invalid(&schema, "unknown field \"ghost\"");
    }

    #[test]
    fn test_bool_related_index_rejected() {
        let schema = DbSchema::default()
            .table(table("a", &["uuid"]))
            .table(table("b", &["uuid", "flag"]).index(IndexSchema::new("flag", Indexer::bool("flag"))))
            .cascade("a", Relation::new("uuid", "b", "flag"));
        assert_invalid(&schema, "inappropriate type");
    }

    #[test]
    fn test_cyclic_child_relations_rejected() {
        let schema = three_tables()
            .cascade("t1", Relation::new("uuid", "t2", "t3_uuid"))
            .checking("t2", Relation::new("uuid", "t1", "t2_uuid"));
        assert_invalid(&schema, "dependencies chain:");
    }

    #[test]
    fn test_primary_index_required() {
        let schema = DbSchema::default().table(TableSchema {
            name: "x".to_string(),
            indexes: BTreeMap::new(),
            fields: &["uuid"],
        });
        assert_invalid(&schema, "has no \"id\" index");
    }

    #[test]
    fn test_merge_rejects_duplicate_tables() {
        let a = DbSchema::default().table(table("t", &["uuid"]));
        let b = DbSchema::default().table(table("t", &["uuid"]));
        assert!(matches!(DbSchema::merge([a, b]), Err(Error::MergeSchema { .. })));
    }

    #[test]
    fn test_merge_concatenates_relations() {
        let a = DbSchema::default()
            .table(table("t1", &["uuid", "t2_uuid"]))
            .foreign_key("t1", Relation::foreign_key("t2_uuid", "t2"));
        let b = DbSchema::default().table(table("t2", &["uuid"]));
        let merged = DbSchema::merge([a, b]).expect("merge");
        assert_eq!(merged.tables.len(), 2);
        assert_eq!(merged.mandatory_foreign_keys["t1"].len(), 1);
        assert!(merged.drop_relations().mandatory_foreign_keys.is_empty());
    }
}
