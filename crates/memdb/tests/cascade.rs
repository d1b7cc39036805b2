//! Cascade engine behaviour over a parent with three kinds of children:
//! `child1` blocks through a checking relation, `child2` cascades through a
//! string index and `child3` cascades through a string-list index.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use ironvault_memdb::{
    ArchiveMark, DbSchema, Error, IndexSchema, Indexer, MemDb, PRIMARY_INDEX, Reader, Relation,
    TableSchema, WriteTxn, impl_record,
};

const U1: &str = "00000000-0000-4000-a000-000000000001";
const U2: &str = "00000000-0000-4000-a000-000000000002";
const U3: &str = "00000000-0000-4000-a000-000000000003";
const U4: &str = "00000000-0000-4000-a000-000000000004";
const U5: &str = "00000000-0000-4000-a000-000000000005";

const STANDARD_MARK: ArchiveMark = ArchiveMark::at(99, 99);

#[derive(Debug, Clone, PartialEq)]
struct Parent {
    uuid: String,
    identifier: String,
    archive_mark: ArchiveMark,
}

impl_record!(Parent, table = "parent", fields = [uuid, identifier], archivable);

#[derive(Debug, Clone, PartialEq)]
struct Child1 {
    uuid: String,
    parent_uuid: String,
    identifier: String,
    archive_mark: ArchiveMark,
}

impl_record!(Child1, table = "child1", fields = [uuid, parent_uuid, identifier], archivable);

#[derive(Debug, Clone, PartialEq)]
struct Child2 {
    uuid: String,
    parent_uuid: String,
    identifier: String,
    archive_mark: ArchiveMark,
}

impl_record!(Child2, table = "child2", fields = [uuid, parent_uuid, identifier], archivable);

#[derive(Debug, Clone, PartialEq)]
struct Child3 {
    uuid: String,
    parents: Vec<String>,
    archive_mark: ArchiveMark,
}

impl_record!(Child3, table = "child3", fields = [uuid, parents], archivable);

fn schema() -> DbSchema {
    DbSchema::default()
        .table(TableSchema::of::<Parent>().index(IndexSchema::primary_uuid("uuid")))
        .table(
            TableSchema::of::<Child1>()
                .index(IndexSchema::primary_uuid("uuid"))
                .index(IndexSchema::new("parent_uuid", Indexer::field("parent_uuid"))),
        )
        .table(
            TableSchema::of::<Child2>()
                .index(IndexSchema::primary_uuid("uuid"))
                .index(IndexSchema::new("parent_uuid", Indexer::field("parent_uuid"))),
        )
        .table(
            TableSchema::of::<Child3>()
                .index(IndexSchema::primary_uuid("uuid"))
                .index(IndexSchema::new("parents_index", Indexer::list("parents")).allow_missing()),
        )
        .foreign_key("child1", Relation::foreign_key("parent_uuid", "parent"))
        .foreign_key("child2", Relation::foreign_key("parent_uuid", "parent"))
        .foreign_key("child3", Relation::foreign_key("parents", "parent"))
        .cascade("parent", Relation::new("uuid", "child2", "parent_uuid"))
        .cascade("parent", Relation::new("uuid", "child3", "parents_index"))
        .checking("parent", Relation::new("uuid", "child1", "parent_uuid"))
}

fn db() -> MemDb {
    MemDb::new(schema()).expect("valid schema")
}

fn parent(uuid: &str) -> Parent {
    Parent { uuid: uuid.to_string(), identifier: format!("parent_{uuid}"), archive_mark: ArchiveMark::LIVE }
}

fn child1(parent_uuid: &str) -> Child1 {
    Child1 {
        uuid: U2.to_string(),
        parent_uuid: parent_uuid.to_string(),
        identifier: "child1".to_string(),
        archive_mark: ArchiveMark::LIVE,
    }
}

fn child2(parent_uuid: &str) -> Child2 {
    Child2 {
        uuid: U3.to_string(),
        parent_uuid: parent_uuid.to_string(),
        identifier: "child2".to_string(),
        archive_mark: ArchiveMark::LIVE,
    }
}

fn with_parent(db: &MemDb) -> (WriteTxn<'_>, Parent) {
    let mut txn = db.write().expect("write txn");
    let p = parent(U1);
    txn.insert(p.clone()).expect("insert parent");
    (txn, p)
}

fn stored<T: ironvault_memdb::TableRecord>(txn: &impl Reader, id: &str) -> Option<T> {
    txn.first_as::<T>(PRIMARY_INDEX, &[id]).expect("lookup")
}

// =========================================================================
// Insert
// =========================================================================

#[test]
fn test_insert_ok() {
    let db = db();
    let (mut txn, _) = with_parent(&db);
    txn.insert(child1(U1)).expect("child with live parent");
    assert_eq!(stored::<Child1>(&txn, U2), Some(child1(U1)));
}

#[test]
fn test_insert_fails_on_missing_parent() {
    let db = db();
    let mut txn = db.write().expect("write txn");
    let err = txn.insert(child1(U1)).expect_err("no parent");
    assert!(matches!(err, Error::ForeignKey { .. }), "got {err:?}");
}

#[test]
fn test_insert_live_child_fails_on_archived_parent() {
    let db = db();
    let mut txn = db.write().expect("write txn");
    txn.insert(Parent { archive_mark: STANDARD_MARK, ..parent(U1) }).expect("archived parent");
    assert!(matches!(txn.insert(child1(U1)), Err(Error::ForeignKey { .. })));
    txn.insert(Child1 { archive_mark: STANDARD_MARK, ..child1(U1) })
        .expect("archived child only needs the parent to exist");
}

#[test]
fn test_insert_unchecked_skips_foreign_keys() {
    let db = db();
    let mut txn = db.write().expect("write txn");
    txn.insert_unchecked(std::sync::Arc::new(child1(U1))).expect("orphan accepted");
    txn.insert(parent(U1)).expect("parent arrives later");
    assert_eq!(stored::<Child1>(&txn, U2), Some(child1(U1)));
}

#[test]
fn test_first_absent_is_none() {
    let db = db();
    let (txn, _) = with_parent(&db);
    assert!(txn.first("parent", PRIMARY_INDEX, &[U2]).expect("lookup").is_none());
}

// =========================================================================
// Delete
// =========================================================================

#[test]
fn test_delete_ok() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.delete(&p).expect("delete");
    assert!(stored::<Parent>(&txn, U1).is_none());
}

#[test]
fn test_delete_absent_fails_not_found() {
    let db = db();
    let (mut txn, _) = with_parent(&db);
    assert!(matches!(txn.delete(&parent(U2)), Err(Error::NotFound { .. })));
}

#[test]
fn test_delete_fails_on_checking_relation() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.insert(child1(U1)).expect("child1");
    assert!(matches!(txn.delete(&p), Err(Error::NotEmptyRelation { .. })));
    assert!(stored::<Parent>(&txn, U1).is_some());
}

#[test]
fn test_delete_fails_on_cascade_relation() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.insert(child2(U1)).expect("child2");
    assert!(matches!(txn.delete(&p), Err(Error::NotEmptyRelation { .. })));
}

#[test]
fn test_cascade_delete_ok() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.insert(child2(U1)).expect("child2");
    txn.cascade_delete(&p).expect("cascade delete");
    assert!(stored::<Parent>(&txn, U1).is_none());
    assert!(stored::<Child2>(&txn, U3).is_none());
}

#[test]
fn test_cascade_delete_fails_on_checking_relation_without_mutation() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.insert(child1(U1)).expect("child1");
    txn.insert(child2(U1)).expect("child2");
    assert!(matches!(txn.cascade_delete(&p), Err(Error::NotEmptyRelation { .. })));
    assert!(stored::<Parent>(&txn, U1).is_some());
    assert!(stored::<Child2>(&txn, U3).is_some());
}

// =========================================================================
// Archive
// =========================================================================

#[test]
fn test_archive_ok() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.archive(&p, STANDARD_MARK).expect("archive");
    let got = stored::<Parent>(&txn, U1).expect("row stays");
    assert_eq!(got.archive_mark, STANDARD_MARK);
}

#[test]
fn test_archive_fails_on_checking_relation() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.insert(child1(U1)).expect("child1");
    assert!(matches!(txn.archive(&p, STANDARD_MARK), Err(Error::NotEmptyRelation { .. })));
    assert!(stored::<Parent>(&txn, U1).expect("parent").archive_mark.is_live());
}

#[test]
fn test_archive_fails_on_cascade_relation() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.insert(child2(U1)).expect("child2");
    assert!(matches!(txn.archive(&p, STANDARD_MARK), Err(Error::NotEmptyRelation { .. })));
}

#[test]
fn test_archive_ignores_archived_children() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.insert(Child1 { archive_mark: STANDARD_MARK, ..child1(U1) }).expect("archived child1");
    txn.archive(&p, ArchiveMark::at(100, 1)).expect("archived children do not block");
}

#[test]
fn test_archive_twice_fails_is_archived() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.archive(&p, STANDARD_MARK).expect("archive");
    let archived = stored::<Parent>(&txn, U1).expect("parent");
    assert!(matches!(txn.archive(&archived, STANDARD_MARK), Err(Error::IsArchived { .. })));
    assert!(matches!(txn.cascade_archive(&p, STANDARD_MARK), Err(Error::IsArchived { .. })));
}

#[test]
fn test_cascade_archive_ok() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.insert(child2(U1)).expect("child2");
    txn.cascade_archive(&p, STANDARD_MARK).expect("cascade archive");
    assert_eq!(stored::<Parent>(&txn, U1).expect("parent").archive_mark, STANDARD_MARK);
    assert_eq!(stored::<Child2>(&txn, U3).expect("child2").archive_mark, STANDARD_MARK);
}

#[test]
fn test_cascade_archive_keeps_marks_of_archived_children() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    let earlier = ArchiveMark::at(50, 5);
    txn.insert(Child2 { archive_mark: earlier, ..child2(U1) }).expect("archived child2");
    txn.cascade_archive(&p, STANDARD_MARK).expect("cascade archive");
    assert_eq!(stored::<Child2>(&txn, U3).expect("child2").archive_mark, earlier);
}

#[test]
fn test_cascade_archive_fails_on_checking_relation_without_mutation() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.insert(child1(U1)).expect("child1");
    txn.insert(child2(U1)).expect("child2");
    assert!(matches!(txn.cascade_archive(&p, STANDARD_MARK), Err(Error::NotEmptyRelation { .. })));
    assert!(stored::<Parent>(&txn, U1).expect("parent").archive_mark.is_live());
    assert!(stored::<Child2>(&txn, U3).expect("child2").archive_mark.is_live());
}

// =========================================================================
// Restore
// =========================================================================

#[test]
fn test_restore_ok() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.archive(&p, STANDARD_MARK).expect("archive");
    let archived = stored::<Parent>(&txn, U1).expect("parent");
    txn.restore(&archived).expect("restore");
    assert_eq!(stored::<Parent>(&txn, U1), Some(p));
}

#[test]
fn test_restore_live_fails_is_not_archived() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    assert!(matches!(txn.restore(&p), Err(Error::IsNotArchived { .. })));
    assert!(matches!(txn.cascade_restore(&p), Err(Error::IsNotArchived { .. })));
}

#[test]
fn test_restore_fails_for_child_without_live_parent() {
    let db = db();
    let mut txn = db.write().expect("write txn");
    txn.insert(Parent { archive_mark: STANDARD_MARK, ..parent(U1) }).expect("archived parent");
    let archived_child = Child1 { archive_mark: STANDARD_MARK, ..child1(U1) };
    txn.insert(archived_child.clone()).expect("archived child");
    assert!(matches!(txn.restore(&archived_child), Err(Error::ForeignKey { .. })));
}

#[test]
fn test_cascade_restore_ok() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.insert(child2(U1)).expect("child2");
    txn.cascade_archive(&p, STANDARD_MARK).expect("cascade archive");
    let archived = stored::<Parent>(&txn, U1).expect("parent");
    txn.cascade_restore(&archived).expect("cascade restore");
    assert_eq!(stored::<Parent>(&txn, U1), Some(p));
    assert_eq!(stored::<Child2>(&txn, U3), Some(child2(U1)));
}

#[test]
fn test_cascade_restore_only_children_with_matching_mark() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    let other_mark = ArchiveMark::at(42, 42);
    txn.insert(Child2 { archive_mark: other_mark, ..child2(U1) }).expect("child2 archived earlier");
    txn.insert(Child3 { uuid: U4.to_string(), parents: vec![U1.to_string()], archive_mark: ArchiveMark::LIVE })
        .expect("child3");
    txn.cascade_archive(&p, STANDARD_MARK).expect("cascade archive");

    let archived = stored::<Parent>(&txn, U1).expect("parent");
    txn.cascade_restore(&archived).expect("cascade restore");

    assert!(stored::<Parent>(&txn, U1).expect("parent").archive_mark.is_live());
    assert!(stored::<Child3>(&txn, U4).expect("child3").archive_mark.is_live());
    assert_eq!(stored::<Child2>(&txn, U3).expect("child2").archive_mark, other_mark);
}

// =========================================================================
// List relations
// =========================================================================

#[test]
fn test_clean_children_slice_indexes() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    for uuid in [U2, U3] {
        txn.insert(parent(uuid)).expect("extra parent");
    }
    txn.insert(Child3 {
        uuid: U4.to_string(),
        parents: vec![U2.to_string(), U1.to_string()],
        archive_mark: ArchiveMark::LIVE,
    })
    .expect("child3 u4");
    txn.insert(Child3 {
        uuid: U5.to_string(),
        parents: vec![U2.to_string(), U1.to_string(), U3.to_string()],
        archive_mark: ArchiveMark::LIVE,
    })
    .expect("child3 u5");

    txn.clean_children_slice_indexes(&p).expect("clean");
    txn.cascade_archive(&p, ArchiveMark::new()).expect("archive after cleaning");

    let u4 = stored::<Child3>(&txn, U4).expect("u4");
    assert_eq!(u4.parents, vec![U2.to_string()]);
    assert!(u4.archive_mark.is_live());
    let u5 = stored::<Child3>(&txn, U5).expect("u5");
    assert_eq!(u5.parents, vec![U2.to_string(), U3.to_string()]);
    assert!(u5.archive_mark.is_live());
}

#[test]
fn test_list_foreign_key_checks_every_element() {
    let db = db();
    let (mut txn, _) = with_parent(&db);
    let err = txn
        .insert(Child3 {
            uuid: U4.to_string(),
            parents: vec![U1.to_string(), U2.to_string()],
            archive_mark: ArchiveMark::LIVE,
        })
        .expect_err("U2 is not a parent");
    match err {
        Error::ForeignKey { details, .. } => assert!(details.contains(U2), "details: {details}"),
        other => panic!("expected ForeignKey, got {other:?}"),
    }
}

// =========================================================================
// Transactions and change tracking
// =========================================================================

#[test]
fn test_uncommitted_writes_are_invisible() {
    let db = db();
    {
        let (txn, _) = with_parent(&db);
        assert!(db.read().first("parent", PRIMARY_INDEX, &[U1]).expect("lookup").is_none());
        txn.abort();
    }
    assert!(db.read().list("parent").expect("list").is_empty());

    let (txn, _) = with_parent(&db);
    txn.commit();
    assert_eq!(db.read().list("parent").expect("list").len(), 1);
}

#[test]
fn test_reader_keeps_its_snapshot() {
    let db = db();
    let before = db.read();
    let (txn, _) = with_parent(&db);
    txn.commit();
    assert!(before.list("parent").expect("list").is_empty());
    assert_eq!(db.read().list("parent").expect("list").len(), 1);
}

#[test]
fn test_changes_are_coalesced_and_noops_dropped() {
    let db = db();
    {
        let (txn, _) = with_parent(&db);
        txn.commit();
    }
    let mut txn = db.write().expect("write txn");
    txn.insert(parent(U1)).expect("same row again");
    assert!(txn.changes().is_empty(), "identical upsert is not a change");

    txn.insert(Parent { identifier: "renamed".to_string(), ..parent(U1) }).expect("update");
    txn.insert(parent(U2)).expect("create");
    txn.insert(Parent { identifier: "renamed twice".to_string(), ..parent(U1) }).expect("update");
    let changes = txn.changes();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].id, U1);
    assert_eq!(changes[1].id, U2);

    txn.remove("parent", U2).expect("remove");
    assert_eq!(txn.changes().len(), 1, "created then removed is not a change");
    assert!(txn.remove("parent", U5).expect("absent remove").is_none());
}

#[test]
fn test_cascade_changes_list_children_first() {
    let db = db();
    let (mut txn, p) = with_parent(&db);
    txn.insert(child2(U1)).expect("child2");
    txn.commit();

    let mut txn = db.write().expect("write txn");
    txn.cascade_archive(&p, STANDARD_MARK).expect("cascade archive");
    let tables: Vec<String> = txn.changes().into_iter().map(|c| c.table).collect();
    assert_eq!(tables, vec!["child2".to_string(), "parent".to_string()]);
}
