//! Property tests: cascade archive followed by cascade restore is the
//! identity on the subtree, whatever its prior archive state.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::sync::Arc;

use ironvault_memdb::{
    ArchiveMark, DbSchema, IndexSchema, Indexer, MemDb, PRIMARY_INDEX, Reader, Record, Relation,
    TableSchema, impl_record,
};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Team {
    uuid: String,
    archive_mark: ArchiveMark,
}

impl_record!(Team, table = "team", fields = [uuid], archivable);

#[derive(Debug, Clone, PartialEq)]
struct Member {
    uuid: String,
    team_uuid: String,
    archive_mark: ArchiveMark,
}

impl_record!(Member, table = "member", fields = [uuid, team_uuid], archivable);

#[derive(Debug, Clone, PartialEq)]
struct Key {
    uuid: String,
    member_uuid: String,
    archive_mark: ArchiveMark,
}

impl_record!(Key, table = "key", fields = [uuid, member_uuid], archivable);

fn schema() -> DbSchema {
    DbSchema::default()
        .table(TableSchema::of::<Team>().index(IndexSchema::primary("uuid")))
        .table(
            TableSchema::of::<Member>()
                .index(IndexSchema::primary("uuid"))
                .index(IndexSchema::new("team_uuid", Indexer::field("team_uuid"))),
        )
        .table(
            TableSchema::of::<Key>()
                .index(IndexSchema::primary("uuid"))
                .index(IndexSchema::new("member_uuid", Indexer::field("member_uuid"))),
        )
        .foreign_key("member", Relation::foreign_key("team_uuid", "team"))
        .foreign_key("key", Relation::foreign_key("member_uuid", "member"))
        .cascade("team", Relation::new("uuid", "member", "team_uuid"))
        .cascade("member", Relation::new("uuid", "key", "member_uuid"))
}

fn mark(archived: bool, seed: i64) -> ArchiveMark {
    if archived { ArchiveMark::at(1_000 + seed, seed) } else { ArchiveMark::LIVE }
}

fn snapshot(db: &MemDb) -> Vec<Arc<dyn Record>> {
    let txn = db.read();
    let mut rows = Vec::new();
    for table in ["team", "member", "key"] {
        rows.extend(txn.list(table).expect("list"));
    }
    rows
}

fn same(a: &[Arc<dyn Record>], b: &[Arc<dyn Record>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_record(y.as_ref()))
}

proptest! {
    #[test]
    fn prop_cascade_archive_then_restore_is_identity(
        teams in 1usize..4,
        members in prop::collection::vec((0usize..4, any::<bool>()), 0..8),
        keys in prop::collection::vec((0usize..8, any::<bool>()), 0..12),
        target in 0usize..4,
    ) {
        let db = MemDb::new(schema()).expect("schema");
        let mut txn = db.write().expect("write");
        for t in 0..teams {
            txn.insert(Team { uuid: format!("t{t}"), archive_mark: ArchiveMark::LIVE }).expect("team");
        }
        let mut member_ids = Vec::new();
        for (i, (team, archived)) in members.iter().enumerate() {
            let team = team % teams;
            let uuid = format!("m{i}");
            txn.insert(Member {
                uuid: uuid.clone(),
                team_uuid: format!("t{team}"),
                archive_mark: mark(*archived, i as i64),
            })
            .expect("member");
            member_ids.push((uuid, *archived));
        }
        if !member_ids.is_empty() {
            for (i, (member, archived)) in keys.iter().enumerate() {
                let (member_uuid, member_archived) = &member_ids[member % member_ids.len()];
                // Live keys need a live member.
                let archived = *archived || *member_archived;
                txn.insert(Key {
                    uuid: format!("k{i}"),
                    member_uuid: member_uuid.clone(),
                    archive_mark: mark(archived, 100 + i as i64),
                })
                .expect("key");
            }
        }
        txn.commit();
        let before = snapshot(&db);

        let team = Team { uuid: format!("t{}", target % teams), archive_mark: ArchiveMark::LIVE };
        let mut txn = db.write().expect("write");
        txn.cascade_archive(&team, ArchiveMark::at(7, 7)).expect("cascade archive");
        txn.commit();

        let txn = db.read();
        let members_of_team = txn.get_as::<Member>("team_uuid", &[&team.uuid]).expect("members");
        prop_assert!(members_of_team.iter().all(|m| !m.archive_mark.is_live()));
        drop(txn);

        let mut txn = db.write().expect("write");
        let archived = txn.first_as::<Team>(PRIMARY_INDEX, &[&team.uuid]).expect("get").expect("team");
        txn.cascade_restore(&archived).expect("cascade restore");
        txn.commit();

        prop_assert!(same(&before, &snapshot(&db)));
    }
}
