use std::marker::PhantomData;

use ironvault_memdb::{ArchiveMark, PRIMARY_INDEX, Reader, WriteTxn};
use snafu::ensure;
use tracing::debug;

use crate::{
    error::{AlreadyExistsSnafu, BadVersionSnafu, NotFoundSnafu, Result},
    model::Versioned,
};

/// CRUD over one root-owned table with optimistic concurrency.
///
/// Every successful write assigns a fresh `resource_version`. Deletion is an
/// archive: rows stay in the table with a mark and can be restored.
pub struct VersionedRepo<T>(PhantomData<T>);

fn new_version() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl<T: Versioned> VersionedRepo<T> {
    /// Row by UUID, live or archived.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::NotFound`](crate::IamError::NotFound) for unknown UUIDs.
    pub fn get<R: Reader>(reader: &R, uuid: &str) -> Result<T> {
        reader
            .first_as::<T>(PRIMARY_INDEX, &[uuid])?
            .ok_or_else(|| NotFoundSnafu { object_type: T::TABLE, id: uuid }.build())
    }

    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::AlreadyExists`](crate::IamError::AlreadyExists) if
    /// the UUID is taken, or the store error for foreign-key and uniqueness
    /// violations.
    pub fn create(txn: &mut WriteTxn<'_>, mut object: T) -> Result<T> {
        ensure!(
            txn.first(T::TABLE, PRIMARY_INDEX, &[object.uuid()])?.is_none(),
            AlreadyExistsSnafu { object_type: T::TABLE, id: object.uuid() }
        );
        object.set_resource_version(new_version());
        txn.insert(object.clone())?;
        debug!(table = T::TABLE, uuid = object.uuid(), "created");
        Ok(object)
    }

    /// Replaces a live row whose stored version equals the presented one.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::NotFound`](crate::IamError::NotFound),
    /// [`IamError::BadVersion`](crate::IamError::BadVersion) for a stale
    /// version, or the store's `IsArchived` error for archived rows.
    pub fn update(txn: &mut WriteTxn<'_>, mut object: T) -> Result<T> {
        let stored = Self::get(&*txn, object.uuid())?;
        if !stored.mark().is_live() {
            return Err(ironvault_memdb::Error::IsArchived {
                table: T::TABLE.to_string(),
                id: object.uuid().to_string(),
            }
            .into());
        }
        ensure!(
            stored.resource_version() == object.resource_version(),
            BadVersionSnafu {
                object_type: T::TABLE,
                id: object.uuid(),
                expected: stored.resource_version(),
                presented: object.resource_version(),
            }
        );
        object.set_resource_version(new_version());
        txn.insert(object.clone())?;
        Ok(object)
    }

    /// Archives a live row and its cascaded children with one fresh mark.
    /// List-valued links from other rows to this one are dropped first.
    ///
    /// # Errors
    ///
    /// Returns the store's `IsArchived` error for archived rows and
    /// `NotEmptyRelation` while a checking relation has live rows.
    pub fn cascade_delete(txn: &mut WriteTxn<'_>, uuid: &str) -> Result<ArchiveMark> {
        let mark = ArchiveMark::new();
        Self::cascade_delete_with(txn, uuid, mark)?;
        Ok(mark)
    }

    /// [`cascade_delete`](Self::cascade_delete) with a caller-chosen mark.
    ///
    /// # Errors
    ///
    /// See [`cascade_delete`](Self::cascade_delete).
    pub fn cascade_delete_with(txn: &mut WriteTxn<'_>, uuid: &str, mark: ArchiveMark) -> Result<()> {
        let stored = Self::get(&*txn, uuid)?;
        txn.clean_children_slice_indexes(&stored)?;
        txn.cascade_archive(&stored, mark)?;
        debug!(table = T::TABLE, uuid, "archived");
        Ok(())
    }

    /// Restores an archived row and every child archived with the same mark.
    ///
    /// # Errors
    ///
    /// Returns the store's `IsNotArchived` error for live rows.
    pub fn cascade_restore(txn: &mut WriteTxn<'_>, uuid: &str) -> Result<T> {
        let stored = Self::get(&*txn, uuid)?;
        txn.cascade_restore(&stored)?;
        Self::get(&*txn, uuid)
    }

    /// Every row, archived ones only when `show_archived` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not declared.
    pub fn list<R: Reader>(reader: &R, show_archived: bool) -> Result<Vec<T>> {
        Ok(reader.list_as::<T>()?.into_iter().filter(|row| show_archived || row.mark().is_live()).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use ironvault_types::{ErrorCode, HasErrorCode};

    use super::*;
    use crate::{
        model::{Group, Multipass, Tenant, User},
        store::IamStore,
    };

    const T1: &str = "00000000-0000-4000-a000-000000000001";
    const U1: &str = "00000000-0000-4000-a000-0000000000a1";
    const G1: &str = "00000000-0000-4000-a000-0000000000b1";
    const M1: &str = "00000000-0000-4000-a000-0000000000c1";

    fn tenant() -> Tenant {
        Tenant { uuid: T1.to_string(), identifier: "t".to_string(), resource_version: String::new(), archive_mark: ArchiveMark::LIVE }
    }

    fn user() -> User {
        User {
            uuid: U1.to_string(),
            tenant_uuid: T1.to_string(),
            identifier: "alice".to_string(),
            full_identifier: "alice@t".to_string(),
            email: "alice@example.com".to_string(),
            resource_version: String::new(),
            archive_mark: ArchiveMark::LIVE,
        }
    }

    fn seeded() -> IamStore {
        let store = IamStore::open().expect("store");
        let mut txn = store.write().expect("txn");
        VersionedRepo::<Tenant>::create(&mut txn, tenant()).expect("tenant");
        VersionedRepo::<User>::create(&mut txn, user()).expect("user");
        store.commit(txn).expect("commit");
        store
    }

    #[test]
    fn test_create_assigns_version_and_rejects_duplicates() {
        let store = seeded();
        let stored = VersionedRepo::<User>::get(&store.read(), U1).expect("user");
        assert!(!stored.resource_version.is_empty());

        let mut txn = store.write().expect("txn");
        let err = VersionedRepo::<User>::create(&mut txn, user()).expect_err("duplicate");
        assert_eq!(err.code(), ErrorCode::ObjectAlreadyExists);
    }

    #[test]
    fn test_update_with_stale_version_is_bad_version() {
        let store = seeded();
        let current = VersionedRepo::<User>::get(&store.read(), U1).expect("user");

        let mut txn = store.write().expect("txn");
        let mut stale = current.clone();
        stale.resource_version = "stale".to_string();
        let err = VersionedRepo::<User>::update(&mut txn, stale).expect_err("stale");
        assert_eq!(err.code(), ErrorCode::ObjectBadVersion);

        let mut fresh = current.clone();
        fresh.email = "alice@corp.example".to_string();
        let updated = VersionedRepo::<User>::update(&mut txn, fresh).expect("current version");
        assert_ne!(updated.resource_version, current.resource_version);
        store.commit(txn).expect("commit");
        assert_eq!(VersionedRepo::<User>::get(&store.read(), U1).expect("user").email, "alice@corp.example");
    }

    #[test]
    fn test_cascade_delete_and_restore_tenant() {
        let store = seeded();
        let mut txn = store.write().expect("txn");
        VersionedRepo::<Multipass>::create(
            &mut txn,
            Multipass {
                uuid: M1.to_string(),
                tenant_uuid: T1.to_string(),
                owner_uuid: U1.to_string(),
                description: String::new(),
                resource_version: String::new(),
                archive_mark: ArchiveMark::LIVE,
            },
        )
        .expect("multipass");
        let mark = VersionedRepo::<Tenant>::cascade_delete(&mut txn, T1).expect("archive");
        assert_eq!(VersionedRepo::<User>::get(&txn, U1).expect("user").archive_mark, mark);
        assert_eq!(VersionedRepo::<Multipass>::get(&txn, M1).expect("mp").archive_mark, mark);
        assert!(VersionedRepo::<User>::list(&txn, false).expect("list").is_empty());

        let err = VersionedRepo::<Tenant>::cascade_delete(&mut txn, T1).expect_err("twice");
        assert_eq!(err.code(), ErrorCode::ObjectIsArchived);

        VersionedRepo::<Tenant>::cascade_restore(&mut txn, T1).expect("restore");
        assert!(VersionedRepo::<User>::get(&txn, U1).expect("user").archive_mark.is_live());
        assert!(VersionedRepo::<Multipass>::get(&txn, M1).expect("mp").archive_mark.is_live());

        let err = VersionedRepo::<Tenant>::cascade_restore(&mut txn, T1).expect_err("live");
        assert_eq!(err.code(), ErrorCode::ObjectIsNotArchived);
    }

    #[test]
    fn test_user_delete_leaves_groups_and_drops_membership() {
        let store = seeded();
        let mut txn = store.write().expect("txn");
        VersionedRepo::<Group>::create(
            &mut txn,
            Group {
                uuid: G1.to_string(),
                tenant_uuid: T1.to_string(),
                identifier: "admins".to_string(),
                users: vec![U1.to_string()],
                service_accounts: Vec::new(),
                resource_version: String::new(),
                archive_mark: ArchiveMark::LIVE,
            },
        )
        .expect("group");

        VersionedRepo::<User>::cascade_delete(&mut txn, U1).expect("archive user");
        let group = VersionedRepo::<Group>::get(&txn, G1).expect("group");
        assert!(group.archive_mark.is_live());
        assert!(group.users.is_empty());
    }

    #[test]
    fn test_update_archived_row_is_rejected() {
        let store = seeded();
        let mut txn = store.write().expect("txn");
        VersionedRepo::<User>::cascade_delete(&mut txn, U1).expect("archive");
        let archived = VersionedRepo::<User>::get(&txn, U1).expect("user");
        let err = VersionedRepo::<User>::update(&mut txn, archived).expect_err("archived");
        assert_eq!(err.code(), ErrorCode::ObjectIsArchived);
    }
}
