use ironvault_memdb::{PRIMARY_INDEX, Reader, TableRecord, WriteTxn};
use tracing::trace;

use crate::{
    error::Result,
    model::{AuthSource, Entity, EntityAlias},
    schema::{ENTITY_ALIAS_SOURCE_INDEX, SOURCE_NAME_INDEX, USER_ID_INDEX},
};

/// Entity rows, one per principal.
pub struct EntityRepo;

impl EntityRepo {
    /// Entity of a principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup arguments are malformed.
    pub fn by_user<R: Reader>(reader: &R, user_id: &str) -> Result<Option<Entity>> {
        Ok(reader.first_as::<Entity>(USER_ID_INDEX, &[user_id])?)
    }

    /// Upserts the entity of `user_id`, keeping the row UUID when one exists.
    ///
    /// # Errors
    ///
    /// Returns the store error if the row cannot be written.
    pub fn ensure(txn: &mut WriteTxn<'_>, user_id: &str, name: &str) -> Result<Entity> {
        let uuid = match Self::by_user(&*txn, user_id)? {
            Some(existing) => existing.uuid,
            None => uuid::Uuid::new_v4().to_string(),
        };
        let entity = Entity { uuid, name: name.to_string(), user_id: user_id.to_string() };
        txn.insert(entity.clone())?;
        Ok(entity)
    }

    /// Removes the entity of `user_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns the store error if the row cannot be removed.
    pub fn delete_by_user(txn: &mut WriteTxn<'_>, user_id: &str) -> Result<Option<Entity>> {
        let Some(entity) = Self::by_user(&*txn, user_id)? else {
            return Ok(None);
        };
        txn.remove(Entity::TABLE, &entity.uuid)?;
        Ok(Some(entity))
    }
}

/// Entity alias rows, one per (principal, auth source).
pub struct EntityAliasRepo;

impl EntityAliasRepo {
    /// Alias of a principal under one source.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup arguments are malformed.
    pub fn get<R: Reader>(reader: &R, user_id: &str, source_name: &str) -> Result<Option<EntityAlias>> {
        Ok(reader.first_as::<EntityAlias>(ENTITY_ALIAS_SOURCE_INDEX, &[user_id, source_name])?)
    }

    /// Every alias of a principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup arguments are malformed.
    pub fn by_user<R: Reader>(reader: &R, user_id: &str) -> Result<Vec<EntityAlias>> {
        Ok(reader.get_as::<EntityAlias>(USER_ID_INDEX, &[user_id])?)
    }

    /// Every alias under one source.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup arguments are malformed.
    pub fn by_source<R: Reader>(reader: &R, source_name: &str) -> Result<Vec<EntityAlias>> {
        Ok(reader.get_as::<EntityAlias>(SOURCE_NAME_INDEX, &[source_name])?)
    }

    /// Upserts the alias of `user_id` under `source_name`, reusing the row UUID.
    ///
    /// # Errors
    ///
    /// Returns the store error if the row cannot be written.
    pub fn put(txn: &mut WriteTxn<'_>, user_id: &str, source_name: &str, name: &str) -> Result<EntityAlias> {
        let uuid = match Self::get(&*txn, user_id, source_name)? {
            Some(existing) => existing.uuid,
            None => uuid::Uuid::new_v4().to_string(),
        };
        let alias = EntityAlias {
            uuid,
            user_id: user_id.to_string(),
            name: name.to_string(),
            source_name: source_name.to_string(),
        };
        txn.insert(alias.clone())?;
        trace!(user_id, source_name, name, "entity alias stored");
        Ok(alias)
    }

    /// Removes one alias row.
    ///
    /// # Errors
    ///
    /// Returns the store error if the row cannot be removed.
    pub fn delete(txn: &mut WriteTxn<'_>, alias: &EntityAlias) -> Result<()> {
        txn.remove(EntityAlias::TABLE, &alias.uuid)?;
        Ok(())
    }

    /// Removes every alias of a principal. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns the store error if a row cannot be removed.
    pub fn delete_by_user(txn: &mut WriteTxn<'_>, user_id: &str) -> Result<usize> {
        let aliases = Self::by_user(&*txn, user_id)?;
        for alias in &aliases {
            Self::delete(txn, alias)?;
        }
        Ok(aliases.len())
    }

    /// Removes every alias under one source. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns the store error if a row cannot be removed.
    pub fn delete_by_source(txn: &mut WriteTxn<'_>, source_name: &str) -> Result<usize> {
        let aliases = Self::by_source(&*txn, source_name)?;
        for alias in &aliases {
            Self::delete(txn, alias)?;
        }
        Ok(aliases.len())
    }
}

/// Configured auth sources.
pub struct AuthSourceRepo;

impl AuthSourceRepo {
    /// Every source in name order.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not declared.
    pub fn list<R: Reader>(reader: &R) -> Result<Vec<AuthSource>> {
        Ok(reader.list_as::<AuthSource>()?)
    }

    /// Source by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup arguments are malformed.
    pub fn get<R: Reader>(reader: &R, name: &str) -> Result<Option<AuthSource>> {
        Ok(reader.first_as::<AuthSource>(PRIMARY_INDEX, &[name])?)
    }

    /// Upserts a source.
    ///
    /// # Errors
    ///
    /// Returns the store error if the row cannot be written.
    pub fn put(txn: &mut WriteTxn<'_>, source: AuthSource) -> Result<()> {
        txn.insert(source)?;
        Ok(())
    }

    /// Removes a source and every alias under it.
    ///
    /// # Errors
    ///
    /// Returns the store error if a row cannot be removed.
    pub fn delete(txn: &mut WriteTxn<'_>, name: &str) -> Result<bool> {
        let removed = txn.remove(AuthSource::TABLE, name)?.is_some();
        EntityAliasRepo::delete_by_source(txn, name)?;
        Ok(removed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::{model::EntityAliasName, store::IamStore};

    const U1: &str = "00000000-0000-4000-a000-0000000000a1";
    const U2: &str = "00000000-0000-4000-a000-0000000000a2";

    #[test]
    fn test_entity_ensure_keeps_uuid() {
        let store = IamStore::open().expect("store");
        let mut txn = store.write().expect("txn");
        let first = EntityRepo::ensure(&mut txn, U1, "alice@t").expect("entity");
        let renamed = EntityRepo::ensure(&mut txn, U1, "alice@t2").expect("entity");
        assert_eq!(first.uuid, renamed.uuid);
        assert_eq!(txn.list_as::<Entity>().expect("list").len(), 1);
        assert_eq!(EntityRepo::delete_by_user(&mut txn, U1).expect("delete").map(|e| e.name), Some("alice@t2".to_string()));
        assert!(EntityRepo::delete_by_user(&mut txn, U1).expect("second delete").is_none());
    }

    #[test]
    fn test_alias_put_is_idempotent_per_source() {
        let store = IamStore::open().expect("store");
        let mut txn = store.write().expect("txn");
        let a = EntityAliasRepo::put(&mut txn, U1, "oidc", "alice@example.com").expect("alias");
        let b = EntityAliasRepo::put(&mut txn, U1, "oidc", "alice@example.com").expect("alias");
        assert_eq!(a, b);
        EntityAliasRepo::put(&mut txn, U1, "ldap", U1).expect("alias");
        EntityAliasRepo::put(&mut txn, U2, "oidc", "bob@example.com").expect("alias");

        assert_eq!(EntityAliasRepo::by_user(&txn, U1).expect("by user").len(), 2);
        assert_eq!(EntityAliasRepo::by_source(&txn, "oidc").expect("by source").len(), 2);
        assert_eq!(EntityAliasRepo::delete_by_user(&mut txn, U1).expect("delete"), 2);
        assert_eq!(EntityAliasRepo::by_user(&txn, U2).expect("other user").len(), 1);
    }

    #[test]
    fn test_auth_source_delete_drops_its_aliases() {
        let store = IamStore::open().expect("store");
        let mut txn = store.write().expect("txn");
        AuthSourceRepo::put(&mut txn, AuthSource::for_users("oidc", EntityAliasName::Email)).expect("source");
        EntityAliasRepo::put(&mut txn, U1, "oidc", "alice@example.com").expect("alias");
        EntityAliasRepo::put(&mut txn, U1, "ldap", U1).expect("alias");

        assert!(AuthSourceRepo::delete(&mut txn, "oidc").expect("delete"));
        assert!(AuthSourceRepo::get(&txn, "oidc").expect("get").is_none());
        let left = EntityAliasRepo::by_user(&txn, U1).expect("aliases");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].source_name, "ldap");
        assert!(!AuthSourceRepo::delete(&mut txn, "oidc").expect("absent"));
    }
}
