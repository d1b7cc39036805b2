//! Identity projection of principals.
//!
//! Every live user and service account has exactly one [`Entity`] and, for
//! each auth source whose policy admits its kind, exactly one
//! [`EntityAlias`]. Projection runs inside the caller's write transaction;
//! the resulting identity rows reach the self topic when that transaction is
//! published.

use ironvault_memdb::{PRIMARY_INDEX, Reader, WriteTxn};
use tracing::debug;

use crate::{
    error::Result,
    model::{AuthSource, Entity, ServiceAccount, User},
    repo::{AuthSourceRepo, EntityAliasRepo, EntityRepo},
};

/// A projectable principal.
pub trait Principal {
    /// Principal UUID, the `user_id` of its identity rows.
    fn principal_id(&self) -> &str;

    /// `"<identifier>@<tenant>"`.
    fn full_identifier(&self) -> &str;

    /// Whether the principal is live.
    fn is_active(&self) -> bool;

    /// Alias name under `source`, or `None` when the source does not admit
    /// this principal kind.
    ///
    /// # Errors
    ///
    /// Returns an error when the source policy cannot name this principal.
    fn alias_name<'a>(&'a self, source: &AuthSource) -> Result<Option<&'a str>>;
}

impl Principal for User {
    fn principal_id(&self) -> &str {
        &self.uuid
    }

    fn full_identifier(&self) -> &str {
        &self.full_identifier
    }

    fn is_active(&self) -> bool {
        self.archive_mark.is_live()
    }

    fn alias_name<'a>(&'a self, source: &AuthSource) -> Result<Option<&'a str>> {
        Ok(source.allow_for_users().then(|| source.name_for_user(self)))
    }
}

impl Principal for ServiceAccount {
    fn principal_id(&self) -> &str {
        &self.uuid
    }

    fn full_identifier(&self) -> &str {
        &self.full_identifier
    }

    fn is_active(&self) -> bool {
        self.archive_mark.is_live()
    }

    fn alias_name<'a>(&'a self, source: &AuthSource) -> Result<Option<&'a str>> {
        if source.allow_for_sa() { source.name_for_service_account(self).map(Some) } else { Ok(None) }
    }
}

/// Entity name of a principal. Falls back to the UUID when the full
/// identifier is unset, as entity names must be unique and non-empty.
fn entity_name<P: Principal>(principal: &P) -> &str {
    let name = principal.full_identifier();
    if name.is_empty() { principal.principal_id() } else { name }
}

/// Brings the identity rows of `principal` in line with its current state
/// and every configured auth source. Archived principals lose their rows.
///
/// # Errors
///
/// Returns the first source or store error; the caller aborts the transaction.
pub fn project<P: Principal>(txn: &mut WriteTxn<'_>, principal: &P) -> Result<()> {
    if !principal.is_active() {
        forget(txn, principal.principal_id())?;
        return Ok(());
    }

    let entity = EntityRepo::ensure(txn, principal.principal_id(), entity_name(principal))?;
    for source in AuthSourceRepo::list(&*txn)? {
        project_alias(txn, &entity, principal, &source)?;
    }
    Ok(())
}

/// Projects every principal under one newly configured or changed `source`.
///
/// # Errors
///
/// Fails fast on the first principal the source policy cannot name.
pub fn project_source(txn: &mut WriteTxn<'_>, source: &AuthSource) -> Result<()> {
    let users = txn.list_as::<User>()?;
    let accounts = txn.list_as::<ServiceAccount>()?;
    let mut projected = 0usize;
    for user in users.iter().filter(|u| u.is_active()) {
        let entity = EntityRepo::ensure(txn, &user.uuid, entity_name(user))?;
        projected += usize::from(project_alias(txn, &entity, user, source)?);
    }
    for sa in accounts.iter().filter(|sa| sa.is_active()) {
        let entity = EntityRepo::ensure(txn, &sa.uuid, entity_name(sa))?;
        projected += usize::from(project_alias(txn, &entity, sa, source)?);
    }
    debug!(source = %source.name, projected, "auth source projected");
    Ok(())
}

/// Whether a live user or service account with `principal_id` exists.
///
/// # Errors
///
/// Returns the store error if a lookup fails.
pub fn principal_is_live<R: Reader>(reader: &R, principal_id: &str) -> Result<bool> {
    if reader.first_as::<User>(PRIMARY_INDEX, &[principal_id])?.is_some_and(|user| user.is_active()) {
        return Ok(true);
    }
    Ok(reader.first_as::<ServiceAccount>(PRIMARY_INDEX, &[principal_id])?.is_some_and(|sa| sa.is_active()))
}

/// Removes every alias and the entity of a principal. Returns whether
/// anything was removed.
///
/// # Errors
///
/// Returns the store error if a row cannot be removed.
pub fn forget(txn: &mut WriteTxn<'_>, principal_id: &str) -> Result<bool> {
    let aliases = EntityAliasRepo::delete_by_user(txn, principal_id)?;
    let entity = EntityRepo::delete_by_user(txn, principal_id)?;
    Ok(aliases > 0 || entity.is_some())
}

/// Upserts or removes the alias of one principal under one source. Returns
/// whether an alias is present afterwards.
fn project_alias<P: Principal>(
    txn: &mut WriteTxn<'_>,
    entity: &Entity,
    principal: &P,
    source: &AuthSource,
) -> Result<bool> {
    let name = match principal.alias_name(source)? {
        Some(name) if !name.is_empty() => name,
        Some(_) => {
            debug!(user_id = %entity.user_id, source = %source.name, "alias name is empty, skipping");
            return Ok(false);
        },
        None => {
            if let Some(stale) = EntityAliasRepo::get(&*txn, &entity.user_id, &source.name)? {
                EntityAliasRepo::delete(txn, &stale)?;
            }
            return Ok(false);
        },
    };
    EntityAliasRepo::put(txn, &entity.user_id, &source.name, name)?;
    Ok(true)
}
