//! Apply functions of the standard registry.

use std::sync::Arc;

use ironvault_memdb::{Record, TableRecord, downcast};
use ironvault_types::Envelope;
use tracing::debug;

use super::ApplyContext;
use crate::{
    downstream::EntityDownstream,
    error::{Result, SerializeSnafu},
    model::{AuthSource, Entity, EntityAlias, GenerationNumber, Multipass, ServiceAccount, User},
    projection,
    repo::{AuthSourceRepo, GenerationRepo},
};

fn typed<T: TableRecord>(object: &Arc<dyn Record>) -> Result<T> {
    downcast::<T>(object).ok_or_else(|| {
        SerializeSnafu { object_type: T::TABLE, message: format!("decoded row is a {}", object.table()) }.build()
    })
}

/// Upserts the row or removes it by id. Removing an absent row is a no-op.
pub(super) fn upsert_or_remove(
    ctx: &mut ApplyContext<'_, '_>,
    envelope: &Envelope,
    object: Option<Arc<dyn Record>>,
) -> Result<()> {
    match object {
        Some(object) => ctx.txn.insert_arc(object)?,
        None => {
            ctx.txn.remove(&envelope.object_type, &envelope.id)?;
        },
    }
    Ok(())
}

/// Like [`upsert_or_remove`] without foreign-key checks, for replay.
pub(super) fn raw(ctx: &mut ApplyContext<'_, '_>, envelope: &Envelope, object: Option<Arc<dyn Record>>) -> Result<()> {
    match object {
        Some(object) => ctx.txn.insert_unchecked(object)?,
        None => {
            ctx.txn.remove(&envelope.object_type, &envelope.id)?;
        },
    }
    Ok(())
}

pub(super) fn root_user(ctx: &mut ApplyContext<'_, '_>, envelope: &Envelope, object: Option<Arc<dyn Record>>) -> Result<()> {
    root_principal::<User>(ctx, envelope, object)
}

pub(super) fn root_service_account(
    ctx: &mut ApplyContext<'_, '_>,
    envelope: &Envelope,
    object: Option<Arc<dyn Record>>,
) -> Result<()> {
    root_principal::<ServiceAccount>(ctx, envelope, object)
}

fn root_principal<P: TableRecord + projection::Principal>(
    ctx: &mut ApplyContext<'_, '_>,
    envelope: &Envelope,
    object: Option<Arc<dyn Record>>,
) -> Result<()> {
    match object {
        Some(object) => {
            let principal = typed::<P>(&object)?;
            ctx.txn.insert_arc(object)?;
            projection::project(ctx.txn, &principal)?;
        },
        None => {
            ctx.txn.remove(P::TABLE, &envelope.id)?;
            if projection::forget(ctx.txn, &envelope.id)? {
                debug!(object_type = P::TABLE, id = %envelope.id, "principal identity removed");
            }
        },
    }
    Ok(())
}

pub(super) fn root_multipass(
    ctx: &mut ApplyContext<'_, '_>,
    envelope: &Envelope,
    object: Option<Arc<dyn Record>>,
) -> Result<()> {
    match object {
        Some(object) => {
            let multipass = typed::<Multipass>(&object)?;
            ctx.txn.insert_arc(object)?;
            GenerationRepo::create_if_absent(ctx.txn, &multipass.uuid)?;
        },
        None => {
            ctx.txn.remove(Multipass::TABLE, &envelope.id)?;
            GenerationRepo::delete(ctx.txn, &envelope.id)?;
        },
    }
    Ok(())
}

pub(super) fn local_entity(
    ctx: &mut ApplyContext<'_, '_>,
    envelope: &Envelope,
    object: Option<Arc<dyn Record>>,
) -> Result<()> {
    let derived = match object {
        Some(object) => {
            let entity = typed::<Entity>(&object)?;
            if !projection::principal_is_live(&*ctx.txn, &entity.user_id)? {
                debug!(id = %envelope.id, user_id = %entity.user_id, "principal gone, skipping stale entity");
                return Ok(());
            }
            ctx.txn.insert_arc(object)?;
            EntityDownstream::entity_upserted(&entity)
        },
        None => {
            ctx.txn.remove(Entity::TABLE, &envelope.id)?;
            EntityDownstream::entity_deleted(&envelope.id)
        },
    };
    ctx.derive(envelope, derived)
}

pub(super) fn local_entity_alias(
    ctx: &mut ApplyContext<'_, '_>,
    envelope: &Envelope,
    object: Option<Arc<dyn Record>>,
) -> Result<()> {
    let derived = match object {
        Some(object) => {
            let alias = typed::<EntityAlias>(&object)?;
            if !projection::principal_is_live(&*ctx.txn, &alias.user_id)? {
                debug!(id = %envelope.id, user_id = %alias.user_id, "principal gone, skipping stale alias");
                return Ok(());
            }
            ctx.txn.insert_arc(object)?;
            EntityDownstream::alias_upserted(&*ctx.txn, &alias)?
        },
        None => {
            ctx.txn.remove(EntityAlias::TABLE, &envelope.id)?;
            EntityDownstream::alias_deleted(&envelope.id)
        },
    };
    ctx.derive(envelope, derived)
}

pub(super) fn local_auth_source(
    ctx: &mut ApplyContext<'_, '_>,
    envelope: &Envelope,
    object: Option<Arc<dyn Record>>,
) -> Result<()> {
    match object {
        Some(object) => {
            let source = typed::<AuthSource>(&object)?;
            ctx.txn.insert_arc(object)?;
            projection::project_source(ctx.txn, &source)?;
        },
        None => {
            AuthSourceRepo::delete(ctx.txn, &envelope.id)?;
        },
    }
    Ok(())
}

pub(super) fn generation_number(
    ctx: &mut ApplyContext<'_, '_>,
    envelope: &Envelope,
    object: Option<Arc<dyn Record>>,
) -> Result<()> {
    match object {
        Some(object) => {
            let incoming = typed::<GenerationNumber>(&object)?;
            GenerationRepo::apply_replicated(ctx.txn, incoming)?;
        },
        None => {
            GenerationRepo::delete(ctx.txn, &envelope.id)?;
        },
    }
    Ok(())
}
