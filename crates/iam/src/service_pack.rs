//! Service packs: role bindings and identity sharings installed into a
//! project as a unit.

use ironvault_memdb::{ArchiveMark, PRIMARY_INDEX, Reader, TableRecord, WriteTxn};
use tracing::{debug, info};

use crate::{
    error::{IamError, Result},
    model::{IdentitySharing, Project, RoleBinding, ServicePack},
    repo::VersionedRepo,
    schema::PROJECT_INDEX,
};

/// Keeps service packs consistent with the projects they are installed in.
pub struct ServicePackController;

impl ServicePackController {
    /// Archives every live service pack of `project_uuid` with `mark`, then
    /// the role bindings and identity sharings they installed. A binding or
    /// sharing still held by another live pack is left alone.
    ///
    /// Returns the number of packs archived.
    ///
    /// # Errors
    ///
    /// Returns the first store error other than `NotEmptyRelation`.
    pub fn on_delete_project(txn: &mut WriteTxn<'_>, project_uuid: &str, mark: ArchiveMark) -> Result<usize> {
        let packs: Vec<ServicePack> = txn
            .get_as::<ServicePack>(PROJECT_INDEX, &[project_uuid])?
            .into_iter()
            .filter(|pack| pack.archive_mark.is_live())
            .collect();

        for pack in &packs {
            txn.archive(pack, mark)?;
            for uuid in &pack.rolebindings {
                if let Some(binding) = live::<RoleBinding>(&*txn, uuid)? {
                    tolerate_shared(RoleBinding::TABLE, uuid, txn.cascade_archive(&binding, mark))?;
                }
            }
            for uuid in &pack.identity_sharings {
                if let Some(sharing) = live::<IdentitySharing>(&*txn, uuid)? {
                    tolerate_shared(IdentitySharing::TABLE, uuid, txn.archive(&sharing, mark))?;
                }
            }
            debug!(pack = %pack.uuid, project = project_uuid, "service pack archived");
        }
        Ok(packs.len())
    }

    /// Archives a project together with its service packs under one mark.
    ///
    /// # Errors
    ///
    /// See [`on_delete_project`](Self::on_delete_project) and
    /// [`VersionedRepo::cascade_delete`].
    pub fn delete_project(txn: &mut WriteTxn<'_>, project_uuid: &str) -> Result<ArchiveMark> {
        let mark = ArchiveMark::new();
        let packs = Self::on_delete_project(txn, project_uuid, mark)?;
        VersionedRepo::<Project>::cascade_delete_with(txn, project_uuid, mark)?;
        info!(project = project_uuid, packs, "project deleted");
        Ok(mark)
    }
}

fn live<T: TableRecord>(reader: &impl Reader, uuid: &str) -> Result<Option<T>> {
    Ok(reader.first_as::<T>(PRIMARY_INDEX, &[uuid])?.filter(|row| row.is_live()))
}

fn tolerate_shared(table: &str, uuid: &str, archived: ironvault_memdb::Result<()>) -> Result<()> {
    match archived.map_err(IamError::from) {
        Err(e) if e.is_not_empty_relation() => {
            debug!(table, uuid, "still referenced by a live service pack, keeping");
            Ok(())
        },
        other => other,
    }
}
