//! Domain records stored in the table store and carried in envelopes.
//!
//! Every record type declares its table and static field list through
//! [`impl_record!`](ironvault_memdb::impl_record); payloads travel as JSON with
//! the archive mark flattened into `archiving_timestamp`/`archiving_hash`.

#[allow(missing_docs)]
mod iam;
mod identity;

pub use iam::{
    FeatureFlag, Group, IdentitySharing, Multipass, Project, RoleBinding, ServiceAccount, ServicePack,
    Tenant, User,
};
pub use identity::{AuthSource, Entity, EntityAlias, EntityAliasName, GenerationNumber};
use ironvault_memdb::{ArchiveMark, TableRecord};
use serde::{Serialize, de::DeserializeOwned};

/// Root-owned record guarded by optimistic concurrency on `resource_version`.
pub trait Versioned: TableRecord + Serialize + DeserializeOwned {
    /// Primary key.
    fn uuid(&self) -> &str;

    /// Version the record was last written with.
    fn resource_version(&self) -> &str;

    /// Replaces the version.
    fn set_resource_version(&mut self, version: String);

    /// Current archive mark.
    fn mark(&self) -> ArchiveMark;
}

macro_rules! versioned {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Versioned for $ty {
                fn uuid(&self) -> &str {
                    &self.uuid
                }

                fn resource_version(&self) -> &str {
                    &self.resource_version
                }

                fn set_resource_version(&mut self, version: String) {
                    self.resource_version = version;
                }

                fn mark(&self) -> ArchiveMark {
                    self.archive_mark
                }
            }
        )*
    };
}

versioned!(Tenant, User, ServiceAccount, Project, Group, RoleBinding, IdentitySharing, Multipass, ServicePack);
