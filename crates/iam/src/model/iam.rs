//! Objects owned by the authoritative source and replicated through the root topic.

use ironvault_memdb::{ArchiveMark, impl_record};
use serde::{Deserialize, Serialize};

/// Top-level isolation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub uuid: String,
    pub identifier: String,
    #[serde(default)]
    pub resource_version: String,
    #[serde(flatten)]
    pub archive_mark: ArchiveMark,
}

impl_record!(Tenant, table = "tenant", fields = [uuid, identifier], archivable);

/// Human principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uuid: String,
    pub tenant_uuid: String,
    pub identifier: String,
    /// `"<identifier>@<tenant identifier>"`.
    #[serde(default)]
    pub full_identifier: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub resource_version: String,
    #[serde(flatten)]
    pub archive_mark: ArchiveMark,
}

impl_record!(
    User,
    table = "user",
    fields = [uuid, tenant_uuid, identifier, full_identifier, email],
    archivable
);

/// Machine principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub uuid: String,
    pub tenant_uuid: String,
    pub identifier: String,
    #[serde(default)]
    pub full_identifier: String,
    #[serde(default)]
    pub resource_version: String,
    #[serde(flatten)]
    pub archive_mark: ArchiveMark,
}

impl_record!(
    ServiceAccount,
    table = "service_account",
    fields = [uuid, tenant_uuid, identifier, full_identifier],
    archivable
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub uuid: String,
    pub tenant_uuid: String,
    pub identifier: String,
    #[serde(default)]
    pub resource_version: String,
    #[serde(flatten)]
    pub archive_mark: ArchiveMark,
}

impl_record!(Project, table = "project", fields = [uuid, tenant_uuid, identifier], archivable);

/// Named set of principals within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub uuid: String,
    pub tenant_uuid: String,
    pub identifier: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub service_accounts: Vec<String>,
    #[serde(default)]
    pub resource_version: String,
    #[serde(flatten)]
    pub archive_mark: ArchiveMark,
}

impl_record!(
    Group,
    table = "group",
    fields = [uuid, tenant_uuid, identifier, users, service_accounts],
    archivable
);

/// Grants roles to members on a set of projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub uuid: String,
    pub tenant_uuid: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub service_accounts: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub resource_version: String,
    #[serde(flatten)]
    pub archive_mark: ArchiveMark,
}

impl_record!(
    RoleBinding,
    table = "role_binding",
    fields = [uuid, tenant_uuid, users, groups, service_accounts, projects, roles],
    archivable
);

/// Makes groups of one tenant visible to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySharing {
    pub uuid: String,
    pub source_tenant_uuid: String,
    pub destination_tenant_uuid: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub resource_version: String,
    #[serde(flatten)]
    pub archive_mark: ArchiveMark,
}

impl_record!(
    IdentitySharing,
    table = "identity_sharing",
    fields = [uuid, source_tenant_uuid, destination_tenant_uuid, groups],
    archivable
);

/// Long-lived token bound to a principal. Revoked by bumping its generation number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Multipass {
    pub uuid: String,
    pub tenant_uuid: String,
    pub owner_uuid: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resource_version: String,
    #[serde(flatten)]
    pub archive_mark: ArchiveMark,
}

impl_record!(Multipass, table = "multipass", fields = [uuid, tenant_uuid, owner_uuid], archivable);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub name: String,
}

impl_record!(FeatureFlag, table = "feature_flag", fields = [name]);

/// Bundle of role bindings and identity sharings installed into a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePack {
    pub uuid: String,
    pub project_uuid: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub rolebindings: Vec<String>,
    #[serde(default)]
    pub identity_sharings: Vec<String>,
    #[serde(default)]
    pub resource_version: String,
    #[serde(flatten)]
    pub archive_mark: ArchiveMark,
}

impl_record!(
    ServicePack,
    table = "service_pack",
    fields = [uuid, project_uuid, name, rolebindings, identity_sharings],
    archivable
);
