//! Table, index and relation declarations.
//!
//! Two schemas are merged at startup: [`iam_schema`] for the objects the
//! authoritative source owns and [`identity_schema`] for the rows this
//! instance derives or owns locally.

use ironvault_memdb::{DbSchema, IndexSchema, Indexer, Relation, Result, TableRecord, TableSchema};

use crate::model::{
    AuthSource, Entity, EntityAlias, FeatureFlag, GenerationNumber, Group, IdentitySharing, Multipass,
    Project, RoleBinding, ServiceAccount, ServicePack, Tenant, User,
};

/// Rows of a tenant, by `tenant_uuid`.
pub const TENANT_INDEX: &str = "tenant_uuid";
/// Live rows unique by (tenant, lowercase identifier).
pub const TENANT_IDENTIFIER_INDEX: &str = "tenant_identifier";
/// Groups and role bindings by member user.
pub const USERS_INDEX: &str = "users";
/// Groups and role bindings by member service account.
pub const SERVICE_ACCOUNTS_INDEX: &str = "service_accounts";
/// Role bindings by project.
pub const PROJECTS_INDEX: &str = "projects";
/// Identity sharings by source tenant.
pub const SOURCE_TENANT_INDEX: &str = "source_tenant_uuid";
/// Multipasses by owning principal.
pub const OWNER_INDEX: &str = "owner_uuid";
/// Service packs by project.
pub const PROJECT_INDEX: &str = "project_uuid";
/// Live service packs unique by (project, lowercase name).
pub const PROJECT_NAME_INDEX: &str = "project_name";
/// Service packs by role binding.
pub const ROLEBINDINGS_INDEX: &str = "rolebindings";
/// Service packs by identity sharing.
pub const IDENTITY_SHARINGS_INDEX: &str = "identity_sharings";
/// Entities and aliases by principal.
pub const USER_ID_INDEX: &str = "user_id";
/// Entities by name.
pub const NAME_INDEX: &str = "name";
/// Aliases by (principal, auth source).
pub const ENTITY_ALIAS_SOURCE_INDEX: &str = "entity_alias_source";
/// Aliases by auth source.
pub const SOURCE_NAME_INDEX: &str = "source_name";

fn tenant_identifier() -> IndexSchema {
    IndexSchema::new(
        TENANT_IDENTIFIER_INDEX,
        Indexer::Compound(vec![Indexer::uuid("tenant_uuid"), Indexer::field_lowercase("identifier")]),
    )
}

fn tenant_scoped<T: TableRecord>() -> TableSchema {
    TableSchema::of::<T>()
        .index(IndexSchema::primary_uuid("uuid"))
        .index(IndexSchema::new(TENANT_INDEX, Indexer::uuid("tenant_uuid")))
}

/// Tables replicated from the root topic.
#[must_use]
pub fn iam_schema() -> DbSchema {
    DbSchema::default()
        .table(
            TableSchema::of::<Tenant>()
                .index(IndexSchema::primary_uuid("uuid"))
                .index(IndexSchema::new("identifier", Indexer::field_lowercase("identifier"))),
        )
        .table(tenant_scoped::<User>().index(tenant_identifier()))
        .table(tenant_scoped::<ServiceAccount>().index(tenant_identifier()))
        .table(tenant_scoped::<Project>().index(tenant_identifier()))
        .table(
            tenant_scoped::<Group>()
                .index(tenant_identifier())
                .index(IndexSchema::new(USERS_INDEX, Indexer::list("users")).allow_missing())
                .index(IndexSchema::new(SERVICE_ACCOUNTS_INDEX, Indexer::list("service_accounts")).allow_missing()),
        )
        .table(
            tenant_scoped::<RoleBinding>()
                .index(IndexSchema::new(USERS_INDEX, Indexer::list("users")).allow_missing())
                .index(IndexSchema::new(SERVICE_ACCOUNTS_INDEX, Indexer::list("service_accounts")).allow_missing())
                .index(IndexSchema::new(PROJECTS_INDEX, Indexer::list("projects")).allow_missing()),
        )
        .table(
            TableSchema::of::<IdentitySharing>()
                .index(IndexSchema::primary_uuid("uuid"))
                .index(IndexSchema::new(SOURCE_TENANT_INDEX, Indexer::uuid("source_tenant_uuid"))),
        )
        .table(tenant_scoped::<Multipass>().index(IndexSchema::new(OWNER_INDEX, Indexer::uuid("owner_uuid"))))
        .table(TableSchema::of::<FeatureFlag>().index(IndexSchema::primary("name")))
        .table(
            TableSchema::of::<ServicePack>()
                .index(IndexSchema::primary_uuid("uuid"))
                .index(IndexSchema::new(PROJECT_INDEX, Indexer::uuid("project_uuid")))
                .index(IndexSchema::new(
                    PROJECT_NAME_INDEX,
                    Indexer::Compound(vec![Indexer::uuid("project_uuid"), Indexer::field_lowercase("name")]),
                ))
                .index(IndexSchema::new(ROLEBINDINGS_INDEX, Indexer::list("rolebindings")).allow_missing())
                .index(IndexSchema::new(IDENTITY_SHARINGS_INDEX, Indexer::list("identity_sharings")).allow_missing()),
        )
        .foreign_key("user", Relation::foreign_key("tenant_uuid", "tenant"))
        .foreign_key("service_account", Relation::foreign_key("tenant_uuid", "tenant"))
        .foreign_key("project", Relation::foreign_key("tenant_uuid", "tenant"))
        .foreign_key("group", Relation::foreign_key("tenant_uuid", "tenant"))
        .foreign_key("group", Relation::foreign_key("users", "user"))
        .foreign_key("group", Relation::foreign_key("service_accounts", "service_account"))
        .foreign_key("role_binding", Relation::foreign_key("tenant_uuid", "tenant"))
        .foreign_key("role_binding", Relation::foreign_key("users", "user"))
        .foreign_key("role_binding", Relation::foreign_key("groups", "group"))
        .foreign_key("role_binding", Relation::foreign_key("service_accounts", "service_account"))
        .foreign_key("role_binding", Relation::foreign_key("projects", "project"))
        .foreign_key("identity_sharing", Relation::foreign_key("source_tenant_uuid", "tenant"))
        .foreign_key("identity_sharing", Relation::foreign_key("destination_tenant_uuid", "tenant"))
        .foreign_key("identity_sharing", Relation::foreign_key("groups", "group"))
        .foreign_key("multipass", Relation::foreign_key("tenant_uuid", "tenant"))
        .foreign_key("service_pack", Relation::foreign_key("project_uuid", "project"))
        .foreign_key("service_pack", Relation::foreign_key("rolebindings", "role_binding"))
        .foreign_key("service_pack", Relation::foreign_key("identity_sharings", "identity_sharing"))
        .cascade("tenant", Relation::new("uuid", "user", TENANT_INDEX))
        .cascade("tenant", Relation::new("uuid", "service_account", TENANT_INDEX))
        .cascade("tenant", Relation::new("uuid", "project", TENANT_INDEX))
        .cascade("tenant", Relation::new("uuid", "group", TENANT_INDEX))
        .cascade("tenant", Relation::new("uuid", "role_binding", TENANT_INDEX))
        .cascade("tenant", Relation::new("uuid", "identity_sharing", SOURCE_TENANT_INDEX))
        .cascade("user", Relation::new("uuid", "multipass", OWNER_INDEX))
        .cascade("user", Relation::new("uuid", "group", USERS_INDEX))
        .cascade("user", Relation::new("uuid", "role_binding", USERS_INDEX))
        .cascade("service_account", Relation::new("uuid", "multipass", OWNER_INDEX))
        .cascade("service_account", Relation::new("uuid", "group", SERVICE_ACCOUNTS_INDEX))
        .cascade("service_account", Relation::new("uuid", "role_binding", SERVICE_ACCOUNTS_INDEX))
        .cascade("project", Relation::new("uuid", "role_binding", PROJECTS_INDEX))
        .checking("role_binding", Relation::new("uuid", "service_pack", ROLEBINDINGS_INDEX))
        .checking("identity_sharing", Relation::new("uuid", "service_pack", IDENTITY_SHARINGS_INDEX))
        .unique_among_live("user", TENANT_IDENTIFIER_INDEX)
        .unique_among_live("service_account", TENANT_IDENTIFIER_INDEX)
        .unique_among_live("project", TENANT_IDENTIFIER_INDEX)
        .unique_among_live("group", TENANT_IDENTIFIER_INDEX)
        .unique_among_live("service_pack", PROJECT_NAME_INDEX)
}

/// Tables derived or owned by this instance.
#[must_use]
pub fn identity_schema() -> DbSchema {
    DbSchema::default()
        .table(
            TableSchema::of::<Entity>()
                .index(IndexSchema::primary_uuid("uuid"))
                .index(IndexSchema::new(NAME_INDEX, Indexer::field("name")).unique())
                .index(IndexSchema::new(USER_ID_INDEX, Indexer::uuid("user_id")).unique()),
        )
        .table(
            TableSchema::of::<EntityAlias>()
                .index(IndexSchema::primary_uuid("uuid"))
                .index(
                    IndexSchema::new(
                        ENTITY_ALIAS_SOURCE_INDEX,
                        Indexer::Compound(vec![Indexer::uuid("user_id"), Indexer::field("source_name")]),
                    )
                    .unique(),
                )
                .index(IndexSchema::new(USER_ID_INDEX, Indexer::uuid("user_id")))
                .index(IndexSchema::new(SOURCE_NAME_INDEX, Indexer::field("source_name"))),
        )
        .table(TableSchema::of::<AuthSource>().index(IndexSchema::primary("name")))
        .table(TableSchema::of::<GenerationNumber>().index(IndexSchema::primary_uuid("uuid")))
}

/// Both schemas merged and validated.
///
/// # Errors
///
/// Returns [`Error::MergeSchema`](ironvault_memdb::Error::MergeSchema) if the
/// declarations are inconsistent.
pub fn full_schema() -> Result<DbSchema> {
    DbSchema::merge([iam_schema(), identity_schema()])
}
