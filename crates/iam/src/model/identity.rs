//! Objects owned by this instance: identity projection rows, auth sources and
//! generation numbers.

use ironvault_memdb::impl_record;
use serde::{Deserialize, Serialize};

use crate::{
    error::{InvalidArgumentSnafu, Result},
    model::{ServiceAccount, User},
};

/// Projection of one principal into the identity system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Identifier of this row.
    pub uuid: String,
    /// Full identifier of the principal.
    pub name: String,
    /// Principal (user or service account) UUID.
    pub user_id: String,
}

impl_record!(Entity, table = "entity", fields = [uuid, name, user_id]);

/// Login name of a principal under one auth source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAlias {
    /// Identifier of this row.
    pub uuid: String,
    /// Principal UUID.
    pub user_id: String,
    /// Name derived from the source policy.
    pub name: String,
    /// Name of the auth source.
    pub source_name: String,
}

impl_record!(EntityAlias, table = "entity_alias", fields = [uuid, user_id, name, source_name]);

/// Which principal attribute names an entity alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityAliasName {
    /// The principal's email. Users only.
    Email,
    /// `"<identifier>@<tenant>"`.
    FullIdentifier,
    /// The principal UUID.
    Uuid,
}

impl EntityAliasName {
    /// Wire name of the policy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::FullIdentifier => "full_identifier",
            Self::Uuid => "uuid",
        }
    }
}

impl std::str::FromStr for EntityAliasName {
    type Err = crate::IamError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "email" => Ok(Self::Email),
            "full_identifier" => Ok(Self::FullIdentifier),
            "uuid" => Ok(Self::Uuid),
            other => InvalidArgumentSnafu { message: format!("unknown entity alias name {other:?}") }.fail(),
        }
    }
}

/// External authentication method principals log in through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSource {
    /// Unique name, also the mount the aliases belong to.
    pub name: String,
    /// Alias naming policy.
    pub entity_alias_name: EntityAliasName,
    /// Service accounts may log in through this source.
    #[serde(default)]
    pub allow_service_accounts: bool,
    /// Only service accounts may log in through this source.
    #[serde(default)]
    pub only_service_accounts: bool,
}

impl_record!(AuthSource, table = "auth_source", fields = [name, allow_service_accounts, only_service_accounts]);

impl AuthSource {
    /// Builds a source admitting users only.
    pub fn for_users(name: impl Into<String>, entity_alias_name: EntityAliasName) -> Self {
        Self { name: name.into(), entity_alias_name, allow_service_accounts: false, only_service_accounts: false }
    }

    /// Whether service accounts get aliases. Email naming never applies to them.
    #[must_use]
    pub fn allow_for_sa(&self) -> bool {
        self.allow_service_accounts && self.entity_alias_name != EntityAliasName::Email
    }

    /// Whether users get aliases.
    #[must_use]
    pub fn allow_for_users(&self) -> bool {
        !self.only_service_accounts
    }

    /// Alias name of `user`. May be empty when the attribute is unset.
    #[must_use]
    pub fn name_for_user<'a>(&self, user: &'a User) -> &'a str {
        match self.entity_alias_name {
            EntityAliasName::Email => &user.email,
            EntityAliasName::FullIdentifier => &user.full_identifier,
            EntityAliasName::Uuid => &user.uuid,
        }
    }

    /// Alias name of `sa`.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::InvalidArgument`](crate::IamError::InvalidArgument)
    /// for email naming, which service accounts do not have.
    pub fn name_for_service_account<'a>(&self, sa: &'a ServiceAccount) -> Result<&'a str> {
        match self.entity_alias_name {
            EntityAliasName::Email => InvalidArgumentSnafu {
                message: format!("auth source {:?} names aliases by email, service accounts have none", self.name),
            }
            .fail(),
            EntityAliasName::FullIdentifier => Ok(&sa.full_identifier),
            EntityAliasName::Uuid => Ok(&sa.uuid),
        }
    }
}

/// Revocation epoch of one token-bearing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationNumber {
    /// UUID of the token-bearing record.
    pub uuid: String,
    /// Current generation. Never decreases.
    pub generation_number: u64,
}

impl_record!(GenerationNumber, table = "multipass_generation_number", fields = [uuid, generation_number]);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use ironvault_memdb::ArchiveMark;

    use super::*;

    fn alice() -> User {
        User {
            uuid: "00000000-0000-4000-a000-00000000000a".to_string(),
            tenant_uuid: "00000000-0000-4000-a000-000000000001".to_string(),
            identifier: "alice".to_string(),
            full_identifier: "alice@t".to_string(),
            email: "alice@example.com".to_string(),
            resource_version: String::new(),
            archive_mark: ArchiveMark::LIVE,
        }
    }

    #[test]
    fn test_name_for_user_follows_policy() {
        let user = alice();
        let by = |policy| AuthSource::for_users("s", policy).name_for_user(&user).to_string();
        assert_eq!(by(EntityAliasName::Email), "alice@example.com");
        assert_eq!(by(EntityAliasName::FullIdentifier), "alice@t");
        assert_eq!(by(EntityAliasName::Uuid), user.uuid);
    }

    #[test]
    fn test_email_policy_never_admits_service_accounts() {
        let mut source = AuthSource::for_users("s", EntityAliasName::Email);
        source.allow_service_accounts = true;
        assert!(!source.allow_for_sa());

        let sa = ServiceAccount {
            uuid: "00000000-0000-4000-a000-00000000000b".to_string(),
            tenant_uuid: "00000000-0000-4000-a000-000000000001".to_string(),
            identifier: "robot".to_string(),
            full_identifier: "robot@t".to_string(),
            resource_version: String::new(),
            archive_mark: ArchiveMark::LIVE,
        };
        assert!(source.name_for_service_account(&sa).is_err());

        source.entity_alias_name = EntityAliasName::FullIdentifier;
        assert!(source.allow_for_sa());
        assert_eq!(source.name_for_service_account(&sa).expect("named"), "robot@t");
    }

    #[test]
    fn test_alias_policy_wire_names() {
        for policy in [EntityAliasName::Email, EntityAliasName::FullIdentifier, EntityAliasName::Uuid] {
            let json = serde_json::to_string(&policy).expect("serialize");
            assert_eq!(json, format!("\"{}\"", policy.as_str()));
            assert_eq!(policy.as_str().parse::<EntityAliasName>().expect("parse"), policy);
        }
        assert!("login".parse::<EntityAliasName>().is_err());
    }
}
