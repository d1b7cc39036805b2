//! JSON payload codecs per type tag.
//!
//! Rows leave the store type-erased. [`RecordCodecs`] maps each table to the
//! functions that turn a row into an envelope payload and a payload back into
//! a row, so publishing and dispatch never switch on type names.

use std::{collections::HashMap, sync::Arc};

use ironvault_memdb::{Change, Record, TableRecord};
use ironvault_types::Envelope;
use serde::{Serialize, de::DeserializeOwned};
use snafu::ResultExt;

use crate::{
    error::{DecodeSnafu, Result, SerializeSnafu},
    model::{
        AuthSource, Entity, EntityAlias, FeatureFlag, GenerationNumber, Group, IdentitySharing, Multipass,
        Project, RoleBinding, ServiceAccount, ServicePack, Tenant, User,
    },
};

/// Serializes a type-erased row.
pub type EncodeFn = fn(&dyn Record) -> Result<Vec<u8>>;
/// Deserializes an upsert payload into a type-erased row.
pub type DecodeFn = fn(&Envelope) -> Result<Arc<dyn Record>>;

/// Encode and decode functions of one record type.
#[derive(Debug, Clone, Copy)]
pub struct RecordCodec {
    /// Row to payload.
    pub encode: EncodeFn,
    /// Payload to row.
    pub decode: DecodeFn,
}

impl RecordCodec {
    /// JSON codec for `T`.
    #[must_use]
    pub fn json<T: TableRecord + Serialize + DeserializeOwned>() -> Self {
        Self { encode: encode_json::<T>, decode: decode_json::<T> }
    }
}

fn encode_json<T: TableRecord + Serialize>(record: &dyn Record) -> Result<Vec<u8>> {
    let Some(typed) = record.as_any().downcast_ref::<T>() else {
        return SerializeSnafu {
            object_type: record.table(),
            message: format!("row is not a {}", std::any::type_name::<T>()),
        }
        .fail();
    };
    serde_json::to_vec(typed).map_err(|e| SerializeSnafu { object_type: T::TABLE, message: e.to_string() }.build())
}

fn decode_json<T: TableRecord + DeserializeOwned>(envelope: &Envelope) -> Result<Arc<dyn Record>> {
    let typed: T = envelope.decode_data().context(DecodeSnafu)?;
    Ok(Arc::new(typed))
}

/// Codecs by table name.
#[derive(Debug, Clone, Default)]
pub struct RecordCodecs {
    codecs: HashMap<&'static str, RecordCodec>,
}

impl RecordCodecs {
    /// Codecs for every record type of the full schema.
    #[must_use]
    pub fn standard() -> Self {
        Self::default()
            .with::<Tenant>()
            .with::<User>()
            .with::<ServiceAccount>()
            .with::<Project>()
            .with::<Group>()
            .with::<RoleBinding>()
            .with::<IdentitySharing>()
            .with::<Multipass>()
            .with::<FeatureFlag>()
            .with::<ServicePack>()
            .with::<Entity>()
            .with::<EntityAlias>()
            .with::<AuthSource>()
            .with::<GenerationNumber>()
    }

    /// Registers the JSON codec of `T`.
    #[must_use]
    pub fn with<T: TableRecord + Serialize + DeserializeOwned>(mut self) -> Self {
        self.codecs.insert(T::TABLE, RecordCodec::json::<T>());
        self
    }

    /// Codec of a type tag.
    #[must_use]
    pub fn get(&self, object_type: &str) -> Option<RecordCodec> {
        self.codecs.get(object_type).copied()
    }

    /// Envelope publishing `change`: the new row, or a tombstone for deletions.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::Serialize`](crate::IamError::Serialize) for tables
    /// without a codec or rows that fail to serialize.
    pub fn envelope(&self, change: &Change) -> Result<Envelope> {
        let Some(after) = &change.after else {
            return Ok(Envelope::tombstone(change.table.clone(), change.id.clone()));
        };
        let codec = self.get(&change.table).ok_or_else(|| {
            SerializeSnafu { object_type: change.table.clone(), message: "no codec registered" }.build()
        })?;
        let data = (codec.encode)(after.as_ref())?;
        Ok(Envelope::upsert(change.table.clone(), change.id.clone(), data))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use ironvault_memdb::{ArchiveMark, downcast};

    use super::*;

    fn tenant() -> Tenant {
        Tenant {
            uuid: "00000000-0000-4000-a000-000000000001".to_string(),
            identifier: "acme".to_string(),
            resource_version: "v1".to_string(),
            archive_mark: ArchiveMark::LIVE,
        }
    }

    #[test]
    fn test_upsert_change_becomes_payload() {
        let codecs = RecordCodecs::standard();
        let row: Arc<dyn Record> = Arc::new(tenant());
        let change = Change { table: "tenant".to_string(), id: tenant().uuid, before: None, after: Some(row) };

        let envelope = codecs.envelope(&change).expect("envelope");
        assert!(!envelope.is_delete());
        assert_eq!(envelope.key(), format!("tenant/{}", tenant().uuid));

        let decoded = (codecs.get("tenant").expect("codec").decode)(&envelope).expect("decode");
        assert_eq!(downcast::<Tenant>(&decoded), Some(tenant()));
    }

    #[test]
    fn test_delete_change_becomes_tombstone() {
        let codecs = RecordCodecs::standard();
        let row: Arc<dyn Record> = Arc::new(tenant());
        let change = Change { table: "tenant".to_string(), id: tenant().uuid, before: Some(row), after: None };
        let envelope = codecs.envelope(&change).expect("envelope");
        assert!(envelope.is_delete());
    }

    #[test]
    fn test_unregistered_table_is_an_error() {
        let row: Arc<dyn Record> = Arc::new(tenant());
        let change = Change { table: "tenant".to_string(), id: tenant().uuid, before: None, after: Some(row) };
        assert!(RecordCodecs::default().envelope(&change).is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let codec = RecordCodecs::standard().get("user").expect("codec");
        let envelope = Envelope::upsert("user", "u", b"{\"uuid\":7}".to_vec());
        let err = (codec.decode)(&envelope).expect_err("bad payload");
        assert_eq!(ironvault_types::HasErrorCode::code(&err), ironvault_types::ErrorCode::DispatchDecode);
    }
}
