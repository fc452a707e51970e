//! Aggregate and junction descriptors.
//!
//! Each aggregate type describes itself to the orchestrators through the
//! traits below: where it lives, which fields are writable, and which
//! procedures perform its multi-record writes.

pub mod opportunity;
pub mod product;

pub use opportunity::{
    ContactRole, Opportunity, OpportunityContact, OpportunityFields, OpportunityProduct,
};
pub use product::{DistributorTerms, Product, ProductDistributor, ProductFields};

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::CoreResult;
use crate::diff::ChildRecord;
use crate::fields;
use crate::keys::CompositeKey;

/// Identifier of a stored record, numeric or opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Int(i64),
    Text(String),
}

impl Identifier {
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(id) => Value::from(*id),
            Self::Text(id) => Value::from(id.as_str()),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for Identifier {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for Identifier {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<String> for Identifier {
    fn from(id: String) -> Self {
        Self::Text(id)
    }
}

impl From<CompositeKey> for Identifier {
    fn from(key: CompositeKey) -> Self {
        Self::Text(key.encode())
    }
}

/// A parent business entity whose writes go through this crate.
///
/// The implementing type is the persisted record as read back from the
/// store, computed view columns included.
pub trait Aggregate: DeserializeOwned + Send {
    /// Store resource name, e.g. `"opportunities"`.
    const RESOURCE: &'static str;
    /// Singular label used in operation names and error text.
    const LABEL: &'static str;
    /// View-only columns that must never be written back.
    const COMPUTED_FIELDS: &'static [&'static str];

    /// Editable-field allowlist. Only this is ever serialized into a write.
    type Fields: Serialize + DeserializeOwned + Send + Sync;

    /// Build editable fields from a raw payload, dropping computed columns.
    fn fields_from_payload(payload: &Map<String, Value>) -> CoreResult<Self::Fields> {
        fields::project(payload, Self::COMPUTED_FIELDS)
    }
}

/// An aggregate whose children are written together with it by one procedure.
pub trait SyncAggregate: Aggregate {
    type Child: ChildRecord + Serialize + Clone + Send + Sync;

    /// Plural label of the children, e.g. `"products"`.
    const CHILDREN_LABEL: &'static str;
    const SYNC_PROCEDURE: &'static str;
    const PARENT_PARAM: &'static str;
    const CREATE_PARAM: &'static str;
    const UPDATE_PARAM: &'static str;
    const DELETE_PARAM: &'static str;

    /// Local checks on a child before it is sent.
    fn validate_child(_child: &Self::Child) -> CoreResult<()> {
        Ok(())
    }
}

/// An aggregate with a backend archive/unarchive cascade.
pub trait Archivable: Aggregate {
    const ARCHIVE_PROCEDURE: &'static str;
    const UNARCHIVE_PROCEDURE: &'static str;
    /// Parameter carrying the aggregate id.
    const ARCHIVE_ID_PARAM: &'static str;
}

/// An aggregate soft-deleted through procedures rather than plain updates.
pub trait SoftDeletable: Aggregate {
    const PLURAL_LABEL: &'static str;
    const SOFT_DELETE_PROCEDURE: &'static str;
    const SOFT_DELETE_MANY_PROCEDURE: &'static str;
    const SOFT_DELETE_ID_PARAM: &'static str;
    const SOFT_DELETE_IDS_PARAM: &'static str;
}

/// A pure many-to-many relation addressed by [`CompositeKey`].
pub trait Junction {
    const RESOURCE: &'static str;
    /// Label of the owning side, e.g. `"product"`.
    const OWNER_LABEL: &'static str;
    /// Plural label of the related side, e.g. `"distributors"`.
    const RELATED_LABEL: &'static str;
    const OWNER_FIELD: &'static str;
    const RELATED_FIELD: &'static str;
    /// Whether new rows carry `status` and `valid_from` columns.
    const TRACKS_VALIDITY: bool = false;

    /// Per-relation attributes stored on the junction row.
    type Attributes: Serialize + DeserializeOwned + Clone + Default + PartialEq + Send + Sync;
}

/// A desired relation: the related id plus its attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationLink<A> {
    pub related_id: i64,
    #[serde(flatten)]
    pub attributes: A,
}

impl<A> RelationLink<A> {
    pub const fn new(related_id: i64, attributes: A) -> Self {
        Self {
            related_id,
            attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifier_serializes_untagged() {
        assert_eq!(serde_json::to_value(Identifier::Int(7)).unwrap(), json!(7));
        assert_eq!(
            serde_json::to_value(Identifier::from("uuid-123")).unwrap(),
            json!("uuid-123")
        );
    }

    #[test]
    fn test_identifier_from_composite_key() {
        let id = Identifier::from(CompositeKey::new(3, 9));
        assert_eq!(id, Identifier::Text("3-9".to_string()));
        assert_eq!(id.to_string(), "3-9");
    }
}
