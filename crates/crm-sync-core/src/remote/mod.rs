//! The remote call boundary.
//!
//! Every orchestrator reaches the backing store through [`RemoteBoundary`]:
//! plain resource CRUD plus named procedures for multi-record atomic writes.
//! The concrete transport lives outside this crate; [`memory::InMemoryRemote`]
//! is an in-process implementation for tests and local development.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::Identifier;

/// Result type alias for boundary calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failure reported by the backing store or the transport.
///
/// Every variant except [`RemoteError::Unknown`] displays the original
/// message unchanged, since callers embed it in user-facing text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Constraint violation (foreign key, unique, check).
    #[error("{0}")]
    Constraint(String),

    /// Row-level security or permission rejection.
    #[error("{0}")]
    Unauthorized(String),

    /// Stale write rejected by a version check.
    #[error("{0}")]
    Conflict(String),

    /// Network failure or timeout.
    #[error("{0}")]
    Transport(String),

    /// Any other failure with a message.
    #[error("{0}")]
    Failed(String),

    /// The transport raised something that carried no message.
    #[error("Unknown error")]
    Unknown,
}

/// Sort direction for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Parameters of a `list` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListQuery {
    /// Equality filter, field name to value.
    pub filter: Map<String, Value>,
    /// 1-based page number.
    pub page: u32,
    pub per_page: u32,
    pub sort_field: String,
    pub sort_order: SortOrder,
}

impl ListQuery {
    /// First page of rows where `field == value`, ascending by `sort_field`.
    #[must_use]
    pub fn filtered(field: &str, value: Value, sort_field: &str, per_page: u32) -> Self {
        let mut filter = Map::new();
        filter.insert(field.to_string(), value);
        Self {
            filter,
            page: 1,
            per_page,
            sort_field: sort_field.to_string(),
            sort_order: SortOrder::Asc,
        }
    }

    /// The same query one page further.
    #[must_use]
    pub fn next_page(&self) -> Self {
        Self {
            page: self.page + 1,
            ..self.clone()
        }
    }
}

/// One page of a `list` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    pub data: Vec<Value>,
    /// Total number of matching rows across all pages.
    pub total: u64,
}

/// Transport to the backing store.
///
/// Implementations must be safe to share between concurrent requests.
/// `create`, `update` and `delete` return the affected record with the
/// `{ data: ... }` envelope already removed.
#[async_trait]
pub trait RemoteBoundary: Send + Sync {
    async fn create(&self, resource: &str, payload: Value) -> RemoteResult<Value>;

    async fn update(
        &self,
        resource: &str,
        id: &Identifier,
        payload: Value,
        previous: Option<&Value>,
    ) -> RemoteResult<Value>;

    async fn delete(
        &self,
        resource: &str,
        id: &Identifier,
        previous: Option<&Value>,
    ) -> RemoteResult<Value>;

    async fn list(&self, resource: &str, query: &ListQuery) -> RemoteResult<ListPage>;

    /// Invoke a named procedure. The response shape is procedure-specific.
    async fn call_procedure(&self, name: &str, params: Value) -> RemoteResult<Value>;
}

/// The two shapes a procedure may answer with when it returns a record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEnvelope {
    /// The record itself.
    Direct(Value),
    /// `{ "data": record }` where the record carries an `id`.
    Wrapped(Value),
}

impl RecordEnvelope {
    /// Decide which envelope `value` is.
    ///
    /// Only an object whose `data` member is itself an object with an `id`
    /// counts as wrapped. Everything else is passed through as direct.
    #[must_use]
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Object(mut outer) => match outer.remove("data") {
                Some(Value::Object(inner)) if inner.contains_key("id") => {
                    Self::Wrapped(Value::Object(inner))
                }
                Some(other) => {
                    outer.insert("data".to_string(), other);
                    Self::Direct(Value::Object(outer))
                }
                None => Self::Direct(Value::Object(outer)),
            },
            other => Self::Direct(other),
        }
    }

    /// The record, whichever envelope it came in.
    #[must_use]
    pub fn into_record(self) -> Value {
        match self {
            Self::Direct(record) | Self::Wrapped(record) => record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_direct_record() {
        let record = json!({"id": 1, "name": "Deal"});
        assert_eq!(
            RecordEnvelope::classify(record.clone()),
            RecordEnvelope::Direct(record)
        );
    }

    #[test]
    fn test_classify_wrapped_record() {
        let record = json!({"id": 1, "name": "Deal"});
        let envelope = RecordEnvelope::classify(json!({ "data": record.clone() }));
        assert_eq!(envelope, RecordEnvelope::Wrapped(record.clone()));
        assert_eq!(envelope.into_record(), record);
    }

    #[test]
    fn test_data_without_id_is_not_an_envelope() {
        let value = json!({"id": 4, "data": {"note": "a json column"}});
        assert_eq!(
            RecordEnvelope::classify(value.clone()),
            RecordEnvelope::Direct(value)
        );

        let value = json!({"data": [1, 2, 3]});
        assert_eq!(
            RecordEnvelope::classify(value.clone()).into_record(),
            value
        );
    }

    #[test]
    fn test_non_object_passes_through() {
        assert_eq!(
            RecordEnvelope::classify(Value::Null),
            RecordEnvelope::Direct(Value::Null)
        );
    }

    #[test]
    fn test_unknown_error_message() {
        assert_eq!(RemoteError::Unknown.to_string(), "Unknown error");
        assert_eq!(
            RemoteError::Constraint("violates foreign key constraint".to_string()).to_string(),
            "violates foreign key constraint"
        );
    }

    #[test]
    fn test_next_page() {
        let query = ListQuery::filtered("product_id", json!(3), "distributor_id", 100);
        let next = query.next_page();
        assert_eq!(next.page, 2);
        assert_eq!(next.filter, query.filter);
    }
}
