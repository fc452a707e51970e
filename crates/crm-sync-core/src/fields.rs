//! Pre-write guards for aggregate payloads.
//!
//! Records read back from summary views carry computed columns (organization
//! names, task counts, ...) that the store rejects on write. Raw input is
//! stripped of those and then projected onto the aggregate's editable-field
//! struct, which is the only thing ever serialized into a write.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::{CoreError, CoreResult};

/// Copy `payload` without the `denied` keys. The input is left untouched.
#[must_use]
pub fn strip_computed_fields(payload: &Map<String, Value>, denied: &[&str]) -> Map<String, Value> {
    payload
        .iter()
        .filter(|(key, _)| !denied.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Project a raw payload onto the editable-field struct `F`.
///
/// Computed fields are dropped silently. Any other field `F` does not declare
/// is rejected, so `F` should be `#[serde(deny_unknown_fields)]`.
pub fn project<F: DeserializeOwned>(
    payload: &Map<String, Value>,
    computed: &[&str],
) -> CoreResult<F> {
    let cleaned = strip_computed_fields(payload, computed);
    serde_json::from_value(Value::Object(cleaned)).map_err(|e| CoreError::Validation {
        field: "payload".to_string(),
        message: e.to_string(),
    })
}

/// Serialize editable fields into the object sent to the store.
pub(crate) fn to_write_map<F: Serialize>(fields: &F) -> CoreResult<Map<String, Value>> {
    match serde_json::to_value(fields).map_err(|e| CoreError::Internal(e.into()))? {
        Value::Object(map) => Ok(map),
        other => Err(CoreError::Validation {
            field: "payload".to_string(),
            message: format!("editable fields must serialize to an object, got {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Editable {
        name: String,
        #[serde(default)]
        priority: Option<String>,
    }

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_strip_does_not_mutate_input() {
        let payload = as_map(json!({"id": 1, "computedField": "x"}));
        let cleaned = strip_computed_fields(&payload, &["computedField"]);

        assert_eq!(Value::Object(cleaned), json!({"id": 1}));
        assert_eq!(payload.get("computedField"), Some(&json!("x")));
    }

    #[test]
    fn test_strip_without_denied_fields_is_a_copy() {
        let payload = as_map(json!({"id": 1, "name": "n"}));
        let cleaned = strip_computed_fields(&payload, &["days_in_stage"]);
        assert_eq!(cleaned, payload);
    }

    #[test]
    fn test_project_drops_computed_fields() {
        let payload = as_map(json!({
            "name": "Deal",
            "priority": "high",
            "customer_organization_name": "Acme",
        }));
        let fields: Editable = project(&payload, &["customer_organization_name"]).unwrap();
        assert_eq!(
            fields,
            Editable {
                name: "Deal".to_string(),
                priority: Some("high".to_string()),
            }
        );
    }

    #[test]
    fn test_project_rejects_unknown_fields() {
        let payload = as_map(json!({"name": "Deal", "nmae": "typo"}));
        let err = project::<Editable>(&payload, &[]).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert!(err.to_string().contains("nmae"));
    }

    #[test]
    fn test_to_write_map_serializes_only_declared_fields() {
        let map = to_write_map(&Editable {
            name: "Deal".to_string(),
            priority: None,
        })
        .unwrap();
        assert_eq!(Value::Object(map), json!({"name": "Deal", "priority": null}));
    }
}
