//! Opportunities, their product line items, and their contact links.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{Aggregate, Archivable, Identifier, Junction, SyncAggregate};
use crate::core::{CoreError, CoreResult};
use crate::diff::{text_eq, ChildRecord, TextCompare};

/// Longest line-item note the store accepts.
pub const MAX_NOTES_LEN: usize = 2000;

/// An opportunity as read from the summary view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Identifier,
    pub name: String,
    #[serde(default)]
    pub customer_organization_id: Option<i64>,
    #[serde(default)]
    pub principal_organization_id: Option<i64>,
    #[serde(default)]
    pub distributor_organization_id: Option<i64>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub estimated_close_date: Option<NaiveDate>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub deleted_at: Option<String>,

    // View columns
    #[serde(default)]
    pub customer_organization_name: Option<String>,
    #[serde(default)]
    pub principal_organization_name: Option<String>,
    #[serde(default)]
    pub days_in_stage: Option<i64>,
    #[serde(default)]
    pub pending_task_count: Option<i64>,
    #[serde(default)]
    pub products: Vec<OpportunityProduct>,
}

/// Writable opportunity columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpportunityFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_organization_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_organization_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributor_organization_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_close_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_ids: Option<Vec<i64>>,
}

impl Aggregate for Opportunity {
    const RESOURCE: &'static str = "opportunities";
    const LABEL: &'static str = "opportunity";
    const COMPUTED_FIELDS: &'static [&'static str] = &[
        "id",
        "version",
        "created_at",
        "updated_at",
        "deleted_at",
        "search_tsv",
        "customer_organization_name",
        "principal_organization_name",
        "distributor_organization_name",
        "days_in_stage",
        "last_activity_date",
        "days_since_last_activity",
        "pending_task_count",
        "overdue_task_count",
        "next_task_id",
        "next_task_title",
        "next_task_due_date",
        "next_task_priority",
        "products",
        "products_to_sync",
    ];

    type Fields = OpportunityFields;
}

impl SyncAggregate for Opportunity {
    type Child = OpportunityProduct;

    const CHILDREN_LABEL: &'static str = "products";
    const SYNC_PROCEDURE: &'static str = "sync_opportunity_with_products";
    const PARENT_PARAM: &'static str = "opportunity_data";
    const CREATE_PARAM: &'static str = "products_to_create";
    const UPDATE_PARAM: &'static str = "products_to_update";
    const DELETE_PARAM: &'static str = "product_ids_to_delete";

    fn validate_child(child: &OpportunityProduct) -> CoreResult<()> {
        if child.product_id_reference <= 0 {
            return Err(CoreError::Validation {
                field: "product_id_reference".to_string(),
                message: format!(
                    "Product ID must be a positive integer, got {}",
                    child.product_id_reference
                ),
            });
        }
        if let Some(notes) = &child.notes {
            if notes.chars().count() > MAX_NOTES_LEN {
                return Err(CoreError::Validation {
                    field: "notes".to_string(),
                    message: format!("Notes too long (max {MAX_NOTES_LEN} characters)"),
                });
            }
        }
        Ok(())
    }
}

impl Archivable for Opportunity {
    const ARCHIVE_PROCEDURE: &'static str = "archive_opportunity_with_relations";
    const UNARCHIVE_PROCEDURE: &'static str = "unarchive_opportunity_with_relations";
    const ARCHIVE_ID_PARAM: &'static str = "opp_id";
}

/// A product line item on an opportunity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityProduct {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub product_id_reference: i64,
    #[serde(default)]
    pub notes: Option<String>,
    /// Denormalized for display; never written.
    #[serde(default, skip_serializing)]
    pub product_name: Option<String>,
}

impl OpportunityProduct {
    /// A line item that has not been saved yet.
    #[must_use]
    pub fn new(product_id_reference: i64, notes: Option<&str>) -> Self {
        Self {
            id: None,
            product_id_reference,
            notes: notes.map(String::from),
            product_name: None,
        }
    }

    #[must_use]
    pub const fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }
}

impl ChildRecord for OpportunityProduct {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn same_content(&self, other: &Self) -> bool {
        self.product_id_reference == other.product_id_reference
            && text_eq(
                self.notes.as_deref(),
                other.notes.as_deref(),
                TextCompare::Trimmed,
            )
    }
}

/// Contact on an opportunity.
pub struct OpportunityContact;

/// Attributes of an opportunity contact link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRole {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

impl Junction for OpportunityContact {
    const RESOURCE: &'static str = "opportunity_contacts";
    const OWNER_LABEL: &'static str = "opportunity";
    const RELATED_LABEL: &'static str = "contacts";
    const OWNER_FIELD: &'static str = "opportunity_id";
    const RELATED_FIELD: &'static str = "contact_id";

    type Attributes = ContactRole;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_line_item_notes_compare_trimmed() {
        let a = OpportunityProduct::new(10, Some("a")).with_id(1);
        let b = OpportunityProduct::new(10, Some("a ")).with_id(1);
        assert!(a.same_content(&b));
    }

    #[test]
    fn test_line_item_product_name_is_display_only() {
        let mut a = OpportunityProduct::new(10, None).with_id(1);
        let b = a.clone();
        a.product_name = Some("Frozen peas".to_string());
        assert!(a.same_content(&b));

        let written = serde_json::to_value(&a).unwrap();
        assert_eq!(
            written,
            json!({"id": 1, "product_id_reference": 10, "notes": null})
        );
    }

    #[test]
    fn test_validate_child_rejects_non_positive_reference() {
        let err = Opportunity::validate_child(&OpportunityProduct::new(0, None)).unwrap_err();
        assert!(err.to_string().contains("positive integer"));
    }

    #[test]
    fn test_validate_child_rejects_long_notes() {
        let notes = "x".repeat(MAX_NOTES_LEN + 1);
        assert!(Opportunity::validate_child(&OpportunityProduct::new(1, Some(&notes))).is_err());
        let notes = "x".repeat(MAX_NOTES_LEN);
        assert!(Opportunity::validate_child(&OpportunityProduct::new(1, Some(&notes))).is_ok());
    }

    #[test]
    fn test_fields_from_payload_drops_view_columns() {
        let payload = json!({
            "name": "Q3 pilot",
            "stage": "new_lead",
            "estimated_close_date": "2025-12-31",
            "customer_organization_name": "Acme",
            "days_in_stage": 4,
            "products": [],
        });
        let serde_json::Value::Object(payload) = payload else {
            unreachable!()
        };

        let fields = Opportunity::fields_from_payload(&payload).unwrap();
        assert_eq!(fields.name.as_deref(), Some("Q3 pilot"));
        assert_eq!(
            fields.estimated_close_date,
            NaiveDate::from_ymd_opt(2025, 12, 31)
        );
        assert_eq!(
            serde_json::to_value(&fields).unwrap(),
            json!({"name": "Q3 pilot", "stage": "new_lead", "estimated_close_date": "2025-12-31"})
        );
    }

    #[test]
    fn test_record_reads_view_columns() {
        let record: Opportunity = serde_json::from_value(json!({
            "id": 1,
            "name": "Deal",
            "customer_organization_name": "Acme",
            "products": [{"id": 5, "product_id_reference": 10, "product_name": "Peas"}],
        }))
        .unwrap();
        assert_eq!(record.id, Identifier::Int(1));
        assert_eq!(record.products[0].product_name.as_deref(), Some("Peas"));
    }
}
