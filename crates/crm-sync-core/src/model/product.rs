//! Products and their distributor relationships.

use serde::{Deserialize, Serialize};

use super::{Aggregate, Identifier, Junction, SoftDeletable};

/// A product as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Identifier,
    pub name: String,
    #[serde(default)]
    pub principal_id: Option<i64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub pack_size: Option<String>,
    #[serde(default)]
    pub upc: Option<String>,
    #[serde(default)]
    pub gtin: Option<String>,
    #[serde(default)]
    pub storage_requirements: Option<String>,
    #[serde(default)]
    pub lead_time_days: Option<i64>,
    #[serde(default)]
    pub minimum_order_quantity: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deleted_at: Option<String>,

    // View column
    #[serde(default)]
    pub principal_name: Option<String>,
}

/// Writable product columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_requirements: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_time_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_order_quantity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl Aggregate for Product {
    const RESOURCE: &'static str = "products";
    const LABEL: &'static str = "product";
    const COMPUTED_FIELDS: &'static [&'static str] = &[
        "id",
        "created_at",
        "updated_at",
        "deleted_at",
        "principal_name",
        "distributor_ids",
        "product_distributors",
    ];

    type Fields = ProductFields;
}

impl SoftDeletable for Product {
    const PLURAL_LABEL: &'static str = "products";
    const SOFT_DELETE_PROCEDURE: &'static str = "soft_delete_product";
    const SOFT_DELETE_MANY_PROCEDURE: &'static str = "soft_delete_products";
    const SOFT_DELETE_ID_PARAM: &'static str = "product_id";
    const SOFT_DELETE_IDS_PARAM: &'static str = "product_ids";
}

/// Distributor carrying a product.
pub struct ProductDistributor;

/// Attributes of a product-distributor link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributorTerms {
    #[serde(default)]
    pub vendor_item_number: Option<String>,
}

impl DistributorTerms {
    #[must_use]
    pub fn vendor_item(number: &str) -> Self {
        Self {
            vendor_item_number: Some(number.to_string()),
        }
    }
}

impl Junction for ProductDistributor {
    const RESOURCE: &'static str = "product_distributors";
    const OWNER_LABEL: &'static str = "product";
    const RELATED_LABEL: &'static str = "distributors";
    const OWNER_FIELD: &'static str = "product_id";
    const RELATED_FIELD: &'static str = "distributor_id";
    const TRACKS_VALIDITY: bool = true;

    type Attributes = DistributorTerms;
}
