//! Product service — products together with their distributor links.
//!
//! The product row is written first and the distributor junction rows after
//! it. There is no procedure spanning both, so a failure on the junction side
//! leaves the product written and is reported as partial.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::fields::to_write_map;
use crate::model::{
    Aggregate, DistributorTerms, Identifier, Product, ProductDistributor, ProductFields,
    RelationLink,
};
use crate::remote::ListQuery;

use super::relations::{check_distinct, RelationService, SyncedRelations};
use super::{read_record, remote_failure, CoreContext, CoreError, CoreResult};

/// Distributor links as handed to the service.
pub type DistributorLink = RelationLink<DistributorTerms>;

/// A product plus the distributors carrying it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductWithDistributors {
    #[serde(flatten)]
    pub product: Product,
    pub distributor_ids: Vec<i64>,
    pub product_distributors: BTreeMap<i64, DistributorTerms>,
}

impl ProductWithDistributors {
    fn new(product: Product, relations: SyncedRelations<DistributorTerms>) -> Self {
        Self {
            product,
            distributor_ids: relations.related_ids,
            product_distributors: relations.attributes,
        }
    }
}

/// Service for products with distributors.
pub struct ProductService<'a> {
    ctx: &'a CoreContext,
}

impl<'a> ProductService<'a> {
    pub(crate) const fn new(ctx: &'a CoreContext) -> Self {
        Self { ctx }
    }

    const fn relations(&self) -> RelationService<'a, ProductDistributor> {
        RelationService::new(self.ctx)
    }

    /// Create a product, then link each distributor.
    #[tracing::instrument(skip_all, fields(distributors = distributors.len()))]
    pub async fn create_with_distributors(
        &self,
        fields: &ProductFields,
        distributors: &[DistributorLink],
    ) -> CoreResult<ProductWithDistributors> {
        let operation = "Create product with distributors";
        check_distinct::<ProductDistributor>(distributors)?;

        let record = self
            .ctx
            .remote()
            .create(Product::RESOURCE, Value::Object(to_write_map(fields)?))
            .await
            .map_err(|e| remote_failure(operation, None, e))?;
        let product: Product = read_record(operation, record)?;
        let product_id = numeric_id(operation, &product.id)?;
        tracing::debug!(product_id, "product created");

        if distributors.is_empty() {
            return Ok(ProductWithDistributors::new(product, SyncedRelations::default()));
        }

        let relations = self
            .relations()
            .create_all(product_id, distributors)
            .await
            .map_err(|f| f.into_error::<ProductDistributor>(operation, product_id, true))?;
        tracing::info!(product_id, distributors = distributors.len(), "created product with distributors");
        Ok(ProductWithDistributors::new(product, relations))
    }

    /// Update a product and, when `distributors` is given, replace its links.
    ///
    /// With `None` the links are left alone and read back for the result. If
    /// that read fails the error is [`CoreError::WriteUnconfirmed`], since the
    /// product row is already updated.
    #[tracing::instrument(skip_all, fields(product_id = id, distributors = distributors.map(|d| d.len())))]
    pub async fn update_with_distributors(
        &self,
        id: i64,
        fields: &ProductFields,
        distributors: Option<&[DistributorLink]>,
    ) -> CoreResult<ProductWithDistributors> {
        let operation = "Update product with distributors";
        if let Some(distributors) = distributors {
            check_distinct::<ProductDistributor>(distributors)?;
        }

        let identifier = Identifier::Int(id);
        let previous = serde_json::json!({ "id": id });
        let record = self
            .ctx
            .remote()
            .update(
                Product::RESOURCE,
                &identifier,
                Value::Object(to_write_map(fields)?),
                Some(&previous),
            )
            .await
            .map_err(|e| remote_failure(operation, Some(&identifier), e))?;
        let product: Product = read_record(operation, record)?;

        let relations = match distributors {
            Some(distributors) => self
                .relations()
                .apply(operation, id, distributors)
                .await
                .map_err(|f| f.into_error::<ProductDistributor>(operation, id, true))?,
            None => self
                .current_relations(operation, id)
                .await
                .map_err(|source| CoreError::WriteUnconfirmed {
                    entity: Product::LABEL,
                    id: id.to_string(),
                    source: Box::new(source),
                })?,
        };
        Ok(ProductWithDistributors::new(product, relations))
    }

    /// Read a product and its distributor links.
    #[tracing::instrument(skip_all, fields(product_id = id))]
    pub async fn get_with_distributors(&self, id: i64) -> CoreResult<ProductWithDistributors> {
        let operation = "Get product with distributors";
        let identifier = Identifier::Int(id);

        let query = ListQuery::filtered("id", Value::from(id), "id", 1);
        let page = self
            .ctx
            .remote()
            .list(Product::RESOURCE, &query)
            .await
            .map_err(|e| remote_failure(operation, Some(&identifier), e))?;
        let product: Product = match page.data.into_iter().next() {
            Some(record) => read_record(operation, record)?,
            None => return Err(not_found(id)),
        };
        if product.deleted_at.is_some() {
            return Err(not_found(id));
        }

        let relations = self.current_relations(operation, id).await?;
        Ok(ProductWithDistributors::new(product, relations))
    }

    async fn current_relations(
        &self,
        operation: &str,
        id: i64,
    ) -> CoreResult<SyncedRelations<DistributorTerms>> {
        let rows = self.relations().fetch(operation, id).await?;
        let mut relations = SyncedRelations::default();
        for row in rows {
            relations.related_ids.push(row.key.related_id);
            relations.attributes.insert(row.key.related_id, row.attributes);
        }
        Ok(relations)
    }
}

fn not_found(id: i64) -> CoreError {
    CoreError::NotFound {
        entity: Product::LABEL.to_string(),
        id: id.to_string(),
    }
}

fn numeric_id(operation: &str, id: &Identifier) -> CoreResult<i64> {
    match id {
        Identifier::Int(id) => Ok(*id),
        Identifier::Text(text) => text.parse().map_err(|_| CoreError::MalformedResponse {
            operation: operation.to_string(),
            detail: format!("product id {text} is not numeric"),
        }),
    }
}
