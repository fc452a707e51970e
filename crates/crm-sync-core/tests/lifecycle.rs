//! Integration tests driving whole aggregate lifecycles through the public API.
//!
//! The store is the in-memory boundary, so every test can inspect exactly
//! which calls were made and in what order.

use std::sync::Arc;

use serde_json::{json, Value};

use crm_sync_core::config::{ConcurrencyPolicy, SyncConfig};
use crm_sync_core::core::{CoreContext, CoreError};
use crm_sync_core::model::{
    Aggregate, DistributorTerms, Identifier, Opportunity, OpportunityProduct, Product,
    ProductFields, RelationLink,
};
use crm_sync_core::remote::memory::{CallKind, InMemoryRemote, RemoteCall};
use crm_sync_core::remote::RemoteError;

fn context(remote: &Arc<InMemoryRemote>, config: SyncConfig) -> CoreContext {
    CoreContext::new(remote.clone(), config)
}

fn object(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// Form payload in, line items diffed, archived and restored.
#[tokio::test]
async fn test_opportunity_lifecycle() {
    let remote = Arc::new(InMemoryRemote::new());
    let ctx = context(&remote, SyncConfig::default());
    let services = ctx.services();

    // Create: the form hands back view columns, which must not be written.
    let form = object(json!({
        "name": "Q3 pilot",
        "stage": "new_lead",
        "customer_organization_name": "Acme",
        "pending_task_count": 2,
        "products": [],
    }));
    let fields = Opportunity::fields_from_payload(&form).unwrap();
    // Responses are served in order, the last one repeating.
    remote
        .script_procedure(
            "sync_opportunity_with_products",
            json!({"data": {"id": 10, "name": "Q3 pilot", "version": 1}}),
        )
        .unwrap();
    remote
        .script_procedure(
            "sync_opportunity_with_products",
            json!({"id": 10, "name": "Q3 pilot", "version": 2}),
        )
        .unwrap();
    let created = services
        .opportunities()
        .create_with_children(
            &fields,
            &[
                OpportunityProduct::new(100, Some("samples")),
                OpportunityProduct::new(200, None),
            ],
        )
        .await
        .unwrap();
    assert_eq!(created.id, Identifier::Int(10));

    // Update: one line item edited, one removed, one added.
    let current = vec![
        OpportunityProduct::new(100, Some("samples")).with_id(1),
        OpportunityProduct::new(200, None).with_id(2),
    ];
    let desired = vec![
        OpportunityProduct::new(100, Some("samples, then order")).with_id(1),
        OpportunityProduct::new(300, None),
    ];
    let updated = services
        .opportunities()
        .update_with_children(
            &created.id,
            &fields,
            Some(desired.as_slice()),
            &current,
            created.version,
        )
        .await
        .unwrap();
    assert_eq!(updated.version, Some(2));

    // Archive, archive again, restore.
    remote
        .script_procedure(
            "archive_opportunity_with_relations",
            json!({"success": true, "archived_count": 1,
                   "related_records": {"activities": 2, "notes": 1, "participants": 0, "tasks": 3}}),
        )
        .unwrap();
    remote
        .script_procedure(
            "archive_opportunity_with_relations",
            json!({"success": true, "archived_count": 0}),
        )
        .unwrap();
    let archival = services.archival::<Opportunity>();
    let first = archival.archive(&created.id).await.unwrap();
    assert_eq!(first.related.map(|r| r.total()), Some(6));
    assert!(archival.archive(&created.id).await.unwrap().is_noop());
    // The restore procedure returns nothing, so no counts are known.
    let restored = archival.unarchive(&created.id).await.unwrap();
    assert!(restored.success);
    assert_eq!(restored.affected, None);

    let procedures: Vec<(String, Value)> = remote
        .calls()
        .unwrap()
        .into_iter()
        .filter_map(|call| match call {
            RemoteCall::Procedure { name, params } => Some((name, params)),
            _ => None,
        })
        .collect();
    assert_eq!(procedures.len(), 5);

    let (_, create_params) = &procedures[0];
    assert_eq!(
        create_params["opportunity_data"],
        json!({"name": "Q3 pilot", "stage": "new_lead"})
    );

    let (_, update_params) = &procedures[1];
    assert_eq!(
        update_params["products_to_create"],
        json!([{"product_id_reference": 300, "notes": null}])
    );
    assert_eq!(
        update_params["products_to_update"],
        json!([{"id": 1, "product_id_reference": 100, "notes": "samples, then order"}])
    );
    assert_eq!(update_params["product_ids_to_delete"], json!([2]));
    assert_eq!(update_params["expected_version"], json!(1));

    assert_eq!(procedures[4].0, "unarchive_opportunity_with_relations");
    assert_eq!(procedures[4].1, json!({"opp_id": 10}));
}

/// Stale versions surface as a wrapped conflict on the plain update path.
#[tokio::test]
async fn test_opportunity_stale_update() {
    let remote = Arc::new(InMemoryRemote::new());
    remote
        .seed("opportunities", vec![json!({"id": 4, "name": "Deal", "version": 7})])
        .unwrap();
    let config = SyncConfig::default().with_policy("opportunities", ConcurrencyPolicy::Enforced);
    let ctx = context(&remote, config);
    let services = ctx.services();
    let fields = Opportunity::fields_from_payload(&object(json!({"name": "Renamed"}))).unwrap();

    let err = services
        .opportunities()
        .update_with_children(&Identifier::Int(4), &fields, None, &[], Some(6))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::Remote {
            source: RemoteError::Conflict(_),
            ..
        }
    ));
    assert!(err.to_string().starts_with("Update opportunity with products failed:"));
    assert_eq!(remote.rows("opportunities").unwrap()[0]["name"], json!("Deal"));
}

/// Product created with distributors, relinked, read back and soft deleted.
#[tokio::test]
async fn test_product_lifecycle() {
    let remote = Arc::new(
        InMemoryRemote::new().with_junction("product_distributors", "product_id", "distributor_id"),
    );
    let ctx = context(&remote, SyncConfig::default());
    let services = ctx.services();
    let products = services.products();

    let fields = ProductFields {
        name: Some("Frozen peas".to_string()),
        principal_id: Some(4),
        ..ProductFields::default()
    };
    let created = products
        .create_with_distributors(
            &fields,
            &[
                RelationLink::new(20, DistributorTerms::vendor_item("SY-20")),
                RelationLink::new(21, DistributorTerms::default()),
            ],
        )
        .await
        .unwrap();
    let Identifier::Int(product_id) = created.product.id else {
        panic!("expected numeric id, got {}", created.product.id);
    };

    let updated = products
        .update_with_distributors(
            product_id,
            &ProductFields::default(),
            Some(&[RelationLink::new(21, DistributorTerms::vendor_item("GF-21"))]),
        )
        .await
        .unwrap();
    assert_eq!(updated.distributor_ids, vec![21]);

    let read = products.get_with_distributors(product_id).await.unwrap();
    assert_eq!(read.distributor_ids, vec![21]);
    assert_eq!(
        read.product_distributors[&21],
        DistributorTerms::vendor_item("GF-21")
    );

    let links = services
        .relations::<crm_sync_core::model::ProductDistributor>()
        .list(product_id)
        .await
        .unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].key.to_string(), format!("{product_id}-21"));

    services
        .soft_delete::<Product>()
        .soft_delete(product_id)
        .await
        .unwrap();
    let last = remote.calls().unwrap().pop().unwrap();
    assert_eq!(
        last,
        RemoteCall::Procedure {
            name: "soft_delete_product".to_string(),
            params: json!({"product_id": product_id}),
        }
    );
    assert_eq!(Product::RESOURCE, "products");
}

/// Invalid ids never reach the store, whatever else the batch holds.
#[tokio::test]
async fn test_soft_delete_batch_validation() {
    let remote = Arc::new(InMemoryRemote::new());
    let ctx = context(&remote, SyncConfig::default());
    let services = ctx.services();

    let err = services
        .soft_delete::<Product>()
        .soft_delete_many([json!(1), json!("2"), json!(3.5)])
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Invalid product ID: 3.5");
    assert_eq!(remote.count(CallKind::Procedure).unwrap(), 0);
}

/// Orchestrators share nothing but the boundary, so independent requests
/// can run side by side.
#[tokio::test]
async fn test_concurrent_archives_are_independent() {
    let remote = Arc::new(InMemoryRemote::new());
    remote
        .script_procedure(
            "archive_opportunity_with_relations",
            json!({"success": true, "archived_count": 1}),
        )
        .unwrap();
    let ctx = context(&remote, SyncConfig::default());

    let handles: Vec<_> = (1..=4)
        .map(|id| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                ctx.services()
                    .archival::<Opportunity>()
                    .archive(&Identifier::Int(id))
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().affected, Some(1));
    }

    let mut ids: Vec<Value> = remote
        .calls()
        .unwrap()
        .into_iter()
        .filter_map(|call| match call {
            RemoteCall::Procedure { params, .. } => Some(params["opp_id"].clone()),
            _ => None,
        })
        .collect();
    ids.sort_by_key(|id| id.as_i64());
    assert_eq!(ids, vec![json!(1), json!(2), json!(3), json!(4)]);
}
