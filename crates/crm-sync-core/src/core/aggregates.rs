//! Aggregate sync service — create/update a parent together with its children.
//!
//! Child changes are applied by one store procedure so the parent and every
//! child create/update/delete commit or fail together. When there are no
//! children to touch, a plain parent write is used instead.

use std::marker::PhantomData;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::ConcurrencyPolicy;
use crate::diff::{diff, ChildDiff};
use crate::fields::to_write_map;
use crate::model::{Identifier, SyncAggregate};
use crate::remote::RecordEnvelope;

use super::{read_record, remote_failure, CoreContext, CoreError, CoreResult};

/// Service for aggregate-with-children writes.
pub struct AggregateSyncService<'a, A> {
    ctx: &'a CoreContext,
    _aggregate: PhantomData<fn() -> A>,
}

impl<'a, A: SyncAggregate> AggregateSyncService<'a, A> {
    pub(crate) const fn new(ctx: &'a CoreContext) -> Self {
        Self {
            ctx,
            _aggregate: PhantomData,
        }
    }

    fn create_operation() -> String {
        format!("Create {} with {}", A::LABEL, A::CHILDREN_LABEL)
    }

    fn update_operation() -> String {
        format!("Update {} with {}", A::LABEL, A::CHILDREN_LABEL)
    }

    /// Create a parent and its children.
    ///
    /// With no children this is a plain create; otherwise every child is sent
    /// as a create in one procedure call.
    #[tracing::instrument(skip_all, fields(resource = A::RESOURCE, children = desired.len()))]
    pub async fn create_with_children(
        &self,
        fields: &A::Fields,
        desired: &[A::Child],
    ) -> CoreResult<A> {
        let operation = Self::create_operation();
        let parent = to_write_map(fields)?;

        if desired.is_empty() {
            tracing::debug!("no children, using plain create");
            let record = self
                .ctx
                .remote()
                .create(A::RESOURCE, Value::Object(parent))
                .await
                .map_err(|e| remote_failure(&operation, None, e))?;
            return read_record(&operation, record);
        }

        let changes = ChildDiff {
            creates: desired.to_vec(),
            updates: Vec::new(),
            deletes: Vec::new(),
        };
        self.validate(&changes)?;

        tracing::info!(creates = changes.creates.len(), "creating via {}", A::SYNC_PROCEDURE);
        self.sync(&operation, None, parent, &changes, None).await
    }

    /// Update a parent and reconcile its children.
    ///
    /// `desired` distinguishes two callers: `None` means children are not part
    /// of this edit, `Some(&[])` means the edit carries an empty collection.
    /// Both do a plain parent update. Anything else is diffed against
    /// `current` and applied in one procedure call.
    #[tracing::instrument(
        skip_all,
        fields(resource = A::RESOURCE, id = %id, children = desired.map(|d| d.len()))
    )]
    pub async fn update_with_children(
        &self,
        id: &Identifier,
        fields: &A::Fields,
        desired: Option<&[A::Child]>,
        current: &[A::Child],
        expected_version: Option<i64>,
    ) -> CoreResult<A> {
        let operation = Self::update_operation();
        let version = self.version_to_send(expected_version)?;

        let mut parent = to_write_map(fields)?;
        parent.insert("id".to_string(), id.to_value());

        let desired = match desired {
            None => {
                tracing::debug!("children not supplied, using plain update");
                return self.plain_update(&operation, id, parent, version).await;
            }
            Some([]) => {
                tracing::debug!("empty children supplied, using plain update");
                return self.plain_update(&operation, id, parent, version).await;
            }
            Some(desired) => desired,
        };

        let changes = diff(current, desired);
        self.validate(&changes)?;

        tracing::info!(
            creates = changes.creates.len(),
            updates = changes.updates.len(),
            deletes = changes.deletes.len(),
            "syncing via {}",
            A::SYNC_PROCEDURE
        );
        self.sync(&operation, Some(id), parent, &changes, version)
            .await
    }

    /// Apply the concurrency policy to a caller-supplied version.
    fn version_to_send(&self, expected_version: Option<i64>) -> CoreResult<Option<i64>> {
        match (self.ctx.config().policy_for(A::RESOURCE), expected_version) {
            (ConcurrencyPolicy::Enforced, None) => Err(CoreError::Validation {
                field: "expected_version".to_string(),
                message: format!("{} updates require an expected version", A::LABEL),
            }),
            (ConcurrencyPolicy::Enforced | ConcurrencyPolicy::Advisory, version) => Ok(version),
            (ConcurrencyPolicy::Disabled, version) => {
                if version.is_some() {
                    tracing::debug!("concurrency checks disabled, dropping expected_version");
                }
                Ok(None)
            }
        }
    }

    fn validate(&self, changes: &ChildDiff<A::Child>) -> CoreResult<()> {
        let max = self.ctx.config().max_children_per_sync;
        for (param, len) in [
            (A::CREATE_PARAM, changes.creates.len()),
            (A::UPDATE_PARAM, changes.updates.len()),
            (A::DELETE_PARAM, changes.deletes.len()),
        ] {
            if len > max {
                return Err(CoreError::Validation {
                    field: param.to_string(),
                    message: format!("Maximum {max} {} per sync, got {len}", A::CHILDREN_LABEL),
                });
            }
        }
        changes
            .creates
            .iter()
            .chain(&changes.updates)
            .try_for_each(A::validate_child)
    }

    async fn plain_update(
        &self,
        operation: &str,
        id: &Identifier,
        parent: Map<String, Value>,
        version: Option<i64>,
    ) -> CoreResult<A> {
        let previous = version.map(|v| serde_json::json!({ "id": id.to_value(), "version": v }));
        let record = self
            .ctx
            .remote()
            .update(A::RESOURCE, id, Value::Object(parent), previous.as_ref())
            .await
            .map_err(|e| remote_failure(operation, Some(id), e))?;
        read_record(operation, record)
    }

    async fn sync(
        &self,
        operation: &str,
        id: Option<&Identifier>,
        parent: Map<String, Value>,
        changes: &ChildDiff<A::Child>,
        version: Option<i64>,
    ) -> CoreResult<A> {
        let mut params = Map::new();
        params.insert(A::PARENT_PARAM.to_string(), Value::Object(parent));
        params.insert(A::CREATE_PARAM.to_string(), json(&changes.creates)?);
        params.insert(A::UPDATE_PARAM.to_string(), json(&changes.updates)?);
        params.insert(A::DELETE_PARAM.to_string(), json(&changes.deletes)?);
        if let Some(version) = version {
            params.insert("expected_version".to_string(), Value::from(version));
        }

        let response = self
            .ctx
            .remote()
            .call_procedure(A::SYNC_PROCEDURE, Value::Object(params))
            .await
            .map_err(|e| remote_failure(operation, id, e))?;

        read_record(operation, RecordEnvelope::classify(response).into_record())
    }
}

fn json<T: Serialize + ?Sized>(value: &T) -> CoreResult<Value> {
    serde_json::to_value(value).map_err(|e| CoreError::Internal(e.into()))
}
