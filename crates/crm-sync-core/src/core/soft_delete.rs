//! Soft delete service — mark aggregates deleted through backend procedures.
//!
//! Ids arrive from loosely typed callers, so every id is checked to be a
//! positive integer before anything is sent. A batch with one bad id is
//! rejected as a whole.

use std::marker::PhantomData;

use serde_json::{Map, Value};

use crate::model::{Identifier, SoftDeletable};

use super::{remote_failure, CoreContext, CoreError, CoreResult};

/// Check that `value` is a positive integer id.
///
/// Accepts JSON integers, integral floats (`3.0`) and decimal strings of
/// either, surrounding whitespace ignored. Rejects zero, negatives,
/// fractions and anything non-numeric.
pub fn validate_entity_id(entity: &str, value: &Value) -> CoreResult<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    };
    parsed.filter(|id| *id > 0).ok_or_else(|| CoreError::InvalidEntityId {
        entity: entity.to_string(),
        value: match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    })
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn integral(value: f64) -> Option<i64> {
    let in_range = value.is_finite() && value.abs() < 9_007_199_254_740_992.0;
    (in_range && value.fract() == 0.0).then_some(value as i64)
}

/// Service for soft deletes.
pub struct SoftDeleteService<'a, A> {
    ctx: &'a CoreContext,
    _aggregate: PhantomData<fn() -> A>,
}

impl<'a, A: SoftDeletable> SoftDeleteService<'a, A> {
    pub(crate) const fn new(ctx: &'a CoreContext) -> Self {
        Self {
            ctx,
            _aggregate: PhantomData,
        }
    }

    /// Soft delete one record.
    pub async fn soft_delete(&self, id: impl Into<Value>) -> CoreResult<()> {
        let id = validate_entity_id(A::LABEL, &id.into())?;
        let operation = format!("Soft delete {}", A::LABEL);
        tracing::debug!(resource = A::RESOURCE, id, "soft deleting");

        let mut params = Map::new();
        params.insert(A::SOFT_DELETE_ID_PARAM.to_string(), Value::from(id));
        self.ctx
            .remote()
            .call_procedure(A::SOFT_DELETE_PROCEDURE, Value::Object(params))
            .await
            .map_err(|e| remote_failure(&operation, Some(&Identifier::Int(id)), e))?;

        tracing::info!(resource = A::RESOURCE, id, "soft deleted");
        Ok(())
    }

    /// Soft delete several records in one call.
    ///
    /// Every id is validated first; an empty batch is a no-op.
    #[tracing::instrument(skip_all, fields(resource = A::RESOURCE, ids = tracing::field::Empty))]
    pub async fn soft_delete_many<I>(&self, ids: I) -> CoreResult<()>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let ids = ids
            .into_iter()
            .map(|id| validate_entity_id(A::LABEL, &id.into()))
            .collect::<CoreResult<Vec<_>>>()?;
        if ids.is_empty() {
            tracing::debug!("nothing to soft delete");
            return Ok(());
        }
        tracing::Span::current().record("ids", tracing::field::debug(&ids));

        let operation = format!("Soft delete {}", A::PLURAL_LABEL);
        tracing::debug!(count = ids.len(), "soft deleting batch");

        let count = ids.len();
        let mut params = Map::new();
        params.insert(A::SOFT_DELETE_IDS_PARAM.to_string(), Value::from(ids));
        self.ctx
            .remote()
            .call_procedure(A::SOFT_DELETE_MANY_PROCEDURE, Value::Object(params))
            .await
            .map_err(|e| remote_failure(&operation, None, e))?;

        tracing::info!(count, "soft deleted batch");
        Ok(())
    }
}
