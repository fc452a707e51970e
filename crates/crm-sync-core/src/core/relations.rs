//! Relation service — junction rows addressed by composite key.
//!
//! Junctions have no sync procedure of their own. A replace deletes every
//! existing row for the owner and recreates the desired ones, one call at a
//! time and outside any transaction. A reader in between can see the owner
//! with no relations, and a failure midway leaves the set incomplete. Such
//! failures are reported as [`CoreError::PartialRelationSync`].

use std::collections::{BTreeMap, HashSet};
use std::marker::PhantomData;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::keys::CompositeKey;
use crate::model::{Identifier, Junction, RelationLink};
use crate::remote::{ListQuery, RemoteError};

use super::{read_record, remote_failure, CoreContext, CoreError, CoreResult, RelationStep};

/// A persisted junction row.
#[derive(Debug, Clone, PartialEq)]
pub struct JunctionRow<A> {
    pub key: CompositeKey,
    pub attributes: A,
    /// The row as the store returned it, sent back as `previous` on delete.
    pub raw: Value,
}

/// Relations of one owner after a replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncedRelations<A> {
    /// Related ids in the order they were supplied.
    pub related_ids: Vec<i64>,
    pub attributes: BTreeMap<i64, A>,
}

impl<A: Clone> SyncedRelations<A> {
    pub(crate) fn from_links(links: &[RelationLink<A>]) -> Self {
        Self {
            related_ids: links.iter().map(|l| l.related_id).collect(),
            attributes: links
                .iter()
                .map(|l| (l.related_id, l.attributes.clone()))
                .collect(),
        }
    }
}

impl<A> Default for SyncedRelations<A> {
    fn default() -> Self {
        Self {
            related_ids: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }
}

/// Each related id may appear once. The junction key would reject a repeat
/// only after earlier rows were already written.
pub(crate) fn check_distinct<J: Junction>(
    desired: &[RelationLink<J::Attributes>],
) -> CoreResult<()> {
    let mut seen = HashSet::new();
    match desired.iter().find(|link| !seen.insert(link.related_id)) {
        Some(repeat) => Err(CoreError::Validation {
            field: J::RELATED_LABEL.to_string(),
            message: format!("id {} listed more than once", repeat.related_id),
        }),
        None => Ok(()),
    }
}

/// Where a replace stopped.
#[derive(Debug)]
pub(crate) enum ReplaceFailure {
    /// Failed before any row was changed.
    Untouched(CoreError),
    /// A delete or create failed.
    Step {
        step: RelationStep,
        related_id: i64,
        deleted: usize,
        created: usize,
        source: RemoteError,
    },
}

impl ReplaceFailure {
    /// Turn the failure into the caller's error.
    ///
    /// A step failure is partial once anything was written, including an
    /// earlier parent write the caller made (`after_write`).
    pub(crate) fn into_error<J: Junction>(
        self,
        operation: &str,
        owner_id: i64,
        after_write: bool,
    ) -> CoreError {
        match self {
            Self::Untouched(err) => err,
            Self::Step {
                step,
                related_id,
                deleted,
                created,
                source,
            } => {
                if !after_write && deleted + created == 0 {
                    return remote_failure(operation, Some(&Identifier::Int(owner_id)), source);
                }
                tracing::error!(
                    operation,
                    owner_id,
                    related_id,
                    %step,
                    deleted,
                    created,
                    error = %source,
                    "relation sync left partially applied"
                );
                CoreError::PartialRelationSync {
                    operation: operation.to_string(),
                    owner_label: J::OWNER_LABEL,
                    owner_id,
                    related_label: J::RELATED_LABEL,
                    related_id,
                    step,
                    deleted,
                    created,
                    source,
                }
            }
        }
    }
}

/// Service for junction relations.
pub struct RelationService<'a, J> {
    ctx: &'a CoreContext,
    _junction: PhantomData<fn() -> J>,
}

impl<'a, J: Junction> RelationService<'a, J> {
    pub(crate) const fn new(ctx: &'a CoreContext) -> Self {
        Self {
            ctx,
            _junction: PhantomData,
        }
    }

    fn replace_operation() -> String {
        format!("Replace {} {}", J::OWNER_LABEL, J::RELATED_LABEL)
    }

    /// Every row of `owner_id`, ordered by related id.
    #[tracing::instrument(skip_all, fields(resource = J::RESOURCE, owner_id))]
    pub async fn list(&self, owner_id: i64) -> CoreResult<Vec<JunctionRow<J::Attributes>>> {
        let operation = format!("List {} {}", J::OWNER_LABEL, J::RELATED_LABEL);
        self.fetch(&operation, owner_id).await
    }

    pub(crate) async fn fetch(
        &self,
        operation: &str,
        owner_id: i64,
    ) -> CoreResult<Vec<JunctionRow<J::Attributes>>> {
        let per_page = self.ctx.config().relation_page_size.max(1);
        let mut query =
            ListQuery::filtered(J::OWNER_FIELD, Value::from(owner_id), J::RELATED_FIELD, per_page);
        let mut raw_rows = Vec::new();
        loop {
            let page = self
                .ctx
                .remote()
                .list(J::RESOURCE, &query)
                .await
                .map_err(|e| remote_failure(operation, Some(&Identifier::Int(owner_id)), e))?;
            let fetched = page.data.len();
            raw_rows.extend(page.data);
            if fetched == 0 || raw_rows.len() as u64 >= page.total {
                break;
            }
            query = query.next_page();
        }
        tracing::debug!(owner_id, rows = raw_rows.len(), pages = query.page, "fetched relations");

        raw_rows
            .into_iter()
            .map(|raw| Self::read_row(operation, raw))
            .collect()
    }

    fn read_row(operation: &str, raw: Value) -> CoreResult<JunctionRow<J::Attributes>> {
        let key = match raw.get("id") {
            Some(Value::String(id)) => CompositeKey::decode(id)?,
            _ => {
                let column = |field: &str| {
                    raw.get(field)
                        .and_then(Value::as_i64)
                        .ok_or_else(|| CoreError::MalformedResponse {
                            operation: operation.to_string(),
                            detail: format!("{} row without {field}", J::RESOURCE),
                        })
                };
                CompositeKey::new(column(J::OWNER_FIELD)?, column(J::RELATED_FIELD)?)
            }
        };
        let attributes = read_record(operation, raw.clone())?;
        Ok(JunctionRow {
            key,
            attributes,
            raw,
        })
    }

    fn row_payload(owner_id: i64, link: &RelationLink<J::Attributes>) -> CoreResult<Value> {
        let mut row = match serde_json::to_value(&link.attributes)
            .map_err(|e| CoreError::Internal(e.into()))?
        {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(CoreError::Internal(anyhow::anyhow!(
                    "{} attributes must serialize to an object, got {other}",
                    J::RESOURCE
                )));
            }
        };
        row.insert(J::OWNER_FIELD.to_string(), Value::from(owner_id));
        row.insert(J::RELATED_FIELD.to_string(), Value::from(link.related_id));
        if J::TRACKS_VALIDITY {
            row.insert("status".to_string(), Value::from("active"));
            row.insert(
                "valid_from".to_string(),
                Value::from(chrono::Utc::now().to_rfc3339()),
            );
        }
        Ok(Value::Object(row))
    }

    /// Create one relation. Returns its composite key.
    #[tracing::instrument(skip_all, fields(resource = J::RESOURCE, owner_id, related_id = link.related_id))]
    pub async fn link(
        &self,
        owner_id: i64,
        link: &RelationLink<J::Attributes>,
    ) -> CoreResult<CompositeKey> {
        let operation = format!("Link {} {}", J::OWNER_LABEL, J::RELATED_LABEL);
        let key = CompositeKey::new(owner_id, link.related_id);
        self.ctx
            .remote()
            .create(J::RESOURCE, Self::row_payload(owner_id, link)?)
            .await
            .map_err(|e| remote_failure(&operation, Some(&Identifier::from(key)), e))?;
        tracing::debug!(%key, "linked");
        Ok(key)
    }

    /// Hard delete one relation. Returns its composite key.
    #[tracing::instrument(skip_all, fields(resource = J::RESOURCE, owner_id, related_id))]
    pub async fn unlink(&self, owner_id: i64, related_id: i64) -> CoreResult<CompositeKey> {
        let operation = format!("Unlink {} {}", J::OWNER_LABEL, J::RELATED_LABEL);
        let key = CompositeKey::new(owner_id, related_id);
        let id = Identifier::from(key);
        self.ctx
            .remote()
            .delete(J::RESOURCE, &id, None)
            .await
            .map_err(|e| remote_failure(&operation, Some(&id), e))?;
        tracing::debug!(%key, "unlinked");
        Ok(key)
    }

    /// Replace the relations of `owner_id` with `desired`.
    ///
    /// `None` leaves the relations alone and makes no calls. `Some(&[])`
    /// removes every relation.
    #[tracing::instrument(skip_all, fields(resource = J::RESOURCE, owner_id, desired = desired.map(|d| d.len())))]
    pub async fn replace(
        &self,
        owner_id: i64,
        desired: Option<&[RelationLink<J::Attributes>]>,
    ) -> CoreResult<Option<SyncedRelations<J::Attributes>>> {
        let Some(desired) = desired else {
            tracing::debug!("relations not supplied, leaving them unchanged");
            return Ok(None);
        };
        let operation = Self::replace_operation();
        self.apply(&operation, owner_id, desired)
            .await
            .map(Some)
            .map_err(|failure| failure.into_error::<J>(&operation, owner_id, false))
    }

    /// Delete every existing row, then create the desired ones.
    pub(crate) async fn apply(
        &self,
        operation: &str,
        owner_id: i64,
        desired: &[RelationLink<J::Attributes>],
    ) -> Result<SyncedRelations<J::Attributes>, ReplaceFailure> {
        check_distinct::<J>(desired).map_err(ReplaceFailure::Untouched)?;
        let existing = self
            .fetch(operation, owner_id)
            .await
            .map_err(ReplaceFailure::Untouched)?;
        let payloads = desired
            .iter()
            .map(|link| Self::row_payload(owner_id, link))
            .collect::<CoreResult<Vec<_>>>()
            .map_err(ReplaceFailure::Untouched)?;

        let mut deleted = 0;
        for row in &existing {
            self.ctx
                .remote()
                .delete(J::RESOURCE, &Identifier::from(row.key), Some(&row.raw))
                .await
                .map_err(|source| ReplaceFailure::Step {
                    step: RelationStep::Delete,
                    related_id: row.key.related_id,
                    deleted,
                    created: 0,
                    source,
                })?;
            deleted += 1;
        }

        let created = self.create_rows(owner_id, desired, payloads, deleted).await?;
        tracing::info!(owner_id, deleted, created, "{operation} applied");
        Ok(SyncedRelations::from_links(desired))
    }

    /// Create rows for an owner known to have none.
    pub(crate) async fn create_all(
        &self,
        owner_id: i64,
        desired: &[RelationLink<J::Attributes>],
    ) -> Result<SyncedRelations<J::Attributes>, ReplaceFailure> {
        check_distinct::<J>(desired).map_err(ReplaceFailure::Untouched)?;
        let payloads = desired
            .iter()
            .map(|link| Self::row_payload(owner_id, link))
            .collect::<CoreResult<Vec<_>>>()
            .map_err(ReplaceFailure::Untouched)?;
        let created = self.create_rows(owner_id, desired, payloads, 0).await?;
        tracing::debug!(owner_id, created, "created relations");
        Ok(SyncedRelations::from_links(desired))
    }

    async fn create_rows(
        &self,
        owner_id: i64,
        desired: &[RelationLink<J::Attributes>],
        payloads: Vec<Value>,
        deleted: usize,
    ) -> Result<usize, ReplaceFailure> {
        let mut created = 0;
        for (link, payload) in desired.iter().zip(payloads) {
            self.ctx
                .remote()
                .create(J::RESOURCE, payload)
                .await
                .map_err(|source| ReplaceFailure::Step {
                    step: RelationStep::Create,
                    related_id: link.related_id,
                    deleted,
                    created,
                    source,
                })?;
            created += 1;
        }
        Ok(created)
    }
}
