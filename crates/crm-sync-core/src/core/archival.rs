//! Archival service — archive/unarchive an aggregate and its dependents.
//!
//! The cascade runs inside one backend procedure, so there is nothing to
//! compensate locally. Repeating either direction is safe. Procedures that
//! report counts answer a repeat with zero affected records; procedures that
//! return nothing leave the counts unknown.

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Archivable, Identifier};
use crate::remote::RemoteError;

use super::{read_record, remote_failure, CoreContext, CoreResult};

/// Dependent records touched by a cascade, per record family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedCounts {
    #[serde(default)]
    pub activities: u64,
    #[serde(default)]
    pub notes: u64,
    #[serde(default)]
    pub participants: u64,
    #[serde(default)]
    pub tasks: u64,
}

impl RelatedCounts {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.activities + self.notes + self.participants + self.tasks
    }
}

/// Outcome of an archive or unarchive cascade.
///
/// Counts are `None` when the procedure did not report them, which is the
/// case for procedures returning `void`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CascadeResult {
    pub success: bool,
    /// Parent records whose state changed. `Some(0)` when already in the
    /// target state.
    pub affected: Option<u64>,
    pub related: Option<RelatedCounts>,
}

impl CascadeResult {
    /// Applied, with no counts reported.
    #[must_use]
    pub const fn unreported() -> Self {
        Self {
            success: true,
            affected: None,
            related: None,
        }
    }

    /// Reported as already in the target state.
    #[must_use]
    pub const fn unchanged() -> Self {
        Self {
            success: true,
            affected: Some(0),
            related: None,
        }
    }

    /// Whether the procedure reported that nothing changed.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        matches!(self.affected, Some(0))
    }
}

/// What the cascade procedures answer with.
#[derive(Debug, Deserialize)]
struct CascadeResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default, alias = "archived_count", alias = "unarchived_count")]
    affected: Option<u64>,
    #[serde(default, rename = "related_records")]
    related: Option<RelatedCounts>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

const fn default_success() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Archive,
    Unarchive,
}

/// Service for archive cascades.
pub struct ArchivalService<'a, A> {
    ctx: &'a CoreContext,
    _aggregate: PhantomData<fn() -> A>,
}

impl<'a, A: Archivable> ArchivalService<'a, A> {
    pub(crate) const fn new(ctx: &'a CoreContext) -> Self {
        Self {
            ctx,
            _aggregate: PhantomData,
        }
    }

    /// Archive the aggregate and all of its dependent records.
    #[tracing::instrument(skip_all, fields(resource = A::RESOURCE, id = %id))]
    pub async fn archive(&self, id: &Identifier) -> CoreResult<CascadeResult> {
        self.cascade(Direction::Archive, id).await
    }

    /// Restore the aggregate and all of its dependent records.
    #[tracing::instrument(skip_all, fields(resource = A::RESOURCE, id = %id))]
    pub async fn unarchive(&self, id: &Identifier) -> CoreResult<CascadeResult> {
        self.cascade(Direction::Unarchive, id).await
    }

    async fn cascade(&self, direction: Direction, id: &Identifier) -> CoreResult<CascadeResult> {
        let (operation, procedure) = match direction {
            Direction::Archive => (format!("Archive {}", A::LABEL), A::ARCHIVE_PROCEDURE),
            Direction::Unarchive => (format!("Unarchive {}", A::LABEL), A::UNARCHIVE_PROCEDURE),
        };

        let mut params = Map::new();
        params.insert(A::ARCHIVE_ID_PARAM.to_string(), id.to_value());

        tracing::debug!(procedure, "calling cascade");
        let response = self
            .ctx
            .remote()
            .call_procedure(procedure, Value::Object(params))
            .await
            .map_err(|e| remote_failure(&operation, Some(id), e))?;

        if response.is_null() {
            tracing::info!("{operation} applied");
            return Ok(CascadeResult::unreported());
        }

        let response: CascadeResponse = read_record(&operation, response)?;
        if !response.success {
            let error = response
                .error
                .or(response.message)
                .map_or(RemoteError::Unknown, RemoteError::Failed);
            return Err(remote_failure(&operation, Some(id), error));
        }

        let result = CascadeResult {
            success: true,
            affected: response.affected,
            related: response.related,
        };
        if result.is_noop() {
            tracing::debug!("{} already in target state", A::LABEL);
        } else {
            tracing::info!(
                affected = result.affected,
                related = result.related.map(|r| r.total()),
                "{operation} applied"
            );
        }
        Ok(result)
    }
}
