//! Typed error types for the orchestration layer.

use std::fmt;

use thiserror::Error;

use crate::keys::CompositeKeyError;
use crate::remote::RemoteError;

/// Result type alias for orchestrator operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Step of a replace-sync that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationStep {
    Delete,
    Create,
}

impl fmt::Display for RelationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Delete => "delete",
            Self::Create => "create",
        })
    }
}

/// Errors that can occur in the orchestration layer.
///
/// The `Display` text of remote failures, `"<Operation> failed: <cause>"`, is
/// what the UI shows to users.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An id handed to a soft delete is not a positive integer.
    #[error("Invalid {entity} ID: {value}")]
    InvalidEntityId { entity: String, value: String },

    /// A junction key could not be decoded.
    #[error(transparent)]
    InvalidKey(#[from] CompositeKeyError),

    /// The store has no live record with this id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Input rejected before any remote call.
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// The remote call itself failed. Nothing is known to have been applied.
    #[error("{operation} failed: {source}")]
    Remote {
        operation: String,
        #[source]
        source: RemoteError,
    },

    /// A replace-sync failed midway. Deletes already applied are not rolled
    /// back, so the owner's relation set may be incomplete.
    #[error(
        "{operation} failed: {source} ({step} of {related_label} {related_id} failed after \
         {deleted} removed and {created} recreated; relations for {owner_label} {owner_id} \
         are partially applied)"
    )]
    PartialRelationSync {
        operation: String,
        owner_label: &'static str,
        owner_id: i64,
        related_label: &'static str,
        related_id: i64,
        step: RelationStep,
        deleted: usize,
        created: usize,
        #[source]
        source: RemoteError,
    },

    /// A write went through but the read that follows it failed, so the
    /// caller holds no confirmed copy of what was stored.
    #[error("{source} ({entity} {id} was saved before the failure)")]
    WriteUnconfirmed {
        entity: &'static str,
        id: String,
        #[source]
        source: Box<CoreError>,
    },

    /// The boundary answered with something that is not the expected record.
    #[error("{operation} failed: unexpected response: {detail}")]
    MalformedResponse { operation: String, detail: String },

    /// An internal error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub(crate) fn remote(operation: &str, source: RemoteError) -> Self {
        Self::Remote {
            operation: operation.to_string(),
            source,
        }
    }

    /// Whether the relation set of some owner may have been left half-written.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        matches!(self, Self::PartialRelationSync { .. })
    }

    /// Whether some write reached the store before the failure.
    #[must_use]
    pub const fn wrote_before_failing(&self) -> bool {
        matches!(
            self,
            Self::PartialRelationSync { .. } | Self::WriteUnconfirmed { .. }
        )
    }
}
