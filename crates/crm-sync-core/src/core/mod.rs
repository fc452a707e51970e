//! Service layer for crm-sync-core.
//!
//! Provides typed, high-level orchestrators for aggregate sync, archival
//! cascades, junction relations, soft deletes and products with distributors.
//! Every orchestrator is stateless and reaches the store only through the
//! [`RemoteBoundary`] held by the [`CoreContext`].
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use crm_sync_core::config::SyncConfig;
//! use crm_sync_core::core::CoreContext;
//! use crm_sync_core::model::{Identifier, Opportunity};
//! use crm_sync_core::remote::memory::InMemoryRemote;
//!
//! # async fn run() -> crm_sync_core::core::CoreResult<()> {
//! let ctx = CoreContext::new(Arc::new(InMemoryRemote::new()), SyncConfig::default());
//! let services = ctx.services();
//! let cascade = services.archival::<Opportunity>().archive(&Identifier::Int(7)).await?;
//! assert!(cascade.success);
//! # Ok(())
//! # }
//! ```

pub mod aggregates;
pub mod archival;
pub mod errors;
pub mod products;
pub mod relations;
pub mod soft_delete;

pub use errors::{CoreError, CoreResult, RelationStep};

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::SyncConfig;
use crate::model::{Archivable, Identifier, Junction, Opportunity, SoftDeletable, SyncAggregate};
use crate::remote::{RemoteBoundary, RemoteError};

/// Context for crm-sync-core services.
///
/// Holds the remote boundary and the configuration. Cheap to clone; create
/// one per application and hand out services from it.
#[derive(Clone)]
pub struct CoreContext {
    remote: Arc<dyn RemoteBoundary>,
    config: SyncConfig,
}

impl CoreContext {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteBoundary>, config: SyncConfig) -> Self {
        Self { remote, config }
    }

    /// Create a context configured from `CRM_SYNC_*` environment variables.
    pub fn from_env(remote: Arc<dyn RemoteBoundary>) -> CoreResult<Self> {
        let config = SyncConfig::from_env().map_err(CoreError::Internal)?;
        Ok(Self::new(remote, config))
    }

    #[must_use]
    pub fn remote(&self) -> &dyn RemoteBoundary {
        self.remote.as_ref()
    }

    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Create a `CrmServices` facade backed by this context.
    #[must_use]
    pub fn services(&self) -> CrmServices {
        CrmServices { ctx: self.clone() }
    }
}

/// Facade providing all orchestrator APIs.
pub struct CrmServices {
    ctx: CoreContext,
}

impl CrmServices {
    /// Create/update an aggregate together with its children.
    #[must_use]
    pub fn aggregates<A: SyncAggregate>(&self) -> aggregates::AggregateSyncService<'_, A> {
        aggregates::AggregateSyncService::new(&self.ctx)
    }

    /// Opportunity create/update with product line items.
    #[must_use]
    pub fn opportunities(&self) -> aggregates::AggregateSyncService<'_, Opportunity> {
        self.aggregates()
    }

    /// Archive/unarchive cascades.
    #[must_use]
    pub fn archival<A: Archivable>(&self) -> archival::ArchivalService<'_, A> {
        archival::ArchivalService::new(&self.ctx)
    }

    /// Soft deletes by id.
    #[must_use]
    pub fn soft_delete<A: SoftDeletable>(&self) -> soft_delete::SoftDeleteService<'_, A> {
        soft_delete::SoftDeleteService::new(&self.ctx)
    }

    /// Junction relation operations.
    #[must_use]
    pub fn relations<J: Junction>(&self) -> relations::RelationService<'_, J> {
        relations::RelationService::new(&self.ctx)
    }

    /// Products with distributor relationships.
    #[must_use]
    pub fn products(&self) -> products::ProductService<'_> {
        products::ProductService::new(&self.ctx)
    }

    #[must_use]
    pub const fn context(&self) -> &CoreContext {
        &self.ctx
    }
}

/// Log a failed boundary call and wrap it for the caller.
pub(crate) fn remote_failure(
    operation: &str,
    id: Option<&Identifier>,
    error: RemoteError,
) -> CoreError {
    tracing::error!(
        operation,
        id = id.map(tracing::field::display),
        error = %error,
        "remote call failed"
    );
    CoreError::remote(operation, error)
}

/// Read a boundary response as `T`.
pub(crate) fn read_record<T: DeserializeOwned>(operation: &str, value: Value) -> CoreResult<T> {
    serde_json::from_value(value).map_err(|e| {
        tracing::error!(operation, error = %e, "unreadable response");
        CoreError::MalformedResponse {
            operation: operation.to_string(),
            detail: e.to_string(),
        }
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Log capture for asserting what orchestrators report on failure.

    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing::subscriber::DefaultGuard;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        /// Install a thread-local subscriber writing into the returned buffer.
        pub fn install() -> (Self, DefaultGuard) {
            let logs = Self::default();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(logs.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::DEBUG)
                .finish();
            let guard = tracing::subscriber::set_default(subscriber);
            (logs, guard)
        }

        pub fn contents(&self) -> String {
            let bytes = self.0.lock().map(|b| b.clone()).unwrap_or_default();
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .map_err(|_| io::Error::other("log buffer poisoned"))?
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }
}
