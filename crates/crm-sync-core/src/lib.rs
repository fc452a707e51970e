//! crm-sync-core — reconciliation and orchestration core for the CRM.
//!
//! This crate owns child-collection diffing, composite junction keys, the
//! remote boundary abstraction, and the orchestrators that keep a parent
//! aggregate consistent with its children across writes, archival cascades
//! and soft deletes.

pub mod config;
pub mod core;
pub mod diff;
pub mod fields;
pub mod keys;
pub mod model;
pub mod remote;
