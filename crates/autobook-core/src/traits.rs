//! Collaborator traits implemented by the host application.
//!
//! The engine never talks to the upstream source or the calendar
//! provider directly; it consumes these seams. Timeouts are the
//! collaborator's responsibility, not the engine's.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::types::{ExternalRecord, TenantKey};

/// The upstream source could not be queried. Transient: the engine
/// retries on its own cadence.
#[derive(Debug, Clone, Error)]
#[error("source unavailable: {0}")]
pub struct SourceUnavailable(pub String);

/// A side-effect call failed outright.
#[derive(Debug, Clone, Error)]
#[error("side-effect call failed: {0}")]
pub struct SinkError(pub String);

/// Reference to an action created in the external system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    pub id: String,
}

/// Outcome of a `create_action` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The action was created; the reference must be recorded.
    Created(ActionRef),
    /// The collaborator's own dedup heuristic found an existing action.
    /// Non-error, non-created: nothing is recorded for it.
    DuplicateFound,
}

/// Tenant-scoped read access to the upstream collection.
///
/// Each record must carry a stable natural identity where upstream has
/// one; see `ExternalRecord::identity` for the fallback.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_records(
        &self,
        tenant: &TenantKey,
    ) -> Result<Vec<ExternalRecord>, SourceUnavailable>;
}

/// The external system performing the booked action.
#[async_trait]
pub trait SideEffectSink: Send + Sync {
    async fn create_action(
        &self,
        tenant: &TenantKey,
        record: &ExternalRecord,
        effective_date: NaiveDate,
        title: &str,
    ) -> Result<CreateOutcome, SinkError>;
}

/// Per-tenant credential lookup, consulted before any sink call.
///
/// Absence is a legitimate "skip, not configured" outcome, not an error.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn has_credentials(&self, tenant: &TenantKey) -> bool;
}
