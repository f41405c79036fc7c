//! autobook-exec — the automation executor.
//!
//! Given the newly detected records for a tenant, books one follow-up
//! action per record through the `SideEffectSink` collaborator, guarded
//! by the idempotency index. Records are processed strictly in input
//! order with no intra-tenant parallelism; one record's failure never
//! aborts the batch.

pub mod executor;

pub use executor::{AutomationExecutor, ExecutionResult};
