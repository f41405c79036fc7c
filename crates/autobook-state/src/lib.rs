//! autobook-state — embedded durable state for the Autobook engine.
//!
//! Backed by [redb](https://docs.rs/redb). Two logical documents live
//! here, each its own table, each written independently:
//!
//! - the scheduler aggregate (per-tenant `ExecutionStats` + `GlobalStats`)
//! - the idempotency index (`IdempotencyRecord` per executed event)
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns;
//! keys are the tenant composite key or the idempotency key. The
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.
//!
//! Durability here is best-effort by design: a failed write is logged
//! and the in-memory state stays authoritative for the rest of the
//! process lifetime. Loading after a restart always yields every tenant
//! in `stopped` — the engine never resumes hot.

pub mod error;
pub mod idempotency;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use idempotency::{idempotency_key, IdempotencyStore};
pub use store::StateStore;
pub use types::*;
