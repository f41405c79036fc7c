//! autobook-scheduler — per-tenant timer-driven automation.
//!
//! The `Scheduler` owns one recurring timer task per tenant key and
//! drives each tick: detect changes, execute side effects for new
//! records, update stats, persist. Failures degrade a tenant for
//! observability but never stop its timer.
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── Per-tenant background task
//!   │   ├── TickTracker (consecutive errors, backoff, degradation)
//!   │   ├── ChangeDetector → Detection
//!   │   ├── AutomationExecutor → per-record results
//!   │   └── ExecutionStats + GlobalStats → StateStore
//!   └── Maintenance loop (idempotency GC, snapshot prune)
//! ```
//!
//! Ticks for one tenant run inline in that tenant's task, so a slow
//! tick delays the next firing instead of overlapping it. Ticks for
//! different tenants are fully independent.

pub mod error;
pub mod scheduler;
pub mod tracker;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{EngineStatus, Scheduler};
pub use tracker::{TickOutcome, TickTracker};
