//! autobook-detect — change detection for the Autobook engine.
//!
//! `SnapshotCache` keeps the last fully fetched record set per tenant
//! plus the rate-limit bookkeeping that throttles upstream fetches.
//! `ChangeDetector` fetches the current collection, diffs it against
//! the cached snapshot, and classifies the outcome.
//!
//! # Cold-start amnesty
//!
//! A tenant's first observed snapshot never yields "new" records, no
//! matter how many exist upstream: the first successful fetch seeds the
//! cache and returns an empty delta. Only subsequent fetches diff.

pub mod detector;
pub mod snapshot;

pub use detector::{ChangeDetector, Detection, DetectionSource};
pub use snapshot::{SnapshotCache, SnapshotEntry};
