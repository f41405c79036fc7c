//! autobook-core — shared domain types for the Autobook engine.
//!
//! Autobook watches tenant-scoped upstream collections for newly appeared
//! records and books a follow-up action for each one, at most once per
//! logical event. This crate holds the pieces every other crate agrees on:
//!
//! - `TenantKey` — the (client, tenant) isolation boundary
//! - `ExternalRecord` — an opaque upstream entity with a derived identity
//! - Collaborator traits (`DataSource`, `SideEffectSink`,
//!   `CredentialProvider`) implemented by the host application
//! - `BookingPolicy` — explicit calendar/timezone policy
//! - `EngineConfig` — the engine's tuning knobs

pub mod calendar;
pub mod config;
pub mod traits;
pub mod types;

pub use calendar::{next_business_day, BookingPolicy};
pub use config::EngineConfig;
pub use traits::{
    ActionRef, CreateOutcome, CredentialProvider, DataSource, SideEffectSink, SinkError,
    SourceUnavailable,
};
pub use types::{normalize_identity, ExternalRecord, TenantKey};

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
