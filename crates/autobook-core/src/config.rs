//! Engine configuration.
//!
//! Loaded from a TOML file or built from defaults. Interval knobs are
//! plain integer seconds; `Duration` accessors are provided for the
//! pieces that consume them.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calendar::BookingPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base interval between detection ticks per tenant.
    pub detection_interval_secs: u64,
    /// Minimum spacing between upstream fetch attempts, enforced even
    /// against a stale cache.
    pub min_check_interval_secs: u64,
    /// Snapshot age beyond which a fetch re-seeds instead of diffing.
    pub snapshot_freshness_secs: u64,
    /// Consecutive tick failures before a tenant is marked degraded.
    pub max_retries: u32,
    /// Ceiling for the per-tenant tick backoff under repeated failure.
    pub max_tick_backoff_secs: u64,
    /// Idempotency records older than this are garbage collected.
    pub idempotency_max_age_days: u32,
    /// Interval of the maintenance loop (idempotency GC, cache prune).
    pub gc_interval_secs: u64,
    /// When false, new records are detected and counted but no side
    /// effects are executed.
    pub processing_enabled: bool,
    /// Tenant-local offset from UTC, in minutes.
    pub utc_offset_minutes: i32,
    /// Title for booked actions.
    pub action_title: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detection_interval_secs: 60,
            min_check_interval_secs: 30,
            snapshot_freshness_secs: 300,
            max_retries: 3,
            max_tick_backoff_secs: 900,
            idempotency_max_age_days: 30,
            gc_interval_secs: 86_400,
            processing_enabled: true,
            utc_offset_minutes: 0,
            action_title: "Follow-up call".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_secs(self.detection_interval_secs)
    }

    pub fn min_check_interval(&self) -> Duration {
        Duration::from_secs(self.min_check_interval_secs)
    }

    pub fn snapshot_freshness(&self) -> Duration {
        Duration::from_secs(self.snapshot_freshness_secs)
    }

    /// Snapshots idle beyond this are pruned entirely.
    pub fn snapshot_prune_after(&self) -> Duration {
        Duration::from_secs(self.snapshot_freshness_secs * 2)
    }

    pub fn max_tick_backoff(&self) -> Duration {
        Duration::from_secs(self.max_tick_backoff_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn booking_policy(&self) -> BookingPolicy {
        BookingPolicy {
            title: self.action_title.clone(),
            utc_offset_minutes: self.utc_offset_minutes,
        }
    }
}
