//! Persisted domain types for the Autobook state store.
//!
//! Timestamps are Unix epoch seconds; `NaiveDate` appears only where
//! the calendar day itself is the semantic unit.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use autobook_core::TenantKey;

/// Lifecycle status of a tenant's automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Timer armed, processing enabled.
    Running,
    /// Timer armed, detection only — side effects are disabled.
    Paused,
    /// Timer armed but degraded: the consecutive-failure threshold was
    /// crossed. Ticking continues.
    Error,
    Stopped,
}

/// Per-tenant execution statistics, owned exclusively by that tenant's
/// timer task while it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub tenant: TenantKey,
    pub status: TenantStatus,
    /// Unix timestamp of the most recent tick, whatever its outcome.
    pub last_run: Option<u64>,
    /// Unix timestamp of the most recent successful tick.
    pub last_success: Option<u64>,
    /// Latest captured error message. Never a backtrace.
    pub last_error: Option<String>,
    /// Unix timestamp the latest error was captured at.
    pub last_error_at: Option<u64>,
    pub consecutive_errors: u32,
    pub total_runs: u64,
    /// Total new records detected across all ticks.
    pub total_detected: u64,
    /// Total confirmed side-effect creations.
    pub total_side_effects: u64,
}

impl ExecutionStats {
    pub fn new(tenant: TenantKey) -> Self {
        Self {
            tenant,
            status: TenantStatus::Stopped,
            last_run: None,
            last_success: None,
            last_error: None,
            last_error_at: None,
            consecutive_errors: 0,
            total_runs: 0,
            total_detected: 0,
            total_side_effects: 0,
        }
    }

    /// Build the composite key for the stats table.
    pub fn table_key(&self) -> String {
        self.tenant.table_key()
    }
}

/// Process-wide sums derived from all per-tenant stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_runs: u64,
    pub total_detected: u64,
    pub total_side_effects: u64,
    pub tenants_running: u32,
    pub updated_at: u64,
}

impl GlobalStats {
    /// Recompute the sums from a set of per-tenant stats.
    pub fn aggregate<'a>(stats: impl IntoIterator<Item = &'a ExecutionStats>, now: u64) -> Self {
        let mut global = GlobalStats {
            updated_at: now,
            ..GlobalStats::default()
        };
        for entry in stats {
            global.total_runs += entry.total_runs;
            global.total_detected += entry.total_detected;
            global.total_side_effects += entry.total_side_effects;
            if entry.status != TenantStatus::Stopped {
                global.tenants_running += 1;
            }
        }
        global
    }
}

/// The scheduler aggregate document as loaded from or written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub stats: Vec<ExecutionStats>,
    pub global: GlobalStats,
}

/// One executed logical event. Created exactly once per idempotency
/// key, append-only until GC removes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub identity: String,
    pub external_action_id: String,
    pub created_at: u64,
    pub effective_date: NaiveDate,
    pub title: String,
}

/// Read-only summary of the idempotency index for the reporting layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdempotencySummary {
    pub entries: usize,
    /// `created_at` of the oldest record, if any.
    pub oldest: Option<u64>,
    /// `created_at` of the newest record, if any.
    pub newest: Option<u64>,
}
