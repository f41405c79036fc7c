//! Per-tenant snapshot cache and fetch-rate bookkeeping.
//!
//! All time is passed in as epoch seconds so freshness and rate-limit
//! decisions are deterministic under test. `last_check` is tracked
//! independently of the snapshot itself: failed fetches are throttled
//! too, and a cold tenant (no entry at all) is a valid state, not an
//! error.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use autobook_core::{ExternalRecord, TenantKey};

/// The last fully fetched record set for one tenant.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    /// Identities of every record in the snapshot.
    pub identities: HashSet<String>,
    pub records: Vec<ExternalRecord>,
    /// Epoch seconds of the fetch that produced this snapshot.
    pub last_update: u64,
}

#[derive(Debug, Default)]
struct TenantSlot {
    snapshot: Option<SnapshotEntry>,
    /// Epoch seconds of the last fetch attempt, successful or not.
    last_check: Option<u64>,
}

impl TenantSlot {
    fn last_activity(&self) -> u64 {
        let updated = self.snapshot.as_ref().map(|s| s.last_update).unwrap_or(0);
        updated.max(self.last_check.unwrap_or(0))
    }
}

/// Per-tenant last-seen entity sets plus rate-limit bookkeeping.
pub struct SnapshotCache {
    slots: RwLock<HashMap<String, TenantSlot>>,
    freshness: Duration,
    min_check_interval: Duration,
}

impl SnapshotCache {
    pub fn new(freshness: Duration, min_check_interval: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            freshness,
            min_check_interval,
        }
    }

    /// The tenant's current snapshot, if one exists.
    pub async fn snapshot(&self, tenant: &TenantKey) -> Option<SnapshotEntry> {
        let slots = self.slots.read().await;
        slots
            .get(&tenant.table_key())
            .and_then(|slot| slot.snapshot.clone())
    }

    /// Replace the tenant's snapshot wholesale with a fresh record set.
    pub async fn replace(&self, tenant: &TenantKey, records: Vec<ExternalRecord>, now: u64) {
        let identities = records.iter().map(|r| r.identity()).collect();
        let mut slots = self.slots.write().await;
        let slot = slots.entry(tenant.table_key()).or_default();
        slot.snapshot = Some(SnapshotEntry {
            identities,
            records,
            last_update: now,
        });
    }

    /// Whether the tenant's snapshot is recent enough to diff against.
    /// A stale snapshot triggers a re-seed instead.
    pub async fn is_fresh(&self, tenant: &TenantKey, now: u64) -> bool {
        let slots = self.slots.read().await;
        match slots.get(&tenant.table_key()).and_then(|s| s.snapshot.as_ref()) {
            Some(snapshot) => now.saturating_sub(snapshot.last_update) < self.freshness.as_secs(),
            None => false,
        }
    }

    /// Whether enough time has passed since the last fetch attempt.
    ///
    /// Independent of snapshot freshness: this throttles fetches even
    /// against a stale cache, protecting the upstream source from a
    /// caller that ignores the scheduler's own cadence. The boundary is
    /// inclusive — exactly the minimum interval is allowed.
    pub async fn can_check_now(&self, tenant: &TenantKey, now: u64) -> bool {
        let slots = self.slots.read().await;
        match slots.get(&tenant.table_key()).and_then(|s| s.last_check) {
            Some(last_check) => now.saturating_sub(last_check) >= self.min_check_interval.as_secs(),
            None => true,
        }
    }

    /// Record a fetch attempt, successful or not.
    pub async fn mark_checked(&self, tenant: &TenantKey, now: u64) {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(tenant.table_key()).or_default();
        slot.last_check = Some(now);
    }

    /// Drop entries with no activity for twice the freshness window.
    /// Returns the number pruned.
    pub async fn prune(&self, now: u64) -> usize {
        let horizon = self.freshness.as_secs() * 2;
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, slot| now.saturating_sub(slot.last_activity()) <= horizon);
        let pruned = before - slots.len();
        if pruned > 0 {
            debug!(pruned, "idle snapshots pruned");
        }
        pruned
    }
}
