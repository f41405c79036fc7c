//! The idempotency index — one durable guard per executed logical event.
//!
//! The in-memory map is authoritative for the process lifetime; the
//! redb table is a write-through copy. A failed durable write is logged
//! and swallowed: this layer must never block automation execution.

use std::collections::HashMap;

use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use autobook_core::epoch_secs;

use crate::store::StateStore;
use crate::types::{IdempotencyRecord, IdempotencySummary};

const SECS_PER_DAY: u64 = 86_400;

/// Deterministic fingerprint of a logical side-effect event.
///
/// Identical logical events always produce the identical key: both text
/// parts are case-folded with whitespace collapsed, and the date is
/// truncated to the calendar day, so two bookings of the same action on
/// the same day collapse onto one guard.
pub fn idempotency_key(identity: &str, date: NaiveDate, title: &str) -> String {
    format!(
        "{}|{}|{}",
        normalize_part(identity),
        date.format("%Y-%m-%d"),
        normalize_part(title)
    )
}

fn normalize_part(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Durable map from idempotency key to "already done" record.
pub struct IdempotencyStore {
    store: StateStore,
    records: RwLock<HashMap<String, IdempotencyRecord>>,
}

impl IdempotencyStore {
    /// Load the durable index into memory and garbage collect it.
    ///
    /// A failed durable read starts the store empty rather than
    /// failing: worst case is a duplicate-suppression miss, never a
    /// blocked engine.
    pub async fn load(store: StateStore, max_age_days: u32) -> Self {
        let records = match store.list_idempotency() {
            Ok(list) => list
                .into_iter()
                .map(|record| (record.key.clone(), record))
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to load idempotency index, starting empty");
                HashMap::new()
            }
        };
        let loaded = Self {
            store,
            records: RwLock::new(records),
        };
        let removed = loaded.gc(max_age_days).await;
        let entries = loaded.records.read().await.len();
        debug!(entries, expired = removed, "idempotency index loaded");
        loaded
    }

    pub async fn has(&self, key: &str) -> bool {
        self.records.read().await.contains_key(key)
    }

    /// Record a confirmed creation under `key`. Idempotent: a second
    /// call with the same key is a no-op and returns false.
    pub async fn record(
        &self,
        key: &str,
        external_action_id: &str,
        identity: &str,
        effective_date: NaiveDate,
        title: &str,
    ) -> bool {
        let mut records = self.records.write().await;
        if records.contains_key(key) {
            return false;
        }
        let record = IdempotencyRecord {
            key: key.to_string(),
            identity: identity.to_string(),
            external_action_id: external_action_id.to_string(),
            created_at: epoch_secs(),
            effective_date,
            title: title.to_string(),
        };
        if let Err(e) = self.store.put_idempotency(&record) {
            warn!(key, error = %e, "durable idempotency write failed, in-memory copy kept");
        }
        records.insert(key.to_string(), record);
        true
    }

    /// Remove records older than `max_age_days`. Returns how many were
    /// dropped from memory; the durable removal is best-effort.
    pub async fn gc(&self, max_age_days: u32) -> usize {
        let horizon = epoch_secs().saturating_sub(u64::from(max_age_days) * SECS_PER_DAY);
        let expired: Vec<String> = {
            let records = self.records.read().await;
            records
                .values()
                .filter(|record| record.created_at < horizon)
                .map(|record| record.key.clone())
                .collect()
        };
        if expired.is_empty() {
            return 0;
        }

        {
            let mut records = self.records.write().await;
            for key in &expired {
                records.remove(key);
            }
        }
        if let Err(e) = self.store.remove_idempotency_batch(&expired) {
            warn!(error = %e, "durable idempotency GC failed, in-memory copy kept");
        }
        debug!(removed = expired.len(), max_age_days, "idempotency GC");
        expired.len()
    }

    pub async fn summary(&self) -> IdempotencySummary {
        let records = self.records.read().await;
        IdempotencySummary {
            entries: records.len(),
            oldest: records.values().map(|r| r.created_at).min(),
            newest: records.values().map(|r| r.created_at).max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn empty_store() -> IdempotencyStore {
        IdempotencyStore::load(StateStore::open_in_memory().unwrap(), 30).await
    }

    #[test]
    fn key_is_deterministic() {
        let a = idempotency_key("555-0100", date(2026, 8, 10), "Follow-up call");
        let b = idempotency_key("555-0100", date(2026, 8, 10), "Follow-up call");
        assert_eq!(a, b);
        assert_eq!(a, "555-0100|2026-08-10|follow-up call");
    }

    #[test]
    fn key_invariant_under_case_and_whitespace() {
        let canonical = idempotency_key("abc-123", date(2026, 8, 10), "Follow-up call");
        assert_eq!(
            idempotency_key(" ABC-123 ", date(2026, 8, 10), "follow-up  CALL "),
            canonical
        );
    }

    #[test]
    fn key_differs_across_days_not_within_one() {
        // Time of day never enters the key — only the calendar date does.
        let monday = idempotency_key("x", date(2026, 8, 10), "t");
        let tuesday = idempotency_key("x", date(2026, 8, 11), "t");
        assert_ne!(monday, tuesday);
    }

    #[tokio::test]
    async fn record_is_write_once() {
        let idem = empty_store().await;
        let key = idempotency_key("555-0100", date(2026, 8, 10), "call");

        assert!(!idem.has(&key).await);
        assert!(
            idem.record(&key, "evt-1", "555-0100", date(2026, 8, 10), "call")
                .await
        );
        assert!(idem.has(&key).await);

        // Second write with the same key is a no-op.
        assert!(
            !idem
                .record(&key, "evt-2", "555-0100", date(2026, 8, 10), "call")
                .await
        );
        let summary = idem.summary().await;
        assert_eq!(summary.entries, 1);
    }

    #[tokio::test]
    async fn records_survive_reload() {
        let store = StateStore::open_in_memory().unwrap();
        let key = idempotency_key("555-0100", date(2026, 8, 10), "call");
        {
            let idem = IdempotencyStore::load(store.clone(), 30).await;
            idem.record(&key, "evt-1", "555-0100", date(2026, 8, 10), "call")
                .await;
        }

        let reloaded = IdempotencyStore::load(store, 30).await;
        assert!(reloaded.has(&key).await);
    }

    #[tokio::test]
    async fn gc_respects_age_horizon() {
        let store = StateStore::open_in_memory().unwrap();
        let now = epoch_secs();
        // Seed records directly so their ages are controlled.
        for (key, age_days) in [("old", 31u64), ("young", 29u64)] {
            store
                .put_idempotency(&IdempotencyRecord {
                    key: key.to_string(),
                    identity: "x".to_string(),
                    external_action_id: "evt".to_string(),
                    created_at: now - age_days * SECS_PER_DAY,
                    effective_date: date(2026, 8, 10),
                    title: "call".to_string(),
                })
                .unwrap();
        }

        let idem = IdempotencyStore::load(store.clone(), 30).await;
        // Load already collected the 31-day-old record.
        assert!(!idem.has("old").await);
        assert!(idem.has("young").await);
        // And removed it durably.
        assert!(store.get_idempotency("old").unwrap().is_none());

        assert_eq!(idem.gc(30).await, 0);
    }

    #[tokio::test]
    async fn summary_reports_bounds() {
        let store = StateStore::open_in_memory().unwrap();
        let idem = IdempotencyStore::load(store, 30).await;
        assert_eq!(idem.summary().await, IdempotencySummary::default());

        idem.record("k1", "evt-1", "a", date(2026, 8, 10), "call")
            .await;
        idem.record("k2", "evt-2", "b", date(2026, 8, 10), "call")
            .await;

        let summary = idem.summary().await;
        assert_eq!(summary.entries, 2);
        assert!(summary.oldest.is_some());
        assert!(summary.newest >= summary.oldest);
    }
}
