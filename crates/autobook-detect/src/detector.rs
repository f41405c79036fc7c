//! Change detection against the snapshot cache.
//!
//! `detect` is infallible by construction: every failure mode is a
//! `DetectionSource` value, so callers can apply per-source policy
//! (suppress alerting on `RateLimited`, treat `SourceUnavailable` as
//! transient) without unwinding through the tick.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use autobook_core::{epoch_secs, DataSource, ExternalRecord, TenantKey};

use crate::snapshot::SnapshotCache;

/// How a detection outcome was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    /// The minimum fetch interval has not elapsed; nothing was fetched.
    RateLimited,
    /// The upstream fetch failed; retried on the next tick.
    SourceUnavailable,
    /// First observation (or a stale cache was re-seeded): the snapshot
    /// was replaced and the delta is empty by definition.
    CacheInitialized,
    /// A fresh snapshot existed and was diffed.
    ComparisonComplete,
}

/// Result of one detection pass for one tenant.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Records present now whose identity was absent from the previous
    /// snapshot. Empty unless `source` is `ComparisonComplete`.
    pub new_records: Vec<ExternalRecord>,
    /// Upstream record count — current when fetched, last known otherwise.
    pub total_records: usize,
    pub source: DetectionSource,
}

/// Fetches the current upstream collection and diffs it against the
/// cached snapshot.
pub struct ChangeDetector {
    cache: Arc<SnapshotCache>,
    source: Arc<dyn DataSource>,
}

impl ChangeDetector {
    pub fn new(cache: Arc<SnapshotCache>, source: Arc<dyn DataSource>) -> Self {
        Self { cache, source }
    }

    /// Run one detection pass for the tenant.
    pub async fn detect(&self, tenant: &TenantKey) -> Detection {
        let now = epoch_secs();

        if !self.cache.can_check_now(tenant, now).await {
            let total = self.last_known_total(tenant).await;
            debug!(tenant = %tenant, "detection rate limited");
            return Detection {
                new_records: Vec::new(),
                total_records: total,
                source: DetectionSource::RateLimited,
            };
        }

        let current = match self.source.fetch_records(tenant).await {
            Ok(records) => records,
            Err(e) => {
                // Throttle the next attempt too, or an unavailable
                // source turns into a hot retry loop.
                self.cache.mark_checked(tenant, now).await;
                warn!(tenant = %tenant, error = %e, "upstream fetch failed");
                let total = self.last_known_total(tenant).await;
                return Detection {
                    new_records: Vec::new(),
                    total_records: total,
                    source: DetectionSource::SourceUnavailable,
                };
            }
        };
        self.cache.mark_checked(tenant, now).await;

        let total = current.len();
        let previous = if self.cache.is_fresh(tenant, now).await {
            self.cache.snapshot(tenant).await
        } else {
            None
        };

        match previous {
            None => {
                // Cold start or stale cache: seed, report nothing new.
                self.cache.replace(tenant, current, now).await;
                debug!(tenant = %tenant, total, "snapshot seeded");
                Detection {
                    new_records: Vec::new(),
                    total_records: total,
                    source: DetectionSource::CacheInitialized,
                }
            }
            Some(snapshot) => {
                let new_records: Vec<ExternalRecord> = current
                    .iter()
                    .filter(|record| !snapshot.identities.contains(&record.identity()))
                    .cloned()
                    .collect();
                self.cache.replace(tenant, current, now).await;
                if !new_records.is_empty() {
                    debug!(
                        tenant = %tenant,
                        new = new_records.len(),
                        total,
                        "new records detected"
                    );
                }
                Detection {
                    new_records,
                    total_records: total,
                    source: DetectionSource::ComparisonComplete,
                }
            }
        }
    }

    async fn last_known_total(&self, tenant: &TenantKey) -> usize {
        self.cache
            .snapshot(tenant)
            .await
            .map(|snapshot| snapshot.records.len())
            .unwrap_or(0)
    }
}
