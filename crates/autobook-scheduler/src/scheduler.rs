//! Scheduler — one recurring timer task per tenant key.
//!
//! `start` runs one tick immediately (fail-fast visibility), then arms
//! the recurring loop. Every tick failure is captured into
//! `ExecutionStats` at this boundary; nothing escapes to kill the task.
//! `stop` cancels future ticks only — an in-flight tick runs to
//! completion.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use autobook_core::{
    epoch_secs, BookingPolicy, CredentialProvider, DataSource, EngineConfig, SideEffectSink,
    TenantKey,
};
use autobook_detect::{ChangeDetector, Detection, DetectionSource, SnapshotCache};
use autobook_exec::{AutomationExecutor, ExecutionResult};
use autobook_state::{
    ExecutionStats, GlobalStats, IdempotencyStore, IdempotencySummary, PersistedState, StateStore,
    TenantStatus,
};

use crate::error::SchedulerResult;
use crate::tracker::{TickOutcome, TickTracker};

/// Per-tenant timer state held in memory.
struct TenantSlot {
    /// Handle to the background tick task.
    handle: JoinHandle<()>,
    /// Shutdown signal for this tenant's loop.
    shutdown_tx: watch::Sender<bool>,
}

/// Everything a tenant tick needs, shared across all tenant tasks.
struct TickContext {
    config: EngineConfig,
    policy: BookingPolicy,
    cache: Arc<SnapshotCache>,
    detector: ChangeDetector,
    executor: AutomationExecutor,
    idempotency: Arc<IdempotencyStore>,
    store: StateStore,
    /// Per-tenant stats: tenant table_key → stats. Each entry is only
    /// written by its own tenant's task (or by `stop`).
    stats: RwLock<HashMap<String, ExecutionStats>>,
}

/// Read-only engine snapshot for the external reporting layer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStatus {
    pub is_running: bool,
    pub tenants: Vec<ExecutionStats>,
    pub global: GlobalStats,
    pub settings: EngineConfig,
    pub idempotency: IdempotencySummary,
}

/// The scheduler owns a map from tenant key to timer slot and drives
/// detection + automation for each started tenant.
pub struct Scheduler {
    ctx: Arc<TickContext>,
    /// Active tenants: tenant table_key → slot.
    slots: Arc<RwLock<HashMap<String, TenantSlot>>>,
}

impl Scheduler {
    /// Assemble the engine around the host-provided collaborators and
    /// load persisted stats. Every tenant starts `stopped`.
    pub async fn new(
        config: EngineConfig,
        store: StateStore,
        source: Arc<dyn DataSource>,
        sink: Arc<dyn SideEffectSink>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> SchedulerResult<Self> {
        let cache = Arc::new(SnapshotCache::new(
            config.snapshot_freshness(),
            config.min_check_interval(),
        ));
        let idempotency = Arc::new(
            IdempotencyStore::load(store.clone(), config.idempotency_max_age_days).await,
        );
        let detector = ChangeDetector::new(cache.clone(), source);
        let policy = config.booking_policy();
        let executor =
            AutomationExecutor::new(sink, credentials, idempotency.clone(), policy.clone());

        let persisted = store.load_state()?;
        let stats = persisted
            .stats
            .into_iter()
            .map(|entry| (entry.table_key(), entry))
            .collect();

        Ok(Self {
            ctx: Arc::new(TickContext {
                config,
                policy,
                cache,
                detector,
                executor,
                idempotency,
                store,
                stats: RwLock::new(stats),
            }),
            slots: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Start (or restart) a tenant's automation.
    ///
    /// Runs one tick immediately, then ticks at the detection interval.
    /// Idempotent: an existing timer for the same key is replaced.
    pub async fn start(&self, tenant: TenantKey) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ctx = self.ctx.clone();
        let tenant_owned = tenant.clone();
        let handle = tokio::spawn(async move {
            run_tenant_loop(ctx, tenant_owned, shutdown_rx).await;
        });

        let mut slots = self.slots.write().await;
        if let Some(old) = slots.insert(
            tenant.table_key(),
            TenantSlot {
                handle,
                shutdown_tx,
            },
        ) {
            // Replace a pre-existing timer for the same key.
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(tenant = %tenant, "tenant automation started");
    }

    /// Stop a tenant's automation. Future ticks are cancelled; an
    /// in-flight tick runs to completion.
    pub async fn stop(&self, tenant: &TenantKey) {
        let slot = {
            let mut slots = self.slots.write().await;
            slots.remove(&tenant.table_key())
        };

        match slot {
            Some(slot) => {
                let _ = slot.shutdown_tx.send(true);
                info!(tenant = %tenant, "tenant automation stopped");
            }
            None => {
                debug!(tenant = %tenant, "tenant not running, nothing to stop");
            }
        }

        let state = {
            let mut stats = self.ctx.stats.write().await;
            if let Some(entry) = stats.get_mut(&tenant.table_key()) {
                entry.status = TenantStatus::Stopped;
            }
            snapshot_state(&stats)
        };
        if let Err(e) = self.ctx.store.save_state(&state) {
            warn!(tenant = %tenant, error = %e, "state save failed, in-memory state kept");
        }
    }

    /// Stop all tenants (for graceful shutdown).
    pub async fn stop_all(&self) {
        let drained: Vec<(String, TenantSlot)> = {
            let mut slots = self.slots.write().await;
            slots.drain().collect()
        };
        for (key, slot) in &drained {
            let _ = slot.shutdown_tx.send(true);
            debug!(tenant = %key, "tenant automation stopped");
        }

        let state = {
            let mut stats = self.ctx.stats.write().await;
            for entry in stats.values_mut() {
                entry.status = TenantStatus::Stopped;
            }
            snapshot_state(&stats)
        };
        if let Err(e) = self.ctx.store.save_state(&state) {
            warn!(error = %e, "state save failed, in-memory state kept");
        }
        info!(tenants = drained.len(), "all tenant automations stopped");
    }

    /// Whether a tenant currently has an armed timer.
    pub async fn is_scheduled(&self, tenant: &TenantKey) -> bool {
        let slots = self.slots.read().await;
        slots.contains_key(&tenant.table_key())
    }

    /// Tenant keys with an armed timer.
    pub async fn scheduled_tenants(&self) -> Vec<String> {
        let slots = self.slots.read().await;
        slots.keys().cloned().collect()
    }

    /// Read-only snapshot for the status/reporting layer.
    pub async fn status(&self) -> EngineStatus {
        let is_running = !self.slots.read().await.is_empty();
        let (mut tenants, global) = {
            let stats = self.ctx.stats.read().await;
            let global = GlobalStats::aggregate(stats.values(), epoch_secs());
            (stats.values().cloned().collect::<Vec<_>>(), global)
        };
        tenants.sort_by_key(|entry| entry.table_key());

        EngineStatus {
            is_running,
            tenants,
            global,
            settings: self.ctx.config.clone(),
            idempotency: self.ctx.idempotency.summary().await,
        }
    }

    /// Run the periodic maintenance loop: idempotency GC and snapshot
    /// pruning.
    pub async fn run_maintenance(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.ctx.config.gc_interval();
        info!(interval_secs = interval.as_secs(), "maintenance loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let removed = self
                        .ctx
                        .idempotency
                        .gc(self.ctx.config.idempotency_max_age_days)
                        .await;
                    let pruned = self.ctx.cache.prune(epoch_secs()).await;
                    debug!(removed, pruned, "maintenance pass");
                }
                _ = shutdown.changed() => {
                    info!("maintenance loop shutting down");
                    break;
                }
            }
        }
    }
}

/// The recurring tick loop for a single tenant.
async fn run_tenant_loop(
    ctx: Arc<TickContext>,
    tenant: TenantKey,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tracker = TickTracker::new(
        ctx.config.detection_interval(),
        ctx.config.max_retries,
        ctx.config.max_tick_backoff(),
    );

    debug!(tenant = %tenant, "tenant loop starting");

    // First tick immediately, so a misconfigured tenant surfaces its
    // error without waiting a full interval.
    run_tick(&ctx, &tenant, &mut tracker, &shutdown).await;

    loop {
        let interval = tracker.next_interval();

        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                run_tick(&ctx, &tenant, &mut tracker, &shutdown).await;
            }
            _ = shutdown.changed() => {
                debug!(tenant = %tenant, "tenant loop shutting down");
                break;
            }
        }
    }
}

/// One tick: detect, execute, account, persist.
async fn run_tick(
    ctx: &TickContext,
    tenant: &TenantKey,
    tracker: &mut TickTracker,
    shutdown: &watch::Receiver<bool>,
) {
    let now = epoch_secs();
    let detection = ctx.detector.detect(tenant).await;

    let mut results: Vec<ExecutionResult> = Vec::new();
    if !detection.new_records.is_empty() && ctx.config.processing_enabled {
        let today = ctx.policy.local_today(Utc::now());
        results = ctx
            .executor
            .run(tenant, &detection.new_records, today)
            .await;
    }

    let disposition = classify_tick(&detection, &results);
    let degraded = tracker.record(disposition.outcome());

    // A tick that finishes after `stop` was requested must not flip the
    // tenant back to running.
    let status = if *shutdown.borrow() {
        TenantStatus::Stopped
    } else if degraded {
        TenantStatus::Error
    } else if !ctx.config.processing_enabled {
        TenantStatus::Paused
    } else {
        TenantStatus::Running
    };

    let state = {
        let mut stats = ctx.stats.write().await;
        let entry = stats
            .entry(tenant.table_key())
            .or_insert_with(|| ExecutionStats::new(tenant.clone()));

        entry.status = status;
        entry.last_run = Some(now);
        entry.total_runs += 1;
        entry.total_detected += detection.new_records.len() as u64;
        entry.total_side_effects += results
            .iter()
            .filter(|result| result.action_id.is_some())
            .count() as u64;

        match &disposition {
            TickDisposition::Success => {
                entry.last_success = Some(now);
                entry.consecutive_errors = 0;
            }
            TickDisposition::Error(message) => {
                entry.last_error = Some(message.clone());
                entry.last_error_at = Some(now);
                entry.consecutive_errors = tracker.consecutive_errors();
            }
            TickDisposition::Neutral => {}
        }

        snapshot_state(&stats)
    };

    if let Err(e) = ctx.store.save_state(&state) {
        warn!(tenant = %tenant, error = %e, "state save failed, in-memory state kept");
    }
}

/// Classified outcome of a tick, with the captured error message.
enum TickDisposition {
    Success,
    Error(String),
    Neutral,
}

impl TickDisposition {
    fn outcome(&self) -> TickOutcome {
        match self {
            TickDisposition::Success => TickOutcome::Success,
            TickDisposition::Error(_) => TickOutcome::Error,
            TickDisposition::Neutral => TickOutcome::Neutral,
        }
    }
}

fn classify_tick(detection: &Detection, results: &[ExecutionResult]) -> TickDisposition {
    match detection.source {
        DetectionSource::RateLimited => TickDisposition::Neutral,
        DetectionSource::SourceUnavailable => {
            TickDisposition::Error("source unavailable".to_string())
        }
        DetectionSource::CacheInitialized | DetectionSource::ComparisonComplete => {
            let failed: Vec<&ExecutionResult> =
                results.iter().filter(|result| !result.success).collect();
            match failed.first() {
                None => TickDisposition::Success,
                Some(first) => {
                    let detail = first.error.as_deref().unwrap_or("unknown error");
                    TickDisposition::Error(format!(
                        "{} of {} records failed: {}",
                        failed.len(),
                        results.len(),
                        detail
                    ))
                }
            }
        }
    }
}

fn snapshot_state(stats: &HashMap<String, ExecutionStats>) -> PersistedState {
    let entries: Vec<ExecutionStats> = stats.values().cloned().collect();
    let global = GlobalStats::aggregate(&entries, epoch_secs());
    PersistedState {
        stats: entries,
        global,
    }
}
