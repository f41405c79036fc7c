//! End-to-end engine tests.
//!
//! Drives a real `Scheduler` against scriptable collaborators: seed the
//! upstream, start a tenant, let ticks fire on a short interval, and
//! assert on stats, bookings, and the persisted state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use autobook_core::{
    ActionRef, CreateOutcome, CredentialProvider, DataSource, EngineConfig, ExternalRecord,
    SideEffectSink, SinkError, SourceUnavailable, TenantKey,
};
use autobook_scheduler::Scheduler;
use autobook_state::{StateStore, TenantStatus};

/// Upstream whose record set and availability can be changed mid-test.
#[derive(Default)]
struct ScriptedSource {
    records: Mutex<HashMap<String, Vec<ExternalRecord>>>,
    available: AtomicBool,
}

impl ScriptedSource {
    fn new() -> Arc<Self> {
        let source = Self::default();
        source.available.store(true, Ordering::SeqCst);
        Arc::new(source)
    }

    fn set_records(&self, tenant: &TenantKey, keys: &[&str]) {
        let records = keys
            .iter()
            .map(|k| ExternalRecord::new(Some(k.to_string()), *k))
            .collect();
        self.records
            .lock()
            .unwrap()
            .insert(tenant.table_key(), records);
    }

    fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn fetch_records(
        &self,
        tenant: &TenantKey,
    ) -> Result<Vec<ExternalRecord>, SourceUnavailable> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SourceUnavailable("upstream down".to_string()));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&tenant.table_key())
            .cloned()
            .unwrap_or_default())
    }
}

/// Sink that books everything and remembers what it booked.
#[derive(Default)]
struct RecordingSink {
    bookings: Mutex<Vec<(String, String, NaiveDate)>>,
    counter: AtomicU32,
}

#[async_trait]
impl SideEffectSink for RecordingSink {
    async fn create_action(
        &self,
        tenant: &TenantKey,
        record: &ExternalRecord,
        effective_date: NaiveDate,
        _title: &str,
    ) -> Result<CreateOutcome, SinkError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.bookings
            .lock()
            .unwrap()
            .push((tenant.table_key(), record.identity(), effective_date));
        Ok(CreateOutcome::Created(ActionRef {
            id: format!("evt-{n}"),
        }))
    }
}

struct AlwaysConfigured;

#[async_trait]
impl CredentialProvider for AlwaysConfigured {
    async fn has_credentials(&self, _tenant: &TenantKey) -> bool {
        true
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        detection_interval_secs: 1,
        min_check_interval_secs: 0,
        max_tick_backoff_secs: 1,
        ..EngineConfig::default()
    }
}

fn tenant() -> TenantKey {
    TenantKey::new("acme", "west")
}

async fn settle() {
    // Long enough for the immediate tick to land.
    tokio::time::sleep(Duration::from_millis(300)).await;
}

async fn next_tick() {
    tokio::time::sleep(Duration::from_millis(1400)).await;
}

#[tokio::test]
async fn cold_start_seeds_without_booking() {
    let source = ScriptedSource::new();
    source.set_records(&tenant(), &["1", "2", "3", "4", "5"]);
    let sink = Arc::new(RecordingSink::default());

    let scheduler = Scheduler::new(
        fast_config(),
        StateStore::open_in_memory().unwrap(),
        source,
        sink.clone(),
        Arc::new(AlwaysConfigured),
    )
    .await
    .unwrap();

    scheduler.start(tenant()).await;
    settle().await;

    let status = scheduler.status().await;
    assert!(status.is_running);
    let stats = &status.tenants[0];
    assert_eq!(stats.status, TenantStatus::Running);
    assert!(stats.total_runs >= 1);
    // Cold-start amnesty: five upstream records, none reported new.
    assert_eq!(stats.total_detected, 0);
    assert_eq!(stats.total_side_effects, 0);
    assert!(sink.bookings.lock().unwrap().is_empty());

    scheduler.stop_all().await;
}

#[tokio::test]
async fn new_record_is_booked_exactly_once() {
    let source = ScriptedSource::new();
    source.set_records(&tenant(), &["1", "2", "3"]);
    let sink = Arc::new(RecordingSink::default());

    let scheduler = Scheduler::new(
        fast_config(),
        StateStore::open_in_memory().unwrap(),
        source.clone(),
        sink.clone(),
        Arc::new(AlwaysConfigured),
    )
    .await
    .unwrap();

    scheduler.start(tenant()).await;
    settle().await;

    // One record appears upstream after the seed.
    source.set_records(&tenant(), &["1", "2", "3", "555"]);
    next_tick().await;
    next_tick().await;

    let bookings = sink.bookings.lock().unwrap().clone();
    assert_eq!(bookings.len(), 1, "idempotency must hold across ticks");
    assert_eq!(bookings[0].1, "555");

    let status = scheduler.status().await;
    let stats = &status.tenants[0];
    assert_eq!(stats.total_detected, 1);
    assert_eq!(stats.total_side_effects, 1);
    assert!(stats.last_success.is_some());
    assert_eq!(status.idempotency.entries, 1);

    scheduler.stop_all().await;
}

#[tokio::test]
async fn outage_degrades_then_recovery_clears() {
    let source = ScriptedSource::new();
    source.set_available(false);
    let sink = Arc::new(RecordingSink::default());

    let config = EngineConfig {
        max_retries: 2,
        ..fast_config()
    };
    let scheduler = Scheduler::new(
        config,
        StateStore::open_in_memory().unwrap(),
        source.clone(),
        sink,
        Arc::new(AlwaysConfigured),
    )
    .await
    .unwrap();

    scheduler.start(tenant()).await;
    settle().await;
    next_tick().await;
    next_tick().await;

    let status = scheduler.status().await;
    let stats = &status.tenants[0];
    assert_eq!(stats.status, TenantStatus::Error);
    assert!(stats.consecutive_errors >= 2);
    assert_eq!(stats.last_error.as_deref(), Some("source unavailable"));
    assert!(stats.last_error_at.is_some());

    // Upstream comes back: the next successful tick clears degradation.
    source.set_available(true);
    source.set_records(&tenant(), &["1"]);
    next_tick().await;
    next_tick().await;

    let status = scheduler.status().await;
    let stats = &status.tenants[0];
    assert_eq!(stats.status, TenantStatus::Running);
    assert_eq!(stats.consecutive_errors, 0);
    assert!(stats.last_success.is_some());
    // The old error stays visible for reporting.
    assert!(stats.last_error.is_some());

    scheduler.stop_all().await;
}

#[tokio::test]
async fn disabled_processing_detects_but_never_books() {
    let source = ScriptedSource::new();
    source.set_records(&tenant(), &["1"]);
    let sink = Arc::new(RecordingSink::default());

    let config = EngineConfig {
        processing_enabled: false,
        ..fast_config()
    };
    let scheduler = Scheduler::new(
        config,
        StateStore::open_in_memory().unwrap(),
        source.clone(),
        sink.clone(),
        Arc::new(AlwaysConfigured),
    )
    .await
    .unwrap();

    scheduler.start(tenant()).await;
    settle().await;

    source.set_records(&tenant(), &["1", "2"]);
    next_tick().await;
    next_tick().await;

    let status = scheduler.status().await;
    let stats = &status.tenants[0];
    assert_eq!(stats.status, TenantStatus::Paused);
    assert_eq!(stats.total_detected, 1);
    assert_eq!(stats.total_side_effects, 0);
    assert!(sink.bookings.lock().unwrap().is_empty());

    scheduler.stop_all().await;
}

#[tokio::test]
async fn restart_never_resumes_hot() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("autobook.redb");

    let source = ScriptedSource::new();
    source.set_records(&tenant(), &["1", "2"]);
    let sink = Arc::new(RecordingSink::default());

    {
        let store = StateStore::open(&db_path).unwrap();
        let scheduler = Scheduler::new(
            fast_config(),
            store.clone(),
            source.clone(),
            sink.clone(),
            Arc::new(AlwaysConfigured),
        )
        .await
        .unwrap();
        scheduler.start(tenant()).await;
        settle().await;
        scheduler.stop_all().await;
        // Let the tenant task drain so the database handle is released.
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Simulate a crash that left "running" on disk.
        let mut stats = store.get_stats("acme/west").unwrap().unwrap();
        stats.status = TenantStatus::Running;
        stats.consecutive_errors = 4;
        store.put_stats(&stats).unwrap();
    }

    let store = StateStore::open(&db_path).unwrap();
    let scheduler = Scheduler::new(
        fast_config(),
        store,
        source,
        sink,
        Arc::new(AlwaysConfigured),
    )
    .await
    .unwrap();

    let status = scheduler.status().await;
    assert!(!status.is_running);
    let stats = &status.tenants[0];
    assert_eq!(stats.status, TenantStatus::Stopped);
    assert_eq!(stats.consecutive_errors, 0);
    // History survives the restart.
    assert!(stats.total_runs >= 1);
}

#[tokio::test]
async fn maintenance_loop_honors_shutdown() {
    let source = ScriptedSource::new();
    let scheduler = Scheduler::new(
        fast_config(),
        StateStore::open_in_memory().unwrap(),
        source,
        Arc::new(RecordingSink::default()),
        Arc::new(AlwaysConfigured),
    )
    .await
    .unwrap();

    let scheduler = Arc::new(scheduler);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = scheduler.clone();
    let handle = tokio::spawn(async move { worker.run_maintenance(shutdown_rx).await });

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("maintenance loop must stop on shutdown")
        .unwrap();
}

#[tokio::test]
async fn tenants_tick_independently() {
    let west = TenantKey::new("acme", "west");
    let east = TenantKey::new("acme", "east");

    let source = ScriptedSource::new();
    source.set_records(&west, &["1"]);
    source.set_records(&east, &["9"]);
    let sink = Arc::new(RecordingSink::default());

    let scheduler = Scheduler::new(
        fast_config(),
        StateStore::open_in_memory().unwrap(),
        source.clone(),
        sink.clone(),
        Arc::new(AlwaysConfigured),
    )
    .await
    .unwrap();

    scheduler.start(west.clone()).await;
    scheduler.start(east.clone()).await;
    settle().await;

    // Only west gains a record.
    source.set_records(&west, &["1", "2"]);
    next_tick().await;
    next_tick().await;

    let status = scheduler.status().await;
    assert_eq!(status.tenants.len(), 2);
    let by_key: HashMap<String, _> = status
        .tenants
        .iter()
        .map(|s| (s.table_key(), s))
        .collect();
    assert_eq!(by_key["acme/west"].total_detected, 1);
    assert_eq!(by_key["acme/east"].total_detected, 0);
    assert_eq!(status.global.total_detected, 1);

    let bookings = sink.bookings.lock().unwrap().clone();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].0, "acme/west");

    scheduler.stop_all().await;
}
