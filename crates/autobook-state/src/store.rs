//! StateStore — redb-backed persistence for the Autobook engine.
//!
//! Typed CRUD over the scheduler aggregate (stats + global) and the
//! idempotency index. Supports on-disk and in-memory backends (the
//! latter for testing). `load_state` never yields a "hot" engine:
//! every tenant comes back `stopped` and must be started explicitly.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::{GLOBAL, GLOBAL_KEY, IDEMPOTENCY, STATS};
use crate::types::{
    ExecutionStats, GlobalStats, IdempotencyRecord, PersistedState, TenantStatus,
};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(STATS).map_err(map_err!(Table))?;
        txn.open_table(GLOBAL).map_err(map_err!(Table))?;
        txn.open_table(IDEMPOTENCY).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Execution stats ────────────────────────────────────────────

    /// Insert or update one tenant's execution stats.
    pub fn put_stats(&self, stats: &ExecutionStats) -> StateResult<()> {
        let key = stats.table_key();
        let value = serde_json::to_vec(stats).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(STATS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get one tenant's execution stats by composite key.
    pub fn get_stats(&self, key: &str) -> StateResult<Option<ExecutionStats>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STATS).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let stats: ExecutionStats =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(stats))
            }
            None => Ok(None),
        }
    }

    /// List execution stats for all tenants.
    pub fn list_stats(&self) -> StateResult<Vec<ExecutionStats>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STATS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let stats: ExecutionStats =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(stats);
        }
        Ok(results)
    }

    /// Delete one tenant's stats. Returns true if they existed.
    pub fn delete_stats(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(STATS).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Global stats ───────────────────────────────────────────────

    pub fn put_global(&self, global: &GlobalStats) -> StateResult<()> {
        let value = serde_json::to_vec(global).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(GLOBAL).map_err(map_err!(Table))?;
            table
                .insert(GLOBAL_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn get_global(&self) -> StateResult<Option<GlobalStats>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(GLOBAL).map_err(map_err!(Table))?;
        match table.get(GLOBAL_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                let global: GlobalStats =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(global))
            }
            None => Ok(None),
        }
    }

    // ── Aggregate document ─────────────────────────────────────────

    /// Load the scheduler aggregate after a restart.
    ///
    /// Every tenant comes back `stopped` with a cleared error streak,
    /// regardless of what was persisted: an operator must start each
    /// tenant explicitly, so a crash never silently resurrects an
    /// automation.
    pub fn load_state(&self) -> StateResult<PersistedState> {
        let mut stats = self.list_stats()?;
        for entry in &mut stats {
            entry.status = TenantStatus::Stopped;
            entry.consecutive_errors = 0;
        }
        let global = self.get_global()?.unwrap_or_default();
        debug!(tenants = stats.len(), "state loaded, all tenants stopped");
        Ok(PersistedState { stats, global })
    }

    /// Write the whole scheduler aggregate in one transaction.
    ///
    /// Atomic: a failure leaves the previous durable copy intact.
    pub fn save_state(&self, state: &PersistedState) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(STATS).map_err(map_err!(Table))?;
            for entry in &state.stats {
                let key = entry.table_key();
                let value = serde_json::to_vec(entry).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            let mut global = txn.open_table(GLOBAL).map_err(map_err!(Table))?;
            let value = serde_json::to_vec(&state.global).map_err(map_err!(Serialize))?;
            global
                .insert(GLOBAL_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Idempotency index ──────────────────────────────────────────

    /// Insert or update an idempotency record.
    pub fn put_idempotency(&self, record: &IdempotencyRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(IDEMPOTENCY).map_err(map_err!(Table))?;
            table
                .insert(record.key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn get_idempotency(&self, key: &str) -> StateResult<Option<IdempotencyRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(IDEMPOTENCY).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: IdempotencyRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List the whole idempotency index.
    pub fn list_idempotency(&self) -> StateResult<Vec<IdempotencyRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(IDEMPOTENCY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: IdempotencyRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Remove a batch of idempotency records in one transaction.
    /// Returns the number that existed.
    pub fn remove_idempotency_batch(&self, keys: &[String]) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut removed = 0;
        {
            let mut table = txn.open_table(IDEMPOTENCY).map_err(map_err!(Table))?;
            for key in keys {
                if table.remove(key.as_str()).map_err(map_err!(Write))?.is_some() {
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }
}
