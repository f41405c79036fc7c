//! redb table definitions for the Autobook state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). Stats and global form the scheduler aggregate
//! document; the idempotency index is durable on its own.

use redb::TableDefinition;

/// Per-tenant execution stats keyed by `{client_id}/{tenant_id}`.
pub const STATS: TableDefinition<&str, &[u8]> = TableDefinition::new("stats");

/// Process-wide aggregate stats under a single fixed key.
pub const GLOBAL: TableDefinition<&str, &[u8]> = TableDefinition::new("global");

/// Idempotency records keyed by the deterministic event key.
pub const IDEMPOTENCY: TableDefinition<&str, &[u8]> = TableDefinition::new("idempotency");

/// The single row key in the `global` table.
pub const GLOBAL_KEY: &str = "global";
