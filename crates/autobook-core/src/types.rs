//! Core domain types.
//!
//! Every cache entry, timer, and statistic in the engine is addressed by
//! a `TenantKey` — the composite (client, tenant) pair. Nothing is ever
//! keyed by only one half of the pair.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The (client, tenant) pair scoping all engine state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantKey {
    pub client_id: String,
    pub tenant_id: String,
}

impl TenantKey {
    pub fn new(client_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            tenant_id: tenant_id.into(),
        }
    }

    /// Build the composite key used for maps and store tables.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.client_id, self.tenant_id)
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.client_id, self.tenant_id)
    }
}

/// An opaque entity fetched from the tenant's upstream collection.
///
/// Upstream is expected to expose a stable natural key per record (a
/// phone-number-equivalent field). Records without one still get a
/// stable identity via a content hash over their visible fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRecord {
    /// Natural identity field, when upstream provides one.
    pub natural_key: Option<String>,
    /// Human-readable label (e.g. a contact name).
    pub label: String,
    /// Remaining upstream fields. Sorted map so the content hash is
    /// independent of upstream field order.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ExternalRecord {
    pub fn new(natural_key: Option<String>, label: impl Into<String>) -> Self {
        Self {
            natural_key,
            label: label.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// The record's diffing identity.
    ///
    /// Normalized natural key when present and non-empty, otherwise a
    /// truncated sha256 over label + attributes. A hash identity stays
    /// stable when upstream reorders its collection.
    pub fn identity(&self) -> String {
        if let Some(key) = &self.natural_key {
            let normalized = normalize_identity(key);
            if !normalized.is_empty() {
                return normalized;
            }
        }
        self.content_hash()
    }

    fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.label.as_bytes());
        for (k, v) in &self.attributes {
            hasher.update(b"\0");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        format!("sha:{}", &digest[..16])
    }
}

/// Canonical form for identity strings: trimmed and case-folded.
///
/// Two spellings of the same identity must collapse to one cache entry
/// and one idempotency guard.
pub fn normalize_identity(raw: &str) -> String {
    raw.trim().to_lowercase()
}
