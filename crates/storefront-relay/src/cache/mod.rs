//! Bounded local event cache with least-recently-used eviction.
//!
//! [`EventCache`] is a best-effort accelerator: it never returns an error.
//! Storage goes through a [`CacheStore`]; the durable [`SqliteStore`] is used
//! when it can be opened, otherwise the process falls back to [`MemoryStore`].
//! The choice is made once in [`EventCache::open`].

mod memory;
mod sqlite;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::events::unix_timestamp_millis;
use crate::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub const MAX_CAPACITY: usize = 500;
pub const EVICTION_BATCH: usize = 50;

/// `"<kind>:<lookup_key>"`, the primary key of a cached record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    kind: u16,
    lookup_key: String,
    formatted: String,
}

impl CacheKey {
    pub fn new(kind: u16, lookup_key: impl Into<String>) -> Self {
        let lookup_key = lookup_key.into();
        let formatted = format!("{kind}:{lookup_key}");
        Self {
            kind,
            lookup_key,
            formatted,
        }
    }

    pub fn kind(&self) -> u16 {
        self.kind
    }

    pub fn lookup_key(&self) -> &str {
        &self.lookup_key
    }

    pub fn as_str(&self) -> &str {
        &self.formatted
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub cache_key: String,
    pub kind: u16,
    pub lookup_key: String,
    /// JSON-encoded payload.
    pub payload: String,
    pub created_at: i64,
    pub last_accessed: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total: usize,
    pub by_kind: BTreeMap<u16, usize>,
}

/// Storage capability behind [`EventCache`].
///
/// Every method must perform its read-modify-write atomically.
pub trait CacheStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Insert or replace; `created_at` is kept when the key already exists.
    fn upsert(&self, key: &CacheKey, payload: &str, now: i64) -> Result<(), Error>;

    /// Read the payload and bump `last_accessed` to `now` on hit.
    fn get_and_touch(&self, key: &CacheKey, now: i64) -> Result<Option<String>, Error>;

    fn record(&self, key: &CacheKey) -> Result<Option<CacheRecord>, Error>;

    fn payloads_by_kind(&self, kind: u16) -> Result<Vec<String>, Error>;

    fn count(&self) -> Result<usize, Error>;

    /// Delete up to `n` records with the smallest `last_accessed`.
    fn delete_least_recent(&self, n: usize) -> Result<usize, Error>;

    fn clear(&self) -> Result<(), Error>;

    fn stats(&self) -> Result<CacheStats, Error>;

    /// Largest `last_accessed` currently stored.
    fn newest_access(&self) -> Result<Option<i64>, Error>;
}

/// Millisecond clock that never repeats a value, so every access has a
/// distinct recency rank.
#[derive(Debug, Default)]
struct AccessClock {
    last: AtomicI64,
}

impl AccessClock {
    fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    fn tick(&self) -> i64 {
        let wall = unix_timestamp_millis();
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(wall.max(last + 1))
            })
            .unwrap_or(wall);
        wall.max(previous + 1)
    }
}

pub struct EventCache {
    store: Arc<dyn CacheStore>,
    clock: AccessClock,
    max_capacity: usize,
    eviction_batch: usize,
}

impl EventCache {
    /// Pick the backend once: SQLite at `config.db_path` when it opens,
    /// memory otherwise.
    pub fn open(config: &CacheConfig) -> Self {
        let store: Arc<dyn CacheStore> = match &config.db_path {
            Some(path) => match SqliteStore::open(path) {
                Ok(store) => {
                    info!(path = %path.display(), "Using durable event cache");
                    Arc::new(store)
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Durable cache unavailable, using memory");
                    Arc::new(MemoryStore::new())
                }
            },
            None => {
                debug!("No cache path configured, using memory");
                Arc::new(MemoryStore::new())
            }
        };

        Self::with_store(store, config.max_capacity, config.eviction_batch)
    }

    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), MAX_CAPACITY, EVICTION_BATCH)
    }

    pub fn with_store(store: Arc<dyn CacheStore>, max_capacity: usize, eviction_batch: usize) -> Self {
        let newest = store.newest_access().unwrap_or_else(|err| {
            warn!(error = %err, "Failed to read newest cache access");
            None
        });
        Self {
            store,
            clock: AccessClock::starting_after(newest.unwrap_or(0)),
            max_capacity,
            eviction_batch,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn put<T: Serialize>(&self, kind: u16, lookup_key: &str, payload: &T) {
        let key = CacheKey::new(kind, lookup_key);
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(err) => {
                warn!(key = %key, error = %err, "Failed to encode cache payload");
                return;
            }
        };

        if let Err(err) = self.store.upsert(&key, &json, self.clock.tick()) {
            warn!(key = %key, error = %err, "Failed to cache event");
            return;
        }
        self.evict_if_needed();
    }

    pub fn get<T: DeserializeOwned>(&self, kind: u16, lookup_key: &str) -> Option<T> {
        let key = CacheKey::new(kind, lookup_key);
        let json = match self.store.get_and_touch(&key, self.clock.tick()) {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(err) => {
                warn!(key = %key, error = %err, "Failed to read cached event");
                return None;
            }
        };

        match serde_json::from_str(&json) {
            Ok(payload) => Some(payload),
            Err(err) => {
                warn!(key = %key, error = %err, "Cached payload does not decode, treating as miss");
                None
            }
        }
    }

    /// Bulk read for warm checks; does not change recency.
    pub fn get_all_by_kind<T: DeserializeOwned>(&self, kind: u16) -> Vec<T> {
        let payloads = match self.store.payloads_by_kind(kind) {
            Ok(payloads) => payloads,
            Err(err) => {
                warn!(kind, error = %err, "Failed to read cached events by kind");
                return Vec::new();
            }
        };

        payloads
            .iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect()
    }

    /// Remove `min(eviction_batch, count - max_capacity)` least recently
    /// used records. Returns how many were removed.
    pub fn evict_if_needed(&self) -> usize {
        let count = match self.store.count() {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "Failed to count cached events");
                return 0;
            }
        };
        if count <= self.max_capacity {
            return 0;
        }

        let excess = (count - self.max_capacity).min(self.eviction_batch);
        match self.store.delete_least_recent(excess) {
            Ok(deleted) => {
                debug!(deleted, count, "Evicted least recently used events");
                deleted
            }
            Err(err) => {
                warn!(error = %err, "Failed to evict events");
                0
            }
        }
    }

    pub fn clear(&self) {
        match self.store.clear() {
            Ok(()) => info!("Event cache cleared"),
            Err(err) => warn!(error = %err, "Failed to clear cache"),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats().unwrap_or_else(|err| {
            warn!(error = %err, "Failed to read cache stats");
            CacheStats::default()
        })
    }

    /// Raw record, without touching recency.
    pub fn record(&self, kind: u16, lookup_key: &str) -> Option<CacheRecord> {
        let key = CacheKey::new(kind, lookup_key);
        self.store.record(&key).unwrap_or_else(|err| {
            warn!(key = %key, error = %err, "Failed to read cache record");
            None
        })
    }
}
