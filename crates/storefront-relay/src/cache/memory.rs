use std::collections::HashMap;
use std::sync::Mutex;

use super::{CacheKey, CacheRecord, CacheStats, CacheStore};
use crate::Error;

/// Process-local fallback backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, CacheRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn upsert(&self, key: &CacheKey, payload: &str, now: i64) -> Result<(), Error> {
        let mut records = self.records.lock().map_err(|_| Error::MutexPoisoned)?;
        records
            .entry(key.as_str().to_string())
            .and_modify(|record| {
                record.payload = payload.to_string();
                record.last_accessed = now;
            })
            .or_insert_with(|| CacheRecord {
                cache_key: key.as_str().to_string(),
                kind: key.kind(),
                lookup_key: key.lookup_key().to_string(),
                payload: payload.to_string(),
                created_at: now,
                last_accessed: now,
            });
        Ok(())
    }

    fn get_and_touch(&self, key: &CacheKey, now: i64) -> Result<Option<String>, Error> {
        let mut records = self.records.lock().map_err(|_| Error::MutexPoisoned)?;
        Ok(records.get_mut(key.as_str()).map(|record| {
            record.last_accessed = now;
            record.payload.clone()
        }))
    }

    fn record(&self, key: &CacheKey) -> Result<Option<CacheRecord>, Error> {
        let records = self.records.lock().map_err(|_| Error::MutexPoisoned)?;
        Ok(records.get(key.as_str()).cloned())
    }

    fn payloads_by_kind(&self, kind: u16) -> Result<Vec<String>, Error> {
        let records = self.records.lock().map_err(|_| Error::MutexPoisoned)?;
        Ok(records
            .values()
            .filter(|record| record.kind == kind)
            .map(|record| record.payload.clone())
            .collect())
    }

    fn count(&self) -> Result<usize, Error> {
        let records = self.records.lock().map_err(|_| Error::MutexPoisoned)?;
        Ok(records.len())
    }

    fn delete_least_recent(&self, n: usize) -> Result<usize, Error> {
        let mut records = self.records.lock().map_err(|_| Error::MutexPoisoned)?;
        let mut by_access: Vec<(i64, String)> = records
            .values()
            .map(|record| (record.last_accessed, record.cache_key.clone()))
            .collect();
        by_access.sort();

        let mut deleted = 0;
        for (_, key) in by_access.into_iter().take(n) {
            if records.remove(&key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn clear(&self) -> Result<(), Error> {
        let mut records = self.records.lock().map_err(|_| Error::MutexPoisoned)?;
        records.clear();
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, Error> {
        let records = self.records.lock().map_err(|_| Error::MutexPoisoned)?;
        let mut stats = CacheStats {
            total: records.len(),
            ..CacheStats::default()
        };
        for record in records.values() {
            *stats.by_kind.entry(record.kind).or_default() += 1;
        }
        Ok(stats)
    }

    fn newest_access(&self) -> Result<Option<i64>, Error> {
        let records = self.records.lock().map_err(|_| Error::MutexPoisoned)?;
        Ok(records.values().map(|record| record.last_accessed).max())
    }
}
