use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use super::{CacheKey, CacheRecord, CacheStats, CacheStore};
use crate::Error;

/// Durable cache backend. One table keyed by `cache_key`, indexed on
/// recency and kind.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }
}

impl CacheStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn upsert(&self, key: &CacheKey, payload: &str, now: i64) -> Result<(), Error> {
        let conn = self.db.lock().map_err(|_| Error::MutexPoisoned)?;
        conn.execute(
            "INSERT INTO event_cache (cache_key, kind, lookup_key, payload, created_at, last_accessed) \
            VALUES (?1, ?2, ?3, ?4, ?5, ?5) \
            ON CONFLICT(cache_key) DO UPDATE SET \
              payload = excluded.payload, \
              last_accessed = excluded.last_accessed",
            params![key.as_str(), key.kind() as i64, key.lookup_key(), payload, now],
        )?;
        Ok(())
    }

    fn get_and_touch(&self, key: &CacheKey, now: i64) -> Result<Option<String>, Error> {
        let mut conn = self.db.lock().map_err(|_| Error::MutexPoisoned)?;
        let tx = conn.transaction()?;

        let payload: Option<String> = tx
            .query_row(
                "SELECT payload FROM event_cache WHERE cache_key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        if payload.is_some() {
            tx.execute(
                "UPDATE event_cache SET last_accessed = ?2 WHERE cache_key = ?1",
                params![key.as_str(), now],
            )?;
        }
        tx.commit()?;
        Ok(payload)
    }

    fn record(&self, key: &CacheKey) -> Result<Option<CacheRecord>, Error> {
        let conn = self.db.lock().map_err(|_| Error::MutexPoisoned)?;
        let record = conn
            .query_row(
                "SELECT cache_key, kind, lookup_key, payload, created_at, last_accessed \
                FROM event_cache WHERE cache_key = ?1",
                params![key.as_str()],
                |row| {
                    Ok(CacheRecord {
                        cache_key: row.get(0)?,
                        kind: row.get::<_, i64>(1)? as u16,
                        lookup_key: row.get(2)?,
                        payload: row.get(3)?,
                        created_at: row.get(4)?,
                        last_accessed: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn payloads_by_kind(&self, kind: u16) -> Result<Vec<String>, Error> {
        let conn = self.db.lock().map_err(|_| Error::MutexPoisoned)?;
        let mut stmt = conn.prepare("SELECT payload FROM event_cache WHERE kind = ?1")?;
        let rows = stmt.query_map(params![kind as i64], |row| row.get::<_, String>(0))?;
        let mut payloads = Vec::new();
        for row in rows {
            payloads.push(row?);
        }
        Ok(payloads)
    }

    fn count(&self) -> Result<usize, Error> {
        let conn = self.db.lock().map_err(|_| Error::MutexPoisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM event_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn delete_least_recent(&self, n: usize) -> Result<usize, Error> {
        let conn = self.db.lock().map_err(|_| Error::MutexPoisoned)?;
        let deleted = conn.execute(
            "DELETE FROM event_cache WHERE cache_key IN (\
              SELECT cache_key FROM event_cache ORDER BY last_accessed ASC LIMIT ?1\
            )",
            params![n as i64],
        )?;
        Ok(deleted)
    }

    fn clear(&self) -> Result<(), Error> {
        let conn = self.db.lock().map_err(|_| Error::MutexPoisoned)?;
        conn.execute("DELETE FROM event_cache", [])?;
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, Error> {
        let conn = self.db.lock().map_err(|_| Error::MutexPoisoned)?;
        let mut stmt = conn.prepare("SELECT kind, COUNT(*) FROM event_cache GROUP BY kind")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)? as u16, row.get::<_, i64>(1)? as usize))
        })?;

        let mut stats = CacheStats::default();
        for row in rows {
            let (kind, count) = row?;
            stats.total += count;
            stats.by_kind.insert(kind, count);
        }
        Ok(stats)
    }

    fn newest_access(&self) -> Result<Option<i64>, Error> {
        let conn = self.db.lock().map_err(|_| Error::MutexPoisoned)?;
        let newest: Option<i64> =
            conn.query_row("SELECT MAX(last_accessed) FROM event_cache", [], |row| row.get(0))?;
        Ok(newest)
    }
}

fn init_schema(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS event_cache (\
            cache_key TEXT PRIMARY KEY,\
            kind INTEGER NOT NULL,\
            lookup_key TEXT NOT NULL,\
            payload TEXT NOT NULL,\
            created_at INTEGER NOT NULL,\
            last_accessed INTEGER NOT NULL\
        );\
        CREATE INDEX IF NOT EXISTS idx_event_cache_last_accessed ON event_cache(last_accessed);\
        CREATE INDEX IF NOT EXISTS idx_event_cache_kind ON event_cache(kind);",
    )?;
    Ok(())
}
