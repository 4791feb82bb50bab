//! Storage backends for rate-limit records.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rusqlite::TransactionBehavior;

use crate::db::{DbPool, queries};
use crate::error::Result;

use super::RateLimitRecord;

/// Keyed record storage with expiry.
///
/// `update` is the only read-modify-write path and must be atomic per key so
/// concurrent failures against the same subject are never lost.
pub trait RateLimitStore: Send + Sync {
    /// Live record for `key`; expired records read as absent.
    fn get(&self, key: &str, now: i64) -> Result<Option<RateLimitRecord>>;

    fn set(&self, key: &str, record: &RateLimitRecord, expires_at: i64) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Replace the record for `key` with `apply(current)`, holding the key for the duration.
    /// The stored expiry becomes `RateLimitRecord::expires_at` of the result.
    fn update(
        &self,
        key: &str,
        now: i64,
        apply: &mut dyn FnMut(Option<RateLimitRecord>) -> RateLimitRecord,
    ) -> Result<RateLimitRecord>;

    /// Remove expired records, returning how many were dropped.
    fn purge_expired(&self, now: i64) -> Result<usize>;
}

#[derive(Debug, Clone, Copy)]
struct Stored {
    record: RateLimitRecord,
    expires_at: i64,
}

/// Process-local store. Limits are per instance.
#[derive(Default)]
pub struct MemoryRateLimitStore {
    entries: DashMap<String, Stored>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn get(&self, key: &str, now: i64) -> Result<Option<RateLimitRecord>> {
        // Copy out before touching the map again; holding a shard guard across remove deadlocks
        let stored = self.entries.get(key).map(|e| *e.value());
        match stored {
            Some(s) if s.expires_at > now => Ok(Some(s.record)),
            Some(_) => {
                self.entries.remove_if(key, |_, s| s.expires_at <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, record: &RateLimitRecord, expires_at: i64) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Stored {
                record: *record,
                expires_at,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        now: i64,
        apply: &mut dyn FnMut(Option<RateLimitRecord>) -> RateLimitRecord,
    ) -> Result<RateLimitRecord> {
        // The entry guard holds the shard lock until it is dropped
        let next = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let live = (current.expires_at > now).then_some(current.record);
                let next = apply(live);
                occupied.insert(Stored {
                    record: next,
                    expires_at: next.expires_at(),
                });
                next
            }
            Entry::Vacant(vacant) => {
                let next = apply(None);
                vacant.insert(Stored {
                    record: next,
                    expires_at: next.expires_at(),
                });
                next
            }
        };
        Ok(next)
    }

    fn purge_expired(&self, now: i64) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, s| s.expires_at > now);
        Ok(before.saturating_sub(self.entries.len()))
    }
}

/// Store backed by the `rate_limits` table, shared by every process using the database.
pub struct SqliteRateLimitStore {
    pool: DbPool,
}

impl SqliteRateLimitStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl RateLimitStore for SqliteRateLimitStore {
    fn get(&self, key: &str, now: i64) -> Result<Option<RateLimitRecord>> {
        let conn = self.pool.get()?;
        queries::get_rate_limit(&conn, key, now)
    }

    fn set(&self, key: &str, record: &RateLimitRecord, expires_at: i64) -> Result<()> {
        let conn = self.pool.get()?;
        queries::upsert_rate_limit(&conn, key, record, expires_at)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.pool.get()?;
        queries::delete_rate_limit(&conn, key)?;
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        now: i64,
        apply: &mut dyn FnMut(Option<RateLimitRecord>) -> RateLimitRecord,
    ) -> Result<RateLimitRecord> {
        let mut conn = self.pool.get()?;
        // IMMEDIATE takes the write lock up front so two writers cannot both read the old count
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = queries::get_rate_limit(&tx, key, now)?;
        let next = apply(current);
        queries::upsert_rate_limit(&tx, key, &next, next.expires_at())?;
        tx.commit()?;
        Ok(next)
    }

    fn purge_expired(&self, now: i64) -> Result<usize> {
        let conn = self.pool.get()?;
        queries::purge_expired_rate_limits(&conn, now)
    }
}
