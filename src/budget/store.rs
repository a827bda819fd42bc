//! Counter backends for the budget ledger.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::{OptionalExtension, params};

use super::Usage;
use crate::db::DbPool;
use crate::error::{AppError, Result};

/// Atomic per-key counters with an expiry. Increments must be atomic with
/// respect to concurrent callers on the same key.
pub trait CounterStore: Send + Sync {
    /// Add `delta` (and one request) to `key`, refresh its expiry and
    /// return the new totals. An expired key starts again from zero.
    fn increment(&self, key: &str, delta: &Usage, ttl_secs: i64, now: i64) -> Result<Usage>;

    /// Current totals; a missing or expired key reads as zero.
    fn get(&self, key: &str, now: i64) -> Result<Usage>;
}

pub struct SqliteCounterStore {
    db: DbPool,
}

impl SqliteCounterStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn purge_expired(&self, now: i64) -> Result<usize> {
        let conn = self.db.get()?;
        Ok(conn.execute(
            "DELETE FROM budget_counters WHERE expires_at <= ?1",
            params![now],
        )?)
    }
}

impl CounterStore for SqliteCounterStore {
    fn increment(&self, key: &str, delta: &Usage, ttl_secs: i64, now: i64) -> Result<Usage> {
        let conn = self.db.get()?;
        let usage = conn.query_row(
            "INSERT INTO budget_counters (key, tokens_in, tokens_out, cost_usd, requests, expires_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)
             ON CONFLICT(key) DO UPDATE SET
                tokens_in = CASE WHEN budget_counters.expires_at <= ?6 THEN excluded.tokens_in
                                 ELSE budget_counters.tokens_in + excluded.tokens_in END,
                tokens_out = CASE WHEN budget_counters.expires_at <= ?6 THEN excluded.tokens_out
                                  ELSE budget_counters.tokens_out + excluded.tokens_out END,
                cost_usd = CASE WHEN budget_counters.expires_at <= ?6 THEN excluded.cost_usd
                                ELSE budget_counters.cost_usd + excluded.cost_usd END,
                requests = CASE WHEN budget_counters.expires_at <= ?6 THEN 1
                                ELSE budget_counters.requests + 1 END,
                expires_at = excluded.expires_at
             RETURNING tokens_in, tokens_out, cost_usd, requests",
            params![
                key,
                delta.tokens_in,
                delta.tokens_out,
                delta.cost_usd,
                now + ttl_secs,
                now
            ],
            |row| {
                Ok(Usage {
                    tokens_in: row.get(0)?,
                    tokens_out: row.get(1)?,
                    cost_usd: row.get(2)?,
                    requests: row.get(3)?,
                })
            },
        )?;
        Ok(usage)
    }

    fn get(&self, key: &str, now: i64) -> Result<Usage> {
        let conn = self.db.get()?;
        let usage = conn
            .query_row(
                "SELECT tokens_in, tokens_out, cost_usd, requests FROM budget_counters
                 WHERE key = ?1 AND expires_at > ?2",
                params![key, now],
                |row| {
                    Ok(Usage {
                        tokens_in: row.get(0)?,
                        tokens_out: row.get(1)?,
                        cost_usd: row.get(2)?,
                        requests: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(usage.unwrap_or_default())
    }
}

/// In-process counters. Can be switched to fail every call, which is how
/// tests exercise the unavailable-ledger paths.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, (Usage, i64)>>,
    unavailable: AtomicBool,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Internal("counter store unavailable".into()));
        }
        Ok(())
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(&self, key: &str, delta: &Usage, ttl_secs: i64, now: i64) -> Result<Usage> {
        self.check_available()?;
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| AppError::Internal("counter store poisoned".into()))?;
        let entry = counters.entry(key.to_string()).or_default();
        if entry.1 <= now {
            entry.0 = Usage::default();
        }
        entry.0.tokens_in += delta.tokens_in;
        entry.0.tokens_out += delta.tokens_out;
        entry.0.cost_usd += delta.cost_usd;
        entry.0.requests += 1;
        entry.1 = now + ttl_secs;
        Ok(entry.0)
    }

    fn get(&self, key: &str, now: i64) -> Result<Usage> {
        self.check_available()?;
        let counters = self
            .counters
            .lock()
            .map_err(|_| AppError::Internal("counter store poisoned".into()))?;
        Ok(counters
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(usage, _)| *usage)
            .unwrap_or_default())
    }
}
