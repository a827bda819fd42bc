//! Lease locks stored in SQLite.
//!
//! A lock is a row in `locks` keyed by name. Acquisition inserts the row, or
//! takes it over once the previous holder's lease has expired, so a crashed
//! holder blocks others for at most one TTL. Release deletes the row only if
//! the caller still owns it.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use crate::db::{DbPool, queries};

const POLL_START: Duration = Duration::from_millis(25);
const POLL_MAX: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out waiting for lock {0}")]
    Timeout(String),

    #[error("lock backend error: {0}")]
    Backend(String),
}

impl From<crate::error::AppError> for LockError {
    fn from(e: crate::error::AppError) -> Self {
        LockError::Backend(e.to_string())
    }
}

impl From<r2d2::Error> for LockError {
    fn from(e: r2d2::Error) -> Self {
        LockError::Backend(e.to_string())
    }
}

#[derive(Clone)]
pub struct DistributedLock {
    db: DbPool,
}

impl DistributedLock {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Try once. Returns `None` if someone else holds a live lease.
    pub fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>, LockError> {
        let owner = Uuid::new_v4().to_string();
        let conn = self.db.get()?;
        let ttl_secs = ttl.as_secs().max(1) as i64;
        if queries::try_acquire_lock(&conn, key, &owner, ttl_secs)? {
            Ok(Some(LockGuard {
                db: self.db.clone(),
                key: key.to_string(),
                owner,
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Poll until the lease is ours or `wait` elapses.
    pub async fn acquire(
        &self,
        key: &str,
        wait: Duration,
        ttl: Duration,
    ) -> Result<LockGuard, LockError> {
        let deadline = Instant::now() + wait;
        let mut delay = POLL_START;

        loop {
            if let Some(guard) = self.try_acquire(key, ttl)? {
                return Ok(guard);
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(key, "Lock wait elapsed");
                return Err(LockError::Timeout(key.to_string()));
            }

            sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(POLL_MAX);
        }
    }
}

/// Held lease. Dropping the guard releases it.
pub struct LockGuard {
    db: DbPool,
    key: String,
    owner: String,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .finish()
    }
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns false if the lease had already expired and been taken over.
    pub fn release(mut self) -> Result<bool, LockError> {
        self.released = true;
        let conn = self.db.get()?;
        Ok(queries::release_lock(&conn, &self.key, &self.owner)?)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let result = self
            .db
            .get()
            .map_err(LockError::from)
            .and_then(|conn| Ok(queries::release_lock(&conn, &self.key, &self.owner)?));
        if let Err(e) = result {
            tracing::warn!(key = %self.key, "Failed to release lock: {}", e);
        }
    }
}
