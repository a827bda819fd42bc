//! Provider-level ingest deduplication keyed by (provider, external_id, recorded_at).

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{IdempotencyRecord, RecordOutcome};

pub struct IdempotencyLedger<'a> {
    conn: &'a Connection,
}

impl<'a> IdempotencyLedger<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Record an identity. An existing identity only has its `last_seen_at`
    /// touched; a differing hash is reported and logged but never overwrites
    /// the stored one.
    pub fn record(
        &self,
        provider: &str,
        external_id: &str,
        recorded_at: i64,
        hash: &str,
        ingest_batch_id: Option<&str>,
    ) -> Result<RecordOutcome> {
        if let Some(existing) = self.find(provider, external_id, recorded_at)? {
            return self.touch(existing, hash);
        }

        if queries::insert_idempotency_record(
            self.conn,
            provider,
            external_id,
            recorded_at,
            hash,
            ingest_batch_id,
        )? {
            return Ok(RecordOutcome::inserted());
        }

        // Lost the insert race to a concurrent writer.
        match self.find(provider, external_id, recorded_at)? {
            Some(existing) => self.touch(existing, hash),
            None => Ok(RecordOutcome::existing(false)),
        }
    }

    /// Insert-or-ignore without the read-back.
    pub fn record_fast(
        &self,
        provider: &str,
        external_id: &str,
        recorded_at: i64,
        hash: &str,
        ingest_batch_id: Option<&str>,
    ) -> Result<RecordOutcome> {
        let inserted = queries::insert_idempotency_record(
            self.conn,
            provider,
            external_id,
            recorded_at,
            hash,
            ingest_batch_id,
        )?;
        Ok(if inserted {
            RecordOutcome::inserted()
        } else {
            RecordOutcome::existing(false)
        })
    }

    pub fn find(
        &self,
        provider: &str,
        external_id: &str,
        recorded_at: i64,
    ) -> Result<Option<IdempotencyRecord>> {
        queries::get_idempotency_record(self.conn, provider, external_id, recorded_at)
    }

    /// Earliest record whose payload hash matches.
    pub fn find_by_payload(&self, provider: &str, hash: &str) -> Result<Option<IdempotencyRecord>> {
        queries::find_idempotency_by_hash(self.conn, provider, hash)
    }

    fn touch(&self, existing: IdempotencyRecord, hash: &str) -> Result<RecordOutcome> {
        queries::touch_idempotency_record(self.conn, &existing.id)?;
        let hash_mismatch = existing.hash != hash;
        if hash_mismatch {
            tracing::warn!(
                provider = %existing.provider,
                external_id = %existing.external_id,
                recorded_at = existing.recorded_at,
                "Idempotency hash mismatch, keeping stored hash"
            );
        }
        Ok(RecordOutcome::existing(hash_mismatch))
    }
}
