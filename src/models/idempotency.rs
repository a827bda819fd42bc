use serde::{Deserialize, Serialize};

/// Provider-level ingest identity: (provider, external_id, recorded_at).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub id: String,
    pub provider: String,
    pub external_id: String,
    pub recorded_at: i64,
    pub hash: String,
    pub ingest_batch_id: Option<String>,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub inserted: bool,
    pub existing: bool,
    /// The stored hash differs from the one presented. The stored hash wins.
    pub hash_mismatch: bool,
}

impl RecordOutcome {
    pub fn inserted() -> Self {
        Self {
            inserted: true,
            existing: false,
            hash_mismatch: false,
        }
    }

    pub fn existing(hash_mismatch: bool) -> Self {
        Self {
            inserted: false,
            existing: true,
            hash_mismatch,
        }
    }
}
