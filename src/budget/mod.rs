//! Token and cost circuit breaker for AI calls.
//!
//! Usage is counted per `(provider, model, subject)` in a day bucket and a
//! month bucket. `check_and_throw` refuses a call that would push a bucket
//! past its configured limit. A limit of zero means unlimited.

pub mod guard;
pub mod store;

pub use store::{CounterStore, MemoryCounterStore, SqliteCounterStore};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::config::BudgetConfig;
use crate::db::DbPool;
use crate::error::ErrorCode;

const DAY_TTL_SECS: i64 = 172_800;
const MONTH_TTL_SECS: i64 = 3_456_000;

const PROVIDER_MAX: usize = 32;
const MODEL_MAX: usize = 64;
const SUBJECT_MAX: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Period {
    Day,
    Month,
}

impl Period {
    fn bucket(self, now: DateTime<Utc>) -> String {
        match self {
            Period::Day => now.format("%Y-%m-%d").to_string(),
            Period::Month => now.format("%Y-%m").to_string(),
        }
    }

    fn ttl_secs(self) -> i64 {
        match self {
            Period::Day => DAY_TTL_SECS,
            Period::Month => MONTH_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Usage {
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub cost_usd: f64,
    pub requests: i64,
}

impl Usage {
    pub fn total_tokens(&self) -> i64 {
        self.tokens_in + self.tokens_out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub day: Usage,
    pub month: Usage,
}

/// Who is spending: provider, model and a subject such as `user:42`.
#[derive(Debug, Clone, Copy)]
pub struct BudgetScope<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub subject: &'a str,
}

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("AI budget exceeded ({metric}, {period}).")]
    Exceeded { period: Period, metric: &'static str },

    #[error("AI budget ledger unavailable: {0}")]
    LedgerUnavailable(String),
}

impl BudgetError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BudgetError::Exceeded { .. } => ErrorCode::AiBudgetExceeded,
            BudgetError::LedgerUnavailable(_) => ErrorCode::AiBudgetLedgerUnavailable,
        }
    }
}

pub struct BudgetLedger {
    store: Arc<dyn CounterStore>,
    config: BudgetConfig,
}

impl BudgetLedger {
    pub fn new(store: Arc<dyn CounterStore>, config: BudgetConfig) -> Self {
        Self { store, config }
    }

    pub fn sqlite(db: DbPool, config: BudgetConfig) -> Self {
        Self::new(Arc::new(SqliteCounterStore::new(db)), config)
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// `{prefix}:{day|month}:{bucket}:{provider}:{model}:{subject}`
    pub fn key(&self, period: Period, scope: &BudgetScope, now: DateTime<Utc>) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.config.key_prefix,
            period.as_ref(),
            period.bucket(now),
            sanitize_segment(scope.provider, PROVIDER_MAX),
            sanitize_segment(scope.model, MODEL_MAX),
            sanitize_segment(scope.subject, SUBJECT_MAX),
        )
    }

    /// Record a finished call in both buckets.
    pub fn increment_tokens(
        &self,
        scope: &BudgetScope,
        tokens_in: i64,
        tokens_out: i64,
        cost_usd: f64,
        now: DateTime<Utc>,
    ) -> Result<UsageSnapshot, BudgetError> {
        let delta = Usage {
            tokens_in: tokens_in.max(0),
            tokens_out: tokens_out.max(0),
            cost_usd: cost_usd.max(0.0),
            requests: 0,
        };
        let ts = now.timestamp();

        let mut snapshot = UsageSnapshot::default();
        for period in [Period::Day, Period::Month] {
            let key = self.key(period, scope, now);
            let usage = match self.store.increment(&key, &delta, period.ttl_secs(), ts) {
                Ok(usage) => usage,
                Err(e) => self.ledger_failure(&key, e.to_string())?,
            };
            match period {
                Period::Day => snapshot.day = usage,
                Period::Month => snapshot.month = usage,
            }
        }
        Ok(snapshot)
    }

    pub fn get_usage(
        &self,
        scope: &BudgetScope,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<Usage, BudgetError> {
        let key = self.key(period, scope, now);
        match self.store.get(&key, now.timestamp()) {
            Ok(usage) => Ok(usage),
            Err(e) => self.ledger_failure(&key, e.to_string()),
        }
    }

    /// Refuse a call of `add_tokens`/`add_cost_usd` that would exceed the
    /// `period` limits. No-op when the breaker is disabled.
    pub fn check_and_throw(
        &self,
        scope: &BudgetScope,
        add_tokens: i64,
        add_cost_usd: f64,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<(), BudgetError> {
        if !self.config.enabled {
            return Ok(());
        }

        let usage = self.get_usage(scope, period, now)?;
        let (tokens_limit, cost_limit) = match period {
            Period::Day => (self.config.daily_tokens, self.config.daily_usd),
            Period::Month => (self.config.monthly_tokens, self.config.monthly_usd),
        };

        if tokens_limit > 0 && usage.total_tokens() + add_tokens > tokens_limit as i64 {
            tracing::info!(
                subject = scope.subject,
                period = period.as_ref(),
                used = usage.total_tokens(),
                limit = tokens_limit,
                "AI budget exceeded (tokens)"
            );
            return Err(BudgetError::Exceeded {
                period,
                metric: "tokens",
            });
        }
        if cost_limit > 0.0 && usage.cost_usd + add_cost_usd > cost_limit {
            tracing::info!(
                subject = scope.subject,
                period = period.as_ref(),
                used = usage.cost_usd,
                limit = cost_limit,
                "AI budget exceeded (cost)"
            );
            return Err(BudgetError::Exceeded {
                period,
                metric: "cost",
            });
        }
        Ok(())
    }

    /// Fail closed by default. Fail-open reads as zero usage but is still
    /// reported.
    fn ledger_failure(&self, key: &str, error: String) -> Result<Usage, BudgetError> {
        if self.config.fail_open || !self.config.enabled {
            tracing::warn!(key, "Budget ledger unavailable, failing open: {}", error);
            return Ok(Usage::default());
        }
        tracing::error!(key, "Budget ledger unavailable: {}", error);
        Err(BudgetError::LedgerUnavailable(error))
    }
}

/// Trim, default to `unknown`, replace anything outside `[A-Za-z0-9_:.-]`
/// with `_` and cap at `max` characters.
pub fn sanitize_segment(value: &str, max: usize) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(max)
        .collect()
}
