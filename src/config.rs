use std::env;
use std::str::FromStr;

use strum::{AsRefStr, EnumString};

/// Deployment environment. Unsigned webhooks and the stub provider are only
/// reachable outside of production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Environment {
    Production,
    Staging,
    Local,
    Testing,
    Ci,
}

impl Environment {
    /// Environments where a missing webhook secret may bypass verification.
    pub fn allows_unsigned_webhooks(&self) -> bool {
        matches!(self, Self::Local | Self::Testing | Self::Ci)
    }

    pub fn allows_stub_provider(&self) -> bool {
        self.allows_unsigned_webhooks()
    }
}

/// Secrets and timing window for one provider's webhook signatures.
#[derive(Debug, Clone, Default)]
pub struct WebhookSecrets {
    /// Every configured secret is tried, so a rotation can overlap.
    pub secrets: Vec<String>,
    pub tolerance_secs: i64,
}

impl WebhookSecrets {
    pub fn new(secrets: Vec<String>, tolerance_secs: i64) -> Self {
        Self {
            secrets,
            tolerance_secs,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.secrets.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub enabled: bool,
    pub fail_open: bool,
    pub key_prefix: String,
    pub daily_tokens: u64,
    pub monthly_tokens: u64,
    pub daily_usd: f64,
    pub monthly_usd: f64,
    /// Provider and model the guard charges requests against.
    pub provider: String,
    pub model: String,
    pub cost_per_1k_tokens_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_open: false,
            key_prefix: "ai:budget".to_string(),
            daily_tokens: 0,
            monthly_tokens: 0,
            daily_usd: 0.0,
            monthly_usd: 0.0,
            provider: "mock".to_string(),
            model: "mock-model".to_string(),
            cost_per_1k_tokens_usd: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub environment: Environment,
    pub stripe: WebhookSecrets,
    pub billing: WebhookSecrets,
    /// Bodies above this size are rejected with 413 before any parsing.
    pub max_webhook_body_bytes: usize,
    pub lock_wait_secs: u64,
    pub lock_ttl_secs: u64,
    pub audit_log_enabled: bool,
    pub admin_api_token: Option<String>,
    pub budget: BudgetConfig,
    pub events_webhook_url: Option<String>,
    pub job_poll_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let environment = env::var("APP_ENV")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Environment::Production);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env_or("PORT", 3000);
        let tolerance_secs: i64 = env_or("WEBHOOK_TOLERANCE_SECONDS", 300);

        let budget = BudgetConfig {
            enabled: env_flag("AI_BUDGET_ENABLED", true),
            fail_open: env_flag("AI_BUDGET_FAIL_OPEN", false),
            key_prefix: env::var("AI_BUDGET_KEY_PREFIX")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| "ai:budget".to_string()),
            daily_tokens: env_or("AI_BUDGET_DAILY_TOKENS", 0),
            monthly_tokens: env_or("AI_BUDGET_MONTHLY_TOKENS", 0),
            daily_usd: env_or("AI_BUDGET_DAILY_USD", 0.0),
            monthly_usd: env_or("AI_BUDGET_MONTHLY_USD", 0.0),
            provider: env::var("AI_PROVIDER").unwrap_or_else(|_| "mock".to_string()),
            model: env::var("AI_MODEL").unwrap_or_else(|_| "mock-model".to_string()),
            cost_per_1k_tokens_usd: env_or("AI_COST_PER_1K_TOKENS_USD", 0.0),
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "paysettle.db".to_string()),
            environment,
            stripe: WebhookSecrets::new(env_list("STRIPE_WEBHOOK_SECRETS"), tolerance_secs),
            billing: WebhookSecrets::new(env_list("BILLING_WEBHOOK_SECRETS"), tolerance_secs),
            max_webhook_body_bytes: env_or("MAX_WEBHOOK_BODY_BYTES", 262_144),
            lock_wait_secs: env_or("WEBHOOK_LOCK_WAIT_SECONDS", 5),
            lock_ttl_secs: env_or("WEBHOOK_LOCK_TTL_SECONDS", 10),
            audit_log_enabled: env_flag("AUDIT_LOG_ENABLED", true),
            admin_api_token: env::var("ADMIN_API_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
            budget,
            events_webhook_url: env::var("SETTLEMENT_EVENTS_WEBHOOK_URL")
                .ok()
                .filter(|u| !u.trim().is_empty()),
            job_poll_secs: env_or("JOB_POLL_SECONDS", 2),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
