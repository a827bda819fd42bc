mod from_row;
pub mod migrations;
pub mod queries;
mod schema;

pub use from_row::{FromRow, query_all, query_one};
pub use schema::init_db;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::budget::BudgetLedger;
use crate::config::Config;
use crate::events::EventSink;
use crate::payments::GatewayRegistry;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub gateways: Arc<GatewayRegistry>,
    pub budget: Arc<BudgetLedger>,
    pub events: EventSink,
}

/// Every pooled connection waits on a busy database instead of failing
/// immediately, and enforces foreign keys.
pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.busy_timeout(Duration::from_millis(5000))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
    });
    Pool::builder().max_size(10).build(manager)
}
