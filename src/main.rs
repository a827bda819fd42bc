use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;
use std::time::Duration;

use paysettle::budget::{BudgetLedger, SqliteCounterStore};
use paysettle::config::Config;
use paysettle::db::{AppState, create_pool, init_db, migrations, queries};
use paysettle::events::EventSink;
use paysettle::jobs::{JobQueue, JobWorker};
use paysettle::models::{
    ActorType, AuditAction, CreateAdminUser, CreateOrder, CreateSku, PERM_CONTENT_RELEASE,
    PERM_FINANCE_WRITE, PERM_OPS_WRITE, SkuKind,
};
use paysettle::payments::GatewayRegistry;
use paysettle::util::AuditLogBuilder;

#[derive(Parser, Debug)]
#[command(name = "paysettle")]
#[command(about = "Payment webhook settlement and operator approvals")]
struct Cli {
    /// Seed the database with dev data (two admins, a SKU and an open order)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (non-production only)
    #[arg(long)]
    ephemeral: bool,
}

const SEED_ORDER_NO: &str = "DEV-ORDER-0001";

fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    if queries::find_order_by_no(&conn, SEED_ORDER_NO)
        .expect("Failed to check for seed data")
        .is_some()
    {
        tracing::info!("Seed data already present, skipping");
        return;
    }

    let permissions = vec![
        PERM_OPS_WRITE.to_string(),
        PERM_FINANCE_WRITE.to_string(),
        PERM_CONTENT_RELEASE.to_string(),
    ];
    let requester = queries::create_admin_user(
        &conn,
        &CreateAdminUser {
            email: "ops@paysettle.local".to_string(),
            name: "Dev Requester".to_string(),
            permissions: permissions.clone(),
        },
    )
    .expect("Failed to create dev requester");
    let reviewer = queries::create_admin_user(
        &conn,
        &CreateAdminUser {
            email: "review@paysettle.local".to_string(),
            name: "Dev Reviewer".to_string(),
            permissions,
        },
    )
    .expect("Failed to create dev reviewer");

    for admin in [&requester, &reviewer] {
        let meta = serde_json::json!({ "email": admin.email });
        AuditLogBuilder::new(&conn, state.config.audit_log_enabled)
            .actor(ActorType::System, None)
            .action(AuditAction::SeedAdminUser)
            .target("AdminUser", &admin.id)
            .meta(&meta)
            .save()
            .expect("Failed to audit seeded admin");
    }

    queries::create_sku(
        &conn,
        &CreateSku {
            sku: "REPORT_BASIC".to_string(),
            benefit_code: "REPORT_BASIC".to_string(),
            kind: SkuKind::ReportUnlock,
            unit_qty: 1,
        },
    )
    .expect("Failed to create dev sku");

    let order = queries::create_order(
        &conn,
        &CreateOrder {
            org_id: 1,
            order_no: SEED_ORDER_NO.to_string(),
            user_id: Some("dev-user".to_string()),
            anon_id: None,
            sku: "REPORT_BASIC".to_string(),
            quantity: 1,
            target_attempt_id: Some("dev-attempt-1".to_string()),
            amount_cents: 990,
            currency: "USD".to_string(),
            provider: "stub".to_string(),
        },
    )
    .expect("Failed to create dev order");

    tracing::info!("Seeded dev data:");
    tracing::info!("  requester admin: {}", requester.id);
    tracing::info!("  reviewer admin:  {}", reviewer.id);
    tracing::info!("  order:           {} (stub, 990 USD cents)", order.order_no);
}

/// Sweep expired lease locks and budget counters, and fail jobs whose
/// worker died on their last attempt.
fn spawn_cleanup_task(state: AppState) {
    let counters = SqliteCounterStore::new(state.db.clone());
    let jobs = JobQueue::new(state.db.clone());
    tokio::spawn(async move {
        let interval = Duration::from_secs(5 * 60);

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => match queries::purge_expired_locks(&conn) {
                    Ok(count) if count > 0 => {
                        tracing::debug!("Purged {} expired locks", count);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Failed to purge expired locks: {}", e),
                },
                Err(e) => {
                    tracing::warn!("Failed to get db connection for cleanup: {}", e);
                }
            }

            match counters.purge_expired(queries::now()) {
                Ok(count) if count > 0 => {
                    tracing::debug!("Purged {} expired budget counters", count);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to purge budget counters: {}", e),
            }

            match jobs.reap_stale() {
                Ok(count) if count > 0 => {
                    tracing::warn!("Failed {} jobs abandoned on their last attempt", count);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to reap stale jobs: {}", e),
            }
        }
    });

    tracing::info!("Background cleanup task started (runs every 5 minutes)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paysettle=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let dev_mode = config.environment.allows_unsigned_webhooks();
    tracing::info!("Environment: {}", config.environment.as_ref());

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let mut conn = db_pool.get().expect("Failed to get connection");
        migrations::run_migrations(&mut conn).expect("Failed to run migrations");
        init_db(&conn).expect("Failed to initialize database");
    }

    let config = Arc::new(config);
    let state = AppState {
        db: db_pool.clone(),
        gateways: Arc::new(GatewayRegistry::from_config(&config)),
        budget: Arc::new(BudgetLedger::sqlite(db_pool, config.budget.clone())),
        events: EventSink::new(config.events_webhook_url.clone()),
        config: config.clone(),
    };

    if state.events.is_enabled() {
        tracing::info!("Settlement events will be forwarded to SETTLEMENT_EVENTS_WEBHOOK_URL");
    }

    if config.admin_api_token.is_none() {
        tracing::warn!("ADMIN_API_TOKEN not set: admin endpoints will refuse every request");
    }

    if cli.seed {
        if dev_mode {
            seed_dev_data(&state);
        } else {
            tracing::warn!("--seed flag ignored: not a local, testing or ci environment");
        }
    }

    JobWorker::new(&state).spawn();
    spawn_cleanup_task(state.clone());

    let app = paysettle::app(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && dev_mode;
    let db_path = config.database_path.clone();
    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("paysettle listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
