//! Schema versioning.
//!
//! Migrations are embedded in the binary and run on startup before
//! `init_db`. The applied version is tracked with `PRAGMA user_version`.

use rusqlite::Connection;
use thiserror::Error;

pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up: fn(&Connection) -> rusqlite::Result<()>,
}

/// Append new migrations to the end.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "baseline",
        up: migration_001_baseline,
    },
    Migration {
        version: 2,
        description: "payment event payload retention",
        up: migration_002_payload_columns,
    },
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration {version} failed: {message}")]
    MigrationFailed { version: i32, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub fn get_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

fn set_version(conn: &Connection, version: i32) -> rusqlite::Result<()> {
    conn.pragma_update(None, "user_version", version)
}

/// Run every pending migration, each in its own transaction.
pub fn run_migrations(conn: &mut Connection) -> Result<(), MigrationError> {
    let current_version = get_version(conn)?;

    let pending: Vec<_> = MIGRATIONS
        .iter()
        .filter(|m| m.version > current_version)
        .collect();

    if pending.is_empty() {
        tracing::debug!("Database at version {} (up to date)", current_version);
        return Ok(());
    }

    tracing::info!(
        "Database at version {}, {} migration(s) pending",
        current_version,
        pending.len()
    );

    for migration in pending {
        tracing::info!(
            "Running migration {}: {}",
            migration.version,
            migration.description
        );

        let tx = conn.transaction()?;
        match (migration.up)(&tx) {
            Ok(()) => {
                set_version(&tx, migration.version)?;
                tx.commit()?;
            }
            Err(e) => {
                tracing::error!("Migration {} failed: {}", migration.version, e);
                return Err(MigrationError::MigrationFailed {
                    version: migration.version,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |row| row.get(0),
    )
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.iter().any(|n| n == column))
}

/// Fresh databases get their schema from `init_db`.
fn migration_001_baseline(conn: &Connection) -> rusqlite::Result<()> {
    if table_exists(conn, "orders")? {
        tracing::debug!("Existing database detected, baseline migration is no-op");
    }
    Ok(())
}

/// Early databases stored only an excerpt of each webhook body.
fn migration_002_payload_columns(conn: &Connection) -> rusqlite::Result<()> {
    if !table_exists(conn, "payment_events")? {
        return Ok(());
    }
    for (column, ty) in [
        ("payload_json", "TEXT"),
        ("payload_sha256", "TEXT"),
        ("payload_size_bytes", "INTEGER"),
        ("handled_at", "INTEGER"),
    ] {
        if !column_exists(conn, "payment_events", column)? {
            conn.execute_batch(&format!(
                "ALTER TABLE payment_events ADD COLUMN {} {}",
                column, ty
            ))?;
        }
    }
    Ok(())
}
