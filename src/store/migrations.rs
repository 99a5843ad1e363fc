//! Version-tracked schema migrations.
//!
//! `run_migrations()` reads the highest applied version from `_migrations`
//! and applies only the newer entries of `MIGRATIONS`, in order.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Append new versions at the end; never edit an applied one.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "email_embeddings",
        sql: r#"
            CREATE TABLE IF NOT EXISTS email_embeddings (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_email_embeddings_message_id ON email_embeddings(message_id);
            CREATE INDEX IF NOT EXISTS idx_email_embeddings_thread_id ON email_embeddings(thread_id);
        "#,
    },
    Migration {
        version: 2,
        name: "business_rule",
        sql: r#"
            CREATE TABLE IF NOT EXISTS business_rule (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_key TEXT NOT NULL UNIQUE,
                rule_content TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
    },
];

pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let applied = current_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        tracing::info!(version = migration.version, name = migration.name, "Applying migration");
        conn.execute_batch(migration.sql).await.map_err(|e| {
            DatabaseError::Migration(format!(
                "Migration V{} ({}) failed: {e}",
                migration.version, migration.name
            ))
        })?;
        conn.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to record V{}: {e}", migration.version)))?;
    }

    tracing::debug!(version = current_version(conn).await?, "Database schema up to date");
    Ok(())
}

/// Highest applied version, 0 for a fresh database.
pub async fn current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("Bad migration version: {e}"))),
        None => Ok(0),
    }
}

/// Latest version this binary knows about.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}
