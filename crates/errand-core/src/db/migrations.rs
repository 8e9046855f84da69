//! Schema migrations for the queue database

use libsql::Connection;

use crate::error::Result;

/// Ordered schema steps; index + 1 is the version each step produces
const MIGRATIONS: &[&[&str]] = &[&[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS kv_store (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )",
]];

/// Bring the schema up to the latest version
pub async fn run(conn: &Connection) -> Result<()> {
    let current = schema_version(conn).await?;
    for (version, statements) in (1_i64..).zip(MIGRATIONS) {
        if version > current {
            apply(conn, version, statements).await?;
        }
    }
    Ok(())
}

async fn schema_version(conn: &Connection) -> Result<i64> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            (),
        )
        .await?;
    let has_table = match rows.next().await? {
        Some(row) => row.get::<i64>(0)? > 0,
        None => false,
    };
    if !has_table {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get::<i64>(0)?),
        None => Ok(0),
    }
}

/// Apply one step atomically, recording its version in the same transaction
async fn apply(conn: &Connection, version: i64, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction().await?;
    for statement in statements {
        tx.execute(statement, ()).await?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        libsql::params![version],
    )
    .await?;
    tx.commit().await?;

    tracing::debug!("Applied schema migration v{}", version);
    Ok(())
}
