//! libSQL connection for the local queue database

use std::path::Path;

use libsql::{Builder, Connection, Database as LibSqlDatabase};

use super::migrations;
use crate::error::Result;

const IN_MEMORY: &str = ":memory:";

/// Pragmas applied to every connection; a failing pragma is logged, not fatal
const PRAGMAS: [&str; 2] = ["PRAGMA journal_mode = WAL", "PRAGMA synchronous = FULL"];

/// An open, migrated queue database
pub struct Database {
    // Kept alive for as long as `conn` is in use
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open (or create) the database file at `path`, creating missing parent
    /// directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)?,
            _ => {}
        }
        Self::build(&path.to_string_lossy()).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::build(IN_MEMORY).await
    }

    async fn build(location: &str) -> Result<Self> {
        let db = Builder::new_local(location).build().await?;
        let conn = db.connect()?;

        for pragma in PRAGMAS {
            if let Err(error) = conn.query(pragma, ()).await {
                tracing::warn!("{} failed on {}: {}", pragma, location, error);
            }
        }
        migrations::run(&conn).await?;

        Ok(Self { _db: db, conn })
    }

    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
