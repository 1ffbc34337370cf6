// SqliteStore: rusqlite backend for the StateStore trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is
// !Sync. Trait methods lock, run one synchronous statement, and return.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::{schema, StateStore};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an already-opened connection (tables must exist).
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        schema::table_count(&conn)
    }

    pub async fn document_summary(&self) -> Result<Vec<(String, i64, String)>> {
        let conn = self.conn.lock().await;
        schema::document_summary(&conn)
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn get_document(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        schema::get_document(&conn, key)
    }

    async fn put_document(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        schema::put_document(&conn, key, value)
    }
}

/// Open (or create) the database and run migrations.
pub fn initialize(db_path: &str) -> Result<Connection> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for database: {db_path}"))?;
        }
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {db_path}"))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    schema::create_tables(&conn)?;
    Ok(conn)
}

/// Open an existing database (fails if it doesn't exist yet).
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        anyhow::bail!("Database not found at {db_path}. Run `feedrelay init` first.");
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {db_path}"))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    schema::create_tables(&conn)?;
    Ok(conn)
}
