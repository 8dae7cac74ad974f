//! SQLite database backing the record store

use crate::store::RecordStore;
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- One row per document; tables are logical, not physical
            CREATE TABLE IF NOT EXISTS records (
                tbl TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (tbl, key)
            );
            CREATE INDEX IF NOT EXISTS idx_records_tbl ON records(tbl);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }
}

impl RecordStore for Database {
    fn fetch_all(&self, table: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare("SELECT key, value FROM records WHERE tbl = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![table], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut results: Vec<(String, String)> = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    fn fetch_one(&self, table: &str, key: &str) -> Result<String> {
        let conn = self.conn.lock();

        conn.query_row(
            "SELECT value FROM records WHERE tbl = ?1 AND key = ?2",
            params![table, key],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| Error::not_found(table, key))
    }

    fn insert(&self, table: &str, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT OR REPLACE INTO records (tbl, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![table, key, value, now],
        )?;

        debug!("Inserted {} with key {}", table, key);
        Ok(())
    }

    fn delete(&self, table: &str, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM records WHERE tbl = ?1 AND key = ?2",
            params![table, key],
        )?;

        if rows == 0 {
            return Err(Error::not_found(table, key));
        }
        debug!("Deleted {} with key {}", table, key);
        Ok(())
    }
}
