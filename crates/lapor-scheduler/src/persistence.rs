//! SQLite-backed property store. Survives restarts and crashes.

use std::path::Path;
use std::sync::Mutex;

use lapor_core::error::{LaporError, Result};
use lapor_core::traits::PropertyStore;
use rusqlite::{Connection, OptionalExtension, params};

/// Property store in a single `properties` table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the property database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| LaporError::Store(format!("DB open: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| LaporError::Store(format!("DB open: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS properties (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| LaporError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LaporError::Store(format!("Lock: {e}")))
    }
}

impl PropertyStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM properties WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| LaporError::Store(format!("Get {key}: {e}")))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO properties (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )
        .map_err(|e| LaporError::Store(format!("Set {key}: {e}")))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM properties WHERE key = ?1", params![key])
            .map_err(|e| LaporError::Store(format!("Delete {key}: {e}")))?;
        Ok(())
    }
}
