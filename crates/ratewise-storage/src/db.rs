//! Database connection management.
//!
//! One rusqlite Connection behind a Mutex. Callers borrow it through
//! [`Database::with_conn`] or [`Database::with_transaction`].

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use ratewise_core::error::RatewiseError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, and runs
    /// all pending migrations.
    pub fn new(path: &Path) -> Result<Self, RatewiseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| RatewiseError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| RatewiseError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());
        Self::migrated(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, RatewiseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RatewiseError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| RatewiseError::Storage(format!("Failed to set pragmas: {}", e)))?;

        Self::migrated(conn)
    }

    fn migrated(conn: Connection) -> Result<Self, RatewiseError> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, RatewiseError>
    where
        F: FnOnce(&Connection) -> Result<T, RatewiseError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RatewiseError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run `f` inside a transaction. Commits on `Ok`, rolls back on `Err`.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, RatewiseError>
    where
        F: FnOnce(&Connection) -> Result<T, RatewiseError>,
    {
        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| RatewiseError::Storage(format!("Failed to begin transaction: {}", e)))?;
            let value = f(&tx)?;
            tx.commit()
                .map_err(|e| RatewiseError::Storage(format!("Failed to commit: {}", e)))?;
            Ok(value)
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
