//! Database handle: connection, pragmas, process lock.

use crate::error::{EngineError, Result};
use crate::storage::migrations;
use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::fs::{self, File};
use std::path::Path;

/// Database file name inside the storage directory.
const DB_FILE: &str = "folio.db";

/// Shared database handle.
///
/// The connection is a single physical write path for all open
/// documents; per-transaction writes are scoped to one document, so
/// cross-document interleaving is safe under the mutex.
pub struct Database {
    conn: Mutex<Connection>,
    /// Held for the lifetime of the handle; released on drop.
    _lock_file: Option<File>,
}

impl Database {
    /// Open (or create) the database under the given storage directory.
    ///
    /// Acquires an exclusive advisory lock; a second opener gets
    /// [`EngineError::Locked`]. Runs pending schema migrations before
    /// returning — a migration failure aborts the open.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let lock_file = Self::acquire_lock(dir)?;

        let mut conn = Connection::open(dir.join(DB_FILE))?;
        Self::configure(&conn)?;
        migrations::run(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            _lock_file: Some(lock_file),
        })
    }

    /// In-memory database for tests. No lock file, same schema.
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        migrations::run(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            _lock_file: None,
        })
    }

    /// Exclusive access to the underlying connection.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(())
    }

    fn acquire_lock(dir: &Path) -> Result<File> {
        let lock_path = dir.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| EngineError::Locked)?;

        Ok(lock_file)
    }
}
