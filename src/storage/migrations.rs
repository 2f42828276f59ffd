//! Versioned schema migrations.
//!
//! Migrations are forward-only and run once at startup, each inside a
//! transaction together with its tracking-row insert, so a migration's
//! effects and its record commit or roll back as one.

use crate::error::{EngineError, Result};
use rusqlite::{params, Connection};
use std::time::Instant;
use tracing::{debug, info};

/// One schema migration step.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// The ordered migration list. Append-only; never edit a shipped entry —
/// its checksum is verified against the tracking table on every startup.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_operations",
        sql: "CREATE TABLE operations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                operation_type TEXT NOT NULL,
                block_id TEXT NOT NULL,
                operation_data TEXT NOT NULL,
                applied_at INTEGER NOT NULL,
                source TEXT NOT NULL,
                user_id TEXT,
                checksum TEXT,
                batch_id TEXT,
                request_id TEXT,
                origin_data TEXT
              );",
    },
    Migration {
        version: 2,
        name: "create_snapshots",
        sql: "CREATE TABLE snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                snapshot_data BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                operation_count INTEGER NOT NULL
              );",
    },
    Migration {
        version: 3,
        name: "create_documents",
        sql: "CREATE TABLE documents (
                id TEXT PRIMARY KEY,
                title TEXT,
                created_at INTEGER,
                updated_at INTEGER,
                block_count INTEGER
              );",
    },
    Migration {
        version: 4,
        name: "add_log_indexes",
        sql: "CREATE INDEX idx_operations_document ON operations(document_id, id);
              CREATE INDEX idx_snapshots_document ON snapshots(document_id, id);",
    },
];

/// Run all pending migrations. Returns how many were applied.
///
/// A failure is fatal to startup: the enclosing transaction guarantees
/// no partial schema change persists, and the error propagates out of
/// `Database::open`.
pub fn run(conn: &mut Connection) -> Result<u32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL
         );",
    )?;

    let mut applied = 0u32;

    for migration in MIGRATIONS {
        let checksum = checksum_of(migration.sql);

        let recorded: Option<String> = conn
            .query_row(
                "SELECT checksum FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        if let Some(recorded) = recorded {
            if recorded != checksum {
                return Err(EngineError::Migration {
                    version: migration.version,
                    reason: format!(
                        "checksum mismatch for '{}': recorded {}, current {}",
                        migration.name, recorded, checksum
                    ),
                });
            }
            debug!(version = migration.version, name = migration.name, "migration already applied");
            continue;
        }

        let started = Instant::now();
        let tx = conn.transaction()?;

        tx.execute_batch(migration.sql)
            .map_err(|e| EngineError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        let duration_ms = started.elapsed().as_millis() as i64;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, checksum, applied_at, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                migration.version,
                migration.name,
                checksum,
                crate::types::Timestamp::now().as_millis(),
                duration_ms,
            ],
        )?;

        tx.commit()?;

        info!(
            version = migration.version,
            name = migration.name,
            duration_ms,
            "applied migration"
        );
        applied += 1;
    }

    Ok(applied)
}

/// Versions recorded as applied, in order.
pub fn applied_versions(conn: &Connection) -> Result<Vec<u32>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut versions = Vec::new();
    for row in rows {
        versions.push(row?);
    }
    Ok(versions)
}

fn checksum_of(sql: &str) -> String {
    format!("{:08x}", crc32fast::hash(sql.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_run_applies_all_once() {
        let mut conn = fresh_conn();

        let applied = run(&mut conn).unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());

        // Second run is a no-op.
        let applied = run(&mut conn).unwrap();
        assert_eq!(applied, 0);

        let versions = applied_versions(&conn).unwrap();
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_tampered_checksum_is_fatal() {
        let mut conn = fresh_conn();
        run(&mut conn).unwrap();

        conn.execute(
            "UPDATE schema_migrations SET checksum = 'deadbeef' WHERE version = 1",
            [],
        )
        .unwrap();

        match run(&mut conn) {
            Err(EngineError::Migration { version: 1, .. }) => {}
            other => panic!("expected migration error, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_migration_leaves_no_partial_schema() {
        let mut conn = fresh_conn();
        run(&mut conn).unwrap();

        // A bad migration in a transaction must not leave its record behind.
        let before = applied_versions(&conn).unwrap();
        let bad = Migration {
            version: 99,
            name: "bad",
            sql: "CREATE TABLE broken (; -- syntax error",
        };

        let tx = conn.transaction().unwrap();
        assert!(tx.execute_batch(bad.sql).is_err());
        drop(tx); // rolls back

        assert_eq!(applied_versions(&conn).unwrap(), before);
    }
}
