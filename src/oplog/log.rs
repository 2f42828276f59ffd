//! Append-only operation log backed by the `operations` table.

use crate::error::{EngineError, Result};
use crate::storage::Database;
use crate::types::{
    DocumentId, Operation, OriginSource, StoredOperation, Timestamp, TransactionOrigin,
};
use rusqlite::params;
use std::sync::Arc;

/// Per-document, append-only record of every operation ever applied.
pub struct OperationLog {
    db: Arc<Database>,
}

impl OperationLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist one operation with its batch origin. Returns the log
    /// ordinal (rowid).
    ///
    /// Must complete before the corresponding in-memory mutation; on
    /// failure the caller must not apply the operation.
    pub fn persist(
        &self,
        document_id: &DocumentId,
        operation: &Operation,
        origin: &TransactionOrigin,
    ) -> Result<i64> {
        let operation_data = serde_json::to_string(operation)?;
        let origin_data = serde_json::to_string(origin)?;
        // Informational only; never verified on read.
        let checksum = format!("{:08x}", crc32fast::hash(operation_data.as_bytes()));

        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO operations (document_id, operation_type, block_id, operation_data,
                                     applied_at, source, user_id, checksum, batch_id,
                                     request_id, origin_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                document_id.as_str(),
                operation.kind.as_str(),
                operation.block_id.as_str(),
                operation_data,
                Timestamp::now().as_millis(),
                origin.source.as_str(),
                origin.user_id,
                checksum,
                origin.batch_id,
                origin.request_id,
                origin_data,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Operations for a document in application order, starting at
    /// ordinal `offset` (0 = full replay, snapshot count = tail replay).
    ///
    /// A malformed stored operation is fatal for the fetch; the document
    /// cannot be opened from a log it cannot parse.
    pub fn fetch(&self, document_id: &DocumentId, offset: u64) -> Result<Vec<StoredOperation>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, operation_data, applied_at, source, user_id, checksum,
                    batch_id, request_id, origin_data
             FROM operations WHERE document_id = ?1
             ORDER BY id LIMIT -1 OFFSET ?2",
        )?;

        let rows = stmt.query_map(params![document_id.as_str(), offset as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })?;

        let mut operations = Vec::new();
        for row in rows {
            let (id, operation_data, applied_at, source, user_id, checksum, batch_id, request_id, origin_data) =
                row?;

            let operation: Operation =
                serde_json::from_str(&operation_data).map_err(|e| EngineError::Replay {
                    document: document_id.clone(),
                    offset: id as u64,
                    reason: format!("malformed operation payload: {}", e),
                })?;

            let source = OriginSource::parse(&source).ok_or_else(|| EngineError::Replay {
                document: document_id.clone(),
                offset: id as u64,
                reason: format!("unknown origin source '{}'", source),
            })?;

            let origin_data = match origin_data {
                Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| EngineError::Replay {
                    document: document_id.clone(),
                    offset: id as u64,
                    reason: format!("malformed origin payload: {}", e),
                })?),
                None => None,
            };

            operations.push(StoredOperation {
                id,
                document_id: document_id.clone(),
                operation,
                applied_at: Timestamp(applied_at),
                source,
                user_id,
                checksum,
                batch_id,
                request_id,
                origin_data,
            });
        }

        Ok(operations)
    }

    /// Total historical operation count for a document.
    pub fn count(&self, document_id: &DocumentId) -> Result<u64> {
        let count: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM operations WHERE document_id = ?1",
            params![document_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Total operation count across all documents.
    pub fn total(&self) -> Result<u64> {
        let count: i64 =
            self.db
                .conn()
                .query_row("SELECT COUNT(*) FROM operations", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
