//! Snapshot creation policy, retention, and cold-load seeding.

use crate::error::Result;
use crate::snapshot::{decode_blocks, encode_blocks};
use crate::storage::Database;
use crate::types::{Block, DocumentId, SnapshotRecord, Timestamp};
use rusqlite::params;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// When to compact the live block list into a snapshot.
#[derive(Clone, Debug)]
pub struct SnapshotPolicy {
    /// With no snapshot yet, create one as soon as this many operations
    /// have been applied.
    pub bootstrap_after: u64,

    /// With a snapshot present, require this many operations since it.
    pub min_operations: u64,

    /// With a snapshot present, require this much wall-clock time since
    /// it was created.
    pub min_interval: Duration,

    /// Keep at most this many snapshots per document.
    pub retain: usize,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            bootstrap_after: 1,
            min_operations: 200,
            min_interval: Duration::from_secs(120),
            retain: 5,
        }
    }
}

/// Compacts accumulated log entries into binary snapshots and seeds
/// cold loads from the latest one.
pub struct SnapshotManager {
    db: Arc<Database>,
    policy: SnapshotPolicy,
}

impl SnapshotManager {
    pub fn new(db: Arc<Database>, policy: SnapshotPolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> &SnapshotPolicy {
        &self.policy
    }

    /// Metadata of the most recent snapshot, if any.
    pub fn latest(&self, document_id: &DocumentId) -> Result<Option<SnapshotRecord>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, created_at, operation_count FROM snapshots
             WHERE document_id = ?1 ORDER BY id DESC LIMIT 1",
        )?;

        let mut rows = stmt.query(params![document_id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(SnapshotRecord {
                id: row.get(0)?,
                document_id: document_id.clone(),
                created_at: Timestamp(row.get(1)?),
                operation_count: row.get::<_, i64>(2)? as u64,
            })),
            None => Ok(None),
        }
    }

    /// All snapshots for a document, newest first.
    pub fn list(&self, document_id: &DocumentId) -> Result<Vec<SnapshotRecord>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, created_at, operation_count FROM snapshots
             WHERE document_id = ?1 ORDER BY id DESC",
        )?;

        let rows = stmt.query_map(params![document_id.as_str()], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, created_at, operation_count) = row?;
            records.push(SnapshotRecord {
                id,
                document_id: document_id.clone(),
                created_at: Timestamp(created_at),
                operation_count: operation_count as u64,
            });
        }
        Ok(records)
    }

    /// Total snapshot count across all documents.
    pub fn total(&self) -> Result<u64> {
        let count: i64 =
            self.db
                .conn()
                .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Decide whether a new snapshot is due given the document's total
    /// historical operation count.
    ///
    /// Bootstrap: no snapshot yet and at least `bootstrap_after`
    /// operations. Cadence: both the operation threshold and the
    /// wall-clock interval since the last snapshot must have passed.
    pub fn should_snapshot(&self, document_id: &DocumentId, total_operations: u64) -> Result<bool> {
        match self.latest(document_id)? {
            None => Ok(total_operations >= self.policy.bootstrap_after),
            Some(last) => {
                let since_ops = total_operations.saturating_sub(last.operation_count);
                if since_ops < self.policy.min_operations {
                    return Ok(false);
                }

                let elapsed_ms = Timestamp::now()
                    .as_millis()
                    .saturating_sub(last.created_at.as_millis());
                Ok(elapsed_ms >= self.policy.min_interval.as_millis() as i64)
            }
        }
    }

    /// Serialize the block list and commit a snapshot row, then prune
    /// beyond the retention limit.
    pub fn create(
        &self,
        document_id: &DocumentId,
        blocks: &[Block],
        operation_count: u64,
    ) -> Result<SnapshotRecord> {
        let frame = encode_blocks(blocks)?;
        let created_at = Timestamp::now();

        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO snapshots (document_id, snapshot_data, created_at, operation_count)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                document_id.as_str(),
                frame,
                created_at.as_millis(),
                operation_count as i64,
            ],
        )?;
        let id = conn.last_insert_rowid();

        let pruned = conn.execute(
            "DELETE FROM snapshots WHERE document_id = ?1 AND id NOT IN (
                 SELECT id FROM snapshots WHERE document_id = ?1
                 ORDER BY id DESC LIMIT ?2
             )",
            params![document_id.as_str(), self.policy.retain as i64],
        )?;

        info!(
            document = %document_id,
            operation_count,
            bytes = frame.len(),
            "created snapshot"
        );
        if pruned > 0 {
            debug!(document = %document_id, pruned, "pruned old snapshots");
        }

        Ok(SnapshotRecord {
            id,
            document_id: document_id.clone(),
            created_at,
            operation_count,
        })
    }

    /// Seed state for a cold load: the latest snapshot's block list and
    /// the log offset to replay from. No snapshot (or an undecodable
    /// one) yields an empty seed and full replay from offset 0.
    pub fn load_seed(&self, document_id: &DocumentId) -> Result<(Vec<Block>, u64)> {
        let row: Option<(i64, Vec<u8>)> = {
            let conn = self.db.conn();
            let mut stmt = conn.prepare(
                "SELECT operation_count, snapshot_data FROM snapshots
                 WHERE document_id = ?1 ORDER BY id DESC LIMIT 1",
            )?;
            let mut rows = stmt.query(params![document_id.as_str()])?;
            match rows.next()? {
                Some(row) => Some((row.get(0)?, row.get(1)?)),
                None => None,
            }
        };

        match row {
            Some((operation_count, frame)) => match decode_blocks(&frame) {
                Ok(blocks) => Ok((blocks, operation_count as u64)),
                Err(e) => {
                    // Fall back to full replay rather than refusing the load.
                    warn!(document = %document_id, error = %e, "snapshot undecodable, replaying full log");
                    Ok((Vec::new(), 0))
                }
            },
            None => Ok((Vec::new(), 0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager(policy: SnapshotPolicy) -> SnapshotManager {
        SnapshotManager::new(Arc::new(Database::in_memory().unwrap()), policy)
    }

    fn doc() -> DocumentId {
        DocumentId::new("doc-1")
    }

    fn blocks(n: usize) -> Vec<Block> {
        (0..n)
            .map(|i| Block::new(format!("b{}", i), "paragraph").with_content(json!([{"text": i}])))
            .collect()
    }

    #[test]
    fn test_bootstrap_after_first_operation() {
        let m = manager(SnapshotPolicy::default());

        assert!(!m.should_snapshot(&doc(), 0).unwrap());
        assert!(m.should_snapshot(&doc(), 1).unwrap());
    }

    #[test]
    fn test_cadence_requires_operation_threshold() {
        let m = manager(SnapshotPolicy {
            min_interval: Duration::ZERO,
            ..Default::default()
        });

        m.create(&doc(), &blocks(1), 1).unwrap();

        assert!(!m.should_snapshot(&doc(), 100).unwrap());
        assert!(!m.should_snapshot(&doc(), 200).unwrap());
        assert!(m.should_snapshot(&doc(), 201).unwrap());
    }

    #[test]
    fn test_cadence_requires_wall_clock_interval() {
        let m = manager(SnapshotPolicy {
            min_operations: 1,
            min_interval: Duration::from_secs(3600),
            ..Default::default()
        });

        m.create(&doc(), &blocks(1), 1).unwrap();

        // Operation threshold met, interval not.
        assert!(!m.should_snapshot(&doc(), 500).unwrap());
    }

    #[test]
    fn test_retention_keeps_five_most_recent() {
        let m = manager(SnapshotPolicy::default());

        for i in 1..=6u64 {
            m.create(&doc(), &blocks(i as usize), i).unwrap();
        }

        let records = m.list(&doc()).unwrap();
        assert_eq!(records.len(), 5);
        // Newest first; the count-1 snapshot was pruned.
        assert_eq!(records[0].operation_count, 6);
        assert_eq!(records[4].operation_count, 2);
    }

    #[test]
    fn test_retention_is_per_document() {
        let m = manager(SnapshotPolicy::default());
        let other = DocumentId::new("doc-2");

        for i in 1..=6u64 {
            m.create(&doc(), &blocks(1), i).unwrap();
        }
        m.create(&other, &blocks(1), 1).unwrap();

        assert_eq!(m.list(&doc()).unwrap().len(), 5);
        assert_eq!(m.list(&other).unwrap().len(), 1);
    }

    #[test]
    fn test_load_seed_roundtrip() {
        let m = manager(SnapshotPolicy::default());
        let original = blocks(3);

        m.create(&doc(), &original, 42).unwrap();

        let (seed, offset) = m.load_seed(&doc()).unwrap();
        assert_eq!(seed, original);
        assert_eq!(offset, 42);
    }

    #[test]
    fn test_load_seed_without_snapshot() {
        let m = manager(SnapshotPolicy::default());
        let (seed, offset) = m.load_seed(&doc()).unwrap();
        assert!(seed.is_empty());
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_load_seed_corrupt_snapshot_falls_back() {
        let db = Arc::new(Database::in_memory().unwrap());
        let m = SnapshotManager::new(Arc::clone(&db), SnapshotPolicy::default());

        m.create(&doc(), &blocks(2), 7).unwrap();
        db.conn()
            .execute("UPDATE snapshots SET snapshot_data = X'00010203'", [])
            .unwrap();

        let (seed, offset) = m.load_seed(&doc()).unwrap();
        assert!(seed.is_empty());
        assert_eq!(offset, 0);
    }
}
