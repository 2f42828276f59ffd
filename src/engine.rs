//! Main Engine struct tying all components together.

use crate::document::DocumentStore;
use crate::error::{EngineError, Result};
use crate::oplog::OperationLog;
use crate::snapshot::{SnapshotManager, SnapshotPolicy};
use crate::storage::Database;
use crate::subscriptions::{
    BroadcastDispatcher, DispatcherConfig, DocumentUpdate, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
use crate::types::{
    Block, DocumentId, DocumentMeta, EngineStats, Operation, OperationError, OperationResult,
    SnapshotRecord, StoredOperation, Timestamp, TransactionOrigin,
};
use parking_lot::{Mutex, RwLock};
use rusqlite::params;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Storage directory, resolved by the hosting application.
    pub path: PathBuf,

    /// Snapshot compaction policy.
    pub snapshot_policy: SnapshotPolicy,

    /// Notification debounce tuning.
    pub dispatcher: DispatcherConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./folio"),
            snapshot_policy: SnapshotPolicy::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// One open document: live state plus its commit counter.
struct OpenDocument {
    store: DocumentStore,
    update_vector: u64,
}

/// The document operation/persistence engine.
///
/// Maintains live block-structured documents in memory, durably records
/// every mutation in the operation log, and reconstructs state on cold
/// start from the latest snapshot plus the log tail.
///
/// Documents are held in an explicit registry with an open/close
/// lifecycle; closing evicts the in-memory state without touching
/// durable data.
pub struct Engine {
    db: Arc<Database>,
    log: OperationLog,
    snapshots: SnapshotManager,
    /// Dropped before `subscriptions` so pending notifications flush
    /// while subscribers are still registered.
    dispatcher: BroadcastDispatcher,
    subscriptions: Arc<SubscriptionManager>,
    documents: RwLock<HashMap<DocumentId, OpenDocument>>,

    /// Serializes transactions: persist-then-mutate runs to completion
    /// before the next batch starts.
    write_lock: Mutex<()>,

    /// Counter for generated batch ids.
    batch_seq: AtomicU64,
}

impl Engine {
    /// Open the engine: acquire the storage lock, run migrations, start
    /// the dispatcher. A migration failure aborts the open.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let db = Arc::new(Database::open(&config.path)?);
        Self::with_database(db, config)
    }

    /// In-memory engine for tests; same behavior, no storage directory.
    pub fn in_memory() -> Result<Self> {
        Self::with_database(Arc::new(Database::in_memory()?), EngineConfig::default())
    }

    /// In-memory engine with custom policy/dispatcher settings.
    pub fn in_memory_with(config: EngineConfig) -> Result<Self> {
        Self::with_database(Arc::new(Database::in_memory()?), config)
    }

    fn with_database(db: Arc<Database>, config: EngineConfig) -> Result<Self> {
        let subscriptions = Arc::new(SubscriptionManager::new());
        let dispatcher =
            BroadcastDispatcher::new(Arc::clone(&subscriptions), config.dispatcher.clone())?;

        info!(path = %config.path.display(), "engine opened");

        Ok(Self {
            log: OperationLog::new(Arc::clone(&db)),
            snapshots: SnapshotManager::new(Arc::clone(&db), config.snapshot_policy.clone()),
            dispatcher,
            subscriptions,
            db,
            documents: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            batch_seq: AtomicU64::new(1),
        })
    }

    // --- Document lifecycle ---

    /// Open a document: reconstruct its state from the latest snapshot
    /// plus the operation-log tail. No-op if already open.
    pub fn open_document(&self, document_id: &DocumentId) -> Result<()> {
        let _lock = self.write_lock.lock();
        self.ensure_open(document_id)
    }

    /// Evict a document's in-memory state. Durable state is unaffected;
    /// a later open replays it back. Returns false if it wasn't open.
    pub fn close_document(&self, document_id: &DocumentId) -> bool {
        let _lock = self.write_lock.lock();
        let closed = self.documents.write().remove(document_id).is_some();
        if closed {
            debug!(document = %document_id, "closed document");
        }
        closed
    }

    /// Cold-load a document and emit exactly one synthetic notification
    /// describing the loaded (possibly empty) state, tagged with a
    /// system origin, so the UI initializes deterministically even when
    /// zero operations exist.
    pub fn load(&self, document_id: &DocumentId) -> Result<Vec<Block>> {
        let _lock = self.write_lock.lock();
        self.ensure_open(document_id)?;

        let mut documents = self.documents.write();
        let open = documents
            .get_mut(document_id)
            .ok_or_else(|| EngineError::DocumentNotOpen(document_id.clone()))?;

        open.update_vector += 1;
        let update = DocumentUpdate {
            document_id: document_id.clone(),
            blocks: open.store.blocks().to_vec(),
            origin: TransactionOrigin::system(),
            update_vector: open.update_vector,
            timestamp: Timestamp::now(),
            block_count: open.store.len(),
        };
        let blocks = update.blocks.clone();
        drop(documents);

        self.dispatcher.flush(update);
        Ok(blocks)
    }

    /// Current block list of an open document.
    pub fn blocks(&self, document_id: &DocumentId) -> Result<Vec<Block>> {
        let documents = self.documents.read();
        documents
            .get(document_id)
            .map(|open| open.store.blocks().to_vec())
            .ok_or_else(|| EngineError::DocumentNotOpen(document_id.clone()))
    }

    /// Ids of currently open documents.
    pub fn open_documents(&self) -> Vec<DocumentId> {
        self.documents.read().keys().cloned().collect()
    }

    // --- Transactions ---

    /// Apply a batch of operations sharing one origin as a single
    /// logical unit.
    ///
    /// Each operation is persisted to the log, then applied in memory;
    /// the log is the source of truth, so a persistence failure means
    /// that operation is skipped and recorded in `errors` while the
    /// rest of the batch proceeds. One coalesced notification is
    /// scheduled for the whole batch.
    pub fn submit(
        &self,
        document_id: &DocumentId,
        operations: &[Operation],
        origin: TransactionOrigin,
    ) -> Result<OperationResult> {
        let _lock = self.write_lock.lock();
        self.ensure_open(document_id)?;

        let mut origin = origin;
        let batch_id = match origin.batch_id.clone() {
            Some(id) => id,
            None => {
                let id = self.next_batch_id();
                origin.batch_id = Some(id.clone());
                id
            }
        };

        let mut errors: Vec<OperationError> = Vec::new();
        let mut operations_applied = 0usize;

        let mut documents = self.documents.write();
        let open = documents
            .get_mut(document_id)
            .ok_or_else(|| EngineError::DocumentNotOpen(document_id.clone()))?;

        for (index, operation) in operations.iter().enumerate() {
            // Persist first; never mutate memory for an unlogged operation.
            match self.log.persist(document_id, operation, &origin) {
                Ok(_) => {
                    open.store.apply(operation);
                    operations_applied += 1;
                }
                Err(e) => {
                    warn!(
                        document = %document_id,
                        index,
                        error = %e,
                        "operation persistence failed, skipping apply"
                    );
                    errors.push(OperationError {
                        index,
                        block_id: operation.block_id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        open.update_vector += 1;

        let blocks = open.store.blocks().to_vec();
        let block_count = blocks.len();
        let update_vector = open.update_vector;
        drop(documents);

        self.touch_document_meta(document_id, block_count)?;
        self.maybe_snapshot(document_id, &blocks);

        self.dispatcher.publish(DocumentUpdate {
            document_id: document_id.clone(),
            blocks,
            origin,
            update_vector,
            timestamp: Timestamp::now(),
            block_count,
        });

        debug!(
            document = %document_id,
            batch = %batch_id,
            operations = operations.len(),
            applied = operations_applied,
            failed = errors.len(),
            "committed transaction"
        );

        Ok(OperationResult {
            success: true,
            operations_applied,
            errors,
            conflicts: Vec::new(),
            batch_id,
        })
    }

    // --- Log access ---

    /// Total historical operation count for a document.
    pub fn operation_count(&self, document_id: &DocumentId) -> Result<u64> {
        self.log.count(document_id)
    }

    /// Stored operations from ordinal `offset`, for audit and tooling.
    pub fn history(&self, document_id: &DocumentId, offset: u64) -> Result<Vec<StoredOperation>> {
        self.log.fetch(document_id, offset)
    }

    // --- Snapshots ---

    /// Force a snapshot of an open document now, regardless of policy.
    pub fn compact(&self, document_id: &DocumentId) -> Result<SnapshotRecord> {
        let _lock = self.write_lock.lock();

        let blocks = self.blocks(document_id)?;
        let total = self.log.count(document_id)?;
        self.snapshots.create(document_id, &blocks, total)
    }

    /// Snapshot records for a document, newest first.
    pub fn snapshots(&self, document_id: &DocumentId) -> Result<Vec<SnapshotRecord>> {
        self.snapshots.list(document_id)
    }

    // --- Metadata ---

    /// Set the descriptive title for a document.
    pub fn set_title(&self, document_id: &DocumentId, title: &str) -> Result<()> {
        let now = Timestamp::now().as_millis();
        self.db.conn().execute(
            "INSERT INTO documents (id, title, created_at, updated_at, block_count)
             VALUES (?1, ?2, ?3, ?3, 0)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title, updated_at = excluded.updated_at",
            params![document_id.as_str(), title, now],
        )?;
        Ok(())
    }

    /// Descriptive metadata for a document, if any operations or titles
    /// have been recorded. Never the authoritative state source.
    pub fn document_meta(&self, document_id: &DocumentId) -> Result<Option<DocumentMeta>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT title, created_at, updated_at, block_count FROM documents WHERE id = ?1",
        )?;

        let mut rows = stmt.query(params![document_id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(DocumentMeta {
                id: document_id.clone(),
                title: row.get(0)?,
                created_at: Timestamp(row.get::<_, Option<i64>>(1)?.unwrap_or_default()),
                updated_at: Timestamp(row.get::<_, Option<i64>>(2)?.unwrap_or_default()),
                block_count: row.get::<_, Option<i64>>(3)?.unwrap_or_default() as usize,
            })),
            None => Ok(None),
        }
    }

    /// Engine-wide counters.
    pub fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            open_documents: self.documents.read().len(),
            total_operations: self.log.total()?,
            total_snapshots: self.snapshots.total()?,
        })
    }

    // --- Subscriptions ---

    /// Subscribe to coalesced document updates.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.subscriptions.subscribe(config)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id);
    }

    // --- Internals ---

    /// Reconstruct a document into the registry if not already present.
    /// Caller must hold `write_lock`.
    fn ensure_open(&self, document_id: &DocumentId) -> Result<()> {
        if self.documents.read().contains_key(document_id) {
            return Ok(());
        }

        let (seed, offset) = self.snapshots.load_seed(document_id)?;
        let tail = self.log.fetch(document_id, offset)?;
        let replayed = tail.len();

        let mut store = DocumentStore::from_blocks(document_id.clone(), seed);
        for stored in &tail {
            store.apply(&stored.operation);
        }

        info!(
            document = %document_id,
            from_offset = offset,
            replayed,
            blocks = store.len(),
            "reconstructed document"
        );

        self.documents.write().insert(
            document_id.clone(),
            OpenDocument {
                store,
                update_vector: 0,
            },
        );
        Ok(())
    }

    /// Refresh the descriptive metadata row after a transaction.
    fn touch_document_meta(&self, document_id: &DocumentId, block_count: usize) -> Result<()> {
        let now = Timestamp::now().as_millis();
        self.db.conn().execute(
            "INSERT INTO documents (id, title, created_at, updated_at, block_count)
             VALUES (?1, NULL, ?2, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at,
                                           block_count = excluded.block_count",
            params![document_id.as_str(), now, block_count as i64],
        )?;
        Ok(())
    }

    /// Consult the snapshot policy and compact if due. Failure here is
    /// non-fatal: live state is unaffected, only future cold-load cost.
    fn maybe_snapshot(&self, document_id: &DocumentId, blocks: &[Block]) {
        let due = match self.log.count(document_id).and_then(|total| {
            self.snapshots
                .should_snapshot(document_id, total)
                .map(|d| (d, total))
        }) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(document = %document_id, error = %e, "snapshot policy check failed");
                return;
            }
        };

        if let (true, total) = due {
            if let Err(e) = self.snapshots.create(document_id, blocks, total) {
                warn!(document = %document_id, error = %e, "snapshot creation failed");
            }
        }
    }

    fn next_batch_id(&self) -> String {
        let seq = self.batch_seq.fetch_add(1, Ordering::SeqCst);
        format!("batch-{}-{}", Timestamp::now().as_millis(), seq)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.subscriptions.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> DocumentId {
        DocumentId::new("doc-1")
    }

    fn para(id: &str) -> Block {
        Block::new(id, "paragraph")
    }

    #[test]
    fn test_submit_auto_opens_document() {
        let engine = Engine::in_memory().unwrap();

        let result = engine
            .submit(
                &doc(),
                &[Operation::insert(para("a"), None)],
                TransactionOrigin::user(),
            )
            .unwrap();

        assert!(result.success);
        assert_eq!(result.operations_applied, 1);
        assert_eq!(engine.blocks(&doc()).unwrap().len(), 1);
    }

    #[test]
    fn test_generated_batch_ids_are_unique() {
        let engine = Engine::in_memory().unwrap();

        let a = engine
            .submit(
                &doc(),
                &[Operation::insert(para("a"), None)],
                TransactionOrigin::user(),
            )
            .unwrap();
        let b = engine
            .submit(
                &doc(),
                &[Operation::insert(para("b"), None)],
                TransactionOrigin::user(),
            )
            .unwrap();

        assert_ne!(a.batch_id, b.batch_id);
    }

    #[test]
    fn test_caller_batch_id_is_kept() {
        let engine = Engine::in_memory().unwrap();

        let result = engine
            .submit(
                &doc(),
                &[Operation::insert(para("a"), None)],
                TransactionOrigin::user().with_batch_id("batch-42"),
            )
            .unwrap();

        assert_eq!(result.batch_id, "batch-42");
        let history = engine.history(&doc(), 0).unwrap();
        assert_eq!(history[0].batch_id.as_deref(), Some("batch-42"));
    }

    #[test]
    fn test_close_evicts_only_memory() {
        let engine = Engine::in_memory().unwrap();

        engine
            .submit(
                &doc(),
                &[Operation::insert(para("a"), None)],
                TransactionOrigin::user(),
            )
            .unwrap();

        assert!(engine.close_document(&doc()));
        assert!(matches!(
            engine.blocks(&doc()),
            Err(EngineError::DocumentNotOpen(_))
        ));

        // Durable state replays back on reopen.
        engine.open_document(&doc()).unwrap();
        assert_eq!(engine.blocks(&doc()).unwrap().len(), 1);
    }

    #[test]
    fn test_blocks_requires_open_document() {
        let engine = Engine::in_memory().unwrap();
        assert!(matches!(
            engine.blocks(&doc()),
            Err(EngineError::DocumentNotOpen(_))
        ));
    }

    #[test]
    fn test_document_meta_tracks_block_count() {
        let engine = Engine::in_memory().unwrap();

        engine
            .submit(
                &doc(),
                &[
                    Operation::insert(para("a"), None),
                    Operation::insert(para("b"), None),
                ],
                TransactionOrigin::user(),
            )
            .unwrap();

        let meta = engine.document_meta(&doc()).unwrap().unwrap();
        assert_eq!(meta.block_count, 2);

        engine.set_title(&doc(), "Notes").unwrap();
        let meta = engine.document_meta(&doc()).unwrap().unwrap();
        assert_eq!(meta.title.as_deref(), Some("Notes"));
        assert_eq!(meta.block_count, 2);
    }
}
