//! Core types for the document engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Reserved block id signalling a bulk replacement of the whole document.
pub const DOCUMENT_ROOT_ID: &str = "document-root";

/// Unique identifier for a document.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        DocumentId(s)
    }
}

/// Stable identifier of a block, unchanged across edits.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        BlockId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the reserved id that addresses the whole document.
    pub fn is_document_root(&self) -> bool {
        self.0 == DOCUMENT_ROOT_ID
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self {
        BlockId(s.to_string())
    }
}

impl From<String> for BlockId {
    fn from(s: String) -> Self {
        BlockId(s)
    }
}

/// Milliseconds since Unix epoch. Wall-clock, not a logical clock.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_millis() as i64)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// One addressable content unit of a document (paragraph, heading, embed).
///
/// Blocks form an ordered sequence; each may carry nested children.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Stable identity.
    pub id: BlockId,

    /// Block kind (e.g. "paragraph", "heading", "embed").
    #[serde(rename = "type")]
    pub kind: String,

    /// Kind-specific properties (JSON object).
    #[serde(default)]
    pub props: serde_json::Value,

    /// Inline content (JSON, shape depends on `kind`).
    #[serde(default)]
    pub content: serde_json::Value,

    /// Nested child blocks.
    #[serde(default)]
    pub children: Vec<Block>,
}

impl Block {
    /// Build a block with empty props, content, and children.
    pub fn new(id: impl Into<BlockId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            props: serde_json::Value::Object(serde_json::Map::new()),
            content: serde_json::Value::Null,
            children: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: serde_json::Value) -> Self {
        self.content = content;
        self
    }

    pub fn with_props(mut self, props: serde_json::Value) -> Self {
        self.props = props;
        self
    }

    pub fn with_children(mut self, children: Vec<Block>) -> Self {
        self.children = children;
        self
    }
}

/// The kind of a single mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    Move,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Move => "move",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(OperationKind::Insert),
            "update" => Some(OperationKind::Update),
            "delete" => Some(OperationKind::Delete),
            "move" => Some(OperationKind::Move),
            _ => None,
        }
    }
}

/// One mutation against a single block.
///
/// Provenance is carried by the enclosing [`TransactionOrigin`], not
/// duplicated per operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: OperationKind,

    /// Target block id.
    pub block_id: BlockId,

    /// Target position for insert/move (index into the block list).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,

    /// New block payload for insert/update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<Block>,

    /// Anchor block for callers that express position relatively.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_block: Option<BlockId>,
}

impl Operation {
    pub fn insert(block: Block, position: Option<usize>) -> Self {
        Self {
            kind: OperationKind::Insert,
            block_id: block.id.clone(),
            position,
            block: Some(block),
            prev_block: None,
        }
    }

    pub fn update(block: Block) -> Self {
        Self {
            kind: OperationKind::Update,
            block_id: block.id.clone(),
            position: None,
            block: Some(block),
            prev_block: None,
        }
    }

    pub fn delete(block_id: impl Into<BlockId>) -> Self {
        Self {
            kind: OperationKind::Delete,
            block_id: block_id.into(),
            position: None,
            block: None,
            prev_block: None,
        }
    }

    pub fn mv(block_id: impl Into<BlockId>, position: usize) -> Self {
        Self {
            kind: OperationKind::Move,
            block_id: block_id.into(),
            position: Some(position),
            block: None,
            prev_block: None,
        }
    }
}

/// Who or what produced a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginSource {
    User,
    Llm,
    Sync,
    System,
    Paste,
    Drop,
    Undo,
}

impl OriginSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginSource::User => "user",
            OriginSource::Llm => "llm",
            OriginSource::Sync => "sync",
            OriginSource::System => "system",
            OriginSource::Paste => "paste",
            OriginSource::Drop => "drop",
            OriginSource::Undo => "undo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(OriginSource::User),
            "llm" => Some(OriginSource::Llm),
            "sync" => Some(OriginSource::Sync),
            "system" => Some(OriginSource::System),
            "paste" => Some(OriginSource::Paste),
            "drop" => Some(OriginSource::Drop),
            "undo" => Some(OriginSource::Undo),
            _ => None,
        }
    }
}

/// Provenance attached to a whole batch of operations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionOrigin {
    pub source: OriginSource,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub timestamp: Timestamp,

    /// Free-form caller metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TransactionOrigin {
    pub fn new(source: OriginSource) -> Self {
        Self {
            source,
            request_id: None,
            batch_id: None,
            user_id: None,
            timestamp: Timestamp::now(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Origin for locally authored edits.
    pub fn user() -> Self {
        Self::new(OriginSource::User)
    }

    /// Origin for engine-internal events (bootstrap, load).
    pub fn system() -> Self {
        Self::new(OriginSource::System)
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One persisted operation row, as read back from the log.
#[derive(Clone, Debug)]
pub struct StoredOperation {
    /// Log ordinal (rowid), total-ordered per document.
    pub id: i64,
    pub document_id: DocumentId,
    pub operation: Operation,
    pub applied_at: Timestamp,
    pub source: OriginSource,
    pub user_id: Option<String>,
    pub checksum: Option<String>,
    pub batch_id: Option<String>,
    pub request_id: Option<String>,
    /// Full origin metadata as persisted.
    pub origin_data: Option<serde_json::Value>,
}

/// Snapshot row metadata (the binary body is loaded separately).
#[derive(Clone, Debug)]
pub struct SnapshotRecord {
    pub id: i64,
    pub document_id: DocumentId,
    pub created_at: Timestamp,
    /// Total historical operation count at snapshot time.
    pub operation_count: u64,
}

/// Descriptive metadata row for a document. Never the authoritative state.
#[derive(Clone, Debug)]
pub struct DocumentMeta {
    pub id: DocumentId,
    pub title: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub block_count: usize,
}

/// Per-operation failure recorded in a batch result.
#[derive(Clone, Debug)]
pub struct OperationError {
    /// Index of the failed operation within the submitted batch.
    pub index: usize,
    pub block_id: BlockId,
    pub message: String,
}

/// Result of applying one batch of operations.
#[derive(Clone, Debug)]
pub struct OperationResult {
    /// True when the batch ran to completion (individual failures are
    /// recorded in `errors` and do not fail the batch).
    pub success: bool,
    pub operations_applied: usize,
    pub errors: Vec<OperationError>,
    pub conflicts: Vec<String>,
    pub batch_id: String,
}

/// Engine-wide counters.
#[derive(Clone, Debug, Default)]
pub struct EngineStats {
    pub open_documents: usize,
    pub total_operations: u64,
    pub total_snapshots: u64,
}
