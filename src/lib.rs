//! # Folio
//!
//! An event-sourced engine for block-structured documents: every
//! mutation is durably appended to an operation log before it touches
//! the in-memory state, and cold starts reconstruct documents from the
//! latest binary snapshot plus the log tail.
//!
//! ## Core Concepts
//!
//! - **Blocks**: Ordered, stably-identified content units forming a document
//! - **Operations**: Insert/update/delete/move mutations, persisted then applied
//! - **Transactions**: Batches of operations sharing one provenance origin
//! - **Snapshots**: Periodic binary compactions bounding replay cost
//! - **Updates**: Debounced, coalesced notifications after each transaction
//!
//! ## Example
//!
//! ```ignore
//! use folio::{Block, Engine, EngineConfig, Operation, TransactionOrigin};
//!
//! let engine = Engine::open(EngineConfig::at("./my-docs"))?;
//! let doc = folio::DocumentId::new("notes");
//!
//! let blocks = engine.load(&doc)?;
//!
//! engine.submit(
//!     &doc,
//!     &[Operation::insert(Block::new("b1", "paragraph"), None)],
//!     TransactionOrigin::user(),
//! )?;
//! ```

pub mod document;
pub mod engine;
pub mod error;
pub mod oplog;
pub mod snapshot;
pub mod storage;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use document::{Applied, DocumentStore};
pub use engine::{Engine, EngineConfig};
pub use error::{EngineError, Result};
pub use oplog::OperationLog;
pub use snapshot::{SnapshotManager, SnapshotPolicy};
pub use storage::Database;
pub use subscriptions::{
    BroadcastDispatcher, DispatcherConfig, DocumentUpdate, DropReason, SubscriptionConfig,
    SubscriptionEvent, SubscriptionFilter, SubscriptionHandle, SubscriptionId,
    SubscriptionManager,
};
pub use types::*;
