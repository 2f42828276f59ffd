//! Error types for the document engine.

use crate::types::DocumentId;
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Replay failed for {document} at offset {offset}: {reason}")]
    Replay {
        document: DocumentId,
        offset: u64,
        reason: String,
    },

    #[error("Snapshot is corrupt: {0}")]
    SnapshotCorrupt(String),

    #[error("Migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Storage directory is locked by another process")]
    Locked,

    #[error("Document not open: {0}")]
    DocumentNotOpen(DocumentId),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for EngineError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for EngineError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        EngineError::Deserialization(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
