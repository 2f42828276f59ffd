//! Snapshot compaction.
//!
//! Snapshots bound cold-load replay cost: the block list is serialized
//! into a versioned binary frame and stored with the document's total
//! historical operation count, so a load replays only the log tail.

mod encoding;
mod manager;

pub use encoding::{decode_blocks, encode_blocks};
pub use manager::{SnapshotManager, SnapshotPolicy};
