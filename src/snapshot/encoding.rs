//! Versioned binary snapshot frame.
//!
//! Layout: magic, format version, u32-le body length, MessagePack body
//! (the block list), u32-le crc32 of the body.

use crate::error::{EngineError, Result};
use crate::types::Block;

/// Magic bytes for snapshot frames.
const SNAPSHOT_MAGIC: &[u8; 4] = b"FSN\0";

/// Current snapshot format version.
const SNAPSHOT_VERSION: u8 = 1;

/// Frame overhead: magic + version + length + checksum.
const FRAME_OVERHEAD: usize = 4 + 1 + 4 + 4;

/// Encode a block list into a snapshot frame.
pub fn encode_blocks(blocks: &[Block]) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec(blocks)?;

    let mut frame = Vec::with_capacity(body.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(SNAPSHOT_MAGIC);
    frame.push(SNAPSHOT_VERSION);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());

    Ok(frame)
}

/// Decode a snapshot frame back into a block list.
pub fn decode_blocks(data: &[u8]) -> Result<Vec<Block>> {
    if data.len() < FRAME_OVERHEAD {
        return Err(EngineError::SnapshotCorrupt("frame too short".into()));
    }

    if &data[0..4] != SNAPSHOT_MAGIC {
        return Err(EngineError::SnapshotCorrupt("invalid magic".into()));
    }

    let version = data[4];
    if version != SNAPSHOT_VERSION {
        return Err(EngineError::SnapshotCorrupt(format!(
            "unsupported snapshot version: {}",
            version
        )));
    }

    let len = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as usize;
    if data.len() != FRAME_OVERHEAD + len {
        return Err(EngineError::SnapshotCorrupt(format!(
            "length mismatch: header says {}, frame holds {}",
            len,
            data.len() - FRAME_OVERHEAD
        )));
    }

    let body = &data[9..9 + len];
    let stored_checksum = u32::from_le_bytes([
        data[9 + len],
        data[10 + len],
        data[11 + len],
        data[12 + len],
    ]);

    let computed_checksum = crc32fast::hash(body);
    if stored_checksum != computed_checksum {
        return Err(EngineError::ChecksumMismatch {
            expected: stored_checksum,
            got: computed_checksum,
        });
    }

    rmp_serde::from_slice(body).map_err(|e| EngineError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blocks() -> Vec<Block> {
        vec![
            Block::new("b1", "heading").with_content(json!([{"text": "Title"}])),
            Block::new("b2", "paragraph").with_content(json!([{"text": "Body"}])),
        ]
    }

    #[test]
    fn test_roundtrip() {
        let original = blocks();
        let frame = encode_blocks(&original).unwrap();
        let decoded = decode_blocks(&frame).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_empty_list_roundtrip() {
        let frame = encode_blocks(&[]).unwrap();
        assert!(decode_blocks(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut frame = encode_blocks(&blocks()).unwrap();
        frame[0] = b'X';
        assert!(matches!(
            decode_blocks(&frame),
            Err(EngineError::SnapshotCorrupt(_))
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut frame = encode_blocks(&blocks()).unwrap();
        frame[4] = 99;
        assert!(matches!(
            decode_blocks(&frame),
            Err(EngineError::SnapshotCorrupt(_))
        ));
    }

    #[test]
    fn test_flipped_body_byte_fails_checksum() {
        let mut frame = encode_blocks(&blocks()).unwrap();
        let body_start = 9;
        frame[body_start + 3] ^= 0xFF;
        assert!(matches!(
            decode_blocks(&frame),
            Err(EngineError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let frame = encode_blocks(&blocks()).unwrap();
        assert!(matches!(
            decode_blocks(&frame[..frame.len() - 2]),
            Err(EngineError::SnapshotCorrupt(_))
        ));
    }
}
