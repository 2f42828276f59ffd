//! Property test: replaying the full log from an empty store and
//! replaying snapshot-plus-tail must reconstruct identical block lists.

use folio::{
    Block, DispatcherConfig, DocumentId, DocumentStore, Engine, EngineConfig, Operation,
    SnapshotPolicy, TransactionOrigin,
};
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;

/// Small id pool so operations frequently hit existing blocks.
fn block_id() -> impl Strategy<Value = String> {
    (0u8..8).prop_map(|i| format!("b{}", i))
}

fn block(id: String) -> Block {
    Block::new(id.clone(), "paragraph").with_content(json!([{"text": id}]))
}

fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        (block_id(), proptest::option::of(0usize..12))
            .prop_map(|(id, pos)| Operation::insert(block(id), pos)),
        block_id().prop_map(|id| Operation::update(block(id))),
        block_id().prop_map(|id| Operation::delete(id)),
        (block_id(), 0usize..12).prop_map(|(id, pos)| Operation::mv(id, pos)),
    ]
}

fn engine(policy: SnapshotPolicy) -> Engine {
    Engine::in_memory_with(EngineConfig {
        snapshot_policy: policy,
        dispatcher: DispatcherConfig {
            debounce: Duration::from_millis(1),
        },
        ..Default::default()
    })
    .unwrap()
}

/// Reference semantics: the operations folded over a bare store.
fn reference_blocks(operations: &[Operation]) -> Vec<Block> {
    let mut store = DocumentStore::new(DocumentId::new("doc"));
    for operation in operations {
        store.apply(operation);
    }
    store.blocks().to_vec()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn replay_with_snapshots_matches_reference(
        operations in proptest::collection::vec(operation(), 1..60),
    ) {
        let doc = DocumentId::new("doc");

        // Aggressive compaction: a snapshot after nearly every batch.
        let engine = engine(SnapshotPolicy {
            min_operations: 2,
            min_interval: Duration::ZERO,
            ..Default::default()
        });

        for chunk in operations.chunks(3) {
            engine.submit(&doc, chunk, TransactionOrigin::user()).unwrap();
        }

        // Evict and reconstruct from the latest snapshot plus tail.
        engine.close_document(&doc);
        engine.open_document(&doc).unwrap();

        prop_assert_eq!(engine.blocks(&doc).unwrap(), reference_blocks(&operations));
    }

    #[test]
    fn replay_without_snapshots_matches_reference(
        operations in proptest::collection::vec(operation(), 1..60),
    ) {
        let doc = DocumentId::new("doc");

        // No snapshots at all: reconstruction is a full-log replay.
        let engine = engine(SnapshotPolicy {
            bootstrap_after: u64::MAX,
            ..Default::default()
        });

        for chunk in operations.chunks(5) {
            engine.submit(&doc, chunk, TransactionOrigin::user()).unwrap();
        }

        engine.close_document(&doc);
        engine.open_document(&doc).unwrap();

        prop_assert_eq!(engine.blocks(&doc).unwrap(), reference_blocks(&operations));
    }
}
