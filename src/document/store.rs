//! Canonical ordered block list for one document.

use crate::types::{Block, DocumentId, Operation, OperationKind};

/// Outcome of applying a single operation.
///
/// Mutations that target a nonexistent block id are tolerated no-ops,
/// not errors; the coordinator counts them as applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The block list changed.
    Changed,
    /// The operation was a tolerated no-op (absent target, empty payload).
    Ignored,
}

/// Holds the canonical ordered block list for one document and applies
/// single operations deterministically.
pub struct DocumentStore {
    document_id: DocumentId,
    blocks: Vec<Block>,
}

impl DocumentStore {
    /// Empty store for a document.
    pub fn new(document_id: DocumentId) -> Self {
        Self {
            document_id,
            blocks: Vec::new(),
        }
    }

    /// Store seeded from a decoded snapshot.
    pub fn from_blocks(document_id: DocumentId, blocks: Vec<Block>) -> Self {
        Self {
            document_id,
            blocks,
        }
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Current block list, in document order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// First block matching the id, if any.
    pub fn get(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id.as_str() == id)
    }

    /// Apply one operation. Never fails: malformed or absent-target
    /// operations are reported as [`Applied::Ignored`].
    pub fn apply(&mut self, operation: &Operation) -> Applied {
        match operation.kind {
            OperationKind::Insert => self.apply_insert(operation),
            OperationKind::Update => self.apply_update(operation),
            OperationKind::Delete => self.apply_delete(operation),
            OperationKind::Move => self.apply_move(operation),
        }
    }

    fn apply_insert(&mut self, operation: &Operation) -> Applied {
        let block = match &operation.block {
            Some(b) => b.clone(),
            None => return Applied::Ignored,
        };

        // Default is append; explicit positions are clamped into range.
        let position = operation.position.unwrap_or(self.blocks.len());
        let position = position.min(self.blocks.len());

        self.blocks.insert(position, block);
        Applied::Changed
    }

    fn apply_update(&mut self, operation: &Operation) -> Applied {
        let block = match &operation.block {
            Some(b) => b,
            None => return Applied::Ignored,
        };

        // The reserved root id replaces the entire list atomically.
        if operation.block_id.is_document_root() {
            self.blocks = block.children.clone();
            return Applied::Changed;
        }

        match self.position_of(&operation.block_id.0) {
            Some(index) => {
                self.blocks[index] = block.clone();
                Applied::Changed
            }
            None => Applied::Ignored,
        }
    }

    fn apply_delete(&mut self, operation: &Operation) -> Applied {
        match self.position_of(&operation.block_id.0) {
            Some(index) => {
                self.blocks.remove(index);
                Applied::Changed
            }
            None => Applied::Ignored,
        }
    }

    fn apply_move(&mut self, operation: &Operation) -> Applied {
        let from = match self.position_of(&operation.block_id.0) {
            Some(index) => index,
            None => return Applied::Ignored,
        };

        let block = self.blocks.remove(from);
        let to = operation.position.unwrap_or(self.blocks.len());
        let to = to.min(self.blocks.len());
        self.blocks.insert(to, block);

        Applied::Changed
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.id.as_str() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockId, DOCUMENT_ROOT_ID};
    use serde_json::json;

    fn store() -> DocumentStore {
        DocumentStore::new(DocumentId::new("doc-1"))
    }

    fn block(id: &str) -> Block {
        Block::new(id, "paragraph").with_content(json!([{"text": id}]))
    }

    #[test]
    fn test_insert_default_appends() {
        let mut s = store();
        s.apply(&Operation::insert(block("a"), None));
        s.apply(&Operation::insert(block("b"), None));

        let ids: Vec<_> = s.blocks().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_insert_at_front_stacks() {
        let mut s = store();
        s.apply(&Operation::insert(block("a"), Some(0)));
        s.apply(&Operation::insert(block("b"), Some(0)));

        let ids: Vec<_> = s.blocks().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn test_insert_position_clamped() {
        let mut s = store();
        s.apply(&Operation::insert(block("a"), Some(99)));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_update_replaces_in_place() {
        let mut s = store();
        s.apply(&Operation::insert(block("a"), None));
        s.apply(&Operation::insert(block("b"), None));

        let replacement = Block::new("a", "heading").with_content(json!([{"text": "new"}]));
        let applied = s.apply(&Operation::update(replacement));

        assert_eq!(applied, Applied::Changed);
        assert_eq!(s.blocks()[0].kind, "heading");
        assert_eq!(s.blocks()[1].kind, "paragraph");
    }

    #[test]
    fn test_update_absent_is_noop() {
        let mut s = store();
        s.apply(&Operation::insert(block("a"), None));

        let before = s.blocks().to_vec();
        let applied = s.apply(&Operation::update(block("ghost")));

        assert_eq!(applied, Applied::Ignored);
        assert_eq!(s.blocks(), &before[..]);
    }

    #[test]
    fn test_root_update_replaces_whole_list() {
        let mut s = store();
        s.apply(&Operation::insert(block("a"), None));
        s.apply(&Operation::insert(block("b"), None));

        let root = Block::new(DOCUMENT_ROOT_ID, "document")
            .with_children(vec![block("x"), block("y"), block("z")]);
        s.apply(&Operation::update(root));

        let ids: Vec<_> = s.blocks().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["x", "y", "z"]);
    }

    #[test]
    fn test_delete_and_absent_delete() {
        let mut s = store();
        s.apply(&Operation::insert(block("a"), None));
        s.apply(&Operation::insert(block("b"), None));

        assert_eq!(s.apply(&Operation::delete("a")), Applied::Changed);
        assert_eq!(s.apply(&Operation::delete("a")), Applied::Ignored);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_move_reorders() {
        let mut s = store();
        for id in ["a", "b", "c"] {
            s.apply(&Operation::insert(block(id), None));
        }

        s.apply(&Operation::mv("c", 0));
        let ids: Vec<_> = s.blocks().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn test_move_absent_is_noop() {
        let mut s = store();
        s.apply(&Operation::insert(block("a"), None));
        assert_eq!(s.apply(&Operation::mv("ghost", 0)), Applied::Ignored);
    }

    #[test]
    fn test_move_position_clamped() {
        let mut s = store();
        for id in ["a", "b"] {
            s.apply(&Operation::insert(block(id), None));
        }

        s.apply(&Operation::mv("a", 42));
        let ids: Vec<_> = s.blocks().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn test_insert_without_payload_ignored() {
        let mut s = store();
        let op = Operation {
            kind: OperationKind::Insert,
            block_id: BlockId::new("a"),
            position: None,
            block: None,
            prev_block: None,
        };
        assert_eq!(s.apply(&op), Applied::Ignored);
        assert!(s.is_empty());
    }
}
