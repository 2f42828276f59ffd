//! Subscription types for live document updates.

use crate::types::{Block, DocumentId, Timestamp, TransactionOrigin};

/// Consolidated state-change notification pushed to consumers.
///
/// Carries the full block list after a committed transaction (or a cold
/// load), the origin that triggered it so consumers can distinguish
/// their own edits from system or sync echoes, and a block count for
/// sanity-checking.
#[derive(Clone, Debug)]
pub struct DocumentUpdate {
    pub document_id: DocumentId,

    /// Full current block list.
    pub blocks: Vec<Block>,

    /// Origin of the triggering transaction; for a burst, the last one.
    pub origin: TransactionOrigin,

    /// Per-document commit counter, monotonically increasing.
    pub update_vector: u64,

    pub timestamp: Timestamp,

    pub block_count: usize,
}

/// Events delivered to a subscription.
#[derive(Clone, Debug)]
pub enum SubscriptionEvent {
    /// A coalesced document update.
    Update(DocumentUpdate),

    /// The subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug)]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// Engine shut down.
    Shutdown,
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Restrict to specific documents (None = all documents).
    pub documents: Option<Vec<DocumentId>>,
}

impl SubscriptionFilter {
    /// Updates for every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Updates for one document only.
    pub fn document(id: impl Into<DocumentId>) -> Self {
        Self {
            documents: Some(vec![id.into()]),
        }
    }

    pub fn matches(&self, document_id: &DocumentId) -> bool {
        match &self.documents {
            Some(ids) => ids.contains(document_id),
            None => true,
        }
    }
}

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before the subscriber is dropped.
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64,
            filter: SubscriptionFilter::default(),
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to receive events for one subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel of events.
    pub receiver: crossbeam_channel::Receiver<SubscriptionEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<SubscriptionEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<SubscriptionEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<SubscriptionEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_all_matches_everything() {
        let filter = SubscriptionFilter::all();
        assert!(filter.matches(&DocumentId::new("a")));
        assert!(filter.matches(&DocumentId::new("b")));
    }

    #[test]
    fn test_filter_by_document() {
        let filter = SubscriptionFilter::document("a");
        assert!(filter.matches(&DocumentId::new("a")));
        assert!(!filter.matches(&DocumentId::new("b")));
    }
}
