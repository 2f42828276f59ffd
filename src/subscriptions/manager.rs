//! Subscription manager for broadcasting document updates.

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::types::{
    DocumentUpdate, DropReason, SubscriptionConfig, SubscriptionEvent, SubscriptionHandle,
    SubscriptionId,
};

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<SubscriptionEvent>,
}

impl Subscription {
    /// Try to send an event. Returns false if the buffer is full or the
    /// receiver is gone (subscriber will be dropped).
    fn try_send(&self, event: SubscriptionEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => false,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Manages subscriptions and fans out updates.
pub struct SubscriptionManager {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new subscription and return the receiving handle.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size);

        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            // Best effort notification.
            let _ = sub.sender.try_send(SubscriptionEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Broadcast an update to matching subscriptions. Subscribers whose
    /// buffers are full are dropped.
    pub fn broadcast(&self, update: &DocumentUpdate) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.config.filter.matches(&update.document_id)
                    && !sub.try_send(SubscriptionEvent::Update(update.clone()))
                {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    debug!(subscription = id.0, "dropping slow subscriber");
                    let _ = sub.sender.try_send(SubscriptionEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }

    /// Notify all subscribers of shutdown and clear them.
    pub fn shutdown(&self) {
        let mut subs = self.subscriptions.write();
        for (_, sub) in subs.drain() {
            let _ = sub.sender.try_send(SubscriptionEvent::Dropped {
                reason: DropReason::Shutdown,
            });
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
