//! Debounced broadcast of document updates.
//!
//! Each committed transaction schedules a notification; another commit
//! for the same document before the delay elapses replaces it and
//! restarts the timer, so a burst of transactions yields exactly one
//! notification carrying the final state (trailing-edge debounce).

use crate::error::Result;
use crate::subscriptions::manager::SubscriptionManager;
use crate::subscriptions::types::DocumentUpdate;
use crate::types::DocumentId;
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::trace;

/// Dispatcher tuning.
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Quiet period after a commit before the notification fires.
    pub debounce: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(50),
        }
    }
}

enum DispatchCommand {
    /// Schedule a debounced notification.
    Publish(DocumentUpdate),
    /// Broadcast immediately, cancelling any pending notification for
    /// the same document.
    Flush(DocumentUpdate),
    Shutdown,
}

/// Owns the worker thread that debounces and emits notifications.
pub struct BroadcastDispatcher {
    sender: Sender<DispatchCommand>,
    worker: Option<JoinHandle<()>>,
}

impl BroadcastDispatcher {
    pub fn new(
        subscriptions: Arc<SubscriptionManager>,
        config: DispatcherConfig,
    ) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let debounce = config.debounce;

        let worker = std::thread::Builder::new()
            .name("folio-dispatch".into())
            .spawn(move || run_worker(receiver, subscriptions, debounce))?;

        Ok(Self {
            sender,
            worker: Some(worker),
        })
    }

    /// Schedule a coalesced notification for the update's document.
    pub fn publish(&self, update: DocumentUpdate) {
        let _ = self.sender.send(DispatchCommand::Publish(update));
    }

    /// Emit a notification now, bypassing the debounce delay. Used for
    /// the synthetic load notification so the UI initializes
    /// deterministically.
    pub fn flush(&self, update: DocumentUpdate) {
        let _ = self.sender.send(DispatchCommand::Flush(update));
    }
}

impl Drop for BroadcastDispatcher {
    fn drop(&mut self) {
        let _ = self.sender.send(DispatchCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(
    receiver: crossbeam_channel::Receiver<DispatchCommand>,
    subscriptions: Arc<SubscriptionManager>,
    debounce: Duration,
) {
    // Pending notification and its deadline, per document.
    let mut pending: HashMap<DocumentId, (Instant, DocumentUpdate)> = HashMap::new();

    loop {
        let now = Instant::now();
        let next_deadline = pending.values().map(|(deadline, _)| *deadline).min();

        let command = match next_deadline {
            Some(deadline) => {
                match receiver.recv_timeout(deadline.saturating_duration_since(now)) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match receiver.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            Some(DispatchCommand::Publish(update)) => {
                trace!(document = %update.document_id, "scheduling debounced notification");
                pending.insert(
                    update.document_id.clone(),
                    (Instant::now() + debounce, update),
                );
            }
            Some(DispatchCommand::Flush(update)) => {
                pending.remove(&update.document_id);
                subscriptions.broadcast(&update);
            }
            Some(DispatchCommand::Shutdown) => {
                // Deliver whatever is still pending before exiting.
                for (_, (_, update)) in pending.drain() {
                    subscriptions.broadcast(&update);
                }
                break;
            }
            None => {}
        }

        // Fire everything whose quiet period has elapsed.
        let now = Instant::now();
        let due: Vec<DocumentId> = pending
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in due {
            if let Some((_, update)) = pending.remove(&id) {
                subscriptions.broadcast(&update);
            }
        }
    }
}
