//! Subscription system for live document updates.
//!
//! Consumers subscribe through a bounded channel and receive one
//! coalesced [`DocumentUpdate`] per transaction burst, debounced by the
//! dispatcher. Slow consumers are dropped rather than allowed to stall
//! the engine.

mod dispatcher;
mod manager;
mod types;

pub use dispatcher::{BroadcastDispatcher, DispatcherConfig};
pub use manager::SubscriptionManager;
pub use types::{
    DocumentUpdate, DropReason, SubscriptionConfig, SubscriptionEvent, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId,
};
