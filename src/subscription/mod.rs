//! Client subscriptions for RSS Monitor.
//!
//! This module provides:
//! - Client and subscription types
//! - The configuration store capability and its JSON/in-memory implementations
//! - The registry serializing per-client edits and cycle commits

mod registry;
mod store;
mod types;

pub use registry::SubscriptionRegistry;
pub use store::{ConfigStore, JsonConfigStore, MemoryConfigStore};
pub use types::{
    ClientConfig, ClientId, NewSubscription, Subscription, SubscriptionKey, SubscriptionUpdate,
    UpdateFrequency, DEFAULT_MAX_ITEMS_PER_FEED, MAX_CLIENT_ID_LENGTH,
};
