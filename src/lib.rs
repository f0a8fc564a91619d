//! RSS Monitor - per-client feed synchronization engine
//!
//! Polls syndication feeds on a per-client schedule, detects items each
//! client has not seen yet and fans out notifications.

pub mod config;
pub mod datetime;
pub mod error;
pub mod feed;
pub mod logging;
pub mod notify;
pub mod scheduler;
pub mod service;
pub mod subscription;

pub use config::Config;
pub use error::{MonitorError, Result};
pub use feed::{
    CachedFeed, FeedCache, FeedSnapshot, FeedSource, FilterRules, HttpFeedFetcher,
    IdentityPolicy, Item, ItemIdentity, SeenSet,
};
pub use notify::{Dispatcher, NotificationSink, NotificationTransport, SinkKind};
pub use scheduler::{CycleReport, CycleTrigger, ScheduleStatus, SchedulerError, SchedulerHandle};
pub use service::{FeedView, MonitorService};
pub use subscription::{
    ClientConfig, ClientId, ConfigStore, JsonConfigStore, MemoryConfigStore, NewSubscription,
    Subscription, SubscriptionKey, SubscriptionRegistry, SubscriptionUpdate, UpdateFrequency,
};
