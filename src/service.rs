//! Monitor service.
//!
//! Facade over the registry, the shared cache and the scheduler for the
//! presentation/trigger layer. Keeps the three in step: a subscription added
//! here is persisted, counted as a cache subscriber and scheduled.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::feed::{
    filter, CacheStatus, FeedCache, FeedSnapshot, FeedSource, FilterRules, HttpFeedFetcher,
};
use crate::notify::{Dispatcher, NotificationSink};
use crate::scheduler::{self, CycleReport, ScheduleStatus, SchedulerError, SchedulerHandle, SyncEngine};
use crate::subscription::{
    ClientConfig, ClientId, ConfigStore, JsonConfigStore, NewSubscription, Subscription,
    SubscriptionKey, SubscriptionRegistry, SubscriptionUpdate,
};
use crate::{MonitorError, Result};

/// Filtered view of one subscribed feed.
#[derive(Debug, Clone)]
pub struct FeedView {
    pub subscription: Subscription,
    /// Snapshot after the subscription's filters and the display limit.
    pub snapshot: FeedSnapshot,
    pub stale: bool,
    pub last_error: Option<MonitorError>,
}

/// Entry point of the synchronization engine.
pub struct MonitorService {
    registry: Arc<SubscriptionRegistry>,
    cache: Arc<FeedCache>,
    scheduler: SchedulerHandle,
    /// Subscriptions currently counted as cache subscribers.
    retained: Mutex<HashSet<SubscriptionKey>>,
}

impl MonitorService {
    /// Wire the engine together and start the scheduler.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        store: Arc<dyn ConfigStore>,
        source: Arc<dyn FeedSource>,
        dispatcher: Dispatcher,
        config: &Config,
    ) -> Self {
        let registry = Arc::new(
            SubscriptionRegistry::new(store).with_private_hosts(config.fetch.allow_private_hosts),
        );
        let cache = Arc::new(FeedCache::new(source, config.cache.ttl()));
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&cache),
            Arc::clone(&registry),
            dispatcher,
            config.detector.retained_ids,
        ));
        let scheduler = scheduler::spawn(engine, &config.scheduler);

        Self {
            registry,
            cache,
            scheduler,
            retained: Mutex::new(HashSet::new()),
        }
    }

    /// Build the service with the HTTP fetcher, the JSON store and the
    /// configured notification transports.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(JsonConfigStore::new(&config.storage.data_dir));
        let source = Arc::new(HttpFeedFetcher::new(config.fetch.clone())?);
        let dispatcher = Dispatcher::from_config(&config.notify)?;
        Ok(Self::start(store, source, dispatcher, config))
    }

    /// The subscription registry.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// The shared feed cache.
    pub fn cache(&self) -> &Arc<FeedCache> {
        &self.cache
    }

    async fn retain(&self, key: &SubscriptionKey) {
        if self.retained.lock().await.insert(key.clone()) {
            self.cache.retain(&key.feed_url).await;
        }
    }

    async fn release(&self, key: &SubscriptionKey) {
        if self.retained.lock().await.remove(key) && self.cache.release(&key.feed_url).await {
            info!("No subscribers left for {}", key.feed_url);
        }
    }

    async fn schedule(
        &self,
        client_id: &ClientId,
        subscription: &Subscription,
        sinks: Vec<NotificationSink>,
    ) -> Result<()> {
        let key = SubscriptionKey::new(client_id.clone(), &subscription.feed_url);
        self.retain(&key).await;
        self.scheduler
            .upsert(key, subscription.clone(), sinks)
            .await?;
        Ok(())
    }

    /// Get a client's configuration, creating it on first contact.
    pub async fn client_config(&self, client_id: &ClientId) -> Result<ClientConfig> {
        self.registry.get_or_create(client_id).await
    }

    /// Subscribe a client to a feed and schedule it.
    pub async fn add_subscription(
        &self,
        client_id: &ClientId,
        new: NewSubscription,
    ) -> Result<Subscription> {
        let subscription = self.registry.add_subscription(client_id, new).await?;
        let sinks = self.client_sinks(client_id).await;
        self.schedule(client_id, &subscription, sinks).await?;
        Ok(subscription)
    }

    /// Edit a subscription. Its timer is re-armed with the new frequency.
    pub async fn update_subscription(
        &self,
        client_id: &ClientId,
        feed_url: &str,
        update: SubscriptionUpdate,
    ) -> Result<Subscription> {
        let subscription = self
            .registry
            .update_subscription(client_id, feed_url, update)
            .await?;
        let sinks = self.client_sinks(client_id).await;
        self.schedule(client_id, &subscription, sinks).await?;
        Ok(subscription)
    }

    /// Unsubscribe a client from a feed.
    ///
    /// The shared cache entry is evicted only when no subscription is left.
    pub async fn remove_subscription(
        &self,
        client_id: &ClientId,
        feed_url: &str,
    ) -> Result<Subscription> {
        let removed = self.registry.remove_subscription(client_id, feed_url).await?;
        let key = SubscriptionKey::new(client_id.clone(), feed_url);
        self.scheduler.remove(key.clone()).await?;
        self.release(&key).await;
        Ok(removed)
    }

    /// Add a notification sink for a client.
    pub async fn add_sink(&self, client_id: &ClientId, sink: NotificationSink) -> Result<bool> {
        self.registry.add_sink(client_id, sink).await
    }

    /// Remove a notification sink of a client.
    pub async fn remove_sink(&self, client_id: &ClientId, sink: &NotificationSink) -> Result<bool> {
        self.registry.remove_sink(client_id, sink).await
    }

    async fn client_sinks(&self, client_id: &ClientId) -> Vec<NotificationSink> {
        match self.registry.client_config(client_id).await {
            Ok(Some(config)) => config.sinks,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Could not load sinks of client {}: {}", client_id, e);
                Vec::new()
            }
        }
    }

    /// Run a cycle for one subscription now, bypassing the cache TTL.
    pub async fn trigger_manual_sync(
        &self,
        client_id: &ClientId,
        feed_url: &str,
    ) -> Result<CycleReport> {
        let key = SubscriptionKey::new(client_id.clone(), feed_url);
        match self.scheduler.trigger_manual_sync(key.clone()).await {
            Err(SchedulerError::NotScheduled(_)) => {
                // Stored but not scheduled yet, e.g. before `schedule_all`.
                let config = self
                    .registry
                    .client_config(client_id)
                    .await?
                    .ok_or_else(|| MonitorError::NotFound(format!("client {}", client_id)))?;
                let subscription = config
                    .subscription(feed_url)
                    .ok_or_else(|| MonitorError::NotFound(format!("subscription {}", feed_url)))?;
                self.schedule(client_id, subscription, config.sinks.clone())
                    .await?;
                Ok(self.scheduler.trigger_manual_sync(key).await?)
            }
            result => Ok(result?),
        }
    }

    /// Filtered view of a subscribed feed for display.
    ///
    /// Uses the cached snapshot within its TTL unless `refresh` is set.
    pub async fn view_feed(
        &self,
        client_id: &ClientId,
        feed_url: &str,
        refresh: bool,
    ) -> Result<FeedView> {
        let config = self.registry.get_or_create(client_id).await?;
        let subscription = config
            .subscription(feed_url)
            .cloned()
            .ok_or_else(|| MonitorError::NotFound(format!("subscription {}", feed_url)))?;

        let cached = self.cache.get_or_fetch(feed_url, refresh).await?;
        let limit = subscription
            .filter_rules
            .max_items
            .map_or(config.max_items_per_feed, |n| n.min(config.max_items_per_feed));
        let rules = FilterRules {
            max_items: Some(limit),
            ..subscription.filter_rules.clone()
        };

        Ok(FeedView {
            snapshot: filter::apply(&cached.snapshot, &rules),
            subscription,
            stale: cached.stale,
            last_error: cached.last_error,
        })
    }

    /// Fetch metadata of a feed URL.
    pub async fn feed_status(&self, feed_url: &str) -> Option<CacheStatus> {
        self.cache.status(feed_url).await
    }

    /// Schedule information of every subscription.
    pub async fn schedules(&self) -> Result<Vec<ScheduleStatus>> {
        Ok(self.scheduler.list_schedules().await?)
    }

    /// Schedule every stored subscription. Returns how many were scheduled.
    ///
    /// Clients whose configuration cannot be loaded are skipped.
    pub async fn schedule_all(&self) -> Result<usize> {
        let mut count = 0;
        for client_id in self.registry.list_client_ids().await? {
            let config = match self.registry.client_config(&client_id).await {
                Ok(Some(config)) => config,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping client {}: {}", client_id, e);
                    continue;
                }
            };
            for subscription in &config.subscriptions {
                self.schedule(&client_id, subscription, config.sinks.clone())
                    .await?;
                count += 1;
            }
        }
        info!("Scheduled {} subscriptions", count);
        Ok(count)
    }

    /// Stop the scheduler. Running cycles finish and their results are dropped.
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown().await?;
        info!("Monitor service stopped");
        Ok(())
    }
}
