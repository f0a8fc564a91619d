//! Client subscription registry.
//!
//! All reads and writes of client configurations go through the registry.
//! Writes for one client are serialized by a per-client lock so concurrent
//! cycles of the same client never lose each other's commits.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::feed::{validate_url_with, SeenSet};
use crate::notify::NotificationSink;
use crate::subscription::store::ConfigStore;
use crate::subscription::types::{
    ClientConfig, ClientId, NewSubscription, Subscription, SubscriptionUpdate,
};
use crate::{MonitorError, Result};

/// Registry of client configurations backed by a [`ConfigStore`].
pub struct SubscriptionRegistry {
    store: Arc<dyn ConfigStore>,
    locks: Mutex<HashMap<ClientId, Arc<Mutex<()>>>>,
    allow_private_hosts: bool,
}

impl SubscriptionRegistry {
    /// Create a registry.
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            allow_private_hosts: false,
        }
    }

    /// Accept feed URLs pointing at private or internal hosts.
    pub fn with_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    async fn client_lock(&self, client_id: &ClientId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(client_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Run `work` holding the client's lock.
    ///
    /// The lock entry is dropped afterwards unless another caller holds it.
    async fn locked<T>(&self, client_id: &ClientId, work: impl Future<Output = T>) -> T {
        let lock = self.client_lock(client_id).await;
        let value = {
            let _guard = lock.lock().await;
            work.await
        };

        let mut locks = self.locks.lock().await;
        let unused = locks
            .get(client_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(entry) == 2);
        if unused {
            locks.remove(client_id);
        }
        value
    }

    /// Run `edit` on the client's configuration and save it.
    ///
    /// The configuration is created when the client is unknown. Nothing is
    /// saved when `edit` fails.
    async fn modify<T>(
        &self,
        client_id: &ClientId,
        edit: impl FnOnce(&mut ClientConfig) -> Result<T>,
    ) -> Result<T> {
        self.locked(client_id, async {
            let mut config = self
                .store
                .load_client_config(client_id)
                .await?
                .unwrap_or_else(|| ClientConfig::new(client_id.clone()));
            let value = edit(&mut config)?;
            config.touch();
            self.store.save_client_config(client_id, &config).await?;
            Ok(value)
        })
        .await
    }

    /// Load a client's configuration without creating it.
    pub async fn client_config(&self, client_id: &ClientId) -> Result<Option<ClientConfig>> {
        self.store.load_client_config(client_id).await
    }

    /// Load a client's configuration, creating it on first contact.
    pub async fn get_or_create(&self, client_id: &ClientId) -> Result<ClientConfig> {
        self.locked(client_id, async {
            if let Some(config) = self.store.load_client_config(client_id).await? {
                return Ok(config);
            }
            let config = ClientConfig::new(client_id.clone());
            self.store.save_client_config(client_id, &config).await?;
            info!("Created config for client {}", client_id);
            Ok(config)
        })
        .await
    }

    /// Ids of every known client.
    pub async fn list_client_ids(&self) -> Result<Vec<ClientId>> {
        self.store.list_client_ids().await
    }

    /// Add a subscription.
    ///
    /// The URL is validated here; invalid URLs never reach the scheduler.
    pub async fn add_subscription(
        &self,
        client_id: &ClientId,
        new: NewSubscription,
    ) -> Result<Subscription> {
        validate_url_with(new.feed_url.trim(), self.allow_private_hosts)?;
        let subscription = new.into_subscription();

        let added = self
            .modify(client_id, |config| {
                if config.subscription(&subscription.feed_url).is_some() {
                    return Err(MonitorError::Validation(format!(
                        "already subscribed to {}",
                        subscription.feed_url
                    )));
                }
                config.subscriptions.push(subscription.clone());
                Ok(subscription)
            })
            .await?;

        info!("Client {} subscribed to {}", client_id, added.feed_url);
        Ok(added)
    }

    /// Edit a subscription.
    pub async fn update_subscription(
        &self,
        client_id: &ClientId,
        feed_url: &str,
        update: SubscriptionUpdate,
    ) -> Result<Subscription> {
        self.modify(client_id, |config| {
            let subscription = config
                .subscription_mut(feed_url)
                .ok_or_else(|| MonitorError::NotFound(format!("subscription {}", feed_url)))?;
            update.apply_to(subscription);
            Ok(subscription.clone())
        })
        .await
    }

    /// Remove a subscription, returning it.
    pub async fn remove_subscription(
        &self,
        client_id: &ClientId,
        feed_url: &str,
    ) -> Result<Subscription> {
        let removed = self
            .modify(client_id, |config| {
                let index = config
                    .subscriptions
                    .iter()
                    .position(|s| s.feed_url == feed_url)
                    .ok_or_else(|| {
                        MonitorError::NotFound(format!("subscription {}", feed_url))
                    })?;
                Ok(config.subscriptions.remove(index))
            })
            .await?;

        info!("Client {} unsubscribed from {}", client_id, feed_url);
        Ok(removed)
    }

    /// Add a notification sink. Returns false if it was already configured.
    pub async fn add_sink(&self, client_id: &ClientId, sink: NotificationSink) -> Result<bool> {
        sink.validate()?;
        self.modify(client_id, |config| {
            if config.sinks.contains(&sink) {
                return Ok(false);
            }
            config.sinks.push(sink);
            Ok(true)
        })
        .await
    }

    /// Remove a notification sink. Returns false if it was not configured.
    pub async fn remove_sink(&self, client_id: &ClientId, sink: &NotificationSink) -> Result<bool> {
        self.modify(client_id, |config| {
            let before = config.sinks.len();
            config.sinks.retain(|s| s != sink);
            Ok(config.sinks.len() != before)
        })
        .await
    }

    /// Persist the outcome of a cycle.
    ///
    /// Returns false when the subscription no longer exists; the result is
    /// then discarded.
    pub async fn commit_cycle(
        &self,
        client_id: &ClientId,
        feed_url: &str,
        last_seen: SeenSet,
        checked_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.locked(client_id, async {
            let Some(mut config) = self.store.load_client_config(client_id).await? else {
                return Ok(false);
            };
            let Some(subscription) = config.subscription_mut(feed_url) else {
                debug!("Discarding commit for removed subscription {}", feed_url);
                return Ok(false);
            };
            subscription.last_seen = last_seen;
            subscription.last_checked_at = Some(checked_at);
            self.store.save_client_config(client_id, &config).await?;
            Ok(true)
        })
        .await
    }
}
