//! One synchronization cycle of a (client, feed) pair.
//!
//! fetch → cache → filter → detect → dispatch → commit. Every error is caught
//! here and recorded in the [`CycleReport`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::feed::{detector, filter, FeedCache, Item, SeenSet};
use crate::notify::{DispatchResult, Dispatcher, NotificationSink};
use crate::subscription::{Subscription, SubscriptionKey, SubscriptionRegistry};
use crate::MonitorError;

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    /// The subscription's timer fired.
    Timer,
    /// Explicit on-demand request.
    Manual,
}

/// Outcome of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub key: SubscriptionKey,
    pub trigger: CycleTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Items new to the client, after filtering.
    pub new_items: Vec<Item>,
    /// The snapshot came from an earlier fetch because the latest one failed.
    pub stale: bool,
    /// Error of the latest fetch attempt, if any.
    pub fetch_error: Option<MonitorError>,
    /// Failure loading or committing the client's configuration.
    pub storage_error: Option<MonitorError>,
    pub dispatch: DispatchResult,
    /// Whether the updated last-seen set was persisted.
    pub committed: bool,
    /// The last-seen set persisted by this cycle.
    pub last_seen: Option<SeenSet>,
    /// The cycle ended abnormally before producing a result.
    pub failure: Option<MonitorError>,
}

impl CycleReport {
    fn new(key: SubscriptionKey, trigger: CycleTrigger) -> Self {
        let now = Utc::now();
        Self {
            key,
            trigger,
            started_at: now,
            finished_at: now,
            new_items: Vec::new(),
            stale: false,
            fetch_error: None,
            storage_error: None,
            dispatch: DispatchResult::default(),
            committed: false,
            last_seen: None,
            failure: None,
        }
    }

    /// Report for a cycle task that died before finishing.
    pub(crate) fn aborted(key: SubscriptionKey, trigger: CycleTrigger, error: MonitorError) -> Self {
        let mut report = Self::new(key, trigger);
        report.failure = Some(error);
        report
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    /// Whether the cycle ran without any error.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
            && self.fetch_error.is_none()
            && self.storage_error.is_none()
            && self.dispatch.all_delivered()
    }
}

/// Runs cycles against the shared cache, registry and dispatcher.
pub struct SyncEngine {
    cache: Arc<FeedCache>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Dispatcher,
    retained_ids: usize,
}

impl SyncEngine {
    /// Create an engine.
    pub fn new(
        cache: Arc<FeedCache>,
        registry: Arc<SubscriptionRegistry>,
        dispatcher: Dispatcher,
        retained_ids: usize,
    ) -> Self {
        Self {
            cache,
            registry,
            dispatcher,
            retained_ids,
        }
    }

    /// Run one cycle for `key`.
    ///
    /// The subscription and sinks are read from the store. When that fails,
    /// `fallback` and `fallback_sinks` are used instead, items are still
    /// dispatched and the commit is skipped so the next cycle detects them
    /// again. Timer cycles may reuse a cached snapshot within its TTL;
    /// manual cycles always refetch.
    pub async fn run_cycle(
        &self,
        key: &SubscriptionKey,
        fallback: &Subscription,
        fallback_sinks: &[NotificationSink],
        trigger: CycleTrigger,
    ) -> CycleReport {
        let mut report = CycleReport::new(key.clone(), trigger);

        let (subscription, sinks, can_commit) =
            match self.registry.client_config(&key.client_id).await {
                Ok(Some(config)) => match config.subscription(&key.feed_url) {
                    Some(subscription) => (subscription.clone(), config.sinks.clone(), true),
                    None => {
                        debug!("Subscription {} is gone, skipping cycle", key);
                        report.storage_error =
                            Some(MonitorError::NotFound(format!("subscription {}", key.feed_url)));
                        return report.finish();
                    }
                },
                Ok(None) => {
                    report.storage_error =
                        Some(MonitorError::NotFound(format!("client {}", key.client_id)));
                    return report.finish();
                }
                Err(e) => {
                    warn!("Loading config for {} failed, using in-memory copy: {}", key, e);
                    report.storage_error = Some(e);
                    (fallback.clone(), fallback_sinks.to_vec(), false)
                }
            };

        let force = trigger == CycleTrigger::Manual;
        let cached = match self.cache.get_or_fetch(&key.feed_url, force).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!("No data for {}: {}", key, e);
                report.fetch_error = Some(e);
                return report.finish();
            }
        };
        report.stale = cached.stale;
        report.fetch_error = cached.last_error.clone();

        let filtered = filter::apply(&cached.snapshot, &subscription.filter_rules);
        let diff = detector::diff(&filtered, &subscription.last_seen, self.retained_ids);

        report.dispatch = self
            .dispatcher
            .dispatch(&key.client_id, &subscription, &diff.new_items, &sinks)
            .await;
        report.new_items = diff.new_items;

        if can_commit {
            match self
                .registry
                .commit_cycle(
                    &key.client_id,
                    &key.feed_url,
                    diff.updated_last_seen.clone(),
                    Utc::now(),
                )
                .await
            {
                Ok(committed) => {
                    report.committed = committed;
                    if committed {
                        report.last_seen = Some(diff.updated_last_seen);
                    }
                }
                Err(e) => {
                    warn!("Commit for {} failed: {}", key, e);
                    report.storage_error = Some(e);
                }
            }
        }

        if !report.new_items.is_empty() {
            info!("{} new items for {}", report.new_items.len(), key);
        }
        report.finish()
    }
}
