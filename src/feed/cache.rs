//! Shared feed cache with single-flight fetching.
//!
//! One entry per URL, shared by every subscription to that URL. Fetches of
//! the same URL serialize on a per-URL lock; a caller that waited while
//! another one fetched reuses that outcome instead of fetching again. The
//! entry metadata sits behind its own lock, so readers never wait on the
//! network. Entries live while subscribed; an entry nobody retains is
//! dropped once its fetch completes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::feed::fetcher::FeedSource;
use crate::feed::types::FeedSnapshot;
use crate::{MonitorError, Result};

/// A snapshot handed out by the cache.
#[derive(Debug, Clone)]
pub struct CachedFeed {
    /// Latest successfully fetched snapshot.
    pub snapshot: Arc<FeedSnapshot>,
    /// Set when the most recent fetch attempt failed.
    pub stale: bool,
    /// Error of the most recent attempt, if it failed.
    pub last_error: Option<MonitorError>,
}

/// Fetch metadata of one URL, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStatus {
    pub url: String,
    pub has_snapshot: bool,
    pub item_count: usize,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<MonitorError>,
    pub subscribers: usize,
}

#[derive(Default)]
struct CacheEntry {
    snapshot: Option<Arc<FeedSnapshot>>,
    last_success_at: Option<DateTime<Utc>>,
    last_attempt_at: Option<DateTime<Utc>>,
    last_attempt: Option<Instant>,
    last_error: Option<MonitorError>,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.snapshot.is_some()
            && self
                .last_attempt
                .map(|at| at.elapsed() < ttl)
                .unwrap_or(false)
    }

    fn outcome(&self, url: &str) -> Result<CachedFeed> {
        match &self.snapshot {
            Some(snapshot) => Ok(CachedFeed {
                snapshot: Arc::clone(snapshot),
                stale: self.last_error.is_some(),
                last_error: self.last_error.clone(),
            }),
            None => Err(MonitorError::FetchUnavailable {
                url: url.to_string(),
                reason: self
                    .last_error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "never fetched".to_string()),
            }),
        }
    }
}

struct Slot {
    /// Bumped after every completed fetch.
    generation: AtomicU64,
    /// Changed only under the map's write lock.
    subscribers: AtomicUsize,
    /// Held for the duration of a fetch.
    flight: Mutex<()>,
    /// Never held across a fetch.
    entry: RwLock<CacheEntry>,
}

impl Slot {
    fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            subscribers: AtomicUsize::new(0),
            flight: Mutex::new(()),
            entry: RwLock::new(CacheEntry::default()),
        }
    }
}

/// Cache of feed snapshots keyed by URL.
pub struct FeedCache {
    source: Arc<dyn FeedSource>,
    ttl: Duration,
    slots: RwLock<HashMap<String, Arc<Slot>>>,
}

impl FeedCache {
    /// Create an empty cache.
    pub fn new(source: Arc<dyn FeedSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            slots: RwLock::new(HashMap::new()),
        }
    }

    async fn slot(&self, url: &str) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().await.get(url) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(
            slots
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    async fn existing_slot(&self, url: &str) -> Option<Arc<Slot>> {
        self.slots.read().await.get(url).cloned()
    }

    /// Get the snapshot for `url`, fetching it when needed.
    ///
    /// A non-forced call returns the cached snapshot if the last attempt is
    /// younger than the TTL. A failed fetch falls back to the previous
    /// snapshot with `stale` set; without one it fails with
    /// [`MonitorError::FetchUnavailable`].
    pub async fn get_or_fetch(&self, url: &str, force_refresh: bool) -> Result<CachedFeed> {
        let slot = self.slot(url).await;
        let observed = slot.generation.load(Ordering::Acquire);
        let _flight = slot.flight.lock().await;

        {
            let entry = slot.entry.read().await;
            if slot.generation.load(Ordering::Acquire) != observed {
                debug!("Reusing fetch of {} completed while waiting", url);
                return entry.outcome(url);
            }
            if !force_refresh && entry.is_fresh(self.ttl) {
                return entry.outcome(url);
            }
        }

        let result = self.source.fetch(url).await;

        let outcome = {
            let mut entry = slot.entry.write().await;
            entry.last_attempt = Some(Instant::now());
            entry.last_attempt_at = Some(Utc::now());
            match result {
                Ok(snapshot) => {
                    info!("Fetched {} ({} items)", url, snapshot.item_count());
                    entry.snapshot = Some(Arc::new(snapshot));
                    entry.last_success_at = entry.last_attempt_at;
                    entry.last_error = None;
                }
                Err(e) => {
                    warn!("Fetch of {} failed: {}", url, e);
                    entry.last_error = Some(e);
                }
            }
            slot.generation.fetch_add(1, Ordering::Release);
            entry.outcome(url)
        };

        self.evict_unused(url, &slot).await;
        outcome
    }

    /// Drop the entry of `url` if it is still `slot` and nothing retains it.
    async fn evict_unused(&self, url: &str, slot: &Arc<Slot>) {
        let mut slots = self.slots.write().await;
        let unused = slots.get(url).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && current.subscribers.load(Ordering::Acquire) == 0
        });
        if unused {
            slots.remove(url);
            debug!("Dropped entry of unsubscribed {}", url);
        }
    }

    /// Read the cached snapshot without fetching.
    pub async fn peek(&self, url: &str) -> Option<CachedFeed> {
        let slot = self.existing_slot(url).await?;
        let entry = slot.entry.read().await;
        entry.outcome(url).ok()
    }

    /// Fetch metadata of `url`, if it has an entry.
    ///
    /// Does not wait for a fetch in flight.
    pub async fn status(&self, url: &str) -> Option<CacheStatus> {
        let slot = self.existing_slot(url).await?;
        let entry = slot.entry.read().await;
        Some(CacheStatus {
            url: url.to_string(),
            has_snapshot: entry.snapshot.is_some(),
            item_count: entry.snapshot.as_ref().map(|s| s.item_count()).unwrap_or(0),
            last_success_at: entry.last_success_at,
            last_attempt_at: entry.last_attempt_at,
            last_error: entry.last_error.clone(),
            subscribers: slot.subscribers.load(Ordering::Acquire),
        })
    }

    /// Register a subscription to `url`.
    pub async fn retain(&self, url: &str) {
        let mut slots = self.slots.write().await;
        let slot = slots
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(Slot::new()));
        slot.subscribers.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop a subscription to `url`.
    ///
    /// Returns true when this was the last subscriber and the entry was evicted.
    pub async fn release(&self, url: &str) -> bool {
        let mut slots = self.slots.write().await;
        let Some(slot) = slots.get(url) else {
            return false;
        };
        let remaining = slot
            .subscribers
            .load(Ordering::Acquire)
            .saturating_sub(1);
        slot.subscribers.store(remaining, Ordering::Release);
        if remaining == 0 {
            slots.remove(url);
            debug!("Evicted cache entry for {}", url);
            true
        } else {
            false
        }
    }

    /// Number of cached URLs.
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Whether the cache holds no entry.
    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    const URL: &str = "https://example.com/feed.xml";

    struct ScriptedSource {
        calls: AtomicUsize,
        delay: Duration,
        results: StdMutex<VecDeque<Result<FeedSnapshot>>>,
    }

    impl ScriptedSource {
        fn new(delay: Duration, results: Vec<Result<FeedSnapshot>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                results: StdMutex::new(results.into()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedSource {
        async fn fetch(&self, url: &str) -> Result<FeedSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(MonitorError::Network(format!("{url}: no response"))))
        }
    }

    fn snapshot(title: &str) -> Result<FeedSnapshot> {
        Ok(FeedSnapshot::new(URL, title, Utc::now()))
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let source = ScriptedSource::new(Duration::from_millis(50), vec![snapshot("Feed")]);
        let cache = FeedCache::new(source.clone(), Duration::from_secs(60));

        let calls = (0..10).map(|_| cache.get_or_fetch(URL, false));
        let results = futures::future::join_all(calls).await;

        assert_eq!(source.calls(), 1);
        for result in results {
            let cached = result.unwrap();
            assert_eq!(cached.snapshot.title, "Feed");
            assert!(!cached.stale);
        }
    }

    #[tokio::test]
    async fn test_forced_waiters_reuse_inflight_outcome() {
        let source = ScriptedSource::new(Duration::from_millis(50), vec![snapshot("Feed")]);
        let cache = FeedCache::new(source.clone(), Duration::from_secs(60));

        let calls = (0..5).map(|_| cache.get_or_fetch(URL, true));
        let results = futures::future::join_all(calls).await;

        assert_eq!(source.calls(), 1);
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_failure_without_snapshot_is_unavailable() {
        let source = ScriptedSource::new(
            Duration::ZERO,
            vec![Err(MonitorError::Parse("bad document".to_string()))],
        );
        let cache = FeedCache::new(source, Duration::from_secs(60));

        let err = cache.get_or_fetch(URL, false).await.unwrap_err();
        match err {
            MonitorError::FetchUnavailable { url, reason } => {
                assert_eq!(url, URL);
                assert!(reason.contains("bad document"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(cache.peek(URL).await.is_none());
    }

    #[tokio::test]
    async fn test_failure_returns_stale_snapshot() {
        let source = ScriptedSource::new(
            Duration::ZERO,
            vec![
                snapshot("First"),
                Err(MonitorError::Network("timeout".to_string())),
                snapshot("Second"),
            ],
        );
        let cache = FeedCache::new(source, Duration::from_secs(60));
        cache.retain(URL).await;

        cache.get_or_fetch(URL, false).await.unwrap();

        let stale = cache.get_or_fetch(URL, true).await.unwrap();
        assert!(stale.stale);
        assert_eq!(stale.snapshot.title, "First");
        assert_eq!(
            stale.last_error,
            Some(MonitorError::Network("timeout".to_string()))
        );

        let fresh = cache.get_or_fetch(URL, true).await.unwrap();
        assert!(!fresh.stale);
        assert!(fresh.last_error.is_none());
        assert_eq!(fresh.snapshot.title, "Second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_governs_refetch() {
        let source = ScriptedSource::new(
            Duration::ZERO,
            vec![snapshot("First"), snapshot("Second")],
        );
        let cache = FeedCache::new(source.clone(), Duration::from_secs(60));
        cache.retain(URL).await;

        cache.get_or_fetch(URL, false).await.unwrap();
        let cached = cache.get_or_fetch(URL, false).await.unwrap();
        assert_eq!(cached.snapshot.title, "First");
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let refreshed = cache.get_or_fetch(URL, false).await.unwrap();
        assert_eq!(refreshed.snapshot.title, "Second");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_status_reports_last_error() {
        let source = ScriptedSource::new(
            Duration::ZERO,
            vec![snapshot("First"), Err(MonitorError::Network("reset".to_string()))],
        );
        let cache = FeedCache::new(source, Duration::from_secs(60));
        assert!(cache.status(URL).await.is_none());
        cache.retain(URL).await;

        cache.get_or_fetch(URL, false).await.unwrap();
        cache.get_or_fetch(URL, true).await.unwrap();

        let status = cache.status(URL).await.unwrap();
        assert!(status.has_snapshot);
        assert!(status.last_success_at.is_some());
        assert!(status.last_attempt_at >= status.last_success_at);
        assert!(matches!(status.last_error, Some(MonitorError::Network(_))));
    }

    #[tokio::test]
    async fn test_retain_release_evicts_on_last_subscriber() {
        let source = ScriptedSource::new(Duration::ZERO, vec![snapshot("Feed")]);
        let cache = FeedCache::new(source, Duration::from_secs(60));

        cache.retain(URL).await;
        cache.retain(URL).await;
        cache.get_or_fetch(URL, false).await.unwrap();
        assert_eq!(cache.status(URL).await.unwrap().subscribers, 2);

        assert!(!cache.release(URL).await);
        assert!(cache.peek(URL).await.is_some());

        assert!(cache.release(URL).await);
        assert!(cache.peek(URL).await.is_none());
        assert!(cache.is_empty().await);
        assert!(!cache.release(URL).await);
    }

    #[tokio::test]
    async fn test_one_entry_per_url() {
        let source = ScriptedSource::new(
            Duration::ZERO,
            vec![snapshot("A"), snapshot("B")],
        );
        let cache = FeedCache::new(source, Duration::from_secs(60));
        cache.retain(URL).await;
        cache.get_or_fetch(URL, false).await.unwrap();
        cache.get_or_fetch(URL, true).await.unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_unretained_entry_dropped_after_fetch() {
        let source = ScriptedSource::new(
            Duration::ZERO,
            vec![snapshot("First"), snapshot("Second")],
        );
        let cache = FeedCache::new(source.clone(), Duration::from_secs(60));

        let cached = cache.get_or_fetch(URL, false).await.unwrap();
        assert_eq!(cached.snapshot.title, "First");
        assert!(cache.is_empty().await);
        assert!(cache.status(URL).await.is_none());

        // Without a subscriber nothing is kept for the TTL.
        let again = cache.get_or_fetch(URL, false).await.unwrap();
        assert_eq!(again.snapshot.title, "Second");
        assert_eq!(source.calls(), 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_fetch_after_release_leaves_no_entry() {
        let source = ScriptedSource::new(Duration::from_millis(50), vec![snapshot("Feed")]);
        let cache = Arc::new(FeedCache::new(source, Duration::from_secs(60)));
        cache.retain(URL).await;

        let inflight = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_fetch(URL, false).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.release(URL).await);

        inflight.await.unwrap().unwrap();
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_does_not_wait_for_fetch() {
        let source = ScriptedSource::new(Duration::from_secs(60), vec![snapshot("Feed")]);
        let cache = Arc::new(FeedCache::new(source.clone(), Duration::from_secs(600)));
        cache.retain(URL).await;

        let inflight = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_fetch(URL, false).await })
        };
        while source.calls() == 0 {
            tokio::task::yield_now().await;
        }

        let status = cache.status(URL).await.unwrap();
        assert!(status.last_attempt_at.is_none());
        assert!(!status.has_snapshot);
        assert!(cache.peek(URL).await.is_none());

        inflight.await.unwrap().unwrap();
        assert!(cache.status(URL).await.unwrap().has_snapshot);
    }
}
