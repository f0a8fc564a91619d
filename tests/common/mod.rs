//! Test helpers for integration tests.
//!
//! Provides a scripted feed source, a recording notification transport, a
//! store that can be made to fail, and a minimal HTTP server.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;

use rss_monitor::notify::NotificationTransport;
use rss_monitor::{
    ClientConfig, ClientId, Config, ConfigStore, CycleReport, Dispatcher, FeedSnapshot,
    FeedSource, Item, ItemIdentity, MemoryConfigStore, MonitorError, MonitorService, Result,
    SinkKind, SubscriptionKey,
};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub const FEED_URL: &str = "https://example.com/feed.xml";

/// Build a snapshot whose items have the given identities.
pub fn snapshot(url: &str, ids: &[&str]) -> FeedSnapshot {
    FeedSnapshot::new(url, "Example Feed", Utc::now()).with_items(
        ids.iter()
            .map(|id| Item::new(*id, format!("Item {id}")).with_link(format!("{url}#{id}"))),
    )
}

pub fn client(id: &str) -> ClientId {
    ClientId::parse(id).unwrap()
}

pub fn key(client_id: &str, url: &str) -> SubscriptionKey {
    SubscriptionKey::new(client(client_id), url)
}

pub fn identities(items: &[Item]) -> Vec<&str> {
    items.iter().map(|i| i.identity.as_str()).collect()
}

/// Feed source replaying scripted responses per URL.
///
/// The last scripted response of a URL repeats forever. Fetches block while
/// the gate is closed.
pub struct FakeSource {
    responses: Mutex<HashMap<String, VecDeque<Result<FeedSnapshot>>>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Mutex<Duration>,
    gate: watch::Sender<bool>,
    panicking: AtomicBool,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            delay: Mutex::new(Duration::ZERO),
            gate,
            panicking: AtomicBool::new(false),
        })
    }

    /// Queue a response for `url`.
    pub fn push(&self, url: &str, response: Result<FeedSnapshot>) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    /// Replace every queued response of `url`.
    pub fn set(&self, url: &str, response: Result<FeedSnapshot>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), VecDeque::from([response]));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Number of fetches of `url` so far.
    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    /// Make every fetch panic instead of returning.
    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }
}

#[async_trait]
impl FeedSource for FakeSource {
    async fn fetch(&self, url: &str) -> Result<FeedSnapshot> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;

        if self.panicking.load(Ordering::SeqCst) {
            panic!("feed source exploded while fetching {url}");
        }

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Err(MonitorError::Network("empty script".to_string()))),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(MonitorError::Network("empty script".to_string()))),
            None => Err(MonitorError::Network(format!("{url}: connection refused"))),
        }
    }
}

/// A delivered notification.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub recipient: String,
    pub subject: String,
    pub items: Vec<ItemIdentity>,
}

/// Transport recording every delivery.
#[derive(Default)]
pub struct RecordingTransport {
    deliveries: Mutex<Vec<Delivery>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send(&self, recipient: &str, subject: &str, items: &[Item]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MonitorError::Sink(format!("{recipient}: 503")));
        }
        self.deliveries.lock().unwrap().push(Delivery {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            items: items.iter().map(|i| i.identity.clone()).collect(),
        });
        Ok(())
    }
}

/// Memory store whose loads and saves can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryConfigStore,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for FlakyStore {
    async fn load_client_config(&self, client_id: &ClientId) -> Result<Option<ClientConfig>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(MonitorError::Storage("disk unavailable".to_string()));
        }
        self.inner.load_client_config(client_id).await
    }

    async fn save_client_config(&self, client_id: &ClientId, config: &ClientConfig) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(MonitorError::Storage("disk full".to_string()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save_client_config(client_id, config).await
    }

    async fn list_client_ids(&self) -> Result<Vec<ClientId>> {
        self.inner.list_client_ids().await
    }
}

/// Everything a scenario needs.
pub struct Harness {
    pub service: MonitorService,
    pub source: Arc<FakeSource>,
    pub store: Arc<FlakyStore>,
    pub mail: Arc<RecordingTransport>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let source = FakeSource::new();
        let store = FlakyStore::new();
        let mail = RecordingTransport::new();
        let dispatcher = Dispatcher::new().with_transport(SinkKind::Mail, mail.clone());
        let service = MonitorService::start(store.clone(), source.clone(), dispatcher, &config);
        Self {
            service,
            source,
            store,
            mail,
        }
    }
}

/// Trigger a manual sync, failing the test on error or timeout.
pub async fn sync(service: &MonitorService, client_id: &str, url: &str) -> CycleReport {
    tokio::time::timeout(
        DEFAULT_TIMEOUT,
        service.trigger_manual_sync(&client(client_id), url),
    )
    .await
    .expect("manual sync timed out")
    .expect("manual sync failed")
}

/// Minimal HTTP server replying with scripted `(status, body)` pairs.
///
/// The last response repeats. Returns the bound address and a request counter.
pub async fn spawn_http_server(
    responses: Vec<(u16, String)>,
) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let (status, body) = responses
                .get(n)
                .or_else(|| responses.last())
                .cloned()
                .unwrap_or((500, String::new()));

            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status} Status\r\nContent-Type: application/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    (addr, hits)
}

/// RSS document with one item per `(guid, title)`.
pub fn rss_xml(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, title)| {
            format!(
                "<item><title>{title}</title><link>https://example.com/{guid}</link><guid>{guid}</guid></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>Local Feed</title><link>https://example.com</link><description>Test</description>{items}</channel></rss>"#
    )
}
