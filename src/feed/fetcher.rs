//! Feed fetcher with security measures.
//!
//! Fetches RSS/Atom documents over HTTP(S) and normalizes them into
//! [`FeedSnapshot`]s. Network failures are retried with exponential
//! backoff; parse failures are not.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::feed::types::{
    FeedSnapshot, IdentityPolicy, Item, ItemIdentity, UNTITLED_FEED, UNTITLED_ITEM,
};
use crate::{MonitorError, Result};

/// Global limiter for outbound requests.
type RequestLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Source of feed snapshots.
///
/// The cache talks to the network only through this trait.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch and parse the feed at `url`.
    async fn fetch(&self, url: &str) -> Result<FeedSnapshot>;
}

/// HTTP feed fetcher.
pub struct HttpFeedFetcher {
    client: Client,
    config: FetchConfig,
    limiter: Option<Arc<RequestLimiter>>,
}

impl HttpFeedFetcher {
    /// Create a new fetcher.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| MonitorError::Config(format!("failed to create HTTP client: {}", e)))?;

        let limiter = NonZeroU32::new(config.requests_per_minute)
            .map(|rpm| Arc::new(RateLimiter::direct(Quota::per_minute(rpm))));

        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    /// Perform a single request and return the body.
    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                MonitorError::Validation(format!("invalid request: {}", e))
            } else {
                MonitorError::Network(format!("failed to fetch feed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let max_size = self.config.max_feed_size_bytes;
        if let Some(content_length) = response.content_length() {
            if content_length > max_size {
                return Err(MonitorError::Parse(format!(
                    "feed too large: {} bytes (max {} bytes)",
                    content_length, max_size
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| MonitorError::Network(format!("failed to read response: {}", e)))?;

        if bytes.len() as u64 > max_size {
            return Err(MonitorError::Parse(format!(
                "feed too large: {} bytes (max {} bytes)",
                bytes.len(),
                max_size
            )));
        }

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl FeedSource for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<FeedSnapshot> {
        validate_url_with(url, self.config.allow_private_hosts)?;

        let mut retry = 0;
        let body = loop {
            match self.fetch_once(url).await {
                Ok(body) => break body,
                Err(e) if e.is_retryable() && retry < self.config.max_retries => {
                    retry += 1;
                    let delay = self.config.backoff(retry);
                    warn!(
                        "Fetch of {} failed ({}), retry {}/{} in {:?}",
                        url, e, retry, self.config.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        debug!("Fetched {} ({} bytes)", url, body.len());
        parse_feed(
            url,
            &body,
            Utc::now(),
            self.config.identity_policy,
            self.config.max_summary_length,
        )
    }
}

/// Map a non-success HTTP status to an error kind.
///
/// Server errors, 408 and 429 are transient; everything else is a
/// permanent property of the document at that URL.
fn classify_status(status: StatusCode) -> MonitorError {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        MonitorError::Network(format!("HTTP error: {}", status))
    } else {
        MonitorError::Parse(format!("HTTP error: {}", status))
    }
}

/// Validate a subscription URL, rejecting private and internal hosts.
pub fn validate_url(url: &str) -> Result<()> {
    validate_url_with(url, false)
}

/// Validate a subscription URL.
///
/// Checks that the URL parses, uses http or https and has a host. Unless
/// `allow_private` is set, loopback/private addresses and internal
/// hostnames are rejected as well.
pub fn validate_url_with(url: &str, allow_private: bool) -> Result<()> {
    let parsed =
        url::Url::parse(url).map_err(|e| MonitorError::Validation(format!("invalid URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(MonitorError::Validation(format!(
                "unsupported URL scheme: {}",
                scheme
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| MonitorError::Validation("URL has no host".to_string()))?;

    if allow_private {
        return Ok(());
    }

    match host {
        url::Host::Domain(domain) => {
            if is_forbidden_hostname(domain) {
                return Err(MonitorError::Validation(format!("forbidden host: {}", domain)));
            }
        }
        url::Host::Ipv4(ipv4) => {
            let ip = IpAddr::V4(ipv4);
            if is_private_ip(&ip) {
                return Err(MonitorError::Validation(format!(
                    "private IP address not allowed: {}",
                    ip
                )));
            }
        }
        url::Host::Ipv6(ipv6) => {
            let ip = IpAddr::V6(ipv6);
            if is_private_ip(&ip) {
                return Err(MonitorError::Validation(format!(
                    "private IP address not allowed: {}",
                    ip
                )));
            }
        }
    }

    Ok(())
}

/// Check if a hostname is forbidden.
fn is_forbidden_hostname(host: &str) -> bool {
    let host_lower = host.to_lowercase();

    if host_lower == "localhost" {
        return true;
    }

    const FORBIDDEN_SUFFIXES: [&str; 7] = [
        ".local",
        ".localhost",
        ".internal",
        ".intranet",
        ".corp",
        ".home",
        ".lan",
    ];

    FORBIDDEN_SUFFIXES
        .iter()
        .any(|suffix| host_lower.ends_with(suffix))
}

/// Check if an IP address is private/reserved.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();
            ipv4.is_loopback()
                || ipv4.is_private()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_unspecified()
                // Documentation: 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24
                || (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
                || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
                || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
        }
        IpAddr::V6(ipv6) => {
            let segments = ipv6.segments();
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                // Unique local: fc00::/7
                || (segments[0] & 0xfe00) == 0xfc00
                // Link-local: fe80::/10
                || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Parse feed bytes into a snapshot.
///
/// Entries carrying a GUID / Atom id keep it as their identity; the
/// others get one derived by `policy`.
pub fn parse_feed(
    url: &str,
    bytes: &[u8],
    fetched_at: DateTime<Utc>,
    policy: IdentityPolicy,
    max_summary_length: usize,
) -> Result<FeedSnapshot> {
    // An empty generated id marks entries without a published identifier.
    let feed = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)
        .map_err(|e| MonitorError::Parse(format!("failed to parse feed: {}", e)))?;

    let title = feed
        .title
        .map(|t| strip_html(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED_FEED.to_string());

    let items: Vec<Item> = feed
        .entries
        .into_iter()
        .map(|entry| {
            let item_title = entry
                .title
                .map(|t| strip_html(&t.content))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNTITLED_ITEM.to_string());
            let link = entry.links.first().map(|l| l.href.clone());
            let published_at = entry.published.or(entry.updated);
            let guid = entry.id.trim();
            let identity = if guid.is_empty() {
                policy.derive(&item_title, link.as_deref(), published_at.as_ref())
            } else {
                ItemIdentity::from_guid(guid)
            };
            let summary = entry
                .summary
                .map(|t| t.content)
                .or(entry.content.and_then(|c| c.body))
                .map(|d| truncate(&strip_html(&d), max_summary_length));
            let author = entry.authors.first().map(|a| a.name.clone());

            Item {
                identity,
                title: item_title,
                link,
                published_at,
                summary,
                author,
            }
        })
        .collect();

    let mut snapshot = FeedSnapshot::new(url, title, fetched_at).with_items(items);
    if let Some(site) = feed.links.first() {
        snapshot = snapshot.with_link(site.href.clone());
    }
    if let Some(description) = feed.description {
        snapshot = snapshot.with_description(strip_html(&description.content));
    }
    Ok(snapshot)
}

/// Strip HTML tags from text and decode common entities.
fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut in_entity = false;
    let mut entity = String::new();

    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            '&' if !in_tag => {
                in_entity = true;
                entity.clear();
            }
            ';' if in_entity => {
                in_entity = false;
                match entity.as_str() {
                    "amp" => result.push('&'),
                    "lt" => result.push('<'),
                    "gt" => result.push('>'),
                    "quot" => result.push('"'),
                    "apos" => result.push('\''),
                    "nbsp" => result.push(' '),
                    _ if entity.starts_with('#') => {
                        if let Some(c) = parse_numeric_entity(&entity).and_then(char::from_u32) {
                            result.push(c);
                        }
                    }
                    _ => {
                        result.push('&');
                        result.push_str(&entity);
                        result.push(';');
                    }
                }
            }
            _ if in_entity => entity.push(ch),
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    // An unterminated entity is literal text.
    if in_entity {
        result.push('&');
        result.push_str(&entity);
    }

    result.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Parse a numeric HTML entity (e.g., "#123" or "#x7B").
fn parse_numeric_entity(entity: &str) -> Option<u32> {
    if let Some(hex) = entity
        .strip_prefix("#x")
        .or_else(|| entity.strip_prefix("#X"))
    {
        u32::from_str_radix(hex, 16).ok()
    } else {
        entity.strip_prefix('#').and_then(|dec| dec.parse().ok())
    }
}

/// Truncate text to at most `max` characters.
fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
