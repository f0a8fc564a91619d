//! Subscription and client configuration types.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::feed::{FilterRules, SeenSet};
use crate::notify::NotificationSink;
use crate::{MonitorError, Result};

/// Maximum length of a client id.
pub const MAX_CLIENT_ID_LENGTH: usize = 64;

/// Default number of items shown per feed.
pub const DEFAULT_MAX_ITEMS_PER_FEED: usize = 20;

/// Identifier of a client.
///
/// Restricted to ASCII letters, digits, `-` and `_` so it can name a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);

impl ClientId {
    /// Parse and validate a client id.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_CLIENT_ID_LENGTH {
            return Err(MonitorError::Validation(format!(
                "client id must be 1-{} characters",
                MAX_CLIENT_ID_LENGTH
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(MonitorError::Validation(format!(
                "client id contains invalid characters: {}",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Derive a stable id from request attributes.
    pub fn derive(user_agent: &str, remote_addr: &str) -> Self {
        let digest = Sha256::digest(format!("{}:{}", user_agent, remote_addr).as_bytes());
        let hex = format!("{:x}", digest);
        Self(hex[..16].to_string())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ClientId {
    type Error = MonitorError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

/// How often a subscription is synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateFrequency {
    /// Only on explicit trigger.
    Manual,
    Hourly,
    #[default]
    Daily,
    Weekly,
}

impl UpdateFrequency {
    /// Timer interval, `None` for manual subscriptions.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            UpdateFrequency::Manual => None,
            UpdateFrequency::Hourly => Some(Duration::from_secs(60 * 60)),
            UpdateFrequency::Daily => Some(Duration::from_secs(24 * 60 * 60)),
            UpdateFrequency::Weekly => Some(Duration::from_secs(7 * 24 * 60 * 60)),
        }
    }

    /// Get the frequency as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateFrequency::Manual => "manual",
            UpdateFrequency::Hourly => "hourly",
            UpdateFrequency::Daily => "daily",
            UpdateFrequency::Weekly => "weekly",
        }
    }
}

impl fmt::Display for UpdateFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateFrequency {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(UpdateFrequency::Manual),
            "hourly" => Ok(UpdateFrequency::Hourly),
            "daily" => Ok(UpdateFrequency::Daily),
            "weekly" => Ok(UpdateFrequency::Weekly),
            _ => Err(MonitorError::Validation(format!(
                "unknown update frequency: {}",
                s
            ))),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// A client's binding to one feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub feed_url: String,
    /// Display alias; empty means "use the URL".
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub update_frequency: UpdateFrequency,
    #[serde(default)]
    pub filter_rules: FilterRules,
    /// Identities this client was already notified about.
    #[serde(default)]
    pub last_seen: SeenSet,
    /// Disabled subscriptions keep their state but are never scheduled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// When the last cycle was committed.
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Create an enabled subscription with default settings.
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            alias: String::new(),
            update_frequency: UpdateFrequency::default(),
            filter_rules: FilterRules::default(),
            last_seen: SeenSet::new(),
            enabled: true,
            last_checked_at: None,
        }
    }

    /// Alias, or the URL when no alias is set.
    pub fn display_name(&self) -> &str {
        if self.alias.is_empty() {
            &self.feed_url
        } else {
            &self.alias
        }
    }

    /// Whether the scheduler should arm a timer for this subscription.
    pub fn is_scheduled(&self) -> bool {
        self.enabled && self.update_frequency.interval().is_some()
    }
}

/// Data for a new subscription.
#[derive(Debug, Clone, Default)]
pub struct NewSubscription {
    pub feed_url: String,
    pub alias: String,
    pub update_frequency: UpdateFrequency,
    pub filter_rules: FilterRules,
}

impl NewSubscription {
    /// Create a new subscription request.
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            ..Default::default()
        }
    }

    /// Set the alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Set the update frequency.
    pub fn with_frequency(mut self, frequency: UpdateFrequency) -> Self {
        self.update_frequency = frequency;
        self
    }

    /// Set the filter rules.
    pub fn with_filter_rules(mut self, rules: FilterRules) -> Self {
        self.filter_rules = rules;
        self
    }

    pub(crate) fn into_subscription(self) -> Subscription {
        Subscription {
            alias: self.alias.trim().to_string(),
            update_frequency: self.update_frequency,
            filter_rules: self.filter_rules,
            ..Subscription::new(self.feed_url.trim())
        }
    }
}

/// Edit of an existing subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    pub alias: Option<String>,
    pub update_frequency: Option<UpdateFrequency>,
    pub filter_rules: Option<FilterRules>,
    pub enabled: Option<bool>,
}

impl SubscriptionUpdate {
    /// Create an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set new alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Set new update frequency.
    pub fn frequency(mut self, frequency: UpdateFrequency) -> Self {
        self.update_frequency = Some(frequency);
        self
    }

    /// Set new filter rules.
    pub fn filter_rules(mut self, rules: FilterRules) -> Self {
        self.filter_rules = Some(rules);
        self
    }

    /// Enable or disable the subscription.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Check if the update is empty.
    pub fn is_empty(&self) -> bool {
        self.alias.is_none()
            && self.update_frequency.is_none()
            && self.filter_rules.is_none()
            && self.enabled.is_none()
    }

    pub(crate) fn apply_to(self, subscription: &mut Subscription) {
        if let Some(alias) = self.alias {
            subscription.alias = alias.trim().to_string();
        }
        if let Some(frequency) = self.update_frequency {
            subscription.update_frequency = frequency;
        }
        if let Some(rules) = self.filter_rules {
            subscription.filter_rules = rules;
        }
        if let Some(enabled) = self.enabled {
            subscription.enabled = enabled;
        }
    }
}

fn default_max_items_per_feed() -> usize {
    DEFAULT_MAX_ITEMS_PER_FEED
}

/// Everything stored for one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_id: ClientId,
    /// Subscriptions in the order they were added, unique by URL.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    /// Sinks notified about this client's new items.
    #[serde(default)]
    pub sinks: Vec<NotificationSink>,
    /// Items shown per feed in the filtered view.
    #[serde(default = "default_max_items_per_feed")]
    pub max_items_per_feed: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientConfig {
    /// Create an empty configuration.
    pub fn new(client_id: ClientId) -> Self {
        let now = Utc::now();
        Self {
            client_id,
            subscriptions: Vec::new(),
            sinks: Vec::new(),
            max_items_per_feed: DEFAULT_MAX_ITEMS_PER_FEED,
            created_at: now,
            updated_at: now,
        }
    }

    /// Find the subscription for `feed_url`.
    pub fn subscription(&self, feed_url: &str) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.feed_url == feed_url)
    }

    pub(crate) fn subscription_mut(&mut self, feed_url: &str) -> Option<&mut Subscription> {
        self.subscriptions.iter_mut().find(|s| s.feed_url == feed_url)
    }

    /// Mark the configuration as edited.
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Identifies one (client, feed) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub client_id: ClientId,
    pub feed_url: String,
}

impl SubscriptionKey {
    /// Create a key.
    pub fn new(client_id: ClientId, feed_url: impl Into<String>) -> Self {
        Self {
            client_id,
            feed_url: feed_url.into(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.client_id, self.feed_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_parse() {
        assert!(ClientId::parse("abc-123_XYZ").is_ok());
        assert!(ClientId::parse("").is_err());
        assert!(ClientId::parse("../etc/passwd").is_err());
        assert!(ClientId::parse("a".repeat(65)).is_err());
        assert!(ClientId::parse("a".repeat(64)).is_ok());
    }

    #[test]
    fn test_client_id_derive() {
        let a = ClientId::derive("Mozilla/5.0", "203.0.113.7");
        let b = ClientId::derive("Mozilla/5.0", "203.0.113.7");
        let c = ClientId::derive("Mozilla/5.0", "203.0.113.8");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 16);
        assert!(ClientId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn test_client_id_deserialize_validates() {
        assert!(serde_json::from_str::<ClientId>(r#""ok""#).is_ok());
        assert!(serde_json::from_str::<ClientId>(r#""a/b""#).is_err());
    }

    #[test]
    fn test_update_frequency_interval() {
        assert_eq!(UpdateFrequency::Manual.interval(), None);
        assert_eq!(
            UpdateFrequency::Hourly.interval(),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(
            UpdateFrequency::Weekly.interval(),
            Some(Duration::from_secs(604800))
        );
        assert_eq!(UpdateFrequency::default(), UpdateFrequency::Daily);
    }

    #[test]
    fn test_update_frequency_from_str() {
        assert_eq!("HOURLY".parse::<UpdateFrequency>().unwrap(), UpdateFrequency::Hourly);
        assert!("monthly".parse::<UpdateFrequency>().is_err());
    }

    #[test]
    fn test_subscription_display_name() {
        let mut sub = Subscription::new("https://example.com/feed");
        assert_eq!(sub.display_name(), "https://example.com/feed");
        sub.alias = "Example".to_string();
        assert_eq!(sub.display_name(), "Example");
    }

    #[test]
    fn test_subscription_is_scheduled() {
        let mut sub = Subscription::new("https://example.com/feed");
        assert!(sub.is_scheduled());
        sub.update_frequency = UpdateFrequency::Manual;
        assert!(!sub.is_scheduled());
        sub.update_frequency = UpdateFrequency::Hourly;
        sub.enabled = false;
        assert!(!sub.is_scheduled());
    }

    #[test]
    fn test_subscription_update_apply() {
        let mut sub = Subscription::new("https://example.com/feed");
        let update = SubscriptionUpdate::new()
            .alias("  News  ")
            .frequency(UpdateFrequency::Weekly);
        assert!(!update.is_empty());
        update.apply_to(&mut sub);
        assert_eq!(sub.alias, "News");
        assert_eq!(sub.update_frequency, UpdateFrequency::Weekly);
        assert!(sub.enabled);
        assert!(SubscriptionUpdate::new().is_empty());
    }

    #[test]
    fn test_client_config_deserialize_defaults() {
        let json = r#"{
            "client_id": "client-1",
            "subscriptions": [{"feed_url": "https://example.com/feed"}],
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_items_per_feed, DEFAULT_MAX_ITEMS_PER_FEED);
        assert!(config.sinks.is_empty());
        let sub = config.subscription("https://example.com/feed").unwrap();
        assert!(sub.enabled);
        assert_eq!(sub.update_frequency, UpdateFrequency::Daily);
        assert!(sub.last_seen.is_empty());
    }
}
