//! Feed snapshot types.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Title used when a feed does not declare one.
pub const UNTITLED_FEED: &str = "Untitled Feed";

/// Title used when an item does not declare one.
pub const UNTITLED_ITEM: &str = "Untitled";

/// Stable identity of a feed item.
///
/// This is the only key used for change detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemIdentity(String);

impl ItemIdentity {
    /// Use a GUID / Atom id published by the feed.
    pub fn from_guid(guid: impl Into<String>) -> Self {
        Self(guid.into())
    }

    /// Get the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How an identity is derived for items that carry no GUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// SHA-256 of title and link.
    #[default]
    TitleLink,
    /// SHA-256 of title and publish date.
    TitlePublished,
}

impl IdentityPolicy {
    /// Derive an identity from the item's content.
    pub fn derive(
        &self,
        title: &str,
        link: Option<&str>,
        published_at: Option<&DateTime<Utc>>,
    ) -> ItemIdentity {
        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update(b"\n");
        match self {
            IdentityPolicy::TitleLink => {
                hasher.update(link.unwrap_or_default().as_bytes());
            }
            IdentityPolicy::TitlePublished => {
                if let Some(published) = published_at {
                    hasher.update(published.to_rfc3339().as_bytes());
                }
            }
        }
        ItemIdentity(format!("sha256:{:x}", hasher.finalize()))
    }
}

/// A feed item (article).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Stable identity.
    pub identity: ItemIdentity,
    /// Item title.
    pub title: String,
    /// Link to the original article.
    pub link: Option<String>,
    /// When the item was published (or last updated, if only that is known).
    pub published_at: Option<DateTime<Utc>>,
    /// Summary with HTML stripped.
    pub summary: Option<String>,
    /// Author name.
    pub author: Option<String>,
}

impl Item {
    /// Create a new item.
    pub fn new(identity: impl Into<ItemIdentity>, title: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            title: title.into(),
            link: None,
            published_at: None,
            summary: None,
            author: None,
        }
    }

    /// Set the link.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Set the published date.
    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }
}

/// Normalized, immutable result of one fetch of a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    /// URL the feed was fetched from.
    pub url: String,
    /// Feed title.
    pub title: String,
    /// Site URL.
    pub link: Option<String>,
    /// Feed description.
    pub description: Option<String>,
    /// Items in document order, unique by identity.
    items: Vec<Item>,
    /// When the document was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl FeedSnapshot {
    /// Create an empty snapshot.
    pub fn new(url: impl Into<String>, title: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            link: None,
            description: None,
            items: Vec::new(),
            fetched_at,
        }
    }

    /// Set the site URL.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the items.
    ///
    /// Items whose identity already occurred earlier in the sequence are dropped.
    pub fn with_items(mut self, items: impl IntoIterator<Item = Item>) -> Self {
        let mut seen = HashSet::new();
        self.items = items
            .into_iter()
            .filter(|item| seen.insert(item.identity.clone()))
            .collect();
        self
    }

    /// Items in document order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Number of items.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Look up an item by identity.
    pub fn get(&self, identity: &ItemIdentity) -> Option<&Item> {
        self.items.iter().find(|item| &item.identity == identity)
    }

    /// Publish date of the newest item.
    pub fn latest_item_date(&self) -> Option<DateTime<Utc>> {
        self.items.iter().filter_map(|item| item.published_at).max()
    }

    /// Copy of this snapshot with a different item sequence.
    pub(crate) fn with_same_header(&self, items: Vec<Item>) -> Self {
        Self {
            url: self.url.clone(),
            title: self.title.clone(),
            link: self.link.clone(),
            description: self.description.clone(),
            items,
            fetched_at: self.fetched_at,
        }
    }
}
