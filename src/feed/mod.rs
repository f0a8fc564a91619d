//! Feed pipeline for RSS Monitor.
//!
//! This module turns remote syndication documents into comparable snapshots:
//! - Fetching and parsing RSS/Atom documents
//! - Sharing snapshots across clients with single-flight fetching
//! - Per-client filtering
//! - Detecting items a client has not seen yet

pub mod cache;
pub mod detector;
pub mod fetcher;
pub mod filter;
pub mod types;

pub use cache::{CacheStatus, CachedFeed, FeedCache};
pub use detector::{diff, Diff, SeenSet};
pub use fetcher::{parse_feed, validate_url, validate_url_with, FeedSource, HttpFeedFetcher};
pub use filter::{ContentRule, FilterRules, RuleField, RuleOperator};
pub use types::{FeedSnapshot, IdentityPolicy, Item, ItemIdentity};
