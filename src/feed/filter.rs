//! Per-client item filtering.
//!
//! Filtering is a pure function of a snapshot and a rule set. The same cached
//! snapshot yields a different view for every client.

use chrono::Duration;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::feed::types::{FeedSnapshot, Item};

/// Item field a content rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    Title,
    Summary,
    Author,
}

impl RuleField {
    fn value<'a>(&self, item: &'a Item) -> &'a str {
        match self {
            RuleField::Title => &item.title,
            RuleField::Summary => item.summary.as_deref().unwrap_or_default(),
            RuleField::Author => item.author.as_deref().unwrap_or_default(),
        }
    }
}

/// Comparison performed by a content rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Contains,
    NotContains,
    Equals,
    Regex,
}

/// A single content predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRule {
    pub field: RuleField,
    pub operator: RuleOperator,
    pub value: String,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl ContentRule {
    /// Create a case-insensitive rule.
    pub fn new(field: RuleField, operator: RuleOperator, value: impl Into<String>) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
            case_sensitive: false,
        }
    }

    /// Make the rule case sensitive.
    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    /// Check whether the item satisfies this rule.
    ///
    /// A pattern that does not compile never matches.
    pub fn matches(&self, item: &Item) -> bool {
        let field = self.field.value(item);

        if self.operator == RuleOperator::Regex {
            return RegexBuilder::new(&self.value)
                .case_insensitive(!self.case_sensitive)
                .build()
                .map(|re| re.is_match(field))
                .unwrap_or(false);
        }

        let (field, value) = if self.case_sensitive {
            (field.to_string(), self.value.clone())
        } else {
            (field.to_lowercase(), self.value.to_lowercase())
        };

        match self.operator {
            RuleOperator::Contains => field.contains(&value),
            RuleOperator::NotContains => !field.contains(&value),
            RuleOperator::Equals => field == value,
            RuleOperator::Regex => false,
        }
    }
}

/// Filter rules of one subscription.
///
/// Each rule group that is set must pass; groups left empty pass everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRules {
    /// Case-insensitive keywords matched against title and summary.
    /// An item passes when any keyword matches.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Exclude items published more than this many days before the fetch.
    #[serde(default)]
    pub max_age_days: Option<u32>,
    /// Content rules; an item passes when any rule matches.
    #[serde(default)]
    pub content_rules: Vec<ContentRule>,
    /// Keep at most this many items, applied after every other rule.
    #[serde(default)]
    pub max_items: Option<usize>,
}

impl FilterRules {
    /// Whether no rule is set.
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
            && self.max_age_days.is_none()
            && self.content_rules.is_empty()
            && self.max_items.is_none()
    }

    fn keyword_match(&self, item: &Item) -> bool {
        let mut keywords = self.keywords.iter().filter(|k| !k.trim().is_empty()).peekable();
        if keywords.peek().is_none() {
            return true;
        }
        let haystack = format!(
            "{}\n{}",
            item.title,
            item.summary.as_deref().unwrap_or_default()
        )
        .to_lowercase();
        keywords.any(|k| haystack.contains(&k.to_lowercase()))
    }

    fn content_match(&self, item: &Item) -> bool {
        self.content_rules.is_empty() || self.content_rules.iter().any(|r| r.matches(item))
    }

    /// A cutoff beyond the representable date range means no cutoff.
    fn age_match(&self, item: &Item, snapshot: &FeedSnapshot) -> bool {
        let (Some(days), Some(published)) = (self.max_age_days, item.published_at) else {
            return true;
        };
        Duration::try_days(i64::from(days))
            .and_then(|age| snapshot.fetched_at.checked_sub_signed(age))
            .map_or(true, |cutoff| published >= cutoff)
    }
}

/// Apply filter rules to a snapshot.
///
/// Returns a new snapshot; the input is never modified.
pub fn apply(snapshot: &FeedSnapshot, rules: &FilterRules) -> FeedSnapshot {
    if rules.is_empty() {
        return snapshot.clone();
    }

    let limit = rules.max_items.unwrap_or(usize::MAX);
    let items: Vec<Item> = snapshot
        .items()
        .iter()
        .filter(|item| {
            rules.keyword_match(item)
                && rules.content_match(item)
                && rules.age_match(item, snapshot)
        })
        .take(limit)
        .cloned()
        .collect();

    snapshot.with_same_header(items)
}
