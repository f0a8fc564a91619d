//! Change detection between a snapshot and a client's last-seen set.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::feed::types::{FeedSnapshot, Item, ItemIdentity};

/// Ordered set of item identities a client has already been notified about.
///
/// Identities are kept oldest first by the fetch in which they were last seen.
/// Persisted as a plain JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ItemIdentity>", into = "Vec<ItemIdentity>")]
pub struct SeenSet {
    order: VecDeque<ItemIdentity>,
    members: HashSet<ItemIdentity>,
}

impl SeenSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Check membership.
    pub fn contains(&self, identity: &ItemIdentity) -> bool {
        self.members.contains(identity)
    }

    /// Identities, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ItemIdentity> {
        self.order.iter()
    }

    /// Mark an identity as the most recently seen one.
    fn touch(&mut self, identity: ItemIdentity) {
        if self.members.contains(&identity) {
            self.order.retain(|id| id != &identity);
        } else {
            self.members.insert(identity.clone());
        }
        self.order.push_back(identity);
    }

    /// Evict the oldest identities until at most `cap` remain.
    fn trim(&mut self, cap: usize) {
        while self.order.len() > cap {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }
}

impl FromIterator<ItemIdentity> for SeenSet {
    fn from_iter<T: IntoIterator<Item = ItemIdentity>>(iter: T) -> Self {
        let mut set = SeenSet::new();
        for identity in iter {
            if set.members.insert(identity.clone()) {
                set.order.push_back(identity);
            }
        }
        set
    }
}

impl From<Vec<ItemIdentity>> for SeenSet {
    fn from(ids: Vec<ItemIdentity>) -> Self {
        ids.into_iter().collect()
    }
}

impl From<SeenSet> for Vec<ItemIdentity> {
    fn from(set: SeenSet) -> Self {
        set.order.into_iter().collect()
    }
}

/// Result of diffing a snapshot against a last-seen set.
#[derive(Debug, Clone, PartialEq)]
pub struct Diff {
    /// Items not present in the last-seen set, in document order.
    pub new_items: Vec<Item>,
    /// Last-seen set to commit once the dispatch attempt is over.
    pub updated_last_seen: SeenSet,
}

impl Diff {
    /// Whether the snapshot contained anything new.
    pub fn has_new_items(&self) -> bool {
        !self.new_items.is_empty()
    }
}

/// Compute the items of `snapshot` that are new relative to `last_seen`.
///
/// The updated set holds every previous identity plus every current one, with
/// the current ones ranked most recent. It is trimmed to `cap` from the oldest
/// end, but never below the size of the current snapshot so nothing in this
/// fetch is forgotten.
pub fn diff(snapshot: &FeedSnapshot, last_seen: &SeenSet, cap: usize) -> Diff {
    let new_items: Vec<Item> = snapshot
        .items()
        .iter()
        .filter(|item| !last_seen.contains(&item.identity))
        .cloned()
        .collect();

    let mut updated = last_seen.clone();
    // Feeds list newest first; insert in reverse so the head ranks most recent.
    for item in snapshot.items().iter().rev() {
        updated.touch(item.identity.clone());
    }
    updated.trim(cap.max(snapshot.item_count()));

    Diff {
        new_items,
        updated_last_seen: updated,
    }
}
