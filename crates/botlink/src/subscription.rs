//! Registry of host event subscriptions.
//!
//! The registry holds the union of every category/event pair the application
//! asked for. It is replayed as a single `Subscribe` after each connect, so
//! the host ends up in the same state no matter how many incremental calls
//! happened while the client was offline.

use std::collections::{BTreeMap, BTreeSet};

/// Category name to event names, as sent in a `Subscribe` request.
pub type EventSubscriptions = BTreeMap<String, Vec<String>>;

/// Store for subscribed event names keyed by category.
#[derive(Default)]
pub struct SubscriptionRegistry {
    categories: scc::HashMap<String, BTreeSet<String>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge events into a category.
    ///
    /// Returns the events that were not subscribed before.
    pub fn add<S: AsRef<str>>(&self, category: &str, events: &[S]) -> Vec<String> {
        let mut added = Vec::new();
        let merged = self.categories.update_sync(category, |_, subscribed| {
            merge_into(subscribed, events, &mut added);
        });
        if merged.is_some() {
            return added;
        }

        let fresh: BTreeSet<String> = events.iter().map(|e| e.as_ref().to_string()).collect();
        if fresh.is_empty() {
            return added;
        }

        match self.categories.insert_sync(category.to_string(), fresh.clone()) {
            Ok(()) => fresh.into_iter().collect(),
            Err(_) => {
                // Another writer created the category first
                let _ = self.categories.update_sync(category, |_, subscribed| {
                    merge_into(subscribed, events, &mut added);
                });
                added
            }
        }
    }

    /// Subtract events from a category, dropping the category once empty.
    ///
    /// Returns the events that were actually removed.
    pub fn remove<S: AsRef<str>>(&self, category: &str, events: &[S]) -> Vec<String> {
        let mut removed = Vec::new();
        let mut now_empty = false;

        let _ = self.categories.update_sync(category, |_, subscribed| {
            for event in events {
                if subscribed.remove(event.as_ref()) {
                    removed.push(event.as_ref().to_string());
                }
            }
            now_empty = subscribed.is_empty();
        });

        if now_empty {
            self.categories.remove_sync(category);
        }

        removed
    }

    /// The union currently held, ready for replay.
    pub fn snapshot(&self) -> EventSubscriptions {
        let mut snapshot = EventSubscriptions::new();
        self.categories.retain_sync(|category, events| {
            snapshot.insert(category.clone(), events.iter().cloned().collect());
            true
        });
        snapshot
    }

    pub fn contains(&self, category: &str, event: &str) -> bool {
        self.categories
            .update_sync(category, |_, subscribed| subscribed.contains(event))
            .unwrap_or(false)
    }

    /// Number of categories with at least one event.
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

fn merge_into<S: AsRef<str>>(
    subscribed: &mut BTreeSet<String>,
    events: &[S],
    added: &mut Vec<String>,
) {
    for event in events {
        if subscribed.insert(event.as_ref().to_string()) {
            added.push(event.as_ref().to_string());
        }
    }
}
