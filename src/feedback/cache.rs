//! Feedback state cache with staleness marks.
//!
//! Entries never expire. They are overwritten by refills and push updates
//! and only removed by [`FeedbackCache::invalidate_prefix`].

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::debug;

use super::key::FeedbackKey;
use super::state::FeedbackState;

#[derive(Debug, Default)]
pub struct FeedbackCache {
    entries: HashMap<FeedbackKey, FeedbackState>,
    stale: HashSet<FeedbackKey>,
}

impl FeedbackCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the entry for `(actor_id, feedback_id, options)`.
    pub fn store(
        &mut self,
        actor_id: &str,
        feedback_id: &str,
        options: &Map<String, Value>,
        state: FeedbackState,
    ) -> FeedbackKey {
        let key = FeedbackKey::derive(actor_id, feedback_id, options);
        self.store_key(key.clone(), state);
        key
    }

    pub fn store_key(&mut self, key: FeedbackKey, state: FeedbackState) {
        self.entries.insert(key, state);
    }

    #[must_use]
    pub fn get(
        &self,
        actor_id: &str,
        feedback_id: &str,
        options: &Map<String, Value>,
    ) -> Option<&FeedbackState> {
        self.get_key(&FeedbackKey::derive(actor_id, feedback_id, options))
    }

    #[must_use]
    pub fn get_key(&self, key: &FeedbackKey) -> Option<&FeedbackState> {
        self.entries.get(key)
    }

    /// Remove every entry (and staleness mark) whose key starts with `prefix`.
    pub fn invalidate_prefix(&mut self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        self.stale.retain(|key| !key.starts_with(prefix));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(prefix, removed, "invalidated feedback cache entries");
        }
        removed
    }

    pub fn mark_stale(&mut self, key: FeedbackKey) {
        self.stale.insert(key);
    }

    /// Clear the staleness mark. Returns whether one was set.
    pub fn clear_stale(&mut self, key: &FeedbackKey) -> bool {
        self.stale.remove(key)
    }

    #[must_use]
    pub fn is_stale(&self, key: &FeedbackKey) -> bool {
        self.stale.contains(key)
    }

    /// Present and not stale.
    #[must_use]
    pub fn is_resolvable(&self, key: &FeedbackKey) -> bool {
        self.entries.contains_key(key) && !self.stale.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
