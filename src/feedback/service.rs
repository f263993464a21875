//! Synchronous feedback evaluation for the console.
//!
//! `handle_feedback` answers from the cache only. A miss (or a stale hit) is
//! queued for the rebuild checker, which refills the cache and asks the
//! console to evaluate again.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::cache::FeedbackCache;
use super::key::{FeedbackKey, actor_prefix, split_composite};
use super::rebuild::RebuildScheduler;
use super::state::{FeedbackState, boolean_value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    #[default]
    Boolean,
    Advanced,
}

/// A console feedback poll. `feedback_id` is the composite `actorId~feedbackId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub feedback_id: String,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(rename = "type", default)]
    pub kind: FeedbackType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeedbackValue {
    Boolean(bool),
    Advanced(FeedbackState),
}

impl FeedbackValue {
    fn from_state(kind: FeedbackType, state: Option<&FeedbackState>) -> Self {
        match kind {
            FeedbackType::Boolean => Self::Boolean(boolean_value(state)),
            FeedbackType::Advanced => Self::Advanced(state.cloned().unwrap_or_default()),
        }
    }
}

#[derive(Clone)]
pub struct FeedbackService {
    cache: Arc<Mutex<FeedbackCache>>,
    scheduler: RebuildScheduler,
}

impl FeedbackService {
    #[must_use]
    pub fn new(cache: Arc<Mutex<FeedbackCache>>, scheduler: RebuildScheduler) -> Self {
        Self { cache, scheduler }
    }

    /// Answer a feedback poll from the cache, queueing a refill on miss.
    pub fn handle_feedback(&self, request: &FeedbackRequest) -> FeedbackValue {
        let Some((actor_id, feedback_id)) = split_composite(&request.feedback_id) else {
            warn!(feedback_id = %request.feedback_id, "feedback id is not actor~feedback");
            return FeedbackValue::from_state(request.kind, None);
        };
        let key = FeedbackKey::derive(actor_id, feedback_id, &request.options);

        let (state, stale) = {
            let cache = crate::lock(&self.cache);
            (cache.get_key(&key).cloned(), cache.is_stale(&key))
        };

        if (state.is_none() || stale) && self.scheduler.record_miss(key, request.options.clone()) {
            self.scheduler.start_checker();
        }

        FeedbackValue::from_state(request.kind, state.as_ref())
    }

    /// Store a pushed state and mark it stale until the next refill confirms it.
    pub fn apply_push(
        &self,
        actor_id: &str,
        feedback_id: &str,
        options: &Map<String, Value>,
        state: FeedbackState,
    ) -> FeedbackKey {
        let mut cache = crate::lock(&self.cache);
        let key = cache.store(actor_id, feedback_id, options, state);
        cache.mark_stale(key.clone());
        debug!(key = %key, "feedback state pushed");
        key
    }

    /// Drop every cached entry of `actor_id`.
    pub fn invalidate_actor(&self, actor_id: &str) -> usize {
        crate::lock(&self.cache).invalidate_prefix(&actor_prefix(actor_id))
    }

    #[must_use]
    pub fn scheduler(&self) -> &RebuildScheduler {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ConsoleSink;
    use crate::engine::{EngineApi, RemoteEngine};
    use crate::feedback::images::ImageStore;
    use crate::feedback::resolver::FeedbackResolver;
    use crate::test_utils::{RecordingSink, ScriptedEngine};
    use serde_json::json;
    use std::time::Duration;

    fn service() -> (FeedbackService, Arc<Mutex<FeedbackCache>>) {
        let engine = Arc::new(ScriptedEngine::new());
        let api = EngineApi::new(engine as Arc<dyn RemoteEngine>);
        let resolver = FeedbackResolver::new(api.clone(), Arc::new(Mutex::new(ImageStore::new())));
        let cache = Arc::new(Mutex::new(FeedbackCache::new()));
        let scheduler = RebuildScheduler::new(
            api,
            resolver,
            Arc::clone(&cache),
            Arc::new(RecordingSink::new()) as Arc<dyn ConsoleSink>,
            Duration::from_millis(500),
        );
        (FeedbackService::new(Arc::clone(&cache), scheduler), cache)
    }

    fn request(kind: FeedbackType) -> FeedbackRequest {
        FeedbackRequest {
            feedback_id: "A~newblue.automation.js.feedback.x.y".into(),
            options: Map::new(),
            kind,
        }
    }

    #[test]
    fn request_parses_console_json() {
        let parsed: FeedbackRequest = serde_json::from_value(json!({
            "feedbackId": "A~fb",
            "options": {"layer": 1},
            "type": "advanced"
        }))
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(parsed.kind, FeedbackType::Advanced);
        assert_eq!(parsed.options.get("layer"), Some(&json!(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn miss_returns_false_and_queues_one_miss() {
        let (service, _) = service();
        let value = service.handle_feedback(&request(FeedbackType::Boolean));
        assert_eq!(value, FeedbackValue::Boolean(false));
        assert_eq!(service.scheduler().pending(), 1);
        assert!(service.scheduler().is_running());
    }

    #[tokio::test]
    async fn hit_returns_cached_state_without_miss() {
        let (service, cache) = service();
        let mut state = FeedbackState::new();
        state.insert("value".into(), json!(1));
        state.insert("text".into(), json!("Live"));
        crate::lock(&cache).store("A", "newblue.automation.js.feedback.x.y", &Map::new(), state.clone());

        assert_eq!(
            service.handle_feedback(&request(FeedbackType::Boolean)),
            FeedbackValue::Boolean(true)
        );
        assert_eq!(
            service.handle_feedback(&request(FeedbackType::Advanced)),
            FeedbackValue::Advanced(state)
        );
        assert_eq!(service.scheduler().pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_hit_returns_value_and_queues_refill() {
        let (service, _) = service();
        let mut state = FeedbackState::new();
        state.insert("value".into(), json!(true));
        service.apply_push("A", "newblue.automation.js.feedback.x.y", &Map::new(), state);

        assert_eq!(
            service.handle_feedback(&request(FeedbackType::Boolean)),
            FeedbackValue::Boolean(true)
        );
        assert_eq!(service.scheduler().pending(), 1);
    }

    #[test]
    fn malformed_composite_id_is_answered_without_miss() {
        let (service, _) = service();
        let value = service.handle_feedback(&FeedbackRequest {
            feedback_id: "no-actor".into(),
            options: Map::new(),
            kind: FeedbackType::Advanced,
        });
        assert_eq!(value, FeedbackValue::Advanced(FeedbackState::new()));
        assert_eq!(service.scheduler().pending(), 0);
    }

    #[test]
    fn invalidate_actor_removes_its_entries() {
        let (service, cache) = service();
        service.apply_push("A", "f1", &Map::new(), FeedbackState::new());
        service.apply_push("B", "f1", &Map::new(), FeedbackState::new());
        assert_eq!(service.invalidate_actor("A"), 1);
        assert_eq!(crate::lock(&cache).len(), 1);
    }
}
