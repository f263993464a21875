//! Dispatches engine push events to the cache, registry and console.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::console::ConsoleSink;
use crate::debounce::{Debouncer, debounce};
use crate::engine::EngineApi;
use crate::feedback::resolver::FeedbackResolver;
use crate::feedback::service::FeedbackService;
use crate::feedback::state::FeedbackState;
use crate::refresh::Refresher;
use crate::registry::TitleRegistry;
use crate::rpc::EngineEvent;

/// Event classes requested from the engine after every connect.
pub const SUBSCRIBED_EVENTS: [&str; 2] = ["play", "data"];

pub struct NotificationRouter {
    engine: EngineApi,
    resolver: FeedbackResolver,
    feedback: FeedbackService,
    registry: Arc<Mutex<TitleRegistry>>,
    sink: Arc<dyn ConsoleSink>,
    refresher: Arc<Refresher>,
    registry_refresh: Debouncer,
}

impl NotificationRouter {
    #[must_use]
    pub fn new(
        engine: EngineApi,
        resolver: FeedbackResolver,
        feedback: FeedbackService,
        registry: Arc<Mutex<TitleRegistry>>,
        sink: Arc<dyn ConsoleSink>,
        refresher: Arc<Refresher>,
        refresh_debounce: Duration,
    ) -> Self {
        let debounced = Arc::clone(&refresher);
        let registry_refresh = debounce(refresh_debounce, move || {
            let refresher = Arc::clone(&debounced);
            async move {
                refresher.refresh_all(false).await;
            }
        });
        Self {
            engine,
            resolver,
            feedback,
            registry,
            sink,
            refresher,
            registry_refresh,
        }
    }

    /// Handle one engine event. Callers feed events in arrival order.
    pub async fn dispatch(&self, event: EngineEvent) {
        match event {
            EngineEvent::Ready { .. } => self.on_ready().await,
            EngineEvent::Closed { .. } => self.registry_refresh.cancel(),
            EngineEvent::RegistryChanged { element_id } => {
                debug!(%element_id, "registry changed; refresh scheduled");
                self.registry_refresh.trigger();
            }
            EngineEvent::FeedbackChanged {
                actor_id,
                feedback_id,
                options,
                state,
            } => {
                self.on_feedback_changed(&actor_id, &feedback_id, &options, state)
                    .await;
            }
            EngineEvent::Notify(payload) => self.on_notify(&payload),
        }
    }

    async fn on_ready(&self) {
        match self.engine.subscribe(&SUBSCRIBED_EVENTS).await {
            Ok(_) => info!(events = ?SUBSCRIBED_EVENTS, "subscribed to engine events"),
            Err(e) => warn!(error = %e, "event subscription failed"),
        }
        self.registry_refresh.cancel();
        self.refresher.refresh_all(true).await;
    }

    async fn on_feedback_changed(
        &self,
        actor_id: &str,
        feedback_id: &str,
        options: &Map<String, Value>,
        state: FeedbackState,
    ) {
        let resolved = self.resolver.resolve(state).await;
        self.feedback
            .apply_push(actor_id, feedback_id, options, resolved);
        self.sink.check_feedbacks();
    }

    fn on_notify(&self, payload: &Value) {
        match payload.get("event").and_then(Value::as_str) {
            Some("data") => {
                let Some(title_id) = payload.get("id").and_then(Value::as_str) else {
                    debug!("data event without title id");
                    return;
                };
                let variables = payload.get("variables").unwrap_or(&Value::Null);
                let changed = crate::lock(&self.registry).apply_data_event(title_id, variables);
                if !changed.is_empty() {
                    self.sink.set_variable_values(&changed);
                }
            }
            Some(other) => debug!(event = other, "ignoring engine notification"),
            None => debug!("notification without event name"),
        }
    }

    #[must_use]
    pub fn refresh_pending(&self) -> bool {
        self.registry_refresh.is_pending()
    }

    /// Cancel any pending debounced refresh.
    pub fn shutdown(&self) {
        self.registry_refresh.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{METHOD_SCHEDULE_COMMAND, RemoteEngine};
    use crate::feedback::{FeedbackCache, ImageStore, RebuildScheduler};
    use crate::test_utils::{RecordingSink, ScriptedEngine};
    use serde_json::json;

    fn router(engine: &Arc<ScriptedEngine>, sink: &Arc<RecordingSink>) -> NotificationRouter {
        let api = EngineApi::new(Arc::clone(engine) as Arc<dyn RemoteEngine>);
        let console = Arc::clone(sink) as Arc<dyn ConsoleSink>;
        let cache = Arc::new(Mutex::new(FeedbackCache::new()));
        let images = Arc::new(Mutex::new(ImageStore::new()));
        let registry = Arc::new(Mutex::new(TitleRegistry::new()));
        let resolver = FeedbackResolver::new(api.clone(), Arc::clone(&images));
        let scheduler = RebuildScheduler::new(
            api.clone(),
            resolver.clone(),
            Arc::clone(&cache),
            Arc::clone(&console),
            Duration::from_millis(500),
        );
        let feedback = FeedbackService::new(cache, scheduler);
        let refresher = Arc::new(Refresher::new(
            api.clone(),
            Arc::clone(&registry),
            images,
            feedback.clone(),
            Arc::clone(&console),
            "companion",
            false,
        ));
        NotificationRouter::new(
            api,
            resolver,
            feedback,
            registry,
            console,
            refresher,
            Duration::from_millis(1000),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_pending_refresh() {
        let engine = Arc::new(ScriptedEngine::new().on(METHOD_SCHEDULE_COMMAND, json!("{}")));
        let sink = Arc::new(RecordingSink::new());
        let router = router(&engine, &sink);

        router
            .dispatch(EngineEvent::RegistryChanged {
                element_id: "el".into(),
            })
            .await;
        assert!(router.refresh_pending());

        router
            .dispatch(EngineEvent::Closed {
                reason: "gone".into(),
                error: true,
            })
            .await;
        assert!(!router.refresh_pending());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(engine.calls(METHOD_SCHEDULE_COMMAND), 0);
    }

    #[tokio::test]
    async fn non_data_notifications_are_ignored() {
        let engine = Arc::new(ScriptedEngine::new());
        let sink = Arc::new(RecordingSink::new());
        let router = router(&engine, &sink);

        router
            .dispatch(EngineEvent::Notify(json!({"event": "play", "id": "t1"})))
            .await;
        router
            .dispatch(EngineEvent::Notify(json!({"event": "data", "variables": []})))
            .await;
        assert!(sink.calls().is_empty());
    }
}
