//! Full refresh of titles, images and registry definitions.
//!
//! Each step stands alone: a failing step is logged and the next one still
//! runs. Definitions are only re-fetched when the engine's
//! `lastUpdateTimestamp` moved or the refresh is forced.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::console::{ConsoleSink, DefinitionKind};
use crate::engine::{EngineApi, QueryKind};
use crate::error::{BridgeError, Result};
use crate::feedback::images::ImageStore;
use crate::feedback::key::KEY_SEPARATOR;
use crate::feedback::service::FeedbackService;
use crate::registry::TitleRegistry;

/// Engine command returning every title.
pub const GET_TITLES_COMMAND: &str = "getTitles";

/// Which steps of a refresh completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub titles: bool,
    pub images: bool,
    /// Definitions were fetched (timestamp moved or forced).
    pub definitions: bool,
}

pub struct Refresher {
    engine: EngineApi,
    registry: Arc<Mutex<TitleRegistry>>,
    images: Arc<Mutex<ImageStore>>,
    feedback: FeedbackService,
    sink: Arc<dyn ConsoleSink>,
    image_namespace: String,
    include_mime_prefix: bool,
    last_update: Mutex<Option<Value>>,
}

impl Refresher {
    #[must_use]
    pub fn new(
        engine: EngineApi,
        registry: Arc<Mutex<TitleRegistry>>,
        images: Arc<Mutex<ImageStore>>,
        feedback: FeedbackService,
        sink: Arc<dyn ConsoleSink>,
        image_namespace: impl Into<String>,
        include_mime_prefix: bool,
    ) -> Self {
        Self {
            engine,
            registry,
            images,
            feedback,
            sink,
            image_namespace: image_namespace.into(),
            include_mime_prefix,
            last_update: Mutex::new(None),
        }
    }

    pub async fn refresh_all(&self, force: bool) -> RefreshSummary {
        let mut summary = RefreshSummary::default();

        match self.refresh_titles().await {
            Ok(()) => summary.titles = true,
            Err(e) => warn!(error = %e, "title refresh failed"),
        }
        match self.refresh_images().await {
            Ok(()) => summary.images = true,
            Err(e) => warn!(error = %e, "image set refresh failed"),
        }
        summary.definitions = self.refresh_definitions(force).await;

        info!(
            force,
            titles = summary.titles,
            images = summary.images,
            definitions = summary.definitions,
            "full refresh finished"
        );
        summary
    }

    async fn refresh_titles(&self) -> Result<()> {
        let reply = self
            .engine
            .schedule_command(GET_TITLES_COMMAND, &json!({}), &json!({}))
            .await?;
        let titles = TitleRegistry::parse_titles(reply).map_err(|e| BridgeError::MalformedReply {
            method: GET_TITLES_COMMAND.to_owned(),
            message: e.to_string(),
        })?;

        let (definitions, values) = {
            let mut registry = crate::lock(&self.registry);
            registry.replace_titles(titles);
            (registry.definitions(), registry.values())
        };
        self.sink.set_variable_definitions(&definitions);
        self.sink.set_variable_values(&values);
        Ok(())
    }

    async fn refresh_images(&self) -> Result<()> {
        let images = self
            .engine
            .get_image_set(&self.image_namespace, self.include_mime_prefix)
            .await?;
        debug!(count = images.len(), "image set refreshed");
        crate::lock(&self.images).replace(images);
        Ok(())
    }

    /// Returns whether definitions were fetched.
    ///
    /// The stamp is only remembered once every kind was applied, so a failed
    /// query is retried by the next refresh even if the stamp did not move.
    async fn refresh_definitions(&self, force: bool) -> bool {
        let stamp = match self.engine.query(QueryKind::LastUpdateTimestamp).await {
            Ok(stamp) => Some(stamp),
            Err(e) => {
                warn!(error = %e, "lastUpdateTimestamp query failed; treating registry as changed");
                None
            }
        };
        let changed = match &stamp {
            Some(stamp) => crate::lock(&self.last_update).as_ref() != Some(stamp),
            None => true,
        };
        if !changed && !force {
            debug!("registry unchanged since last refresh");
            return false;
        }

        let mut complete = stamp.is_some();
        for kind in DefinitionKind::ALL {
            let definitions = match self.engine.query(kind.query_kind()).await {
                Ok(definitions) => definitions,
                Err(e) => {
                    warn!(kind = kind.as_str(), error = %e, "definition query failed");
                    complete = false;
                    continue;
                }
            };
            if kind == DefinitionKind::Feedbacks {
                for actor in actors_in_definitions(&definitions) {
                    self.feedback.invalidate_actor(&actor);
                }
            }
            self.sink.set_definitions(kind, &definitions);
        }
        self.sink.check_feedbacks();

        *crate::lock(&self.last_update) = if complete { stamp } else { None };
        true
    }
}

/// Actor ids named by a feedback definition set.
///
/// Definitions are keyed (object) or listed (array) by composite
/// `actorId~feedbackId`; list items may carry `actorId` directly instead.
#[must_use]
pub fn actors_in_definitions(definitions: &Value) -> BTreeSet<String> {
    fn actor_of(composite: &str) -> Option<String> {
        composite
            .split_once(KEY_SEPARATOR)
            .map(|(actor, _)| actor)
            .filter(|actor| !actor.is_empty())
            .map(str::to_owned)
    }

    match definitions {
        Value::Object(map) => map.keys().filter_map(|k| actor_of(k)).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                if let Some(actor) = item.get("actorId").and_then(Value::as_str) {
                    return Some(actor.to_owned());
                }
                item.get("id").and_then(Value::as_str).and_then(actor_of)
            })
            .collect(),
        _ => BTreeSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{METHOD_GET_IMAGE_SET, METHOD_QUERY, METHOD_SCHEDULE_COMMAND, RemoteEngine};
    use crate::feedback::{FeedbackCache, FeedbackResolver, RebuildScheduler};
    use crate::test_utils::{RecordingSink, ScriptedEngine};
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Engine whose `_cmp_v1_query(kind)` is answered by `query`.
    fn engine<F>(query: F) -> ScriptedEngine
    where
        F: Fn(&str) -> Result<Value> + Send + Sync + 'static,
    {
        ScriptedEngine::new()
            .on(METHOD_SCHEDULE_COMMAND, json!({"titles": []}))
            .on(METHOD_GET_IMAGE_SET, json!({}))
            .on_fn(METHOD_QUERY, move |args| {
                query(args.first().and_then(Value::as_str).unwrap_or_default())
            })
    }

    fn refresher(
        engine: ScriptedEngine,
    ) -> (Refresher, Arc<RecordingSink>, Arc<Mutex<FeedbackCache>>) {
        let engine = Arc::new(engine);
        let sink = Arc::new(RecordingSink::new());
        let api = EngineApi::new(engine as Arc<dyn RemoteEngine>);
        let console = Arc::clone(&sink) as Arc<dyn ConsoleSink>;
        let cache = Arc::new(Mutex::new(FeedbackCache::new()));
        let images = Arc::new(Mutex::new(ImageStore::new()));
        let resolver = FeedbackResolver::new(api.clone(), Arc::clone(&images));
        let scheduler = RebuildScheduler::new(
            api.clone(),
            resolver,
            Arc::clone(&cache),
            Arc::clone(&console),
            Duration::from_millis(500),
        );
        let feedback = FeedbackService::new(Arc::clone(&cache), scheduler);
        let refresher = Refresher::new(
            api,
            Arc::new(Mutex::new(TitleRegistry::new())),
            images,
            feedback,
            console,
            "companion",
            false,
        );
        (refresher, sink, cache)
    }

    fn definitions(kind: &str) -> Result<Value> {
        Ok(match kind {
            "lastUpdateTimestamp" => json!(7),
            "companion_feedbacks" => json!({"A~x.feedback.y": {}}),
            _ => json!({}),
        })
    }

    #[tokio::test]
    async fn forced_refresh_fetches_definitions_without_stamp() {
        let (refresher, sink, cache) = refresher(engine(|kind| match kind {
            "lastUpdateTimestamp" => Err(BridgeError::NotConnected),
            other => definitions(other),
        }));
        crate::lock(&cache).store("A", "x.feedback.y", &Map::new(), Map::new());

        let summary = refresher.refresh_all(true).await;
        assert!(summary.definitions);
        assert!(sink.definitions(DefinitionKind::Actions).is_some());
        assert!(sink.definitions(DefinitionKind::Feedbacks).is_some());
        assert!(crate::lock(&cache).is_empty());
    }

    #[tokio::test]
    async fn failed_kind_is_retried_with_unchanged_stamp() {
        let feedback_calls = AtomicUsize::new(0);
        let (refresher, sink, _cache) = refresher(engine(move |kind| {
            if kind == "companion_feedbacks" && feedback_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(BridgeError::Disconnected("gone".into()));
            }
            definitions(kind)
        }));

        let first = refresher.refresh_all(false).await;
        assert!(first.definitions);
        assert!(sink.definitions(DefinitionKind::Feedbacks).is_none());

        let second = refresher.refresh_all(false).await;
        assert!(second.definitions);
        assert_eq!(
            sink.definitions(DefinitionKind::Feedbacks),
            Some(json!({"A~x.feedback.y": {}}))
        );

        let third = refresher.refresh_all(false).await;
        assert!(!third.definitions);
    }

    #[test]
    fn actors_from_keyed_definitions() {
        let defs = json!({
            "A~x.feedback.one": {},
            "A~x.feedback.two": {},
            "B~x.feedback.one": {},
            "malformed": {}
        });
        let actors: Vec<String> = actors_in_definitions(&defs).into_iter().collect();
        assert_eq!(actors, vec!["A", "B"]);
    }

    #[test]
    fn actors_from_listed_definitions() {
        let defs = json!([
            {"id": "C~x.feedback.one"},
            {"actorId": "D", "id": "ignored"},
            {"name": "no id"}
        ]);
        let actors: Vec<String> = actors_in_definitions(&defs).into_iter().collect();
        assert_eq!(actors, vec!["C", "D"]);
    }
}
