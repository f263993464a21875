//! Miss worklist and the self-stopping rebuild checker.
//!
//! Misses accumulate in an unordered worklist. [`RebuildScheduler::start_checker`]
//! spawns at most one checker task, which on every tick (the first one
//! immediately, then every `interval`) stops itself if the worklist is empty
//! and otherwise runs [`RebuildScheduler::rebuild`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache::FeedbackCache;
use super::key::FeedbackKey;
use super::resolver::FeedbackResolver;
use crate::console::ConsoleSink;
use crate::engine::EngineApi;

/// A feedback value the console asked for that the cache could not answer.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMiss {
    pub key: FeedbackKey,
    pub options: Map<String, Value>,
}

/// Outcome of one rebuild pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Misses sent to the engine.
    pub attempted: usize,
    pub refilled: usize,
    pub failed: usize,
    /// Misses whose feedback segment is not an engine feedback id.
    pub skipped: usize,
}

#[derive(Default)]
struct Worklist {
    misses: Vec<CacheMiss>,
    checker_active: bool,
    checker: Option<JoinHandle<()>>,
}

struct SchedulerInner {
    engine: EngineApi,
    resolver: FeedbackResolver,
    cache: Arc<Mutex<FeedbackCache>>,
    sink: Arc<dyn ConsoleSink>,
    interval: Duration,
    worklist: Mutex<Worklist>,
}

#[derive(Clone)]
pub struct RebuildScheduler {
    inner: Arc<SchedulerInner>,
}

impl RebuildScheduler {
    #[must_use]
    pub fn new(
        engine: EngineApi,
        resolver: FeedbackResolver,
        cache: Arc<Mutex<FeedbackCache>>,
        sink: Arc<dyn ConsoleSink>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                engine,
                resolver,
                cache,
                sink,
                interval,
                worklist: Mutex::new(Worklist::default()),
            }),
        }
    }

    /// Queue a miss unless the cache can already answer for `key`.
    pub fn record_miss(&self, key: FeedbackKey, options: Map<String, Value>) -> bool {
        if crate::lock(&self.inner.cache).is_resolvable(&key) {
            return false;
        }
        debug!(key = %key, "recording feedback cache miss");
        crate::lock(&self.inner.worklist)
            .misses
            .push(CacheMiss { key, options });
        true
    }

    /// Start the checker if there is work and none is running.
    ///
    /// Needs a tokio runtime; without one the misses stay queued.
    pub fn start_checker(&self) {
        let mut worklist = crate::lock(&self.inner.worklist);
        if worklist.misses.is_empty() || worklist.checker_active {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime; rebuild checker not started");
            return;
        };

        worklist.checker_active = true;
        let scheduler = self.clone();
        worklist.checker = Some(runtime.spawn(async move { scheduler.run_checker().await }));
        debug!(pending = worklist.misses.len(), "rebuild checker started");
    }

    async fn run_checker(self) {
        let mut passes = 0usize;
        loop {
            {
                let mut worklist = crate::lock(&self.inner.worklist);
                if worklist.misses.is_empty() {
                    worklist.checker_active = false;
                    worklist.checker = None;
                    break;
                }
            }
            self.rebuild().await;
            passes += 1;
            tokio::time::sleep(self.inner.interval).await;
        }
        debug!(passes, "rebuild checker stopped; worklist drained");
    }

    /// Drain the worklist and refill every feedback miss from the engine.
    ///
    /// Individual failures are logged and counted; the console is asked to
    /// re-check feedbacks once all refills have settled.
    pub async fn rebuild(&self) -> RebuildReport {
        let drained = std::mem::take(&mut crate::lock(&self.inner.worklist).misses);

        let mut report = RebuildReport::default();
        let mut unique: HashMap<FeedbackKey, Map<String, Value>> = HashMap::new();
        for miss in drained {
            if miss.key.targets_feedback() {
                unique.insert(miss.key, miss.options);
            } else {
                debug!(key = %miss.key, "dropping miss for non-feedback id");
                report.skipped += 1;
            }
        }

        report.attempted = unique.len();
        let outcomes = join_all(
            unique
                .into_iter()
                .map(|(key, options)| self.refill(key, options)),
        )
        .await;
        for ok in outcomes {
            if ok {
                report.refilled += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                refilled = report.refilled,
                failed = report.failed,
                "feedback rebuild pass finished"
            );
            self.inner.sink.check_feedbacks();
        }
        report
    }

    async fn refill(&self, key: FeedbackKey, options: Map<String, Value>) -> bool {
        let raw = match self
            .inner
            .engine
            .query_feedback_state(key.actor_id(), key.feedback_id(), &options)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                debug!(key = %key, error = %e, "feedback refill failed");
                return false;
            }
        };

        let resolved = self.inner.resolver.resolve(raw).await;
        let mut cache = crate::lock(&self.inner.cache);
        cache.clear_stale(&key);
        cache.store_key(key, resolved);
        true
    }

    /// Whether a checker task is live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        crate::lock(&self.inner.worklist).checker_active
    }

    /// Queued misses not yet taken by a rebuild pass.
    #[must_use]
    pub fn pending(&self) -> usize {
        crate::lock(&self.inner.worklist).misses.len()
    }

    /// Cancel the checker and drop queued misses.
    pub fn stop(&self) {
        let mut worklist = crate::lock(&self.inner.worklist);
        if let Some(handle) = worklist.checker.take() {
            handle.abort();
        }
        worklist.checker_active = false;
        worklist.misses.clear();
    }
}
