//! The console module: wires the bridge, cache and router together.
//!
//! [`TitlerModule`] owns one [`RpcBridge`] and every component that issues
//! calls through it. Engine events are consumed by a single pump task that
//! reports connection status and hands each event to the router in order.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{BridgeSettings, ModuleConfig};
use crate::console::{ConsoleSink, ModuleStatus};
use crate::engine::{EngineApi, RemoteEngine};
use crate::error::{BridgeError, Result};
use crate::feedback::{
    FeedbackCache, FeedbackRequest, FeedbackResolver, FeedbackService, FeedbackValue, ImageStore,
    RebuildScheduler,
};
use crate::refresh::Refresher;
use crate::registry::TitleRegistry;
use crate::router::NotificationRouter;
use crate::rpc::{ClientIdentity, ConnectionState, EngineEvent, RpcBridge};

struct ModuleInner {
    sink: Arc<dyn ConsoleSink>,
    bridge: Arc<RpcBridge>,
    engine: EngineApi,
    cache: Arc<Mutex<FeedbackCache>>,
    feedback: FeedbackService,
    router: Arc<NotificationRouter>,
    config: Mutex<ModuleConfig>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct TitlerModule {
    inner: Arc<ModuleInner>,
}

impl TitlerModule {
    #[must_use]
    pub fn new(settings: &BridgeSettings, sink: Arc<dyn ConsoleSink>) -> Self {
        let bridge = Arc::new(RpcBridge::new(
            ClientIdentity::new(settings.client_id.clone()),
            settings.reconnect_interval(),
        ));
        let engine = EngineApi::new(Arc::clone(&bridge) as Arc<dyn RemoteEngine>);

        let cache = Arc::new(Mutex::new(FeedbackCache::new()));
        let images = Arc::new(Mutex::new(ImageStore::new()));
        let registry = Arc::new(Mutex::new(TitleRegistry::new()));

        let resolver = FeedbackResolver::new(engine.clone(), Arc::clone(&images));
        let scheduler = RebuildScheduler::new(
            engine.clone(),
            resolver.clone(),
            Arc::clone(&cache),
            Arc::clone(&sink),
            settings.rebuild_interval(),
        );
        let feedback = FeedbackService::new(Arc::clone(&cache), scheduler);
        let refresher = Arc::new(Refresher::new(
            engine.clone(),
            Arc::clone(&registry),
            images,
            feedback.clone(),
            Arc::clone(&sink),
            settings.image_namespace.clone(),
            settings.include_mime_prefix,
        ));
        let router = Arc::new(NotificationRouter::new(
            engine.clone(),
            resolver,
            feedback.clone(),
            registry,
            Arc::clone(&sink),
            refresher,
            settings.refresh_debounce(),
        ));

        Self {
            inner: Arc::new(ModuleInner {
                sink,
                bridge,
                engine,
                cache,
                feedback,
                router,
                config: Mutex::new(ModuleConfig::default()),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Apply the initial configuration and connect.
    pub fn init(&self, config: ModuleConfig) -> Result<()> {
        self.apply_config(config)
    }

    /// Reconnect with a changed configuration.
    pub fn config_updated(&self, config: ModuleConfig) -> Result<()> {
        self.apply_config(config)
    }

    fn apply_config(&self, config: ModuleConfig) -> Result<()> {
        self.inner.bridge.disconnect();
        let endpoint = config.resolve_endpoint();
        *crate::lock(&self.inner.config) = config;

        let Some(endpoint) = endpoint else {
            self.inner
                .sink
                .set_status(ModuleStatus::BadConfig, Some("no engine address configured"));
            return Ok(());
        };
        if let Err(e) = url::Url::parse(&endpoint) {
            let message = format!("invalid engine address {endpoint}: {e}");
            self.inner
                .sink
                .set_status(ModuleStatus::BadConfig, Some(&message));
            return Err(BridgeError::Config(message));
        }

        self.ensure_pump();
        self.inner.sink.set_status(ModuleStatus::Connecting, None);
        info!(%endpoint, "connecting module");
        self.inner.bridge.connect(endpoint);
        Ok(())
    }

    fn ensure_pump(&self) {
        let mut pump = crate::lock(&self.inner.pump);
        if pump.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let events = self.inner.bridge.subscribe();
        let inner = Arc::clone(&self.inner);
        *pump = Some(tokio::spawn(run_event_pump(inner, events)));
    }

    /// Tear down the connection and every timer.
    pub fn destroy(&self) {
        self.inner.bridge.disconnect();
        self.inner.router.shutdown();
        self.inner.feedback.scheduler().stop();
        if let Some(pump) = crate::lock(&self.inner.pump).take() {
            pump.abort();
        }
        self.inner.sink.set_status(ModuleStatus::Disconnected, None);
        info!("module destroyed");
    }

    /// Synchronous feedback poll from the console.
    #[must_use]
    pub fn handle_feedback(&self, request: &FeedbackRequest) -> FeedbackValue {
        self.inner.feedback.handle_feedback(request)
    }

    /// Run an engine action with the console-supplied options.
    pub async fn run_action(&self, action_id: &str, options: &Map<String, Value>) -> Result<Value> {
        self.inner
            .engine
            .schedule_command(action_id, &Value::Object(options.clone()), &json!({}))
            .await
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.bridge.state()
    }

    #[must_use]
    pub fn config(&self) -> ModuleConfig {
        crate::lock(&self.inner.config).clone()
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<Mutex<FeedbackCache>> {
        &self.inner.cache
    }

    #[must_use]
    pub fn scheduler(&self) -> &RebuildScheduler {
        self.inner.feedback.scheduler()
    }
}

async fn run_event_pump(inner: Arc<ModuleInner>, mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(lagged = n, "engine event pump lagged; events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match &event {
            EngineEvent::Ready { .. } => inner.sink.set_status(ModuleStatus::Ok, None),
            EngineEvent::Closed { reason, error } => {
                inner
                    .sink
                    .set_status(ModuleStatus::Disconnected, Some(reason.as_str()));
                if *error {
                    flag_new_config(&inner);
                }
            }
            _ => {}
        }
        inner.router.dispatch(event).await;
    }
}

/// Clear the address after a transport error so the operator re-enters it.
fn flag_new_config(inner: &ModuleInner) {
    let cleared = {
        let mut config = crate::lock(&inner.config);
        if config.need_new_config {
            None
        } else {
            config.clear_connection();
            Some(config.clone())
        }
    };
    if let Some(config) = cleared {
        warn!("engine connection failed; address cleared");
        inner.sink.save_config(&config);
        inner
            .sink
            .set_status(ModuleStatus::BadConfig, Some("connection failed; new address needed"));
    }
}
