//! Host command channel and router for the console process.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;

use crate::config::ModuleConfig;
use crate::error::{BridgeError, Result};
use crate::feedback::{FeedbackRequest, FeedbackValue};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::module::TitlerModule;

/// Module operations the command router dispatches to.
#[async_trait]
pub trait ModuleHandler: Send + Sync + 'static {
    fn init(&self, config: ModuleConfig) -> Result<()>;
    fn config_updated(&self, config: ModuleConfig) -> Result<()>;
    fn destroy(&self) -> Result<()>;
    fn evaluate_feedback(&self, request: &FeedbackRequest) -> FeedbackValue;
    async fn run_action(&self, action_id: &str, options: &Map<String, Value>) -> Result<Value>;
}

#[async_trait]
impl ModuleHandler for TitlerModule {
    fn init(&self, config: ModuleConfig) -> Result<()> {
        TitlerModule::init(self, config)
    }

    fn config_updated(&self, config: ModuleConfig) -> Result<()> {
        TitlerModule::config_updated(self, config)
    }

    fn destroy(&self) -> Result<()> {
        TitlerModule::destroy(self);
        Ok(())
    }

    fn evaluate_feedback(&self, request: &FeedbackRequest) -> FeedbackValue {
        self.handle_feedback(request)
    }

    async fn run_action(&self, action_id: &str, options: &Map<String, Value>) -> Result<Value> {
        TitlerModule::run_action(self, action_id, options).await
    }
}

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<Result<ResponseEnvelope>>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            BridgeError::Protocol(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| {
                BridgeError::Channel(format!("failed to send host command request: {e}"))
            })?;

        response_rx
            .await
            .map_err(|e| BridgeError::Channel(format!("host command response dropped: {e}")))?
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

pub struct HostCommandServer<H: ModuleHandler> {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    handler: Arc<H>,
}

/// Create a command channel sharing `event_tx` with the console sink, so
/// events raised by the module reach the console on the same stream.
#[must_use]
pub fn command_channel_with_events<H: ModuleHandler>(
    request_capacity: usize,
    event_tx: broadcast::Sender<EventEnvelope>,
    handler: H,
) -> (HostCommandClient, HostCommandServer<H>) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));

    (
        HostCommandClient {
            request_tx,
            event_tx,
        },
        HostCommandServer {
            request_rx,
            handler: Arc::new(handler),
        },
    )
}

impl<H: ModuleHandler> HostCommandServer<H> {
    /// Serve requests until every client is dropped.
    ///
    /// `action.run` awaits a remote call that may never settle, so it runs on
    /// its own task; every other command is answered in order.
    pub async fn run(mut self) {
        let mut actions = JoinSet::new();
        while let Some(request) = self.request_rx.recv().await {
            while actions.try_join_next().is_some() {}

            if request.envelope.command == CommandName::ActionRun {
                let handler = Arc::clone(&self.handler);
                actions.spawn(async move {
                    let outcome = handle_action(&*handler, &request.envelope).await;
                    let _ = request
                        .response_tx
                        .send(Ok(respond(&request.envelope, outcome)));
                });
                continue;
            }

            let response = self.route(&request.envelope).await;
            let _ = request.response_tx.send(response);
        }
    }

    /// Route a command envelope to the module.
    ///
    /// Handler failures become error envelopes; only channel failures are `Err`.
    pub async fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let outcome = match envelope.command {
            CommandName::HostPing => Ok(json!({"pong": true})),
            CommandName::HostVersion => Ok(json!({
                "contract_version": crate::host::contract::EVENT_VERSION,
                "bridge_version": env!("CARGO_PKG_VERSION"),
            })),
            CommandName::ModuleInit => self.handle_init(envelope, false),
            CommandName::ModuleConfigUpdated => self.handle_init(envelope, true),
            CommandName::ModuleDestroy => self
                .handler
                .destroy()
                .map(|()| json!({"accepted": true})),
            CommandName::FeedbackEvaluate => self.handle_feedback(envelope),
            CommandName::ActionRun => handle_action(&*self.handler, envelope).await,
        };
        Ok(respond(envelope, outcome))
    }

    fn handle_init(&self, envelope: &CommandEnvelope, update: bool) -> Result<Value> {
        let config = parse_config(&envelope.payload)?;
        if update {
            self.handler.config_updated(config)?;
        } else {
            self.handler.init(config)?;
        }
        Ok(json!({"accepted": true}))
    }

    fn handle_feedback(&self, envelope: &CommandEnvelope) -> Result<Value> {
        let request: FeedbackRequest = serde_json::from_value(envelope.payload.clone())
            .map_err(|e| BridgeError::Protocol(format!("feedback.evaluate payload: {e}")))?;
        let value = self.handler.evaluate_feedback(&request);
        serde_json::to_value(value)
            .map_err(|e| BridgeError::Protocol(format!("feedback value: {e}")))
    }
}

fn respond(envelope: &CommandEnvelope, outcome: Result<Value>) -> ResponseEnvelope {
    let request_id = envelope.request_id.clone();
    match outcome {
        Ok(payload) => ResponseEnvelope::ok(request_id, payload),
        Err(e) => {
            tracing::warn!(command = envelope.command.as_str(), error = %e, "host command failed");
            ResponseEnvelope::error(request_id, e.to_string())
        }
    }
}

async fn handle_action<H: ModuleHandler>(handler: &H, envelope: &CommandEnvelope) -> Result<Value> {
    let action_id = envelope
        .payload
        .get("action_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| BridgeError::Protocol("action.run requires action_id".into()))?;
    let options = match envelope.payload.get("options") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(_) => {
            return Err(BridgeError::Protocol(
                "action.run options must be an object".into(),
            ));
        }
    };
    let reply = handler.run_action(action_id, &options).await?;
    Ok(json!({"accepted": true, "reply": reply}))
}

fn parse_config(payload: &Value) -> Result<ModuleConfig> {
    let config = payload.get("config").unwrap_or(payload);
    serde_json::from_value(config.clone())
        .map_err(|e| BridgeError::Config(format!("invalid module config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestHandler {
        configs: Mutex<Vec<(bool, ModuleConfig)>>,
        actions: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModuleHandler for TestHandler {
        fn init(&self, config: ModuleConfig) -> Result<()> {
            crate::lock(&self.configs).push((false, config));
            Ok(())
        }

        fn config_updated(&self, config: ModuleConfig) -> Result<()> {
            crate::lock(&self.configs).push((true, config));
            Ok(())
        }

        fn destroy(&self) -> Result<()> {
            Ok(())
        }

        fn evaluate_feedback(&self, request: &FeedbackRequest) -> FeedbackValue {
            FeedbackValue::Boolean(request.feedback_id.starts_with("on~"))
        }

        async fn run_action(&self, action_id: &str, _options: &Map<String, Value>) -> Result<Value> {
            crate::lock(&self.actions).push(action_id.to_owned());
            if action_id == "hang" {
                return std::future::pending().await;
            }
            if action_id == "fail" {
                return Err(BridgeError::NotConnected);
            }
            Ok(json!({"ran": action_id}))
        }
    }

    fn make_server() -> HostCommandServer<TestHandler> {
        let (event_tx, _) = broadcast::channel(8);
        let (_client, server) = command_channel_with_events(4, event_tx, TestHandler::default());
        server
    }

    fn make_envelope(command: CommandName, payload: Value) -> CommandEnvelope {
        CommandEnvelope::new("req-1", command, payload)
    }

    async fn route(server: &HostCommandServer<TestHandler>, envelope: CommandEnvelope) -> ResponseEnvelope {
        server
            .route(&envelope)
            .await
            .unwrap_or_else(|e| panic!("route failed: {e}"))
    }

    #[tokio::test]
    async fn ping_pongs() {
        let server = make_server();
        let resp = route(&server, make_envelope(CommandName::HostPing, json!({}))).await;
        assert!(resp.ok);
        assert_eq!(resp.payload, json!({"pong": true}));
    }

    #[tokio::test]
    async fn init_accepts_nested_or_flat_config() {
        let server = make_server();
        let flat = route(
            &server,
            make_envelope(CommandName::ModuleInit, json!({"host": "h", "port": 9455})),
        )
        .await;
        assert!(flat.ok);
        let nested = route(
            &server,
            make_envelope(
                CommandName::ModuleConfigUpdated,
                json!({"config": {"bonjour_host": "10.0.0.2:9455"}}),
            ),
        )
        .await;
        assert!(nested.ok);

        let configs = crate::lock(&server.handler.configs).clone();
        assert_eq!(configs.len(), 2);
        assert!(!configs[0].0);
        assert_eq!(configs[0].1.port, Some(9455));
        assert!(configs[1].0);
        assert_eq!(configs[1].1.bonjour_host.as_deref(), Some("10.0.0.2:9455"));
    }

    #[tokio::test]
    async fn bad_config_is_an_error_envelope() {
        let server = make_server();
        let resp = route(
            &server,
            make_envelope(CommandName::ModuleInit, json!({"port": "not a number"})),
        )
        .await;
        assert!(!resp.ok);
        assert!(resp.error.unwrap_or_default().contains("invalid module config"));
    }

    #[tokio::test]
    async fn feedback_evaluate_returns_value() {
        let server = make_server();
        let resp = route(
            &server,
            make_envelope(
                CommandName::FeedbackEvaluate,
                json!({"feedbackId": "on~x.feedback.y", "options": {}, "type": "boolean"}),
            ),
        )
        .await;
        assert!(resp.ok);
        assert_eq!(resp.payload, json!(true));
    }

    #[tokio::test]
    async fn action_run_requires_action_id() {
        let server = make_server();
        let resp = route(&server, make_envelope(CommandName::ActionRun, json!({}))).await;
        assert!(!resp.ok);

        let resp = route(
            &server,
            make_envelope(CommandName::ActionRun, json!({"action_id": "go", "options": {"a": 1}})),
        )
        .await;
        assert!(resp.ok);
        assert_eq!(resp.payload["reply"], json!({"ran": "go"}));
    }

    #[tokio::test]
    async fn action_failure_is_reported() {
        let server = make_server();
        let resp = route(
            &server,
            make_envelope(CommandName::ActionRun, json!({"action_id": "fail"})),
        )
        .await;
        assert!(!resp.ok);
        assert_eq!(resp.error.as_deref(), Some("not connected to the titling engine"));
    }

    #[tokio::test]
    async fn hung_action_does_not_block_later_commands() {
        let (event_tx, _) = broadcast::channel(8);
        let (client, server) = command_channel_with_events(4, event_tx, TestHandler::default());
        let server_handle = tokio::spawn(server.run());

        let action_client = client.clone();
        let action = tokio::spawn(async move {
            action_client
                .send(make_envelope(CommandName::ActionRun, json!({"action_id": "hang"})))
                .await
        });

        let feedback = make_envelope(
            CommandName::FeedbackEvaluate,
            json!({"feedbackId": "on~x.feedback.y", "options": {}, "type": "boolean"}),
        );
        let resp = tokio::time::timeout(std::time::Duration::from_secs(5), client.send(feedback))
            .await
            .unwrap_or_else(|_| panic!("feedback queued behind the hung action"))
            .unwrap_or_else(|e| panic!("send failed: {e}"));
        assert_eq!(resp.payload, json!(true));

        let destroy = client
            .send(make_envelope(CommandName::ModuleDestroy, json!({})))
            .await
            .unwrap_or_else(|e| panic!("send failed: {e}"));
        assert!(destroy.ok);
        assert!(!action.is_finished());

        action.abort();
        drop(client);
        server_handle
            .await
            .unwrap_or_else(|e| panic!("server task failed: {e}"));
    }
}
