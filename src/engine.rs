//! Typed access to the engine's RPC surface.
//!
//! [`RemoteEngine`] is the seam every component issues calls through. The
//! live implementation is [`crate::rpc::RpcBridge`]; tests substitute a
//! scripted engine. [`EngineApi`] layers typed helpers and reply parsing on
//! top and is handed to each component explicitly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::error::{BridgeError, Result};
use crate::feedback::state::FeedbackState;
use crate::rpc::protocol::decode_json_arg;

/// Named-method call surface of the remote engine.
#[async_trait]
pub trait RemoteEngine: Send + Sync {
    /// Invoke `method` with positional `args` and return the raw reply.
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value>;
}

/// Parse a raw reply: JSON-encoded strings are decoded, other values pass through.
///
/// # Errors
///
/// Returns [`BridgeError::MalformedReply`] when a string reply is not valid JSON.
pub fn parse_reply(method: &str, raw: Value) -> Result<Value> {
    decode_json_arg(raw).map_err(|e| {
        warn!(method, error = %e, "malformed reply from engine");
        BridgeError::MalformedReply {
            method: method.to_owned(),
            message: e.to_string(),
        }
    })
}

/// Registry query kinds accepted by `_cmp_v1_query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Actions,
    Presets,
    Feedbacks,
    LastUpdateTimestamp,
}

impl QueryKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Actions => "companion_actions",
            Self::Presets => "companion_presets",
            Self::Feedbacks => "companion_feedbacks",
            Self::LastUpdateTimestamp => "lastUpdateTimestamp",
        }
    }
}

pub const METHOD_GET_IMAGE_SET: &str = "getImageSet";
pub const METHOD_SCHEDULE_COMMAND: &str = "scheduleCommand";
pub const METHOD_QUERY: &str = "_cmp_v1_query";
pub const METHOD_QUERY_FEEDBACK_STATE: &str = "_cmp_v1_queryFeedbackState";
pub const METHOD_GET_VALUE_FOR_KEY: &str = "getValueForKey";

/// Typed wrapper over a [`RemoteEngine`].
#[derive(Clone)]
pub struct EngineApi {
    engine: Arc<dyn RemoteEngine>,
}

impl EngineApi {
    #[must_use]
    pub fn new(engine: Arc<dyn RemoteEngine>) -> Self {
        Self { engine }
    }

    async fn call_parsed(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let raw = self.engine.call(method, args).await?;
        parse_reply(method, raw)
    }

    /// Fetch the named image set as `name -> base64`.
    pub async fn get_image_set(
        &self,
        namespace: &str,
        include_mime_prefix: bool,
    ) -> Result<HashMap<String, String>> {
        let reply = self
            .call_parsed(
                METHOD_GET_IMAGE_SET,
                vec![json!(namespace), json!(include_mime_prefix)],
            )
            .await?;

        match reply {
            Value::Object(map) => Ok(map
                .into_iter()
                .filter_map(|(name, data)| match data {
                    Value::String(b64) => Some((name, b64)),
                    _ => None,
                })
                .collect()),
            Value::Null => Ok(HashMap::new()),
            other => Err(BridgeError::MalformedReply {
                method: METHOD_GET_IMAGE_SET.to_owned(),
                message: format!("expected object, got {other}"),
            }),
        }
    }

    /// Run an engine command. `args` and `opts` travel as JSON strings.
    pub async fn schedule_command(&self, name: &str, args: &Value, opts: &Value) -> Result<Value> {
        self.call_parsed(
            METHOD_SCHEDULE_COMMAND,
            vec![
                json!(name),
                Value::String(args.to_string()),
                Value::String(opts.to_string()),
            ],
        )
        .await
    }

    /// Ask the engine to push the given event classes.
    pub async fn subscribe(&self, events: &[&str]) -> Result<Value> {
        self.schedule_command("subscribe", &json!({ "events": events }), &json!({}))
            .await
    }

    /// Query one registry section. A reply wrapped as `{kind: data}` is unwrapped.
    pub async fn query(&self, kind: QueryKind) -> Result<Value> {
        let reply = self
            .call_parsed(METHOD_QUERY, vec![json!(kind.as_str())])
            .await?;
        Ok(match reply {
            Value::Object(mut map) if map.len() == 1 && map.contains_key(kind.as_str()) => {
                map.remove(kind.as_str()).unwrap_or(Value::Null)
            }
            other => other,
        })
    }

    /// Current state of one feedback instance. A `null` reply is an empty state.
    pub async fn query_feedback_state(
        &self,
        actor_id: &str,
        feedback_id: &str,
        options: &Map<String, Value>,
    ) -> Result<FeedbackState> {
        let reply = self
            .call_parsed(
                METHOD_QUERY_FEEDBACK_STATE,
                vec![
                    json!(actor_id),
                    json!(feedback_id),
                    Value::String(Value::Object(options.clone()).to_string()),
                ],
            )
            .await?;

        match reply {
            Value::Object(state) => Ok(state),
            Value::Null => Ok(FeedbackState::new()),
            other => Err(BridgeError::MalformedReply {
                method: METHOD_QUERY_FEEDBACK_STATE.to_owned(),
                message: format!("expected object, got {other}"),
            }),
        }
    }

    /// Look up a key in the engine's value store (play states live here).
    pub async fn get_value_for_key(&self, key: &str) -> Result<Value> {
        self.call_parsed(METHOD_GET_VALUE_FOR_KEY, vec![json!(key)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedEngine;

    fn api(engine: &Arc<ScriptedEngine>) -> EngineApi {
        EngineApi::new(Arc::clone(engine) as Arc<dyn RemoteEngine>)
    }

    #[test]
    fn parse_reply_decodes_strings() {
        let value = parse_reply("m", json!("{\"a\":1}")).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn parse_reply_reports_method_on_failure() {
        let err = parse_reply("getTitles", json!("<html>")).err();
        assert!(matches!(
            err,
            Some(BridgeError::MalformedReply { method, .. }) if method == "getTitles"
        ));
    }

    #[tokio::test]
    async fn schedule_command_stringifies_arguments() {
        let engine = Arc::new(ScriptedEngine::new().on(METHOD_SCHEDULE_COMMAND, json!("{}")));
        api(&engine)
            .subscribe(&["play", "data"])
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        let args = engine.call_args(METHOD_SCHEDULE_COMMAND);
        assert_eq!(args.len(), 1);
        assert_eq!(args[0][0], json!("subscribe"));
        assert_eq!(args[0][1], json!("{\"events\":[\"play\",\"data\"]}"));
        assert_eq!(args[0][2], json!("{}"));
    }

    #[tokio::test]
    async fn query_unwraps_single_section_reply() {
        let engine = Arc::new(
            ScriptedEngine::new().on(METHOD_QUERY, json!({"lastUpdateTimestamp": 1234})),
        );
        let value = api(&engine)
            .query(QueryKind::LastUpdateTimestamp)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(value, json!(1234));
    }

    #[tokio::test]
    async fn image_set_skips_non_string_entries() {
        let engine = Arc::new(
            ScriptedEngine::new().on(METHOD_GET_IMAGE_SET, json!({"glow": "AAAA", "bad": 3})),
        );
        let images = api(&engine)
            .get_image_set("companion", false)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(images.len(), 1);
        assert_eq!(images.get("glow").map(String::as_str), Some("AAAA"));
    }

    #[tokio::test]
    async fn feedback_state_rejects_non_objects() {
        let engine = Arc::new(ScriptedEngine::new().on(METHOD_QUERY_FEEDBACK_STATE, json!("[1]")));
        let result = api(&engine)
            .query_feedback_state("A", "x.feedback.y", &Map::new())
            .await;
        assert!(matches!(result, Err(BridgeError::MalformedReply { .. })));
    }

    #[tokio::test]
    async fn feedback_state_null_is_empty() {
        let engine = Arc::new(ScriptedEngine::new().on(METHOD_QUERY_FEEDBACK_STATE, json!("")));
        let state = api(&engine)
            .query_feedback_state("A", "x.feedback.y", &Map::new())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(state.is_empty());
    }
}
