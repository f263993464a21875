//! Wire messages exchanged with the titling engine.
//!
//! Frames are JSON text messages tagged with a numeric `type`, following the
//! web-channel convention the engine speaks: the client sends `init` to learn
//! the exposed objects, `invokeMethod` to call them, and `connectToSignal` to
//! subscribe to pushes; the engine answers with `response` frames keyed by
//! request id and pushes `signal` frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Object on the engine side that exposes the RPC surface.
pub const SCHEDULER_OBJECT: &str = "scheduler";

/// Signal fired when the set of actions/feedbacks/presets may have changed.
pub const REGISTRY_CHANGED_SIGNAL: &str = "_cmp_v1_registryChanged";
/// Signal fired when a single feedback's state changed.
pub const FEEDBACK_CHANGED_SIGNAL: &str = "_cmp_v1_feedbackStateChanged";
/// Generic notification stream (play/data events).
pub const NOTIFY_SIGNAL: &str = "onNotify";

/// All signals the bridge connects to after `init`.
pub const SUBSCRIBED_SIGNALS: [&str; 3] =
    [REGISTRY_CHANGED_SIGNAL, FEEDBACK_CHANGED_SIGNAL, NOTIFY_SIGNAL];

/// Numeric frame tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    Signal,
    PropertyUpdate,
    Init,
    Idle,
    Debug,
    InvokeMethod,
    ConnectToSignal,
    DisconnectFromSignal,
    SetProperty,
    Response,
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Signal => 1,
            MessageType::PropertyUpdate => 2,
            MessageType::Init => 3,
            MessageType::Idle => 4,
            MessageType::Debug => 5,
            MessageType::InvokeMethod => 6,
            MessageType::ConnectToSignal => 7,
            MessageType::DisconnectFromSignal => 8,
            MessageType::SetProperty => 9,
            MessageType::Response => 10,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = String;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(Self::Signal),
            2 => Ok(Self::PropertyUpdate),
            3 => Ok(Self::Init),
            4 => Ok(Self::Idle),
            5 => Ok(Self::Debug),
            6 => Ok(Self::InvokeMethod),
            7 => Ok(Self::ConnectToSignal),
            8 => Ok(Self::DisconnectFromSignal),
            9 => Ok(Self::SetProperty),
            10 => Ok(Self::Response),
            other => Err(format!("unknown message type {other}")),
        }
    }
}

/// A single wire frame. Which optional fields are present depends on `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WireMessage {
    fn bare(kind: MessageType) -> Self {
        Self {
            kind,
            id: None,
            object: None,
            method: None,
            signal: None,
            args: None,
            data: None,
        }
    }

    #[must_use]
    pub fn init(id: u64) -> Self {
        Self {
            id: Some(id),
            ..Self::bare(MessageType::Init)
        }
    }

    #[must_use]
    pub fn invoke(id: u64, object: &str, method: &str, args: Vec<Value>) -> Self {
        Self {
            id: Some(id),
            object: Some(object.to_owned()),
            method: Some(method.to_owned()),
            args: Some(args),
            ..Self::bare(MessageType::InvokeMethod)
        }
    }

    #[must_use]
    pub fn connect_to_signal(object: &str, signal: &str) -> Self {
        Self {
            object: Some(object.to_owned()),
            signal: Some(signal.to_owned()),
            ..Self::bare(MessageType::ConnectToSignal)
        }
    }

    #[must_use]
    pub fn response(id: u64, data: Value) -> Self {
        Self {
            id: Some(id),
            data: Some(data),
            ..Self::bare(MessageType::Response)
        }
    }

    #[must_use]
    pub fn signal(object: &str, signal: &str, args: Vec<Value>) -> Self {
        Self {
            object: Some(object.to_owned()),
            signal: Some(signal.to_owned()),
            args: Some(args),
            ..Self::bare(MessageType::Signal)
        }
    }
}

/// Method and signal names an engine object exposes, from the `init` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ObjectDescriptor {
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub signals: Vec<String>,
}

/// Interpret a JSON value that may be an object or a JSON-encoded string.
///
/// Engine replies and signal arguments are frequently stringified on the
/// engine side. An empty string is treated as `null`.
pub fn decode_json_arg(value: Value) -> Result<Value, serde_json::Error> {
    match value {
        Value::String(text) if text.trim().is_empty() => Ok(Value::Null),
        Value::String(text) => serde_json::from_str(&text),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoke_serializes_numeric_type() {
        let msg = WireMessage::invoke(4, SCHEDULER_OBJECT, "getValueForKey", vec![json!("L1")]);
        let json = serde_json::to_string(&msg).unwrap_or_default();
        assert!(json.contains("\"type\":6"));
        assert!(json.contains("\"id\":4"));
        assert!(json.contains("\"object\":\"scheduler\""));
        assert!(json.contains("\"method\":\"getValueForKey\""));
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn init_serializes_without_object() {
        let json = serde_json::to_string(&WireMessage::init(0)).unwrap_or_default();
        assert_eq!(json, r#"{"type":3,"id":0}"#);
    }

    #[test]
    fn response_deserializes() {
        let json = r#"{"type":10,"id":9,"data":"{\"ok\":true}"}"#;
        let msg: WireMessage = serde_json::from_str(json).unwrap_or_else(|e| {
            panic!("parse failed: {e}");
        });
        assert_eq!(msg.kind, MessageType::Response);
        assert_eq!(msg.id, Some(9));
        assert_eq!(msg.data, Some(json!("{\"ok\":true}")));
    }

    #[test]
    fn signal_deserializes() {
        let json = r#"{"type":1,"object":"scheduler","signal":"onNotify","args":["{}"]}"#;
        let msg: WireMessage = serde_json::from_str(json).unwrap_or_else(|e| {
            panic!("parse failed: {e}");
        });
        assert_eq!(msg.kind, MessageType::Signal);
        assert_eq!(msg.signal.as_deref(), Some(NOTIFY_SIGNAL));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result: Result<WireMessage, _> = serde_json::from_str(r#"{"type":42}"#);
        assert!(result.is_err());
    }

    #[test]
    fn message_type_round_trips_through_u8() {
        for raw in 1u8..=10 {
            let kind = MessageType::try_from(raw).unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(u8::from(kind), raw);
        }
    }

    #[test]
    fn decode_json_arg_accepts_strings_and_objects() {
        assert_eq!(
            decode_json_arg(json!("{\"a\":1}")).unwrap_or_default(),
            json!({"a": 1})
        );
        assert_eq!(
            decode_json_arg(json!({"a": 1})).unwrap_or_default(),
            json!({"a": 1})
        );
        assert_eq!(decode_json_arg(json!("")).unwrap_or_default(), Value::Null);
        assert!(decode_json_arg(json!("{not json")).is_err());
    }

    #[test]
    fn object_descriptor_tolerates_missing_lists() {
        let desc: ObjectDescriptor =
            serde_json::from_value(json!({"methods": ["a", "b"]})).unwrap_or_default();
        assert_eq!(desc.methods, vec!["a", "b"]);
        assert!(desc.signals.is_empty());
    }
}
