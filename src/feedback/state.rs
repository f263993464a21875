//! Feedback state values and the field names the resolver understands.

use serde_json::{Map, Value};

/// A feedback state: field name to primitive, possibly carrying an image.
pub type FeedbackState = Map<String, Value>;

/// Layer key whose play state selects the overlay image variant.
pub const OVERLAY_QUERY_KEY: &str = "overlayQueryKey";
/// Layer key whose play state selects the raw png variant.
pub const PNG_QUERY_KEY: &str = "pngQueryKey";
/// Name of an overlay image to composite onto `png64`.
pub const OVERLAY_IMAGE_NAME: &str = "overlayImageName";
/// Base64 PNG shown on the button.
pub const PNG64: &str = "png64";
/// Name of a stored image to show as-is.
pub const IMAGE_NAME: &str = "imageName";
/// Value used for boolean feedbacks.
pub const VALUE: &str = "value";

pub const RUNNING_SUFFIX: &str = "_running";
pub const PAUSED_SUFFIX: &str = "_paused";

/// Field of the play-state lookup reply entry.
pub const PLAY_STATE_FIELD: &str = "playState";

/// Reported play status of an engine layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    Running,
    Paused,
    #[default]
    Unknown,
}

impl PlayState {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "running" => Self::Running,
            "paused" => Self::Paused,
            _ => Self::Unknown,
        }
    }

    /// Extract `reply[key].playState`. Missing entries are `Unknown`.
    #[must_use]
    pub fn from_lookup(reply: &Value, key: &str) -> Self {
        reply
            .get(key)
            .and_then(|entry| entry.get(PLAY_STATE_FIELD))
            .and_then(Value::as_str)
            .map_or(Self::Unknown, Self::parse)
    }

    /// Suffix of the variant field this play state selects.
    #[must_use]
    pub fn variant_suffix(self) -> &'static str {
        match self {
            Self::Running => RUNNING_SUFFIX,
            Self::Paused | Self::Unknown => PAUSED_SUFFIX,
        }
    }
}

/// JavaScript-style truthiness.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Boolean reading of a state: truthiness of its `value` field.
#[must_use]
pub fn boolean_value(state: Option<&FeedbackState>) -> bool {
    state
        .and_then(|s| s.get(VALUE))
        .is_some_and(is_truthy)
}
