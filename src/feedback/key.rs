//! Feedback cache keys.
//!
//! A key is `actorId~feedbackId`, suffixed with `~<fingerprint>` when the
//! caller supplied options. The fingerprint is the first 16 hex characters
//! of the BLAKE3 hash of the options' canonical JSON, so structurally equal
//! option maps produce the same key regardless of insertion order.

use std::fmt;

use serde_json::{Map, Value};

/// Separator between key segments, also used by composite feedback ids.
pub const KEY_SEPARATOR: char = '~';

/// Hex characters of the options fingerprint.
const FINGERPRINT_LEN: usize = 16;

/// Marker that identifies an engine feedback id.
const FEEDBACK_ID_MARKER: &str = ".feedback.";

/// Cache key. Segment boundaries are kept alongside the joined text, since
/// feedback ids may themselves contain the separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedbackKey {
    key: String,
    actor_end: usize,
    feedback_end: usize,
}

impl FeedbackKey {
    /// Derive the key for a feedback instance and its options.
    #[must_use]
    pub fn derive(actor_id: &str, feedback_id: &str, options: &Map<String, Value>) -> Self {
        let mut key = format!("{actor_id}{KEY_SEPARATOR}{feedback_id}");
        let feedback_end = key.len();
        if !options.is_empty() {
            let canonical = canonical_json(&Value::Object(options.clone()));
            let hash = blake3::hash(canonical.as_bytes()).to_hex();
            key.push(KEY_SEPARATOR);
            key.push_str(&hash.as_str()[..FINGERPRINT_LEN]);
        }
        Self {
            key,
            actor_end: actor_id.len(),
            feedback_end,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn actor_id(&self) -> &str {
        &self.key[..self.actor_end]
    }

    #[must_use]
    pub fn feedback_id(&self) -> &str {
        &self.key[self.actor_end + KEY_SEPARATOR.len_utf8()..self.feedback_end]
    }

    /// Whether the feedback segment has the shape of an engine feedback id.
    #[must_use]
    pub fn targets_feedback(&self) -> bool {
        is_feedback_id(self.feedback_id())
    }

    #[must_use]
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.key.starts_with(prefix)
    }
}

impl fmt::Display for FeedbackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Prefix shared by every key belonging to `actor_id`.
#[must_use]
pub fn actor_prefix(actor_id: &str) -> String {
    format!("{actor_id}{KEY_SEPARATOR}")
}

#[must_use]
pub fn is_feedback_id(feedback_id: &str) -> bool {
    feedback_id.contains(FEEDBACK_ID_MARKER)
}

/// Split a composite `actorId~feedbackId` into its parts.
#[must_use]
pub fn split_composite(composite: &str) -> Option<(&str, &str)> {
    let (actor, feedback) = composite.split_once(KEY_SEPARATOR)?;
    if actor.is_empty() || feedback.is_empty() {
        return None;
    }
    Some((actor, feedback))
}

/// Serialize `value` with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("options must be an object"),
        }
    }

    #[test]
    fn empty_options_have_no_fingerprint() {
        let key = FeedbackKey::derive("A", "x.feedback.y", &Map::new());
        assert_eq!(key.as_str(), "A~x.feedback.y");
        assert_eq!(key.actor_id(), "A");
        assert_eq!(key.feedback_id(), "x.feedback.y");
    }

    #[test]
    fn key_order_does_not_matter() {
        let mut first = Map::new();
        first.insert("layer".into(), json!(2));
        first.insert("color".into(), json!({"r": 1, "g": 2}));
        let mut second = Map::new();
        second.insert("color".into(), json!({"g": 2, "r": 1}));
        second.insert("layer".into(), json!(2));

        assert_eq!(
            FeedbackKey::derive("A", "fb", &first),
            FeedbackKey::derive("A", "fb", &second)
        );
    }

    #[test]
    fn differing_values_differ() {
        let a = FeedbackKey::derive("A", "fb", &options(json!({"layer": 1})));
        let b = FeedbackKey::derive("A", "fb", &options(json!({"layer": 2})));
        let c = FeedbackKey::derive("A", "fb", &options(json!({"layer": "1"})));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), "A~fb~".len() + FINGERPRINT_LEN);
    }

    #[test]
    fn canonical_json_sorts_nested_objects() {
        let value = json!({"b": [{"z": 1, "a": null}], "a": "x"});
        assert_eq!(canonical_json(&value), r#"{"a":"x","b":[{"a":null,"z":1}]}"#);
    }

    #[test]
    fn feedback_id_shape() {
        assert!(is_feedback_id("newblue.automation.js.feedback.x.y"));
        assert!(!is_feedback_id("newblue.automation.js.action.x"));
        let key = FeedbackKey::derive("A", "plain", &Map::new());
        assert!(!key.targets_feedback());
    }

    #[test]
    fn composite_split() {
        assert_eq!(
            split_composite("A~newblue.automation.js.feedback.x.y"),
            Some(("A", "newblue.automation.js.feedback.x.y"))
        );
        assert_eq!(split_composite("no-separator"), None);
        assert_eq!(split_composite("~fb"), None);
    }

    #[test]
    fn feedback_id_may_contain_separator() {
        let (actor, feedback) =
            split_composite("A~x~newblue.automation.js.feedback.y").unwrap_or_default();
        let key = FeedbackKey::derive(actor, feedback, &options(json!({"layer": 1})));
        assert_eq!(key.actor_id(), "A");
        assert_eq!(key.feedback_id(), "x~newblue.automation.js.feedback.y");
        assert!(key.targets_feedback());

        let bare = FeedbackKey::derive("A", "x~y", &Map::new());
        assert_eq!(bare.feedback_id(), "x~y");
        assert_eq!(bare.as_str(), "A~x~y");
    }

    #[test]
    fn actor_prefix_matches_only_that_actor() {
        let key = FeedbackKey::derive("A", "fb", &Map::new());
        assert!(key.starts_with(&actor_prefix("A")));
        assert!(!key.starts_with(&actor_prefix("AB")));
    }
}
