//! Folds play-state variants and images into a displayable feedback state.
//!
//! Resolution runs in three steps:
//! 1. `overlayQueryKey` / `pngQueryKey` select the `_running` or `_paused`
//!    variant of `overlayImageName` / `png64` from the layer's play state.
//!    Variant fields and query keys are always removed.
//! 2. `overlayImageName` is composited onto `png64`.
//! 3. A plain `imageName` is replaced by the stored image under `png64`.
//!
//! Failures degrade: a failed play-state lookup counts as `Unknown`, a failed
//! composite leaves the base image untouched.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use super::compositor::composite_overlay;
use super::images::ImageStore;
use super::state::{
    FeedbackState, IMAGE_NAME, OVERLAY_IMAGE_NAME, OVERLAY_QUERY_KEY, PAUSED_SUFFIX, PNG_QUERY_KEY,
    PNG64, PlayState, RUNNING_SUFFIX,
};
use crate::engine::EngineApi;

#[derive(Clone)]
pub struct FeedbackResolver {
    engine: EngineApi,
    images: Arc<Mutex<ImageStore>>,
}

impl FeedbackResolver {
    #[must_use]
    pub fn new(engine: EngineApi, images: Arc<Mutex<ImageStore>>) -> Self {
        Self { engine, images }
    }

    pub async fn resolve(&self, mut state: FeedbackState) -> FeedbackState {
        for (query_field, target) in [(OVERLAY_QUERY_KEY, OVERLAY_IMAGE_NAME), (PNG_QUERY_KEY, PNG64)] {
            let Some(query) = state.remove(query_field) else {
                continue;
            };
            let play_state = match query.as_str() {
                Some(key) => self.play_state(key).await,
                None => PlayState::Unknown,
            };
            select_variant(&mut state, target, play_state);
        }

        if state.contains_key(OVERLAY_IMAGE_NAME) {
            self.apply_overlay(&mut state);
        } else if let Some(name) = state.remove(IMAGE_NAME) {
            self.apply_image(&mut state, &name);
        }

        state
    }

    async fn play_state(&self, key: &str) -> PlayState {
        match self.engine.get_value_for_key(key).await {
            Ok(reply) => PlayState::from_lookup(&reply, key),
            Err(e) => {
                debug!(key, error = %e, "play state lookup failed; treating as unknown");
                PlayState::Unknown
            }
        }
    }

    fn apply_overlay(&self, state: &mut FeedbackState) {
        let Some(overlay_name) = state
            .get(OVERLAY_IMAGE_NAME)
            .and_then(Value::as_str)
            .map(str::to_owned)
        else {
            return;
        };
        let Some(base) = state.get(PNG64).and_then(Value::as_str).map(str::to_owned) else {
            debug!(overlay = %overlay_name, "overlay requested without a base image");
            return;
        };

        let overlay = crate::lock(&self.images)
            .get(&overlay_name)
            .map(str::to_owned);
        let Some(overlay) = overlay else {
            warn!(overlay = %overlay_name, "overlay image not in image set");
            return;
        };

        match composite_overlay(&base, &overlay) {
            Ok(composited) => {
                state.insert(PNG64.to_owned(), Value::String(composited));
            }
            Err(e) => warn!(overlay = %overlay_name, error = %e, "overlay composite failed"),
        }
    }

    fn apply_image(&self, state: &mut FeedbackState, name: &Value) {
        let Some(name) = name.as_str() else {
            return;
        };
        let image = crate::lock(&self.images).get(name).map(str::to_owned);
        match image {
            Some(data) => {
                state.insert(PNG64.to_owned(), Value::String(data));
            }
            None => debug!(image = name, "image not in image set"),
        }
    }
}

/// Move the chosen variant into `field` and drop both variant fields.
fn select_variant(state: &mut FeedbackState, field: &str, play_state: PlayState) {
    let chosen = state.remove(&format!("{field}{}", play_state.variant_suffix()));
    state.remove(&format!("{field}{RUNNING_SUFFIX}"));
    state.remove(&format!("{field}{PAUSED_SUFFIX}"));
    if let Some(value) = chosen {
        state.insert(field.to_owned(), value);
    }
}
