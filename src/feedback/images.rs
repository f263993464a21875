//! Local copy of the engine's image set.

use std::collections::HashMap;

/// Named base64 images fetched with `getImageSet`.
#[derive(Debug, Default)]
pub struct ImageStore {
    images: HashMap<String, String>,
}

impl ImageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set.
    pub fn replace(&mut self, images: HashMap<String, String>) {
        self.images = images;
    }

    pub fn insert(&mut self, name: impl Into<String>, base64: impl Into<String>) {
        self.images.insert(name.into(), base64.into());
    }

    /// Base64 payload for `name`, without any `data:` prefix.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.images.get(name).map(|data| strip_data_url(data))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Strip a `data:<mime>;base64,` prefix if present.
#[must_use]
pub fn strip_data_url(data: &str) -> &str {
    if data.starts_with("data:")
        && let Some((_, payload)) = data.split_once(";base64,")
    {
        return payload;
    }
    data
}
