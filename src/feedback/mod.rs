//! Feedback state: keying, caching, resolution and background refill.

pub mod cache;
pub mod compositor;
pub mod images;
pub mod key;
pub mod rebuild;
pub mod resolver;
pub mod service;
pub mod state;

pub use cache::FeedbackCache;
pub use images::ImageStore;
pub use key::FeedbackKey;
pub use rebuild::{CacheMiss, RebuildReport, RebuildScheduler};
pub use resolver::FeedbackResolver;
pub use service::{FeedbackRequest, FeedbackService, FeedbackType, FeedbackValue};
pub use state::{FeedbackState, PlayState};
