//! Callback-to-future adapter.
//!
//! The engine's surface is callback-shaped: every operation takes a trailing
//! completion that is invoked exactly once with the reply. [`awaitable`] turns
//! any such operation into a single-resolution future so callers can compose
//! with `.await`.

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{BridgeError, Result};

/// Completion callback handed to a callback-style operation.
pub type Completion = Box<dyn FnOnce(Value) + Send + 'static>;

/// Run a callback-style operation and await its single completion.
///
/// `op` receives the completion to append as its trailing argument. If `op`
/// fails synchronously the future resolves to that error. If the completion
/// is dropped without being invoked (transport torn down), the future
/// resolves to [`BridgeError::Disconnected`].
pub async fn awaitable<F>(op: F) -> Result<Value>
where
    F: FnOnce(Completion) -> Result<()>,
{
    let (tx, rx) = oneshot::channel();
    let completion: Completion = Box::new(move |value| {
        // Receiver gone means the caller stopped waiting; nothing to do.
        let _ = tx.send(value);
    });

    op(completion)?;

    rx.await
        .map_err(|_| BridgeError::Disconnected("completion dropped before reply".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn resolves_with_completion_value() {
        let value = awaitable(|done| {
            done(json!({"ok": true}));
            Ok(())
        })
        .await;
        assert_eq!(value.ok(), Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn synchronous_failure_rejects() {
        let result = awaitable(|_done| Err(BridgeError::UnknownMethod("nope".into()))).await;
        assert!(matches!(result, Err(BridgeError::UnknownMethod(m)) if m == "nope"));
    }

    #[tokio::test]
    async fn dropped_completion_reports_disconnect() {
        let result = awaitable(|done| {
            drop(done);
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(BridgeError::Disconnected(_))));
    }

    #[tokio::test]
    async fn completion_can_fire_later_from_another_task() {
        let parked: Arc<Mutex<Option<Completion>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&parked);

        let waiter = tokio::spawn(awaitable(move |done| {
            *slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(done);
            Ok(())
        }));

        // Let the waiter park its completion.
        while parked.lock().unwrap_or_else(|p| p.into_inner()).is_none() {
            tokio::task::yield_now().await;
        }
        let done = parked
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .unwrap_or_else(|| panic!("completion parked"));
        done(json!(7));

        let value = waiter.await.unwrap_or_else(|e| panic!("join: {e}"));
        assert_eq!(value.ok(), Some(json!(7)));
    }
}
