//! Remote object binding.
//!
//! A [`RemoteChannel`] owns the outbound frame queue and the table of
//! in-flight requests for one live connection. The engine object described by
//! the `init` reply is bound into a [`RemoteObject`]: every method it lists is
//! wrapped once into a [`RemoteMethod`] whose `call` goes through the
//! callback-to-future adapter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use super::adapter::{Completion, awaitable};
use super::protocol::{ObjectDescriptor, WireMessage};
use crate::error::{BridgeError, Result};

/// In-flight request table.
#[derive(Default)]
struct PendingCalls {
    next_id: u64,
    completions: HashMap<u64, Completion>,
}

/// Per-connection channel state shared by all bound methods.
pub struct RemoteChannel {
    outbound: mpsc::UnboundedSender<String>,
    pending: Mutex<PendingCalls>,
}

impl RemoteChannel {
    /// Create a channel that writes serialized frames into `outbound`.
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Arc<Self> {
        Arc::new(Self {
            outbound,
            pending: Mutex::new(PendingCalls::default()),
        })
    }

    /// Register `completion` and send the frame built for its request id.
    ///
    /// This is the callback-style primitive: the completion fires exactly once
    /// when the matching `response` frame arrives.
    pub fn request<F>(&self, build: F, completion: Completion) -> Result<()>
    where
        F: FnOnce(u64) -> WireMessage,
    {
        let id = {
            let mut pending = self.lock_pending();
            let id = pending.next_id;
            pending.next_id = pending.next_id.wrapping_add(1);
            pending.completions.insert(id, completion);
            id
        };

        let frame = build(id);
        let sent = serde_json::to_string(&frame)
            .map_err(|e| BridgeError::Protocol(format!("serialize frame: {e}")))
            .and_then(|json| {
                self.outbound
                    .send(json)
                    .map_err(|_| BridgeError::Disconnected("outbound queue closed".into()))
            });

        if let Err(e) = sent {
            self.lock_pending().completions.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    /// Send a frame that expects no reply.
    pub fn send(&self, frame: &WireMessage) -> Result<()> {
        let json = serde_json::to_string(frame)
            .map_err(|e| BridgeError::Protocol(format!("serialize frame: {e}")))?;
        self.outbound
            .send(json)
            .map_err(|_| BridgeError::Disconnected("outbound queue closed".into()))
    }

    /// Fire the completion registered for `id`. Returns `false` for unknown ids.
    pub fn complete(&self, id: u64, data: Value) -> bool {
        let completion = self.lock_pending().completions.remove(&id);
        match completion {
            Some(done) => {
                done(data);
                true
            }
            None => false,
        }
    }

    /// Drop every outstanding completion so their awaiters observe the disconnect.
    pub fn fail_pending(&self) -> usize {
        let drained: Vec<Completion> = self
            .lock_pending()
            .completions
            .drain()
            .map(|(_, done)| done)
            .collect();
        drained.len()
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock_pending().completions.len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingCalls> {
        match self.pending.lock() {
            Ok(p) => p,
            Err(p) => p.into_inner(),
        }
    }
}

/// One engine method, wrapped into an awaitable call.
#[derive(Clone)]
pub struct RemoteMethod {
    object: Arc<str>,
    name: Arc<str>,
    channel: Arc<RemoteChannel>,
}

impl RemoteMethod {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the method and await its reply.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        awaitable(|done| {
            self.channel.request(
                |id| WireMessage::invoke(id, &self.object, &self.name, args),
                done,
            )
        })
        .await
    }
}

/// An engine object with all of its methods bound.
#[derive(Clone)]
pub struct RemoteObject {
    name: Arc<str>,
    methods: HashMap<String, RemoteMethod>,
    signals: Vec<String>,
}

impl RemoteObject {
    /// Bind every method listed in `descriptor` onto `channel`.
    #[must_use]
    pub fn bind(name: &str, descriptor: &ObjectDescriptor, channel: &Arc<RemoteChannel>) -> Self {
        let object: Arc<str> = Arc::from(name);
        let methods = descriptor
            .methods
            .iter()
            .map(|method| {
                (
                    method.clone(),
                    RemoteMethod {
                        object: Arc::clone(&object),
                        name: Arc::from(method.as_str()),
                        channel: Arc::clone(channel),
                    },
                )
            })
            .collect();
        Self {
            name: object,
            methods,
            signals: descriptor.signals.clone(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a bound method.
    pub fn method(&self, name: &str) -> Result<RemoteMethod> {
        self.methods
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownMethod(name.to_owned()))
    }

    #[must_use]
    pub fn has_signal(&self, signal: &str) -> bool {
        self.signals.iter().any(|s| s == signal)
    }

    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::protocol::MessageType;
    use serde_json::json;

    fn channel() -> (Arc<RemoteChannel>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RemoteChannel::new(tx), rx)
    }

    fn descriptor(methods: &[&str]) -> ObjectDescriptor {
        ObjectDescriptor {
            methods: methods.iter().map(|m| (*m).to_owned()).collect(),
            signals: vec!["onNotify".into()],
        }
    }

    #[tokio::test]
    async fn method_call_round_trip() {
        let (channel, mut rx) = channel();
        let object = RemoteObject::bind("scheduler", &descriptor(&["getValueForKey"]), &channel);
        let method = object.method("getValueForKey").unwrap_or_else(|e| panic!("{e}"));

        let call = tokio::spawn(async move { method.call(vec![json!("L1")]).await });

        let frame = rx.recv().await.unwrap_or_else(|| panic!("frame sent"));
        let sent: WireMessage = serde_json::from_str(&frame).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(sent.kind, MessageType::InvokeMethod);
        assert_eq!(sent.method.as_deref(), Some("getValueForKey"));
        assert_eq!(sent.args, Some(vec![json!("L1")]));

        let id = sent.id.unwrap_or_else(|| panic!("request id"));
        assert!(channel.complete(id, json!({"L1": {"playState": "running"}})));

        let reply = call.await.unwrap_or_else(|e| panic!("join: {e}"));
        assert_eq!(reply.ok(), Some(json!({"L1": {"playState": "running"}})));
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let (channel, _rx) = channel();
        let object = RemoteObject::bind("scheduler", &descriptor(&["a"]), &channel);
        assert!(matches!(
            object.method("missing"),
            Err(BridgeError::UnknownMethod(m)) if m == "missing"
        ));
        assert_eq!(object.method_count(), 1);
        assert!(object.has_signal("onNotify"));
    }

    #[tokio::test]
    async fn fail_pending_unblocks_callers() {
        let (channel, _rx) = channel();
        let object = RemoteObject::bind("scheduler", &descriptor(&["slow"]), &channel);
        let method = object.method("slow").unwrap_or_else(|e| panic!("{e}"));

        let call = tokio::spawn(async move { method.call(Vec::new()).await });
        while channel.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(channel.fail_pending(), 1);
        let result = call.await.unwrap_or_else(|e| panic!("join: {e}"));
        assert!(matches!(result, Err(BridgeError::Disconnected(_))));
    }

    #[tokio::test]
    async fn closed_outbound_rejects_synchronously() {
        let (channel, rx) = channel();
        drop(rx);
        let object = RemoteObject::bind("scheduler", &descriptor(&["a"]), &channel);
        let method = object.method("a").unwrap_or_else(|e| panic!("{e}"));

        let result = method.call(Vec::new()).await;
        assert!(matches!(result, Err(BridgeError::Disconnected(_))));
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn complete_ignores_unknown_ids() {
        let (channel, _rx) = channel();
        assert!(!channel.complete(99, Value::Null));
    }
}
