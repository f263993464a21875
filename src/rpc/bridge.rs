//! WebSocket client for the titling engine.
//!
//! [`RpcBridge`] owns the connection state machine:
//!
//! ```text
//! Disconnected --connect()--> Connecting --handshake reply--> Connected
//!      ^                          |                               |
//!      +------ close / error -----+-------------------------------+
//! ```
//!
//! Leaving `Connected`/`Connecting` because of a close or an error arms the
//! reconnection watchdog, which re-attempts `Connecting` at a fixed interval
//! until the transport opens again. Only an explicit [`RpcBridge::disconnect`]
//! stops it.
//!
//! Remote calls are only issued while `Connected`; every exposed method is
//! bound at connection time (see [`super::channel`]).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use super::channel::{RemoteChannel, RemoteObject};
use super::protocol::{
    FEEDBACK_CHANGED_SIGNAL, MessageType, NOTIFY_SIGNAL, ObjectDescriptor,
    REGISTRY_CHANGED_SIGNAL, SCHEDULER_OBJECT, SUBSCRIBED_SIGNALS, WireMessage, decode_json_arg,
};
use crate::engine::{RemoteEngine, parse_reply};
use crate::error::{BridgeError, Result};
use crate::feedback::state::FeedbackState;

/// Capacity of the engine event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Handshake method announcing this client to the engine.
pub const HANDSHAKE_METHOD: &str = "notifyClientConnected";

/// Transport connection state. Exactly one per bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Identity declared in the capability handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_id: String,
    pub version: String,
}

impl ClientIdentity {
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// Events published by the bridge, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Handshake completed; remote calls may be issued.
    Ready { host_info: Value },
    /// Transport went away. `error` distinguishes failures from clean closes.
    Closed { reason: String, error: bool },
    /// The engine's action/feedback/preset registry may have changed.
    RegistryChanged { element_id: String },
    /// A single feedback's state changed on the engine.
    FeedbackChanged {
        actor_id: String,
        feedback_id: String,
        options: Map<String, Value>,
        state: FeedbackState,
    },
    /// Generic notification (`play`, `data`, ...).
    Notify(Value),
}

/// State shared between the bridge handle and the connection task.
struct SharedState {
    state: ConnectionState,
    object: Option<RemoteObject>,
    host_info: Option<Value>,
    watchdog_armed: bool,
}

/// Handle to a running connection loop.
struct Link {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Awaitable request/response bridge to the titling engine.
pub struct RpcBridge {
    identity: ClientIdentity,
    reconnect_interval: Duration,
    shared: Arc<Mutex<SharedState>>,
    events: broadcast::Sender<EngineEvent>,
    link: Mutex<Option<Link>>,
}

impl RpcBridge {
    #[must_use]
    pub fn new(identity: ClientIdentity, reconnect_interval: Duration) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            identity,
            reconnect_interval,
            shared: Arc::new(Mutex::new(SharedState {
                state: ConnectionState::Disconnected,
                object: None,
                host_info: None,
                watchdog_armed: false,
            })),
            events,
            link: Mutex::new(None),
        }
    }

    /// Subscribe to engine events. Receivers only see events sent after subscribing.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        crate::lock(&self.shared).state
    }

    /// Whether the reconnection watchdog is currently armed.
    #[must_use]
    pub fn watchdog_armed(&self) -> bool {
        crate::lock(&self.shared).watchdog_armed
    }

    /// Host metadata returned by the last successful handshake.
    #[must_use]
    pub fn host_info(&self) -> Option<Value> {
        crate::lock(&self.shared).host_info.clone()
    }

    /// Start connecting to `url` (`ws://host:port`).
    ///
    /// Any previous connection loop is cancelled first. Must be called from
    /// within a tokio runtime.
    pub fn connect(&self, url: impl Into<String>) {
        let url = url.into();
        self.disconnect();

        let cancel = CancellationToken::new();
        let ctx = LoopContext {
            url,
            identity: self.identity.clone(),
            reconnect_interval: self.reconnect_interval,
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(connection_loop(ctx));

        *crate::lock(&self.link) = Some(Link { cancel, task });
    }

    /// Tear down the connection loop and the watchdog.
    pub fn disconnect(&self) {
        let link = crate::lock(&self.link).take();
        if let Some(link) = link {
            link.cancel.cancel();
            link.task.abort();
        }

        let object = {
            let mut s = crate::lock(&self.shared);
            s.state = ConnectionState::Disconnected;
            s.watchdog_armed = false;
            s.object.take()
        };
        if object.is_some() {
            debug!("bridge disconnected by request");
        }
    }

    /// Issue a remote call by method name.
    ///
    /// Fails with [`BridgeError::NotConnected`] unless the bridge is
    /// `Connected`, and with [`BridgeError::UnknownMethod`] if the engine
    /// did not expose `method`.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let bound = {
            let s = crate::lock(&self.shared);
            match (&s.state, &s.object) {
                (ConnectionState::Connected, Some(object)) => object.method(method)?,
                _ => return Err(BridgeError::NotConnected),
            }
        };
        bound.call(args).await
    }
}

impl Drop for RpcBridge {
    fn drop(&mut self) {
        if let Some(link) = crate::lock(&self.link).take() {
            link.cancel.cancel();
            link.task.abort();
        }
    }
}

#[async_trait::async_trait]
impl RemoteEngine for RpcBridge {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        RpcBridge::call(self, method, args).await
    }
}

// ---------------------------------------------------------------------------
// Background connection loop
// ---------------------------------------------------------------------------

struct LoopContext {
    url: String,
    identity: ClientIdentity,
    reconnect_interval: Duration,
    shared: Arc<Mutex<SharedState>>,
    events: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,
}

/// How a single connection attempt ended.
enum LinkEnd {
    /// The engine closed the socket.
    Closed(String),
    /// Connect, read, write or protocol failure.
    Failed(BridgeError),
}

/// Run connection attempts until cancelled, re-arming the watchdog after every loss.
async fn connection_loop(ctx: LoopContext) {
    loop {
        crate::lock(&ctx.shared).state = ConnectionState::Connecting;
        info!(url = %ctx.url, "connecting to titling engine");

        let end = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            end = try_connect(&ctx) => end,
        };

        let (reason, error) = match end {
            LinkEnd::Closed(reason) => (reason, false),
            LinkEnd::Failed(e) => (e.to_string(), true),
        };

        {
            let mut s = crate::lock(&ctx.shared);
            s.state = ConnectionState::Disconnected;
            s.object = None;
            s.watchdog_armed = true;
        }
        if error {
            warn!(url = %ctx.url, %reason, "engine connection failed");
        } else {
            info!(url = %ctx.url, %reason, "engine connection closed");
        }
        let _ = ctx.events.send(EngineEvent::Closed { reason, error });

        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = tokio::time::sleep(ctx.reconnect_interval) => {
                debug!("reconnection watchdog fired");
            }
        }
    }

    let mut s = crate::lock(&ctx.shared);
    s.state = ConnectionState::Disconnected;
    s.object = None;
    s.watchdog_armed = false;
}

/// Attempt a single connection and serve it until it ends.
async fn try_connect(ctx: &LoopContext) -> LinkEnd {
    let (ws_stream, _) = match connect_async(ctx.url.as_str()).await {
        Ok(conn) => conn,
        Err(e) => return LinkEnd::Failed(BridgeError::Transport(format!("connect: {e}"))),
    };

    // Transport is open: disarm the watchdog.
    crate::lock(&ctx.shared).watchdog_armed = false;

    let (mut write, mut read) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let channel = RemoteChannel::new(outbound_tx);
    let _teardown = FailPendingOnDrop(Arc::clone(&channel));

    let mut handshake = AbortOnDropHandle::new(tokio::spawn(handshake(
        Arc::clone(&channel),
        ctx.identity.clone(),
        Arc::clone(&ctx.shared),
        ctx.events.clone(),
    )));
    let mut handshake_done = false;

    let end = loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, &channel, &ctx.events);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by engine".into());
                        break LinkEnd::Closed(reason);
                    }
                    None => break LinkEnd::Closed("stream ended".into()),
                    Some(Err(e)) => {
                        break LinkEnd::Failed(BridgeError::Transport(format!("read: {e}")));
                    }
                    _ => {} // Binary, Ping/Pong frames handled by tungstenite.
                }
            }
            Some(json) = outbound_rx.recv() => {
                if let Err(e) = write.send(Message::Text(json)).await {
                    break LinkEnd::Failed(BridgeError::Transport(format!("send: {e}")));
                }
            }
            joined = &mut handshake, if !handshake_done => {
                handshake_done = true;
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => break LinkEnd::Failed(e),
                    Err(e) => {
                        break LinkEnd::Failed(BridgeError::Protocol(format!("handshake task: {e}")));
                    }
                }
            }
        }
    };

    end
}

/// Releases in-flight callers when a connection attempt ends, including when
/// the attempt is cancelled by [`RpcBridge::disconnect`].
struct FailPendingOnDrop(Arc<RemoteChannel>);

impl Drop for FailPendingOnDrop {
    fn drop(&mut self) {
        let dropped = self.0.fail_pending();
        if dropped > 0 {
            debug!(dropped, "abandoned in-flight calls on teardown");
        }
    }
}

/// Discover the engine object, bind its methods, subscribe to signals, and
/// announce this client. Publishes `Connected` only after the reply arrives.
async fn handshake(
    channel: Arc<RemoteChannel>,
    identity: ClientIdentity,
    shared: Arc<Mutex<SharedState>>,
    events: broadcast::Sender<EngineEvent>,
) -> Result<()> {
    let objects = super::adapter::awaitable(|done| channel.request(WireMessage::init, done)).await?;

    let descriptor: ObjectDescriptor = objects
        .get(SCHEDULER_OBJECT)
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| BridgeError::Protocol(format!("bad {SCHEDULER_OBJECT} descriptor: {e}")))?
        .ok_or_else(|| BridgeError::Protocol(format!("engine exposes no {SCHEDULER_OBJECT}")))?;

    let object = RemoteObject::bind(SCHEDULER_OBJECT, &descriptor, &channel);
    debug!(methods = object.method_count(), "bound engine object");

    for signal in SUBSCRIBED_SIGNALS {
        if !object.has_signal(signal) {
            debug!(signal, "engine does not advertise signal; subscribing anyway");
        }
        channel.send(&WireMessage::connect_to_signal(SCHEDULER_OBJECT, signal))?;
    }

    let opts = json!({ "protocol": 1 }).to_string();
    let raw = object
        .method(HANDSHAKE_METHOD)?
        .call(vec![
            Value::String(identity.client_id.clone()),
            Value::String(identity.version.clone()),
            Value::String(opts),
        ])
        .await?;
    let host_info = parse_reply(HANDSHAKE_METHOD, raw)?;

    {
        let mut s = crate::lock(&shared);
        s.object = Some(object);
        s.host_info = Some(host_info.clone());
        s.state = ConnectionState::Connected;
    }
    info!(client_id = %identity.client_id, "engine handshake complete");
    let _ = events.send(EngineEvent::Ready { host_info });
    Ok(())
}

/// Route one inbound text frame.
fn handle_frame(text: &str, channel: &RemoteChannel, events: &broadcast::Sender<EngineEvent>) {
    let msg: WireMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("Ignoring unparseable engine frame: {e}");
            return;
        }
    };

    match msg.kind {
        MessageType::Response => match msg.id {
            Some(id) => {
                if !channel.complete(id, msg.data.unwrap_or(Value::Null)) {
                    debug!(id, "response for unknown request id");
                }
            }
            None => debug!("response frame without id"),
        },
        MessageType::Signal => {
            let signal = msg.signal.unwrap_or_default();
            match signal_event(&signal, msg.args.unwrap_or_default()) {
                Ok(Some(event)) => {
                    let _ = events.send(event);
                }
                Ok(None) => debug!(%signal, "ignoring unrouted signal"),
                Err(e) => warn!(%signal, error = %e, "dropping malformed signal"),
            }
        }
        other => debug!(kind = ?other, "ignoring engine frame"),
    }
}

/// Translate a signal frame into an [`EngineEvent`].
fn signal_event(signal: &str, args: Vec<Value>) -> Result<Option<EngineEvent>> {
    let mut args = args.into_iter();
    match signal {
        REGISTRY_CHANGED_SIGNAL => {
            let element_id = match args.next() {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            Ok(Some(EngineEvent::RegistryChanged { element_id }))
        }
        FEEDBACK_CHANGED_SIGNAL => {
            let actor_id = string_arg(args.next(), "actorId")?;
            let feedback_id = string_arg(args.next(), "feedbackId")?;
            let options = object_arg(args.next(), "options")?;
            let state = object_arg(args.next(), "state")?;
            Ok(Some(EngineEvent::FeedbackChanged {
                actor_id,
                feedback_id,
                options,
                state,
            }))
        }
        NOTIFY_SIGNAL => {
            let payload = decode_json_arg(args.next().unwrap_or(Value::Null))
                .map_err(|e| BridgeError::Protocol(format!("notify payload: {e}")))?;
            Ok(Some(EngineEvent::Notify(payload)))
        }
        _ => Ok(None),
    }
}

fn string_arg(value: Option<Value>, name: &str) -> Result<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        _ => Err(BridgeError::Protocol(format!("missing {name}"))),
    }
}

fn object_arg(value: Option<Value>, name: &str) -> Result<Map<String, Value>> {
    match decode_json_arg(value.unwrap_or(Value::Null)) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(BridgeError::Protocol(format!(
            "{name} is not an object: {other}"
        ))),
        Err(e) => Err(BridgeError::Protocol(format!("{name}: {e}"))),
    }
}
