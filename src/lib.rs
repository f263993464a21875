//! Titler bridge: connects a button/feedback control console to a remote
//! titling engine.
//!
//! # Architecture
//!
//! - **RPC bridge** (`rpc`): WebSocket channel with awaitable remote calls,
//!   a connection state machine and a fixed-interval reconnection watchdog.
//! - **Feedback cache** (`feedback::cache`, `feedback::key`): keyed by actor,
//!   feedback and an options fingerprint; invalidated by prefix.
//! - **Rebuild scheduler** (`feedback::rebuild`): refills cache misses on a
//!   short poll that stops itself once the worklist drains.
//! - **Resolver** (`feedback::resolver`): play-state variants and overlay
//!   compositing.
//! - **Notification router** (`router`): push events, with registry churn
//!   debounced into one full refresh.
//!
//! [`TitlerModule`] wires these together behind the console lifecycle, and
//! the `titler-host` binary exposes it over a stdin/stdout JSON protocol.

pub mod config;
pub mod console;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod host;
pub mod module;
pub mod refresh;
pub mod registry;
pub mod router;
pub mod rpc;

#[doc(hidden)]
pub mod test_utils;

pub use config::{BridgeSettings, ModuleConfig};
pub use console::{ConsoleSink, DefinitionKind, ModuleStatus, VariableDefinition};
pub use error::{BridgeError, Result};
pub use feedback::{FeedbackRequest, FeedbackType, FeedbackValue};
pub use module::TitlerModule;
pub use rpc::{ConnectionState, EngineEvent, RpcBridge};

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
