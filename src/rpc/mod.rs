//! WebSocket RPC channel to the titling engine.

pub mod adapter;
pub mod bridge;
pub mod channel;
pub mod protocol;

pub use bridge::{ClientIdentity, ConnectionState, EngineEvent, RpcBridge};
