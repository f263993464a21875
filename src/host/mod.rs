//! Host-facing command/event contract for the console process.

pub mod channel;
pub mod contract;
pub mod sink;
pub mod stdio;

pub use channel::ModuleHandler;
pub use sink::BroadcastSink;
