//! Remote debugging endpoint for an embedded JavaScript engine.
//!
//! The endpoint speaks a reduced dialect of the
//! [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455)
//! over a single TCP connection: binary frames only, single byte payload
//! lengths, no fragmentation and no extensions. On top of the frames runs a
//! typed message protocol that lets a debugger client set breakpoints,
//! single-step, inspect backtraces, evaluate expressions in the paused
//! context, inject script source and watch program output.
//!
//! There is no runtime and no thread behind it. The engine embeds a
//! [`Debugger`] and drives it cooperatively: a poll from the byte code
//! dispatch loop every few instructions, and blocking poll loops whenever
//! execution pauses. Memory is bounded by two small fixed buffers per
//! session, so long payloads travel as fragmented message streams.

pub mod config;
pub mod debugger;
pub mod engine;
pub mod error;
pub mod frame;
mod handshake;
pub mod protocol;
mod session;
pub mod transport;


pub use crate::config::DebuggerConfig;
pub use crate::debugger::Debugger;
pub use crate::engine::{
    BacktraceFrame, ClientSourceStatus, CompressedPointer, EvalIntent, MemoryStats,
    ParsedFunction, ScriptEngine,
};
pub use crate::error::DebuggerError;
pub use crate::protocol::{
    ClientMessageType, ExecutionMode, OutputSubtype, ServerMessageType, PROTOCOL_VERSION,
};
pub use crate::transport::{TcpTransport, Transport};
