//! Correlated request/response messaging between a host process and a
//! worker process.
//!
//! This is the protocol layer of pipelink. A [`Channel`] wraps a connected
//! duplex stream: every message is a TLV framed with a length prefix, a
//! single pump thread reads inbound frames, and outbound frames are
//! serialized under one send lock. Two role types specialize the inbound
//! dispatch:
//!
//! - [`ListenerChannel`] issues sequence-numbered requests, blocks the
//!   caller until the matching response arrives, and forwards unsolicited
//!   callback payloads to a user sink.
//! - [`CommandChannel`] sends fire-and-forget results and status messages
//!   and forwards "new data" and "stop" pushes to user sinks.
//!
//! Both roles connect to a named endpoint whose first frame is a handshake
//! TLV; its payload is handed back from `connect`.

pub mod channel;
pub mod codes;
pub mod command;
pub mod error;
pub mod listener;

pub use channel::{Channel, ChannelConfig, DataSink, InboundHandler, StopSink};
pub use command::CommandChannel;
pub use error::{ChannelError, Result};
pub use listener::ListenerChannel;
