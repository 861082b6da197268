//! Server-side WebSocket engine for small devices.
//!
//! The host network stack owns the sockets and reports sessions, bytes and
//! disconnects to a [`WebSocketServer`] through its `on_*` methods; the engine
//! answers through the [`Transport`] trait. At most [`MAX_CONNECTIONS`]
//! sessions are tracked at once.

#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::empty_docs,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

mod config;
mod error;
pub mod frames;
mod handler;
mod pool;
pub mod protocol;
mod server;
mod transport;

pub use config::{DEFAULT_IDLE_TIMEOUT, DEFAULT_PORT, DEFAULT_QUEUE_DEPTH, ServerConfig};
pub use error::{CloseReason, Error, Result, Violation};
pub use frames::Opcode;
pub use handler::{ConnectionHandler, MessageHandler, Reply};
pub use pool::{Connection, ConnectionId, ConnectionPool, Phase};
pub use server::{Broadcast, WebSocketServer};
pub use transport::{SendStatus, Transport};

/// Concurrent sessions the pool can hold.
pub const MAX_CONNECTIONS: usize = 4;
