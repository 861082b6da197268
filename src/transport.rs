//! The contract the host network stack fulfils. The engine never opens sockets
//! or runs timers itself; it reacts to the notifications the host delivers to
//! [`WebSocketServer`](crate::WebSocketServer) and calls back through this trait.

use std::{fmt::Debug, io, time::Duration};

/// Immediate outcome of handing bytes to the transport.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SendStatus {
    /// The bytes were accepted.
    Sent,
    /// The transport cannot take more right now. The engine keeps the bytes
    /// queued and retries on the next [`on_sent`](crate::WebSocketServer::on_sent).
    Busy,
}

pub trait Transport {
    /// Opaque session reference. Connections are looked up by equality of
    /// handles, never by peer address.
    type Handle: Clone + Eq + Debug;

    /// Binds `port` and starts delivering accept notifications.
    fn listen(&mut self, port: u16) -> io::Result<()>;

    /// Hands `bytes` to the session without blocking.
    fn send(&mut self, handle: &Self::Handle, bytes: &[u8]) -> io::Result<SendStatus>;

    /// Tears the session down. No disconnect notification is required afterwards.
    fn disconnect(&mut self, handle: &Self::Handle);

    /// The transport closes the session after `timeout` without traffic and
    /// reports it as a disconnect.
    fn set_idle_timeout(&mut self, handle: &Self::Handle, timeout: Duration);
}
