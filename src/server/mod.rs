//! The connection engine: reacts to transport notifications, runs the
//! handshake, dispatches frames and queues outbound bytes.
//!
//! Everything runs on the caller's thread. Each notification is handled to
//! completion, and sending never waits on the transport: bytes sit in the
//! connection's outbound queue until [`WebSocketServer::on_sent`] reports the
//! transport can take more.

mod dispatch;
mod send;

use std::{cell::RefCell, rc::Rc};

use bytes::Bytes;

use crate::{
    config::ServerConfig,
    error::{Error, Result},
    handler::{ConnectionHandler, MessageHandler, SharedMessageHandler},
    pool::{Connection, ConnectionId, ConnectionPool, Phase},
    protocol::handshake,
    transport::Transport,
};

pub use send::Broadcast;

pub struct WebSocketServer<T: Transport> {
    transport: T,
    pool: ConnectionPool<T::Handle>,
    config: ServerConfig,
    on_message: Option<SharedMessageHandler>,
    on_connection: Option<Box<dyn ConnectionHandler>>,
}

impl<T: Transport> WebSocketServer<T> {
    #[must_use]
    pub fn new(transport: T, config: ServerConfig) -> Self {
        Self {
            transport,
            pool: ConnectionPool::new(config.queue_depth),
            config,
            on_message: None,
            on_connection: None,
        }
    }

    /// Asks the transport to bind the configured port.
    pub fn start(&mut self) -> Result<()> {
        self.transport
            .listen(self.config.port)
            .map_err(Error::Bind)?;
        tracing::info!(port = self.config.port, "websocket server listening");
        Ok(())
    }

    /// Bound to every connection accepted from now on.
    pub fn set_message_handler(&mut self, handler: impl MessageHandler + 'static) {
        self.on_message = Some(Rc::new(RefCell::new(handler)));
    }

    pub fn set_connection_handler(&mut self, handler: impl ConnectionHandler + 'static) {
        self.on_connection = Some(Box::new(handler));
    }

    pub fn transport(&self) -> &T { &self.transport }

    pub fn transport_mut(&mut self) -> &mut T { &mut self.transport }

    pub fn config(&self) -> &ServerConfig { &self.config }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection<T::Handle>> {
        self.pool.get(id)
    }

    /// Number of connections in the `Open` phase.
    #[must_use]
    pub fn count_open(&self) -> usize { self.pool.count_open() }

    /// New transport session. Without a free slot the session is disconnected
    /// straight away and `CapacityExceeded` is returned.
    pub fn on_accept(&mut self, handle: T::Handle) -> Result<ConnectionId> {
        let id = match self.pool.allocate(handle.clone(), self.on_message.clone()) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(handle = ?handle, "rejecting session: {e}");
                self.transport.disconnect(&handle);
                return Err(e);
            }
        };
        self.transport
            .set_idle_timeout(&handle, self.config.idle_timeout);
        tracing::info!(slot = id.slot(), handle = ?handle, "session accepted");
        Ok(id)
    }

    /// Bytes arrived for a session. Routed by phase: the upgrade request while
    /// awaiting the handshake, frames once open, discarded afterwards. Frames
    /// that follow the upgrade request in the same read are dispatched once the
    /// connection is open.
    ///
    /// Masked payloads are unmasked in place inside `data`.
    pub fn on_receive(&mut self, handle: &T::Handle, data: &mut [u8]) -> Result<()> {
        let id = self.pool.find(handle).inspect_err(|_| {
            tracing::warn!(handle = ?handle, "data for unknown session");
        })?;
        let phase = self.phase(id);
        let _span = tracing::debug_span!("recv", slot = id.slot(), phase = ?phase).entered();
        tracing::trace!(bytes = data.len(), "read session");

        match phase {
            Phase::AwaitingHandshake => self.handshake(id, data),
            Phase::Open => self.receive_frames(id, data),
            Phase::Closing | Phase::Closed => {
                tracing::debug!(bytes = data.len(), "discarding bytes after close");
                Ok(())
            }
        }
    }

    /// The transport is ready for more: flush whatever is queued.
    pub fn on_sent(&mut self, handle: &T::Handle) -> Result<()> {
        let id = self.pool.find(handle)?;
        self.flush(id)
    }

    /// The transport closed the session (peer FIN, idle timeout, reset).
    pub fn on_disconnect(&mut self, handle: &T::Handle) {
        let Ok(id) = self.pool.find(handle) else {
            tracing::debug!(handle = ?handle, "disconnect for unknown session");
            return;
        };
        if let Some(previous) = self.pool.mark_closed(id) {
            tracing::info!(slot = id.slot(), from = ?previous, "session disconnected");
            self.notify_closed(id, previous);
        }
    }

    /// Transport error or reconnect report; the session is treated as gone.
    pub fn on_error(&mut self, handle: &T::Handle, code: i32) {
        tracing::warn!(handle = ?handle, code, "transport error");
        self.on_disconnect(handle);
    }

    fn phase(&self, id: ConnectionId) -> Phase {
        self.pool.get(id).map_or(Phase::Closed, Connection::phase)
    }

    fn handshake(&mut self, id: ConnectionId, data: &mut [u8]) -> Result<()> {
        let end = handshake::request_len(data).unwrap_or(data.len());
        let (request, rest) = data.split_at_mut(end);
        let response = match handshake::respond(request) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("malformed upgrade request: {e}");
                self.terminate(id);
                return Err(e.into());
            }
        };

        let conn = self.pool.get_mut(id).ok_or(Error::NotFound)?;
        conn.outbound.push(Bytes::from(response))?;
        if let Err(e) = self.flush(id) {
            self.terminate(id);
            return Err(e);
        }

        if let Some(conn) = self.pool.get_mut(id) {
            conn.set_phase(Phase::Open);
        }
        tracing::info!(slot = id.slot(), "handshake complete");
        if let Some(handler) = self.on_connection.as_mut() {
            handler.on_open(id);
        }

        if rest.is_empty() {
            return Ok(());
        }
        tracing::debug!(bytes = rest.len(), "frames pipelined behind the upgrade request");
        self.receive_frames(id, rest)
    }

    /// Closes the slot and asks the transport to drop the session.
    fn terminate(&mut self, id: ConnectionId) {
        let Some(handle) = self.pool.get(id).map(|c| c.handle().clone()) else {
            return;
        };
        match self.pool.mark_closed(id) {
            Some(Phase::Closed) | None => {}
            Some(previous) => {
                tracing::debug!(slot = id.slot(), from = ?previous, "disconnecting session");
                self.transport.disconnect(&handle);
                self.notify_closed(id, previous);
            }
        }
    }

    // on_close only for connections that saw on_open
    fn notify_closed(&mut self, id: ConnectionId, previous: Phase) {
        if !matches!(previous, Phase::Open | Phase::Closing) {
            return;
        }
        if let Some(handler) = self.on_connection.as_mut() {
            handler.on_close(id);
        }
    }
}
