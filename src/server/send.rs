use bytes::Bytes;

use super::WebSocketServer;
use crate::{
    error::{CloseReason, Error, Result},
    frames::{self, Flags, Opcode},
    pool::{ConnectionId, Phase},
    transport::{SendStatus, Transport},
};

/// Outcome of [`WebSocketServer::broadcast`].
#[derive(Debug, Default)]
pub struct Broadcast {
    /// Connections that accepted or queued the frame.
    pub delivered: Vec<ConnectionId>,
    /// Connections whose send failed, with the reason.
    pub failed: Vec<(ConnectionId, Error)>,
}

impl Broadcast {
    #[must_use]
    pub fn is_complete(&self) -> bool { self.failed.is_empty() }
}

impl<T: Transport> WebSocketServer<T> {
    /// Encodes `payload` as a single FIN frame and queues it on an open
    /// connection. Returns without waiting for the transport; `QueueFull` means
    /// the caller has to retry later or drop the message.
    pub fn send(&mut self, id: ConnectionId, payload: &[u8], opcode: Opcode) -> Result<()> {
        check_payload(payload, opcode)?;
        self.send_frame(id, frames::encode(opcode, Flags::FIN, payload))
    }

    pub fn send_text(&mut self, id: ConnectionId, text: &str) -> Result<()> {
        self.send(id, text.as_bytes(), Opcode::Text)
    }

    pub fn send_binary(&mut self, id: ConnectionId, bytes: &[u8]) -> Result<()> {
        self.send(id, bytes, Opcode::Bin)
    }

    /// Sends to every open connection. The frame is encoded once; a failure on
    /// one connection is recorded and the others are still attempted.
    pub fn broadcast(&mut self, payload: &[u8], opcode: Opcode) -> Result<Broadcast> {
        check_payload(payload, opcode)?;
        let frame = frames::encode(opcode, Flags::FIN, payload);

        let targets: Vec<_> = self.pool.open_ids().collect();
        let mut report = Broadcast::default();
        for id in targets {
            match self.send_frame(id, frame.clone()) {
                Ok(()) => report.delivered.push(id),
                Err(e) => {
                    tracing::warn!(slot = id.slot(), "broadcast send failed: {e}");
                    report.failed.push((id, e));
                }
            }
        }

        tracing::debug!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            len = payload.len(),
            "broadcast"
        );
        Ok(report)
    }

    /// Starts a server-side close with `reason`. A connection still waiting for
    /// its handshake is dropped without a frame.
    pub fn close(&mut self, id: ConnectionId, reason: CloseReason) -> Result<()> {
        match self.pool.get(id).ok_or(Error::NotFound)?.phase() {
            Phase::Open => {
                tracing::info!(slot = id.slot(), reason = ?reason, "closing connection");
                self.begin_close(id, &<[u8; 2]>::from(reason))
            }
            Phase::AwaitingHandshake => {
                self.terminate(id);
                Ok(())
            }
            Phase::Closing | Phase::Closed => Ok(()),
        }
    }

    fn send_frame(&mut self, id: ConnectionId, frame: Bytes) -> Result<()> {
        match self.pool.get(id).ok_or(Error::NotFound)?.phase() {
            Phase::Open => self.enqueue(id, frame),
            phase => Err(Error::NotOpen(phase)),
        }
    }

    pub(super) fn enqueue(&mut self, id: ConnectionId, frame: Bytes) -> Result<()> {
        self.pool
            .get_mut(id)
            .ok_or(Error::NotFound)?
            .outbound
            .push(frame)?;
        self.flush(id)
    }

    /// Hands queued frames to the transport until it is busy or the queue is
    /// empty. A frame the transport rejects is dropped and the error returned.
    pub(super) fn flush(&mut self, id: ConnectionId) -> Result<()> {
        let conn = self.pool.get_mut(id).ok_or(Error::NotFound)?;
        let mut result = Ok(());
        while let Some(frame) = conn.outbound.front() {
            match self.transport.send(conn.handle(), frame) {
                Ok(SendStatus::Sent) => {
                    conn.outbound.pop_front();
                }
                Ok(SendStatus::Busy) => {
                    tracing::trace!(pending = conn.outbound.len(), "transport busy");
                    break;
                }
                Err(e) => {
                    conn.outbound.pop_front();
                    result = Err(Error::TransportSendFailure(e));
                    break;
                }
            }
        }

        if conn.phase() == Phase::Closing && conn.outbound.is_empty() {
            self.terminate(id);
        }
        result
    }
}

fn check_payload(payload: &[u8], opcode: Opcode) -> Result<()> {
    if opcode.is_control() && payload.len() > 125 {
        return Err(Error::ControlTooLarge(payload.len()));
    }
    Ok(())
}
