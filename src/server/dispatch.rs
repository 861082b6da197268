use super::WebSocketServer;
use crate::{
    error::{CloseReason, Error, Result, Violation},
    frames::{self, Frame, Opcode, encode_control},
    pool::{ConnectionId, Phase},
    transport::Transport,
};

impl<T: Transport> WebSocketServer<T> {
    /// Decodes and dispatches every frame in `data` while the connection stays open.
    ///
    /// Only decode errors and protocol violations stop the walk. A reply that
    /// cannot be sent is logged and the first such error is returned once the
    /// whole buffer has been dispatched.
    pub(super) fn receive_frames(&mut self, id: ConnectionId, data: &mut [u8]) -> Result<()> {
        let mut deferred = Ok(());
        let mut offset = 0;
        while offset < data.len() {
            let (frame, used) = match frames::decode(&mut data[offset..]) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!("undecodable frame, closing: {e}");
                    self.close_after_violation(id);
                    return Err(e.into());
                }
            };
            offset += used;

            if let Err(v) = check_frame(&frame) {
                tracing::warn!(opcode = ?frame.opcode, "protocol violation, closing: {v}");
                self.close_after_violation(id);
                return Err(v.into());
            }

            if let Err(e) = self.dispatch(id, &frame) {
                tracing::warn!(opcode = ?frame.opcode, "reply not sent: {e}");
                if deferred.is_ok() {
                    deferred = Err(e);
                }
            }
            if self.phase(id) != Phase::Open {
                // nothing after a close is processed
                break;
            }
        }
        deferred
    }

    fn dispatch(&mut self, id: ConnectionId, frame: &Frame<'_>) -> Result<()> {
        match frame.opcode {
            Opcode::Ping => {
                tracing::debug!(len = frame.payload.len(), "received PING, queueing PONG");
                self.enqueue(id, encode_control(Opcode::Pong, frame.payload))?;
            }
            Opcode::Pong => tracing::trace!("unsolicited PONG ignored"),
            Opcode::Close => {
                let echo = frame.payload.get(..2).unwrap_or_default();
                if let Ok(code) = <[u8; 2]>::try_from(echo) {
                    tracing::info!(reason = ?CloseReason::from(code), "received Close frame");
                } else {
                    tracing::info!("received Close frame without status");
                }
                self.begin_close(id, echo)?;
            }
            Opcode::Text | Opcode::Bin | Opcode::Cont => {
                self.deliver(id, frame.opcode, frame.payload)?;
            }
        }
        Ok(())
    }

    fn deliver(&mut self, id: ConnectionId, opcode: Opcode, payload: &[u8]) -> Result<()> {
        let Some(handler) = self.pool.get(id).and_then(|c| c.on_message.clone()) else {
            tracing::debug!(len = payload.len(), "no message handler bound, payload dropped");
            return Ok(());
        };

        tracing::debug!(opcode = ?opcode, len = payload.len(), "delivering message");
        let reply = handler.borrow_mut().on_message(id, opcode, payload);
        if let Some(reply) = reply {
            self.send(id, reply.payload(), reply.opcode())?;
        }
        Ok(())
    }

    /// Queues a Close carrying `payload` and moves the connection to `Closing`.
    pub(super) fn begin_close(&mut self, id: ConnectionId, payload: &[u8]) -> Result<()> {
        let conn = self.pool.get_mut(id).ok_or(Error::NotFound)?;
        if matches!(conn.phase(), Phase::Closing | Phase::Closed) {
            return Ok(());
        }
        conn.outbound.push_close(encode_control(Opcode::Close, payload));
        conn.set_phase(Phase::Closing);
        self.flush(id)
    }

    fn close_after_violation(&mut self, id: ConnectionId) {
        let reason = <[u8; 2]>::from(CloseReason::ProtoError);
        if let Err(e) = self.begin_close(id, &reason) {
            tracing::warn!("failed to send Close frame: {e}");
        }
    }
}

fn check_frame(frame: &Frame<'_>) -> std::result::Result<(), Violation> {
    // servers must only accept masked frames
    if !frame.masked {
        return Err(Violation::Unmasked);
    }
    if frame.rsv != 0 {
        return Err(Violation::ReservedBits(frame.rsv));
    }
    if frame.opcode.is_control() && (!frame.fin || frame.payload.len() > 125) {
        return Err(Violation::BadControlFrame(frame.opcode));
    }
    if frame.opcode == Opcode::Close && !is_valid_close_payload(frame.payload) {
        return Err(Violation::BadClosePayload);
    }
    Ok(())
}

fn is_valid_close_payload(bytes: &[u8]) -> bool {
    match bytes.len() {
        0 => true,
        1 => false,
        _ => {
            let code = u16::from_be_bytes([bytes[0], bytes[1]]);
            matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
                && str::from_utf8(&bytes[2..]).is_ok()
        }
    }
}
