use std::{cell::RefCell, rc::Rc};

use crate::{frames::Opcode, pool::ConnectionId};

/// Receives application payloads from Text, Binary and Continuation frames.
///
/// The handler is bound to a connection when the transport accepts it, so
/// replacing it later only affects connections accepted afterwards.
pub trait MessageHandler {
    /// `payload` is exactly the frame's payload, zero bytes included. Returning
    /// a [`Reply`] sends it back on the same connection.
    fn on_message(&mut self, id: ConnectionId, opcode: Opcode, payload: &[u8]) -> Option<Reply>;
}

/// Observes connections entering and leaving the open state.
pub trait ConnectionHandler {
    /// Called exactly once, after the upgrade response was handed to the transport.
    fn on_open(&mut self, id: ConnectionId);

    /// Called once when an opened connection reaches `Closed`.
    fn on_close(&mut self, _id: ConnectionId) {}
}

/// A message sent back from [`MessageHandler::on_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Binary(Vec<u8>),
}

impl Reply {
    pub(crate) fn opcode(&self) -> Opcode {
        match self {
            Self::Text(_) => Opcode::Text,
            Self::Binary(_) => Opcode::Bin,
        }
    }

    pub(crate) fn payload(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }
}

pub(crate) type SharedMessageHandler = Rc<RefCell<dyn MessageHandler>>;
