use std::{fmt, io};

use crate::{
    frames::{FrameParseError, Opcode},
    pool::Phase,
    protocol::HandshakeError,
};

/// Close reason codes as specified in
/// [RFC 6455](https://www.rfc-editor.org/rfc/rfc6455.html#section-7.4)
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Normal close
    Normal = 1000,
    /// Going away
    GoingAway = 1001,
    /// Websocket protocol violation
    ProtoError = 1002,
    /// Unsupported data type
    DataType = 1003,
    /// Generic policy violation
    Policy = 1008,
    /// Messages are too big
    TooBig = 1009,
    /// An unexpected condition that prevented the request from being fulfilled
    Unexpected = 1011,
    /// Other valid codes with unknown meanings
    Unknown = 4000, // private use code
}

/// Converts a reason code to bytes of the appropriate endianness.
impl From<CloseReason> for [u8; 2] {
    fn from(value: CloseReason) -> Self { (value as u16).to_be_bytes() }
}

impl From<[u8; 2]> for CloseReason {
    fn from(bytes: [u8; 2]) -> Self {
        match u16::from_be_bytes(bytes) {
            1000 => CloseReason::Normal,
            1001 => CloseReason::GoingAway,
            1002 => CloseReason::ProtoError,
            1003 => CloseReason::DataType,
            1008 => CloseReason::Policy,
            1009 => CloseReason::TooBig,
            1011 => CloseReason::Unexpected,
            _ => CloseReason::Unknown,
        }
    }
}

/// Frames a server must refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// Client frames must be masked.
    Unmasked,
    /// RSV bits set without a negotiated extension.
    ReservedBits(u8),
    /// Control frame that is fragmented or longer than 125 bytes.
    BadControlFrame(Opcode),
    /// Close payload with a single byte, an invalid code or non UTF-8 text.
    BadClosePayload,
    /// Opcode 0x3-0x7 or 0xB-0xF.
    ReservedOpcode(u8),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmasked => f.write_str("unmasked client frame"),
            Self::ReservedBits(rsv) => write!(f, "reserved bits {rsv:#05b} set"),
            Self::BadControlFrame(op) => write!(f, "fragmented or oversized {op:?} frame"),
            Self::BadClosePayload => f.write_str("malformed close payload"),
            Self::ReservedOpcode(op) => write!(f, "reserved opcode {op:#x}"),
        }
    }
}

/// Errors returned by the engine's public operations.
#[derive(Debug)]
pub enum Error {
    /// Every slot is taken by a connection that is not closed.
    CapacityExceeded,
    /// No slot matches the transport handle or connection id.
    NotFound,
    /// The connection is not in a phase that allows the operation.
    NotOpen(Phase),
    /// The upgrade request could not be answered; the connection was closed.
    HandshakeMalformed(HandshakeError),
    /// The peer broke the framing rules; the connection was closed.
    ProtocolViolation(Violation),
    /// A frame is truncated or its length is out of range; the connection was closed.
    Decode(FrameParseError),
    /// The transport refused the bytes. The frame is dropped, not retried.
    TransportSendFailure(io::Error),
    /// The connection's outbound queue is saturated.
    QueueFull,
    /// Control frame payloads are limited to 125 bytes.
    ControlTooLarge(usize),
    /// The transport failed to start listening.
    Bind(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExceeded => f.write_str("no free connection slot"),
            Self::NotFound => f.write_str("unknown connection"),
            Self::NotOpen(phase) => write!(f, "connection is {phase:?}"),
            Self::HandshakeMalformed(e) => write!(f, "malformed handshake: {e}"),
            Self::ProtocolViolation(v) => write!(f, "protocol violation: {v}"),
            Self::Decode(e) => write!(f, "frame decode error: {e}"),
            Self::TransportSendFailure(e) => write!(f, "transport send failed: {e}"),
            Self::QueueFull => f.write_str("outbound queue full"),
            Self::ControlTooLarge(len) => {
                write!(f, "control frame payload of {len} bytes exceeds 125")
            }
            Self::Bind(e) => write!(f, "failed to listen: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::HandshakeMalformed(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::TransportSendFailure(e) | Self::Bind(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self { Self::HandshakeMalformed(e) }
}

/// Reserved opcodes are protocol violations; everything else is a decode error.
impl From<FrameParseError> for Error {
    fn from(e: FrameParseError) -> Self {
        match e {
            FrameParseError::ReservedOpcode(op) => {
                Self::ProtocolViolation(Violation::ReservedOpcode(op))
            }
            e => Self::Decode(e),
        }
    }
}

impl From<Violation> for Error {
    fn from(v: Violation) -> Self { Self::ProtocolViolation(v) }
}
