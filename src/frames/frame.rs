use std::ops::BitOr;

use super::Opcode;

/// FIN and RSV bits of the first header byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    pub const FIN: Flags = Flags(0b1000_0000);
    pub const RSV1: Flags = Flags(0b0100_0000);
    pub const RSV2: Flags = Flags(0b0010_0000);
    pub const RSV3: Flags = Flags(0b0001_0000);
    pub const NONE: Flags = Flags(0);

    pub(crate) fn from_header(b: u8) -> Self { Self(b & 0xF0) }

    #[must_use]
    pub fn bits(self) -> u8 { self.0 }

    #[must_use]
    pub fn fin(self) -> bool { self.0 & Self::FIN.0 != 0 }

    /// RSV1..RSV3 packed into the low three bits.
    #[must_use]
    pub fn rsv(self) -> u8 { (self.0 >> 4) & 0b111 }
}

impl Default for Flags {
    fn default() -> Self { Self::FIN }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}

/// A decoded frame. The payload borrows the receive buffer and is already unmasked.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub fin: bool,
    pub rsv: u8,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload_len: u64,
    pub mask_key: Option<[u8; 4]>,
    pub payload: &'a [u8],
}
