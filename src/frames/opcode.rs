/// Frame type carried in the low nibble of the first header byte.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Opcode {
    Cont = 0x0,
    Text = 0x1,
    Bin = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Close, Ping and Pong. Control frames are never fragmented and carry at most 125 bytes.
    #[must_use]
    pub fn is_control(self) -> bool { (self as u8) & 0x8 != 0 }
}

impl TryFrom<u8> for Opcode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x0 => Opcode::Cont,
            0x1 => Opcode::Text,
            0x2 => Opcode::Bin,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            _ => return Err(()),
        })
    }
}
