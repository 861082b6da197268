pub(crate) mod decode;
mod encode;
mod frame;
mod opcode;

pub use decode::{FrameParseError, decode};
pub use encode::encode;
pub(crate) use encode::encode_control;
pub use frame::{Flags, Frame};
pub use opcode::Opcode;
