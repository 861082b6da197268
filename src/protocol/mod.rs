pub(crate) mod handshake;
mod mask;

pub use handshake::{HandshakeError, accept_key, extract_key, request_len};
pub use mask::mask;
