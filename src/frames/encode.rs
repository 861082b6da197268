use bytes::{BufMut, Bytes, BytesMut};

use super::{Flags, Opcode};

/// Encodes a server frame: `flags | opcode`, the three-tier length field and the
/// payload copied verbatim. Server frames are never masked.
#[must_use]
pub fn encode(opcode: Opcode, flags: Flags, payload: &[u8]) -> Bytes {
    tracing::trace!(
        opcode = ?opcode,
        len = payload.len(),
        "encoding frame"
    );

    let mut buf = BytesMut::with_capacity(payload.len() + 10);
    buf.put_u8(flags.bits() | opcode as u8);

    #[allow(clippy::cast_possible_truncation)]
    match payload.len() {
        0..=125 => buf.put_u8(payload.len() as u8),
        126..=65535 => {
            buf.put_u8(126);
            buf.put_u16(payload.len() as u16);
        }
        _ => {
            buf.put_u8(127);
            buf.put_u64(payload.len() as u64);
        }
    }

    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Single FIN frame for Ping, Pong and Close; callers keep the payload within 125 bytes.
pub(crate) fn encode_control(opcode: Opcode, payload: &[u8]) -> Bytes {
    debug_assert!(opcode.is_control() && payload.len() <= 125);
    encode(opcode, Flags::FIN, payload)
}

#[cfg(test)]
mod tests {
    use paste::paste;

    use super::*;
    use crate::{
        error::CloseReason,
        frames::{decode, decode::tests::build_frame_bytes},
    };

    fn make_payload(len: usize) -> Vec<u8> {
        #[allow(clippy::cast_possible_truncation)]
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn roundtrip(len: usize) {
        let payload = make_payload(len);
        for opcode in [
            Opcode::Cont,
            Opcode::Text,
            Opcode::Bin,
            Opcode::Close,
            Opcode::Ping,
            Opcode::Pong,
        ] {
            let mut bytes = encode(opcode, Flags::FIN, &payload).to_vec();
            // the encoder agrees with an independent frame builder
            assert_eq!(bytes, build_frame_bytes(opcode, &payload, true, None));

            let total = bytes.len();
            let (frame, used) = decode(&mut bytes).unwrap();
            assert_eq!(used, total);
            assert_eq!(frame.opcode, opcode);
            assert!(frame.fin);
            assert!(!frame.masked);
            assert_eq!(frame.mask_key, None);
            assert_eq!(frame.payload_len, len as u64);
            assert_eq!(frame.payload, payload.as_slice());
        }
    }

    macro_rules! roundtrip_lengths {
        ($($len:expr),* $(,)?) => {
            $(paste! {
                #[test]
                fn [<roundtrip_len_ $len>]() { roundtrip($len); }
            })*
        };
    }

    roundtrip_lengths!(0, 1, 125, 126, 65535, 65536);

    #[test]
    fn header_sizes() {
        assert_eq!(encode(Opcode::Text, Flags::FIN, &[0; 125]).len(), 2 + 125);
        assert_eq!(encode(Opcode::Text, Flags::FIN, &[0; 126]).len(), 4 + 126);
        assert_eq!(encode(Opcode::Text, Flags::FIN, &[0; 65536]).len(), 10 + 65536);
    }

    #[test]
    fn zero_bytes_survive() {
        let payload = [0u8, b'a', 0, 0, b'b', 0];
        let bytes = encode(Opcode::Bin, Flags::FIN, &payload);
        assert_eq!(&bytes[..], &[0x82, 6, 0, b'a', 0, 0, b'b', 0]);
    }

    #[test]
    fn flags_are_carried() {
        let bytes = encode(Opcode::Text, Flags::NONE, b"x");
        assert_eq!(bytes[0], 0x01);
        let bytes = encode(Opcode::Text, Flags::FIN | Flags::RSV1, b"x");
        assert_eq!(bytes[0], 0xC1);
    }

    #[test]
    fn close_frame_has_status_code() {
        assert_eq!(
            &encode_control(Opcode::Close, &<[u8; 2]>::from(CloseReason::ProtoError))[..],
            &[0x88, 0x02, 0x03, 0xEA]
        );
    }
}
