use super::{Flags, Frame, Opcode};
use crate::protocol::mask;

type Result<T> = std::result::Result<T, FrameParseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameParseError {
    /// The header or length field points past the end of the buffer.
    Truncated { needed: u64, available: usize },
    /// Opcode nibble is one of the reserved values.
    ReservedOpcode(u8),
    /// 64-bit length with the most significant bit set.
    LengthOverflow,
}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "frame needs {needed} bytes but only {available} are available")
            }
            Self::ReservedOpcode(op) => write!(f, "reserved opcode {op:#x}"),
            Self::LengthOverflow => f.write_str("64-bit payload length has its top bit set"),
        }
    }
}

impl std::error::Error for FrameParseError {}

/// Decodes one frame from the front of `buf`.
///
/// Masked payloads are unmasked in place, so the returned frame borrows `buf`.
/// Also returns the number of bytes the frame occupied so callers can walk a
/// buffer holding several frames.
pub fn decode(buf: &mut [u8]) -> Result<(Frame<'_>, usize)> {
    // 0   | 1 2 3 | 4 5 6 7 || 0    | 1 2 3 4 5 6 7
    // Fin | Rsv   | Opcode  || Mask | Payload len
    let [b0, b1, ..] = *buf else {
        return Err(FrameParseError::Truncated {
            needed: 2,
            available: buf.len(),
        });
    };

    let flags = Flags::from_header(b0);
    let opcode = Opcode::try_from(b0 & 0x0F).map_err(|()| {
        tracing::trace!(opcode = b0 & 0x0F, "reserved opcode");
        FrameParseError::ReservedOpcode(b0 & 0x0F)
    })?;
    let masked = b1 & 0x80 != 0;

    let mut pos = 2;
    let payload_len = match b1 & 0x7F {
        126 => u64::from(u16::from_be_bytes(take::<2>(buf, &mut pos)?)),
        127 => {
            let len = u64::from_be_bytes(take::<8>(buf, &mut pos)?);
            if len >> 63 != 0 {
                return Err(FrameParseError::LengthOverflow);
            }
            len
        }
        n => u64::from(n),
    };

    let mask_key = if masked {
        Some(take::<4>(buf, &mut pos)?)
    } else {
        None
    };

    let available = buf.len() - pos;
    let len = usize::try_from(payload_len)
        .ok()
        .filter(|&len| len <= available)
        .ok_or(FrameParseError::Truncated {
            needed: payload_len,
            available,
        })?;
    let end = pos + len;

    let payload = &mut buf[pos..end];
    if let Some(key) = mask_key {
        mask(payload, key);
    }

    tracing::trace!(
        opcode = ?opcode,
        fin = flags.fin(),
        masked,
        len,
        "frame decoded"
    );

    Ok((
        Frame {
            fin: flags.fin(),
            rsv: flags.rsv(),
            opcode,
            masked,
            payload_len,
            mask_key,
            payload,
        },
        end,
    ))
}

fn take<const N: usize>(buf: &[u8], pos: &mut usize) -> Result<[u8; N]> {
    let bytes = buf
        .get(*pos..*pos + N)
        .and_then(|s| <[u8; N]>::try_from(s).ok())
        .ok_or(FrameParseError::Truncated {
            needed: (*pos + N) as u64,
            available: buf.len(),
        })?;
    *pos += N;
    Ok(bytes)
}

#[cfg(test)]
pub(crate) mod tests {
    use proptest::{collection::vec, prelude::*};

    use super::*;

    pub(crate) fn opcode_strategy() -> BoxedStrategy<Opcode> {
        prop_oneof![
            Just(Opcode::Text),
            Just(Opcode::Bin),
            Just(Opcode::Cont),
            Just(Opcode::Ping),
            Just(Opcode::Pong),
            Just(Opcode::Close),
        ]
        .boxed()
    }

    // Build a raw client frame from opcode and payload
    pub(crate) fn build_frame_bytes(
        opcode: Opcode,
        payload: &[u8],
        fin: bool,
        mask_key: Option<[u8; 4]>,
    ) -> Vec<u8> {
        #![allow(clippy::cast_possible_truncation)]

        let mut bytes = vec![opcode as u8 | if fin { 0x80 } else { 0 }];
        let mask_bit = if mask_key.is_some() { 0x80 } else { 0 };

        if payload.len() <= 125 {
            bytes.push(payload.len() as u8 | mask_bit);
        } else if let Ok(len) = u16::try_from(payload.len()) {
            bytes.push(126 | mask_bit);
            bytes.extend_from_slice(&len.to_be_bytes());
        } else {
            bytes.push(127 | mask_bit);
            bytes.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        }

        match mask_key {
            Some(key) => {
                bytes.extend_from_slice(&key);
                bytes.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
            }
            None => bytes.extend_from_slice(payload),
        }
        bytes
    }

    #[test]
    fn rfc_masked_hello() {
        // RFC 6455 5.7: a single-frame masked text message
        let mut bytes = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let (frame, used) = decode(&mut bytes).unwrap();
        assert_eq!(used, 11);
        assert_eq!(frame.opcode, Opcode::Text);
        assert!(frame.fin);
        assert!(frame.masked);
        assert_eq!(frame.mask_key, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(frame.payload, b"Hello");
    }

    #[test]
    fn extended_lengths_are_big_endian() {
        let payload = vec![7u8; 300];
        let mut bytes = build_frame_bytes(Opcode::Bin, &payload, true, None);
        assert_eq!(&bytes[1..4], &[126, 0x01, 0x2C]);
        let (frame, _) = decode(&mut bytes).unwrap();
        assert_eq!(frame.payload_len, 300);

        let payload = vec![1u8; 70_000];
        let mut bytes = build_frame_bytes(Opcode::Bin, &payload, true, Some([1, 2, 3, 4]));
        assert_eq!(&bytes[1..10], &[0xFF, 0, 0, 0, 0, 0, 0x01, 0x11, 0x70]);
        let (frame, used) = decode(&mut bytes).unwrap();
        assert_eq!(frame.payload_len, 70_000);
        assert_eq!(frame.payload, payload.as_slice());
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn length_past_buffer_is_an_error() {
        let mut bytes = build_frame_bytes(Opcode::Text, b"hello world", true, Some([9, 9, 9, 9]));
        bytes.truncate(bytes.len() - 3);
        assert_eq!(
            decode(&mut bytes).unwrap_err(),
            FrameParseError::Truncated {
                needed: 11,
                available: 8
            }
        );

        // 126 marker with only one length byte
        let mut bytes = [0x82, 0xFE, 0x01];
        assert!(matches!(
            decode(&mut bytes),
            Err(FrameParseError::Truncated { .. })
        ));

        assert!(decode(&mut []).is_err());
        assert!(decode(&mut [0x81]).is_err());
    }

    #[test]
    fn huge_declared_length_is_not_a_panic() {
        let mut bytes = vec![0x82, 0x7F, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            decode(&mut bytes),
            Err(FrameParseError::Truncated { .. })
        ));

        bytes[2] = 0x80;
        assert_eq!(decode(&mut bytes), Err(FrameParseError::LengthOverflow));
    }

    #[test]
    fn reserved_opcode() {
        let mut bytes = [0x83, 0x80, 0, 0, 0, 0];
        assert_eq!(decode(&mut bytes), Err(FrameParseError::ReservedOpcode(0x3)));
    }

    #[test]
    fn rsv_bits_are_reported() {
        let mut bytes = [0xC1, 0x00];
        let (frame, _) = decode(&mut bytes).unwrap();
        assert_eq!(frame.rsv, 0b100);
        assert!(frame.fin);
    }

    #[test]
    fn walks_back_to_back_frames() {
        let mut bytes = build_frame_bytes(Opcode::Text, b"one", true, Some([1, 0, 1, 0]));
        bytes.extend(build_frame_bytes(Opcode::Ping, b"two", true, Some([5, 6, 7, 8])));

        let (first, used) = decode(&mut bytes).unwrap();
        assert_eq!(first.payload, b"one");
        let (second, rest) = decode(&mut bytes[used..]).unwrap();
        assert_eq!(second.opcode, Opcode::Ping);
        assert_eq!(second.payload, b"two");
        assert_eq!(used + rest, bytes.len());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn decoder_handles_random_frames(
            opcode in opcode_strategy(),
            fin in any::<bool>(),
            key in any::<Option<[u8; 4]>>(),
            payload in vec(any::<u8>(), 0..=1024),
        ) {
            let mut bytes = build_frame_bytes(opcode, &payload, fin, key);
            let total = bytes.len();
            let (frame, used) = decode(&mut bytes).unwrap();
            prop_assert_eq!(used, total);
            prop_assert_eq!(frame.payload, payload.as_slice());
            prop_assert_eq!(frame.opcode, opcode);
            prop_assert_eq!(frame.fin, fin);
            prop_assert_eq!(frame.masked, key.is_some());
            prop_assert_eq!(frame.mask_key, key);
        }

        #[test]
        fn fuzz_decoder(mut buf in vec(any::<u8>(), 0..2048)) {
            let mut offset = 0;
            while offset < buf.len() {
                match decode(&mut buf[offset..]) {
                    Ok((_, used)) => offset += used,
                    Err(_) => break,
                }
            }
        }
    }
}
