/// XORs `payload` with `mask_key` (RFC 6455 5.3). Applying it twice restores the input.
pub fn mask(payload: &mut [u8], mask_key: [u8; 4]) {
    // whole words first, the key lines up with every 4-byte chunk
    let key = u32::from_ne_bytes(mask_key);
    let mut words = payload.chunks_exact_mut(4);
    for word in &mut words {
        let mut w = [0; 4];
        w.copy_from_slice(word);
        word.copy_from_slice(&(u32::from_ne_bytes(w) ^ key).to_ne_bytes());
    }

    for (b, k) in words.into_remainder().iter_mut().zip(mask_key) {
        *b ^= k;
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec, prelude::*};

    use super::*;

    #[test]
    fn matches_bytewise_definition() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let mut payload = *b"Hello, masking!";
        let expected: Vec<u8> = payload
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ key[i % 4])
            .collect();
        mask(&mut payload, key);
        assert_eq!(payload.as_slice(), expected.as_slice());
    }

    #[test]
    fn empty_payload() {
        let mut payload: [u8; 0] = [];
        mask(&mut payload, [1, 2, 3, 4]);
    }

    proptest! {
        #[test]
        fn mask_is_an_involution(payload in vec(any::<u8>(), 0..512), key in any::<[u8; 4]>()) {
            let mut buf = payload.clone();
            mask(&mut buf, key);
            mask(&mut buf, key);
            prop_assert_eq!(buf, payload);
        }
    }
}
