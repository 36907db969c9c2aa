//! Little-endian base-128 varint codec for `u32`.
//!
//! Seven payload bits per byte, least-significant group first. The high
//! bit of every non-terminal byte is set; the terminal byte has it clear.
//! A `u32` therefore encodes to one to five bytes, and the five-byte form
//! ends in `0x0F` at most.
//!
//! This is the wire format of [`VarintVec`](crate::VarintVec): an external
//! reader handed the concatenated used-prefixes of its nodes can recover
//! the exact appended sequence with [`decode`] alone.

/// Maximum encoded length of a `u32`.
pub const MAX_LEN: usize = 5;

/// Number of bytes [`encode`] will produce for `value`.
///
/// Equals `ceil(bit_width(value) / 7)` with a floor of one byte for zero.
#[inline]
#[must_use]
pub const fn encoded_len(value: u32) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x001f_ffff => 3,
        0x0020_0000..=0x0fff_ffff => 4,
        _ => 5,
    }
}

/// Encodes `value` into the front of `out`, returning the encoded length.
#[inline]
pub fn encode(mut value: u32, out: &mut [u8; MAX_LEN]) -> usize {
    let mut len = 0;
    while value & !0x7f != 0 {
        out[len] = (value as u8 & 0x7f) | 0x80;
        value >>= 7;
        len += 1;
    }
    out[len] = value as u8;
    len + 1
}

/// Decodes one varint from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed, or `None` if the
/// input is truncated mid-varint or runs past the five-byte maximum for a
/// `u32`.
#[inline]
#[must_use]
pub fn decode(bytes: &[u8]) -> Option<(u32, usize)> {
    let mut value = 0u32;
    let mut shift = 0u32;
    for (index, &byte) in bytes.iter().enumerate() {
        if shift >= 32 {
            return None;
        }
        value |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some((value, index + 1));
        }
        shift += 7;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn boundary_encodings() {
        // (value, encoded bytes)
        let table: &[(u32, &[u8])] = &[
            (0, &[0x00]),
            (1, &[0x01]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (16_383, &[0xff, 0x7f]),
            (16_384, &[0x80, 0x80, 0x01]),
            (u32::MAX, &[0xff, 0xff, 0xff, 0xff, 0x0f]),
        ];
        for &(value, expected) in table {
            let mut buf = [0u8; MAX_LEN];
            let len = encode(value, &mut buf);
            assert_eq!(&buf[..len], expected, "encoding of {value}");
            assert_eq!(encoded_len(value), expected.len(), "length of {value}");
        }
    }

    #[test]
    fn decode_rejects_truncated_input() {
        assert_eq!(decode(&[]), None);
        assert_eq!(decode(&[0x80]), None);
        assert_eq!(decode(&[0x80, 0x80, 0x80, 0x80]), None);
    }

    #[test]
    fn decode_rejects_overlong_input() {
        // Six continuation groups cannot come from a u32.
        assert_eq!(decode(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]), None);
    }

    #[test]
    fn decode_consumes_only_one_varint() {
        let bytes = [0x7f, 0x80, 0x01];
        assert_eq!(decode(&bytes), Some((127, 1)));
        assert_eq!(decode(&bytes[1..]), Some((128, 2)));
    }

    proptest! {
        /// Encode-then-decode is the identity and the length law holds.
        #[test]
        fn round_trip(value in any::<u32>()) {
            let mut buf = [0u8; MAX_LEN];
            let len = encode(value, &mut buf);
            prop_assert_eq!(len, encoded_len(value));

            let expected_len = ((32 - value.leading_zeros()).max(1) as usize).div_ceil(7);
            prop_assert_eq!(len, expected_len);

            prop_assert_eq!(decode(&buf[..len]), Some((value, len)));
        }

        /// Concatenated varints decode back in order.
        #[test]
        fn stream_round_trip(values in prop::collection::vec(any::<u32>(), 0..64)) {
            let mut stream = Vec::new();
            for &value in &values {
                let mut buf = [0u8; MAX_LEN];
                let len = encode(value, &mut buf);
                stream.extend_from_slice(&buf[..len]);
            }

            let mut decoded = Vec::new();
            let mut rest = stream.as_slice();
            while !rest.is_empty() {
                let (value, consumed) = decode(rest).expect("stream is well-formed");
                decoded.push(value);
                rest = &rest[consumed..];
            }
            prop_assert_eq!(decoded, values);
        }
    }
}
