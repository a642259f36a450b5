//! Variable-length integer encoding per RFC 9000 Section 16.
//!
//! The top two bits of the first byte select the total length (00 -> 1,
//! 01 -> 2, 10 -> 4, 11 -> 8); the remaining 6/14/30/62 bits carry the value
//! in network byte order. Encoders emit the shortest form; decoders accept
//! any form the value fits in.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Largest encodable value (2^62 - 1).
pub const MAX: u64 = (1u64 << 62) - 1;

/// Decode a varint from the front of `buf`, returning `(value, consumed)`.
pub fn decode(buf: &[u8]) -> Result<(u64, usize)> {
    let first = *buf.first().ok_or(Error::ShortInput)?;
    let len = 1usize << (first >> 6);
    if buf.len() < len {
        return Err(Error::ShortInput);
    }

    let mut value = u64::from(first & 0x3f);
    for &byte in &buf[1..len] {
        value = (value << 8) | u64::from(byte);
    }
    Ok((value, len))
}

/// Encode `value` in its shortest form into `buf`, returning bytes written.
pub fn encode<B: BufMut>(value: u64, buf: &mut B) -> Result<usize> {
    if value > MAX {
        return Err(Error::ValueTooLarge);
    }

    match len(value) {
        1 => buf.put_u8(value as u8),
        2 => buf.put_u16(value as u16 | 0x4000),
        4 => buf.put_u32(value as u32 | 0x8000_0000),
        _ => buf.put_u64(value | 0xc000_0000_0000_0000),
    }
    Ok(len(value))
}

/// Encoded length of `value`: 1, 2, 4, or 8 bytes.
///
/// Values above [`MAX`] report 8; [`encode`] rejects them.
pub fn len(value: u64) -> usize {
    if value < 1 << 6 {
        1
    } else if value < 1 << 14 {
        2
    } else if value < 1 << 30 {
        4
    } else {
        8
    }
}

/// Decode a varint from a [`Buf`] cursor, advancing it past the encoding.
pub fn decode_buf<B: Buf>(buf: &mut B) -> Result<u64> {
    if !buf.has_remaining() {
        return Err(Error::ShortInput);
    }
    let len = 1usize << (buf.chunk()[0] >> 6);
    if buf.remaining() < len {
        return Err(Error::ShortInput);
    }

    let value = match len {
        1 => u64::from(buf.get_u8()),
        2 => u64::from(buf.get_u16() & 0x3fff),
        4 => u64::from(buf.get_u32() & 0x3fff_ffff),
        _ => buf.get_u64() & 0x3fff_ffff_ffff_ffff,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rfc9000_appendix_a_vectors() {
        let mut buf = Vec::new();
        encode(37, &mut buf).unwrap();
        assert_eq!(buf, [0x25]);

        buf.clear();
        encode(151, &mut buf).unwrap();
        assert_eq!(buf, [0x40, 0x97]);

        buf.clear();
        encode(16384, &mut buf).unwrap();
        assert_eq!(buf, [0x80, 0x00, 0x40, 0x00]);

        buf.clear();
        encode(494_878_333, &mut buf).unwrap();
        assert_eq!(buf, [0x9d, 0x7f, 0x3e, 0x7d]);

        buf.clear();
        encode(151_288_809_941_952_652, &mut buf).unwrap();
        assert_eq!(buf, [0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c]);
    }

    #[test]
    fn accepts_non_minimal_forms() {
        // 37 in the 8-byte form still decodes to (37, 8).
        let buf = [0xc0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x25];
        assert_eq!(decode(&buf).unwrap(), (37, 8));

        // 0 in the 2-byte form.
        assert_eq!(decode(&[0x40, 0x00]).unwrap(), (0, 2));
    }

    #[test]
    fn rejects_truncated_input() {
        assert_eq!(decode(&[]).unwrap_err(), Error::ShortInput);
        assert_eq!(decode(&[0x40]).unwrap_err(), Error::ShortInput);
        assert_eq!(decode(&[0x80, 0x00, 0x40]).unwrap_err(), Error::ShortInput);
        assert_eq!(decode(&[0xc0; 7]).unwrap_err(), Error::ShortInput);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut buf = Vec::new();
        assert_eq!(encode(MAX + 1, &mut buf).unwrap_err(), Error::ValueTooLarge);
        assert_eq!(encode(u64::MAX, &mut buf).unwrap_err(), Error::ValueTooLarge);
        encode(MAX, &mut buf).unwrap();
        assert_eq!(decode(&buf).unwrap(), (MAX, 8));
    }

    #[test]
    fn length_boundaries() {
        assert_eq!(len(0), 1);
        assert_eq!(len(63), 1);
        assert_eq!(len(64), 2);
        assert_eq!(len(16383), 2);
        assert_eq!(len(16384), 4);
        assert_eq!(len(1_073_741_823), 4);
        assert_eq!(len(1_073_741_824), 8);
        assert_eq!(len(MAX), 8);
    }

    #[test]
    fn buf_cursor_decode_advances() {
        let mut buf = bytes::Bytes::from_static(&[0x40, 0x97, 0x25]);
        assert_eq!(decode_buf(&mut buf).unwrap(), 151);
        assert_eq!(decode_buf(&mut buf).unwrap(), 37);
        assert_eq!(decode_buf(&mut buf).unwrap_err(), Error::ShortInput);
    }

    proptest! {
        #[test]
        fn round_trip(value in 0..=MAX) {
            let mut buf = Vec::new();
            let written = encode(value, &mut buf).unwrap();
            prop_assert_eq!(written, buf.len());
            prop_assert_eq!(written, len(value));
            prop_assert_eq!(decode(&buf).unwrap(), (value, written));
        }

        #[test]
        fn encoding_is_minimal(value in 0..=MAX) {
            let form = len(value);
            // The next-smaller form cannot hold the value.
            let max_of_smaller = match form {
                1 => None,
                2 => Some((1u64 << 6) - 1),
                4 => Some((1u64 << 14) - 1),
                _ => Some((1u64 << 30) - 1),
            };
            if let Some(cap) = max_of_smaller {
                prop_assert!(value > cap);
            }
        }
    }
}
