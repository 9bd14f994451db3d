//! Variable-length integer encoding (RFC 9000 Section 16).
//!
//! QUIC encodes non-negative integers up to 2^62-1 in 1, 2, 4, or 8 bytes.
//! The two most significant bits of the first byte carry the length
//! (00/01/10/11), the remaining bits are the high bits of the big-endian
//! value.

use bytes::{BufMut, BytesMut};

use crate::error::{QuicError, Result};

/// Largest value representable as a variable-length integer.
pub const MAX: u64 = (1 << 62) - 1;

/// Number of bytes `value` occupies on the wire (1, 2, 4, or 8).
///
/// Callers must ensure `value <= MAX`; [`write`] enforces it.
pub fn encoded_size(value: u64) -> usize {
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

/// Append `value` to `buf`, returning the number of bytes written.
pub fn write(buf: &mut BytesMut, value: u64) -> Result<usize> {
    if value > MAX {
        return Err(QuicError::EncoderMisuse(format!(
            "varint value {value} exceeds 2^62-1"
        )));
    }
    let size = encoded_size(value);
    match size {
        1 => buf.put_u8(value as u8),
        2 => buf.put_u16(value as u16 | 0x4000),
        4 => buf.put_u32(value as u32 | 0x8000_0000),
        _ => buf.put_u64(value | 0xc000_0000_0000_0000),
    }
    Ok(size)
}

/// Decode a varint from the start of `buf`.
///
/// Returns the value and the number of bytes consumed, or an underflow
/// error when the buffer is shorter than the prefix demands.
pub fn read(buf: &[u8]) -> Result<(u64, usize)> {
    peek(buf, 0).ok_or_else(|| QuicError::Underflow {
        need: buf.first().map_or(1, |&b| 1usize << (b >> 6)),
        have: buf.len(),
    })
}

/// Non-consuming decode at `offset`.
///
/// Returns `None` instead of an error when bytes are missing, so this is
/// safe to call on unauthenticated, possibly truncated input.
pub fn peek(buf: &[u8], offset: usize) -> Option<(u64, usize)> {
    let &first = buf.get(offset)?;
    let len = 1usize << (first >> 6);
    let end = offset.checked_add(len)?;
    if end > buf.len() {
        return None;
    }
    let mut value = u64::from(first & 0x3f);
    for &b in &buf[offset + 1..end] {
        value = (value << 8) | u64::from(b);
    }
    Some((value, len))
}

/// Length of the varint starting at `offset`, from its prefix byte alone.
///
/// Returns `None` when `offset` is out of bounds.
pub fn peek_size(buf: &[u8], offset: usize) -> Option<usize> {
    buf.get(offset).map(|&b| 1usize << (b >> 6))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Worked examples from RFC 9000 Appendix A.1.
    const VECTORS: &[(u64, &[u8])] = &[
        (37, &[0x25]),
        (15293, &[0x7b, 0xbd]),
        (494_878_333, &[0x9d, 0x7f, 0x3e, 0x7d]),
        (
            151_288_809_941_952_652,
            &[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c],
        ),
    ];

    #[test]
    fn rfc_vectors_encode() {
        for &(value, wire) in VECTORS {
            let mut buf = BytesMut::new();
            let written = write(&mut buf, value).unwrap();
            assert_eq!(written, wire.len());
            assert_eq!(&buf[..], wire);
        }
    }

    #[test]
    fn rfc_vectors_decode() {
        for &(value, wire) in VECTORS {
            assert_eq!(read(wire).unwrap(), (value, wire.len()));
            assert_eq!(peek(wire, 0), Some((value, wire.len())));
        }
    }

    #[test]
    fn encoded_size_boundaries() {
        assert_eq!(encoded_size(0), 1);
        assert_eq!(encoded_size(63), 1);
        assert_eq!(encoded_size(64), 2);
        assert_eq!(encoded_size(16383), 2);
        assert_eq!(encoded_size(16384), 4);
        assert_eq!(encoded_size((1 << 30) - 1), 4);
        assert_eq!(encoded_size(1 << 30), 8);
        assert_eq!(encoded_size(MAX), 8);
    }

    #[test]
    fn roundtrip_boundaries() {
        for value in [0, 63, 64, 16383, 16384, (1 << 30) - 1, 1 << 30, MAX] {
            let mut buf = BytesMut::new();
            write(&mut buf, value).unwrap();
            assert_eq!(read(&buf).unwrap(), (value, buf.len()));
        }
    }

    #[test]
    fn truncated_buffer_underflows() {
        // 4-byte prefix with only 2 bytes present.
        let err = read(&[0x9d, 0x7f]).unwrap_err();
        assert_eq!(err, QuicError::Underflow { need: 4, have: 2 });
        assert_eq!(peek(&[0x9d, 0x7f], 0), None);
        assert!(read(&[]).is_err());
    }

    #[test]
    fn peek_does_not_consume_and_respects_offset() {
        let buf = [0xff, 0x25, 0x7b, 0xbd];
        assert_eq!(peek(&buf, 1), Some((37, 1)));
        assert_eq!(peek(&buf, 2), Some((15293, 2)));
        assert_eq!(peek_size(&buf, 2), Some(2));
        assert_eq!(peek_size(&buf, 4), None);
    }

    #[test]
    fn oversized_value_is_rejected() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            write(&mut buf, MAX + 1),
            Err(QuicError::EncoderMisuse(_))
        ));
        assert!(buf.is_empty());
    }
}
