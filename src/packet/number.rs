//! Packet number truncation and reconstruction (RFC 9000 Section 17.1,
//! Appendix A).
//!
//! Packet numbers are monotonic 62-bit values but travel in 1-4 byte
//! truncated form. The send side truncates to the minimum width that the
//! receiver can disambiguate given what it has acknowledged; the receive
//! side reconstructs the full value by picking the candidate closest to the
//! next expected number.
//!
//! The asymmetry is deliberate and part of the contract: [`encode`] performs
//! plain truncation and trusts its `num_bytes` argument, which must always
//! come from [`packet_number_length`] — never guessed independently.

use bytes::{BufMut, BytesMut};

use crate::error::{QuicError, Result};
use crate::packet::types::PacketNumberSpace;

/// Largest packet number observed per space, as read from packet-number
/// bookkeeping. On the decode side this is the largest successfully
/// processed number; on the encode side, the largest the peer has
/// acknowledged. `None` means no packet yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LargestPn {
    pub initial: Option<u64>,
    pub handshake: Option<u64>,
    pub application: Option<u64>,
}

impl LargestPn {
    /// Look up the value for `space`.
    pub fn get(&self, space: PacketNumberSpace) -> Option<u64> {
        match space {
            PacketNumberSpace::Initial => self.initial,
            PacketNumberSpace::Handshake => self.handshake,
            PacketNumberSpace::ApplicationData => self.application,
        }
    }

    /// Copy with `space` set to `pn`.
    pub fn with(mut self, space: PacketNumberSpace, pn: u64) -> Self {
        match space {
            PacketNumberSpace::Initial => self.initial = Some(pn),
            PacketNumberSpace::Handshake => self.handshake = Some(pn),
            PacketNumberSpace::ApplicationData => self.application = Some(pn),
        }
        self
    }
}

/// Minimum number of bytes needed to encode `full_pn` so the receiver can
/// recover it, given the largest packet number the peer has acknowledged
/// (RFC 9000 Appendix A.2: one spare bit on top of the unacknowledged
/// range).
///
/// Errors when more than 4 bytes would be required; correct connection code
/// never lets the unacknowledged range grow that far.
pub fn packet_number_length(full_pn: u64, largest_acked: Option<u64>) -> Result<usize> {
    let num_unacked = match largest_acked {
        None => full_pn + 1,
        Some(acked) => full_pn.checked_sub(acked).ok_or_else(|| {
            QuicError::EncoderMisuse(format!(
                "packet number {full_pn} not larger than acknowledged {acked}"
            ))
        })?,
    };
    let min_bits = (64 - num_unacked.leading_zeros()) as usize + 1;
    let num_bytes = min_bits.div_ceil(8);
    if num_bytes > 4 {
        return Err(QuicError::EncoderMisuse(format!(
            "packet number {full_pn} needs {num_bytes} bytes (largest acked {largest_acked:?})"
        )));
    }
    Ok(num_bytes)
}

/// Append the low `num_bytes` bytes of `full_pn`, big-endian.
///
/// Plain truncation: `num_bytes` must have been produced by
/// [`packet_number_length`] for this packet number.
pub fn encode(buf: &mut BytesMut, full_pn: u64, num_bytes: usize) {
    debug_assert!((1..=4).contains(&num_bytes));
    let bytes = full_pn.to_be_bytes();
    buf.put_slice(&bytes[8 - num_bytes..]);
}

/// Reconstruct a full packet number from its truncated form (RFC 9000
/// Appendix A.3).
///
/// `largest_pn` is the largest packet number processed so far in the
/// packet's number space (`None` before any). The result is the unique
/// value in `(expected - win/2, expected + win/2]` whose low bits match
/// `truncated`, where `expected = largest_pn + 1` and `win = 2^(8 *
/// num_bytes)`.
pub fn decode(largest_pn: Option<u64>, truncated: u64, num_bytes: usize) -> u64 {
    debug_assert!((1..=4).contains(&num_bytes));
    let expected = largest_pn.map_or(0, |pn| pn + 1);
    let pn_win = 1u64 << (8 * num_bytes);
    let pn_hwin = pn_win / 2;
    let pn_mask = pn_win - 1;

    let candidate = (expected & !pn_mask) | truncated;
    if candidate + pn_hwin <= expected && candidate < (1u64 << 62) - pn_win {
        candidate + pn_win
    } else if candidate > expected + pn_hwin && candidate >= pn_win {
        candidate - pn_win
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(full_pn: u64, largest: Option<u64>) -> u64 {
        let num_bytes = packet_number_length(full_pn, largest).unwrap();
        let mut buf = BytesMut::new();
        encode(&mut buf, full_pn, num_bytes);
        assert_eq!(buf.len(), num_bytes);
        let mut truncated = 0u64;
        for &b in buf.iter() {
            truncated = (truncated << 8) | u64::from(b);
        }
        decode(largest, truncated, num_bytes)
    }

    #[test]
    fn length_grows_with_unacked_range() {
        assert_eq!(packet_number_length(0, None).unwrap(), 1);
        assert_eq!(packet_number_length(100, Some(99)).unwrap(), 1);
        assert_eq!(packet_number_length(0x7f, Some(0)).unwrap(), 1);
        assert_eq!(packet_number_length(0x80, Some(0)).unwrap(), 2);
        assert_eq!(packet_number_length(0x7fff, Some(0)).unwrap(), 2);
        assert_eq!(packet_number_length(0x8000, Some(0)).unwrap(), 3);
        assert_eq!(packet_number_length(0x7f_ffff, Some(0)).unwrap(), 3);
        assert_eq!(packet_number_length(0x80_0000, Some(0)).unwrap(), 4);
    }

    #[test]
    fn length_overflow_is_misuse() {
        assert!(matches!(
            packet_number_length(0x8000_0000, Some(0)),
            Err(QuicError::EncoderMisuse(_))
        ));
        assert!(matches!(
            packet_number_length(5, Some(9)),
            Err(QuicError::EncoderMisuse(_))
        ));
    }

    #[test]
    fn rfc_worked_example() {
        // RFC 9000 Appendix A.3: largest 0xa82f30ea, truncated 0x9b32 in
        // two bytes decodes to 0xa82f9b32.
        assert_eq!(decode(Some(0xa82f_30ea), 0x9b32, 2), 0xa82f_9b32);
    }

    #[test]
    fn roundtrip_sweep() {
        // Sweep largest values across magnitudes, encoding packets a
        // plausible distance ahead.
        let largests: &[u64] = &[
            0,
            1,
            0xff,
            0x100,
            0xffff,
            0x10000,
            0xa82f_30ea,
            1 << 30,
            1 << 40,
        ];
        for &largest in largests {
            for delta in [1u64, 2, 50, 0x7f, 0x80, 0xff, 0x7fff, 0x7f_ffff] {
                let full = largest + delta;
                assert_eq!(
                    roundtrip(full, Some(largest)),
                    full,
                    "largest={largest:#x} full={full:#x}"
                );
            }
        }
    }

    #[test]
    fn roundtrip_with_nothing_acked() {
        for full in [0u64, 1, 0x7e, 0x3fff, 0x3f_ffff] {
            assert_eq!(roundtrip(full, None), full, "full={full:#x}");
        }
    }

    #[test]
    fn window_wraps_both_directions() {
        // Candidate below the window: expected 0x1000, truncated low byte
        // from a packet just above the wrap point.
        assert_eq!(decode(Some(0xfff), 0x02, 1), 0x1002);
        // Reordered packet from before the window start.
        assert_eq!(decode(Some(0x100), 0xfe, 1), 0xfe);
    }

    #[test]
    fn largest_pn_lookup() {
        let l = LargestPn::default()
            .with(PacketNumberSpace::Initial, 3)
            .with(PacketNumberSpace::ApplicationData, 90);
        assert_eq!(l.get(PacketNumberSpace::Initial), Some(3));
        assert_eq!(l.get(PacketNumberSpace::Handshake), None);
        assert_eq!(l.get(PacketNumberSpace::ApplicationData), Some(90));
    }
}
