//! Record-layer capability traits.
//!
//! The codec never performs cryptography itself. AEAD sealing/opening,
//! header-protection mask derivation, Retry integrity tags, and
//! address-validation tokens are provided by the caller through the traits
//! here, so the codec can be driven by a real TLS stack in production and by
//! a deterministic stub in tests.

use crate::error::Result;
use crate::packet::types::KeySpace;

/// Length of the Retry integrity tag (RFC 9001 Section 5.8).
pub const RETRY_TAG_LEN: usize = 16;

/// Packet protection operations supplied by the TLS/record layer.
///
/// Implementations are keyed per [`KeySpace`]; `has_keys` reports whether a
/// space's keys have been installed yet. The decoder abstains (rather than
/// erroring) when keys for an incoming packet's space are missing, since the
/// handshake may simply not have progressed that far.
pub trait PacketProtection: Send + Sync {
    /// Whether keys for `space` are installed.
    fn has_keys(&self, space: KeySpace) -> bool;

    /// Number of ciphertext bytes sampled for header protection.
    fn sample_len(&self) -> usize;

    /// Length of the AEAD authentication tag appended to sealed payloads.
    fn tag_len(&self) -> usize;

    /// Current outgoing key phase bit for 1-RTT packets.
    fn key_phase(&self) -> u8;

    /// Seal `payload`, authenticating `header`, returning ciphertext with
    /// the tag appended.
    fn seal(
        &self,
        space: KeySpace,
        packet_number: u64,
        key_phase: u8,
        header: &[u8],
        payload: &[u8],
    ) -> Result<Vec<u8>>;

    /// Open `ciphertext` (which includes the tag), authenticating `header`.
    ///
    /// A bad tag must surface as [`QuicError::AuthenticationFailed`] so the
    /// caller can keep processing coalesced packets after the failed one.
    ///
    /// [`QuicError::AuthenticationFailed`]: crate::error::QuicError::AuthenticationFailed
    fn open(
        &self,
        space: KeySpace,
        packet_number: u64,
        key_phase: u8,
        header: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>>;

    /// Derive the 5-byte header-protection mask from a ciphertext sample of
    /// [`sample_len`] bytes.
    ///
    /// [`sample_len`]: PacketProtection::sample_len
    fn header_mask(&self, space: KeySpace, sample: &[u8]) -> Result<[u8; 5]>;

    /// Compute the Retry integrity tag over a pseudo-packet (the original
    /// destination connection ID, length-prefixed, followed by the Retry
    /// packet bytes).
    fn sign_retry(&self, pseudo_packet: &[u8]) -> Result<[u8; RETRY_TAG_LEN]>;

    /// Verify a Retry integrity tag over the same pseudo-packet layout.
    fn verify_retry(&self, pseudo_packet: &[u8], tag: &[u8; RETRY_TAG_LEN]) -> bool;
}

/// Address-validation token check for incoming Initial packets.
///
/// Rejection is deliberately silent at the codec level (the packet is
/// dropped before decryption) so an attacker cannot use token probing as a
/// decryption oracle.
pub trait TokenValidator: Send + Sync {
    /// Whether `token` is acceptable for a client using `dcid`.
    fn validate(&self, token: &[u8], dcid: &crate::connection_id::ConnectionId) -> bool;
}

pub mod testing {
    //! Deterministic protection backend for tests and benches.
    //!
    //! Provides no security whatsoever: the "AEAD" is a keyed XOR stream
    //! with an additive checksum tag. Its value is that it is fully
    //! deterministic and invertible, which makes codec failures
    //! reproducible byte-for-byte.

    use super::{PacketProtection, RETRY_TAG_LEN};
    use crate::error::{QuicError, Result};
    use crate::packet::types::KeySpace;

    /// Keyed-XOR stand-in for a real record layer.
    #[derive(Debug, Clone)]
    pub struct XorProtection {
        key: [u8; 16],
        /// Key spaces with keys "installed"; decode abstains for the rest.
        available: Vec<KeySpace>,
        key_phase: u8,
    }

    impl XorProtection {
        /// Backend with all key spaces available.
        pub fn new(key: [u8; 16]) -> Self {
            Self {
                key,
                available: vec![
                    KeySpace::Initial,
                    KeySpace::Handshake,
                    KeySpace::ZeroRtt,
                    KeySpace::OneRtt,
                    KeySpace::Retry,
                ],
                key_phase: 0,
            }
        }

        /// Backend with only the given key spaces installed.
        pub fn with_spaces(key: [u8; 16], spaces: &[KeySpace]) -> Self {
            Self {
                key,
                available: spaces.to_vec(),
                key_phase: 0,
            }
        }

        /// Set the outgoing 1-RTT key phase bit.
        pub fn set_key_phase(&mut self, phase: u8) {
            self.key_phase = phase & 1;
        }

        fn keystream_byte(&self, space: KeySpace, packet_number: u64, i: usize) -> u8 {
            self.key[i % self.key.len()]
                ^ (packet_number as u8)
                ^ ((packet_number >> 8) as u8)
                ^ (space as u8).wrapping_mul(0x35)
                ^ (i as u8).wrapping_mul(0x9d)
        }

        fn tag(&self, space: KeySpace, packet_number: u64, header: &[u8], body: &[u8]) -> Vec<u8> {
            let mut tag = vec![0u8; self.tag_len()];
            for (i, byte) in header.iter().chain(body.iter()).enumerate() {
                let slot = i % tag.len();
                tag[slot] = tag[slot]
                    .wrapping_add(*byte)
                    .wrapping_add(self.keystream_byte(space, packet_number, i));
            }
            tag
        }
    }

    impl PacketProtection for XorProtection {
        fn has_keys(&self, space: KeySpace) -> bool {
            self.available.contains(&space)
        }

        fn sample_len(&self) -> usize {
            16
        }

        fn tag_len(&self) -> usize {
            16
        }

        fn key_phase(&self) -> u8 {
            self.key_phase
        }

        fn seal(
            &self,
            space: KeySpace,
            packet_number: u64,
            key_phase: u8,
            header: &[u8],
            payload: &[u8],
        ) -> Result<Vec<u8>> {
            let mut out = Vec::with_capacity(payload.len() + self.tag_len());
            for (i, byte) in payload.iter().enumerate() {
                out.push(byte ^ self.keystream_byte(space, packet_number, i) ^ key_phase);
            }
            out.extend_from_slice(&self.tag(space, packet_number, header, payload));
            Ok(out)
        }

        fn open(
            &self,
            space: KeySpace,
            packet_number: u64,
            key_phase: u8,
            header: &[u8],
            ciphertext: &[u8],
        ) -> Result<Vec<u8>> {
            let tag_len = self.tag_len();
            if ciphertext.len() < tag_len {
                return Err(QuicError::AuthenticationFailed);
            }
            let (body, tag) = ciphertext.split_at(ciphertext.len() - tag_len);
            let mut plain = Vec::with_capacity(body.len());
            for (i, byte) in body.iter().enumerate() {
                plain.push(byte ^ self.keystream_byte(space, packet_number, i) ^ key_phase);
            }
            if self.tag(space, packet_number, header, &plain) != tag {
                return Err(QuicError::AuthenticationFailed);
            }
            Ok(plain)
        }

        fn header_mask(&self, space: KeySpace, sample: &[u8]) -> Result<[u8; 5]> {
            if sample.len() < self.sample_len() {
                return Err(QuicError::Crypto(format!(
                    "header protection sample too short: {} < {}",
                    sample.len(),
                    self.sample_len()
                )));
            }
            let mut mask = [0u8; 5];
            for (i, slot) in mask.iter_mut().enumerate() {
                *slot = sample[i] ^ sample[i + 5] ^ self.key[i] ^ (space as u8).wrapping_mul(0x4f);
            }
            Ok(mask)
        }

        fn sign_retry(&self, pseudo_packet: &[u8]) -> Result<[u8; RETRY_TAG_LEN]> {
            let mut tag = [0u8; RETRY_TAG_LEN];
            for (i, byte) in pseudo_packet.iter().enumerate() {
                let slot = i % RETRY_TAG_LEN;
                tag[slot] = tag[slot]
                    .wrapping_add(*byte)
                    .wrapping_add(self.key[i % self.key.len()]);
            }
            Ok(tag)
        }

        fn verify_retry(&self, pseudo_packet: &[u8], tag: &[u8; RETRY_TAG_LEN]) -> bool {
            self.sign_retry(pseudo_packet)
                .map(|expected| &expected == tag)
                .unwrap_or(false)
        }
    }
}
