//! Packet encoder pipeline.
//!
//! The encoder mirrors the decoder but in a sizes-first discipline: every
//! factory finishes all sizing (packet-number width, padding, Length field)
//! while building the [`Packet`] value, so `size()` is final before a single
//! byte is written and length fields that precede the payload can be filled
//! in on the first pass. `encode` then writes the cleartext prefix, seals
//! the payload, and applies header protection over the fresh ciphertext.
//!
//! Contract: `encode` must be driven with the same context the factory saw
//! (same largest-acknowledged numbers, same protection backend); the
//! packet-number width is recomputed from it, never guessed.

use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::connection_id::ConnectionId;
use crate::crypto::{PacketProtection, RETRY_TAG_LEN};
use crate::error::{QuicError, Result};
use crate::frame::Frame;
use crate::packet::number::{self, LargestPn};
use crate::packet::peek::HeaderForm;
use crate::packet::types::{KeySpace, Packet, PacketNumberSpace, PacketType};
use crate::varint;
use crate::version::QuicVersion;

/// Minimum total size of an Initial packet's datagram share
/// (anti-amplification, RFC 9000 Section 14.1).
pub const MIN_INITIAL_SIZE: usize = 1200;

/// Per-call context the encoder borrows from connection state.
pub struct EncodeContext<'a> {
    /// Record-layer capability performing AEAD and header-mask derivation.
    pub crypto: &'a dyn PacketProtection,
    /// Largest packet number the peer has acknowledged, per space.
    pub largest_acked: LargestPn,
    /// Destination connection ID of the client's original Initial, required
    /// to sign Retry packets.
    pub retry_original_dcid: Option<ConnectionId>,
}

/// Encoder for one protocol version. A plain stateless value, like
/// [`Decoder`].
///
/// [`Decoder`]: crate::packet::decode::Decoder
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    version: QuicVersion,
}

impl Encoder {
    /// Create an encoder for `version`.
    pub fn new(version: QuicVersion) -> Self {
        Self { version }
    }

    /// The protocol version this encoder writes.
    pub fn version(&self) -> QuicVersion {
        self.version
    }

    /// Build an Initial packet, padding the payload so the total encoded
    /// size reaches [`MIN_INITIAL_SIZE`].
    pub fn initial(
        &self,
        dcid: ConnectionId,
        scid: ConnectionId,
        token: Option<bytes::Bytes>,
        packet_number: u64,
        frames: Vec<Frame>,
        ctx: &EncodeContext<'_>,
    ) -> Result<Packet> {
        let pn_len = number::packet_number_length(
            packet_number,
            ctx.largest_acked.get(PacketNumberSpace::Initial),
        )?;
        let token_len = token.as_ref().map_or(0, |t| t.len());
        let prefix = long_prefix_len(&dcid, &scid, Some(token_len));
        let tag_len = ctx.crypto.tag_len();

        let mut frames = frames;
        min_payload_pad(&mut frames, pn_len, ctx.crypto.sample_len());
        let mut payload_size = payload_len(&frames);
        let mut size = long_total_size(prefix, pn_len, payload_size, tag_len);
        if size < MIN_INITIAL_SIZE {
            fold_padding(&mut frames, MIN_INITIAL_SIZE - size);
            payload_size = payload_len(&frames);
            size = long_total_size(prefix, pn_len, payload_size, tag_len);
        }

        Ok(Packet::Initial {
            version: self.version,
            dcid,
            scid,
            token,
            packet_number,
            frames,
            payload_size,
            size,
        })
    }

    /// Build a 0-RTT packet.
    pub fn zero_rtt(
        &self,
        dcid: ConnectionId,
        scid: ConnectionId,
        packet_number: u64,
        frames: Vec<Frame>,
        ctx: &EncodeContext<'_>,
    ) -> Result<Packet> {
        let (frames, payload_size, size) = self.size_long(
            PacketNumberSpace::ApplicationData,
            &dcid,
            &scid,
            packet_number,
            frames,
            ctx,
        )?;
        Ok(Packet::ZeroRtt {
            version: self.version,
            dcid,
            scid,
            packet_number,
            frames,
            payload_size,
            size,
        })
    }

    /// Build a Handshake packet.
    pub fn handshake(
        &self,
        dcid: ConnectionId,
        scid: ConnectionId,
        packet_number: u64,
        frames: Vec<Frame>,
        ctx: &EncodeContext<'_>,
    ) -> Result<Packet> {
        let (frames, payload_size, size) = self.size_long(
            PacketNumberSpace::Handshake,
            &dcid,
            &scid,
            packet_number,
            frames,
            ctx,
        )?;
        Ok(Packet::Handshake {
            version: self.version,
            dcid,
            scid,
            packet_number,
            frames,
            payload_size,
            size,
        })
    }

    /// Build a 1-RTT packet. The key-phase bit stays unset until `encode`
    /// reads the current phase from the protection backend.
    pub fn one_rtt(
        &self,
        dcid: ConnectionId,
        spin: bool,
        packet_number: u64,
        frames: Vec<Frame>,
        ctx: &EncodeContext<'_>,
    ) -> Result<Packet> {
        let pn_len = number::packet_number_length(
            packet_number,
            ctx.largest_acked.get(PacketNumberSpace::ApplicationData),
        )?;
        let mut frames = frames;
        min_payload_pad(&mut frames, pn_len, ctx.crypto.sample_len());
        let payload_size = payload_len(&frames);
        let size = 1 + dcid.len() + pn_len + payload_size + ctx.crypto.tag_len();
        Ok(Packet::OneRtt {
            dcid,
            spin,
            key_phase: None,
            packet_number,
            frames,
            payload_size,
            size,
        })
    }

    /// Build a Retry packet carrying a non-empty token.
    pub fn retry(
        &self,
        dcid: ConnectionId,
        scid: ConnectionId,
        retry_token: bytes::Bytes,
    ) -> Result<Packet> {
        if retry_token.is_empty() {
            return Err(QuicError::EncoderMisuse(
                "retry token must not be empty".into(),
            ));
        }
        let size = long_prefix_len(&dcid, &scid, None) + retry_token.len() + RETRY_TAG_LEN;
        Ok(Packet::Retry {
            version: self.version,
            dcid,
            scid,
            retry_token,
            size,
        })
    }

    /// Build a Version Negotiation packet. The version list must be
    /// non-empty; its order is preserved on the wire.
    pub fn version_negotiation(
        &self,
        dcid: ConnectionId,
        scid: ConnectionId,
        supported_versions: Vec<QuicVersion>,
    ) -> Result<Packet> {
        if supported_versions.is_empty() {
            return Err(QuicError::EncoderMisuse(
                "version negotiation requires at least one version".into(),
            ));
        }
        let size = long_prefix_len(&dcid, &scid, None) + 4 * supported_versions.len();
        Ok(Packet::VersionNegotiation {
            dcid,
            scid,
            supported_versions,
            size,
        })
    }

    /// Encode `packet` into `out`, returning the number of bytes written
    /// (always equal to `packet.size()`).
    pub fn encode(
        &self,
        packet: &Packet,
        ctx: &EncodeContext<'_>,
        out: &mut BytesMut,
    ) -> Result<usize> {
        match packet {
            Packet::Initial {
                version,
                dcid,
                scid,
                token,
                packet_number,
                frames,
                size,
                ..
            } => {
                self.check_version(*version)?;
                self.encode_long(
                    PacketType::Initial,
                    dcid,
                    scid,
                    Some(token.as_ref()),
                    *packet_number,
                    frames,
                    *size,
                    ctx,
                    out,
                )
            }
            Packet::ZeroRtt {
                version,
                dcid,
                scid,
                packet_number,
                frames,
                size,
                ..
            } => {
                self.check_version(*version)?;
                self.encode_long(
                    PacketType::ZeroRtt,
                    dcid,
                    scid,
                    None,
                    *packet_number,
                    frames,
                    *size,
                    ctx,
                    out,
                )
            }
            Packet::Handshake {
                version,
                dcid,
                scid,
                packet_number,
                frames,
                size,
                ..
            } => {
                self.check_version(*version)?;
                self.encode_long(
                    PacketType::Handshake,
                    dcid,
                    scid,
                    None,
                    *packet_number,
                    frames,
                    *size,
                    ctx,
                    out,
                )
            }
            Packet::OneRtt {
                dcid,
                spin,
                packet_number,
                frames,
                size,
                ..
            } => self.encode_one_rtt(dcid, *spin, *packet_number, frames, *size, ctx, out),
            Packet::Retry {
                version,
                dcid,
                scid,
                retry_token,
                size,
            } => {
                self.check_version(*version)?;
                self.encode_retry(dcid, scid, retry_token, *size, ctx, out)
            }
            Packet::VersionNegotiation {
                dcid,
                scid,
                supported_versions,
                size,
            } => self.encode_version_negotiation(dcid, scid, supported_versions, *size, out),
        }
    }

    /// Shared sizing for the non-Initial long-header types: packet-number
    /// width, minimum-sample padding, total size.
    fn size_long(
        &self,
        space: PacketNumberSpace,
        dcid: &ConnectionId,
        scid: &ConnectionId,
        packet_number: u64,
        mut frames: Vec<Frame>,
        ctx: &EncodeContext<'_>,
    ) -> Result<(Vec<Frame>, usize, usize)> {
        let pn_len = number::packet_number_length(packet_number, ctx.largest_acked.get(space))?;
        min_payload_pad(&mut frames, pn_len, ctx.crypto.sample_len());
        let payload_size = payload_len(&frames);
        let size = long_total_size(
            long_prefix_len(dcid, scid, None),
            pn_len,
            payload_size,
            ctx.crypto.tag_len(),
        );
        Ok((frames, payload_size, size))
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_long(
        &self,
        ty: PacketType,
        dcid: &ConnectionId,
        scid: &ConnectionId,
        token: Option<Option<&bytes::Bytes>>,
        packet_number: u64,
        frames: &[Frame],
        expected_size: usize,
        ctx: &EncodeContext<'_>,
        out: &mut BytesMut,
    ) -> Result<usize> {
        let space = match ty.key_space() {
            Some(space) => space,
            None => {
                return Err(QuicError::EncoderMisuse(format!(
                    "{ty:?} has no key space"
                )));
            }
        };
        let pn_space = match ty.packet_number_space() {
            Some(space) => space,
            None => {
                return Err(QuicError::EncoderMisuse(format!(
                    "{ty:?} has no packet number space"
                )));
            }
        };
        let pn_len =
            number::packet_number_length(packet_number, ctx.largest_acked.get(pn_space))?;
        let payload_size = payload_len(frames);
        let tag_len = ctx.crypto.tag_len();
        if pn_len + payload_size < 4 + ctx.crypto.sample_len() {
            return Err(QuicError::EncoderMisuse(
                "payload too small for header protection sampling".into(),
            ));
        }
        let type_bits = self
            .version
            .long_type_bits(ty)
            .ok_or(QuicError::UnsupportedVersion(self.version.value()))?;

        let start = out.len();
        // Reserved bits (0x0c) are written as zero; header protection will
        // scramble them on the wire.
        out.put_u8(0xc0 | (type_bits << 4) | (pn_len as u8 - 1));
        out.put_slice(&self.version.to_bytes());
        put_cid(out, dcid);
        put_cid(out, scid);
        if let Some(token) = token {
            let token_len = token.map_or(0, |t| t.len());
            varint::write(out, token_len as u64)?;
            if let Some(token) = token {
                out.put_slice(token);
            }
        }
        varint::write(out, (pn_len + payload_size + tag_len) as u64)?;
        let pn_offset = out.len() - start;
        number::encode(out, packet_number, pn_len);

        let mut payload = BytesMut::with_capacity(payload_size);
        for frame in frames {
            frame.encode(&mut payload)?;
        }
        let header_end = out.len();
        let ciphertext = ctx
            .crypto
            .seal(space, packet_number, 0, &out[start..header_end], &payload)?;
        if ciphertext.len() != payload_size + tag_len {
            return Err(QuicError::Crypto(format!(
                "sealed length {} != payload {} + tag {}",
                ciphertext.len(),
                payload_size,
                tag_len
            )));
        }
        out.put_slice(&ciphertext);
        protect(out, start, pn_offset, pn_len, space, ctx.crypto, HeaderForm::Long)?;

        let written = out.len() - start;
        if written != expected_size {
            return Err(QuicError::EncoderMisuse(format!(
                "encoded {written} bytes but packet was sized at {expected_size}; \
                 encode must use the context the packet was built with"
            )));
        }
        trace!(?ty, packet_number, size = written, "encoded long-header packet");
        Ok(written)
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_one_rtt(
        &self,
        dcid: &ConnectionId,
        spin: bool,
        packet_number: u64,
        frames: &[Frame],
        expected_size: usize,
        ctx: &EncodeContext<'_>,
        out: &mut BytesMut,
    ) -> Result<usize> {
        let pn_len = number::packet_number_length(
            packet_number,
            ctx.largest_acked.get(PacketNumberSpace::ApplicationData),
        )?;
        let payload_size = payload_len(frames);
        let tag_len = ctx.crypto.tag_len();
        if pn_len + payload_size < 4 + ctx.crypto.sample_len() {
            return Err(QuicError::EncoderMisuse(
                "payload too small for header protection sampling".into(),
            ));
        }

        // The key-phase bit is read from the backend at encryption time and
        // baked into the header byte before sealing.
        let key_phase = ctx.crypto.key_phase() & 1;
        let start = out.len();
        let mut first = 0x40 | (key_phase << 2) | (pn_len as u8 - 1);
        if spin {
            first |= 0x20;
        }
        out.put_u8(first);
        out.put_slice(dcid.as_bytes());
        let pn_offset = out.len() - start;
        number::encode(out, packet_number, pn_len);

        let mut payload = BytesMut::with_capacity(payload_size);
        for frame in frames {
            frame.encode(&mut payload)?;
        }
        let header_end = out.len();
        let ciphertext = ctx.crypto.seal(
            KeySpace::OneRtt,
            packet_number,
            key_phase,
            &out[start..header_end],
            &payload,
        )?;
        if ciphertext.len() != payload_size + tag_len {
            return Err(QuicError::Crypto(format!(
                "sealed length {} != payload {} + tag {}",
                ciphertext.len(),
                payload_size,
                tag_len
            )));
        }
        out.put_slice(&ciphertext);
        protect(
            out,
            start,
            pn_offset,
            pn_len,
            KeySpace::OneRtt,
            ctx.crypto,
            HeaderForm::Short,
        )?;

        let written = out.len() - start;
        if written != expected_size {
            return Err(QuicError::EncoderMisuse(format!(
                "encoded {written} bytes but packet was sized at {expected_size}; \
                 encode must use the context the packet was built with"
            )));
        }
        trace!(packet_number, size = written, "encoded 1-RTT packet");
        Ok(written)
    }

    fn encode_retry(
        &self,
        dcid: &ConnectionId,
        scid: &ConnectionId,
        retry_token: &bytes::Bytes,
        expected_size: usize,
        ctx: &EncodeContext<'_>,
        out: &mut BytesMut,
    ) -> Result<usize> {
        let Some(original_dcid) = ctx.retry_original_dcid.as_ref() else {
            return Err(QuicError::EncoderMisuse(
                "retry encoding requires the original destination ID".into(),
            ));
        };
        let type_bits = self
            .version
            .long_type_bits(PacketType::Retry)
            .ok_or(QuicError::UnsupportedVersion(self.version.value()))?;

        let start = out.len();
        out.put_u8(0xc0 | (type_bits << 4));
        out.put_slice(&self.version.to_bytes());
        put_cid(out, dcid);
        put_cid(out, scid);
        out.put_slice(retry_token);

        let mut pseudo = Vec::with_capacity(1 + original_dcid.len() + out.len() - start);
        pseudo.push(original_dcid.len() as u8);
        pseudo.extend_from_slice(original_dcid.as_bytes());
        pseudo.extend_from_slice(&out[start..]);
        let tag = ctx.crypto.sign_retry(&pseudo)?;
        out.put_slice(&tag);

        let written = out.len() - start;
        if written != expected_size {
            return Err(QuicError::EncoderMisuse(format!(
                "encoded {written} bytes but packet was sized at {expected_size}"
            )));
        }
        trace!(token_len = retry_token.len(), "encoded Retry packet");
        Ok(written)
    }

    fn encode_version_negotiation(
        &self,
        dcid: &ConnectionId,
        scid: &ConnectionId,
        supported_versions: &[QuicVersion],
        expected_size: usize,
        out: &mut BytesMut,
    ) -> Result<usize> {
        if supported_versions.is_empty() {
            return Err(QuicError::EncoderMisuse(
                "version negotiation requires at least one version".into(),
            ));
        }
        let start = out.len();
        // Unused low bits are randomized; only the header form bit matters.
        out.put_u8(0x80 | (rand::random::<u8>() & 0x7f));
        out.put_u32(0);
        put_cid(out, dcid);
        put_cid(out, scid);
        for version in supported_versions {
            out.put_slice(&version.to_bytes());
        }
        let written = out.len() - start;
        if written != expected_size {
            return Err(QuicError::EncoderMisuse(format!(
                "encoded {written} bytes but packet was sized at {expected_size}"
            )));
        }
        trace!(
            versions = supported_versions.len(),
            "encoded Version Negotiation packet"
        );
        Ok(written)
    }

    fn check_version(&self, version: QuicVersion) -> Result<()> {
        if version != self.version {
            return Err(QuicError::EncoderMisuse(format!(
                "packet built for {version} but encoder speaks {}",
                self.version
            )));
        }
        Ok(())
    }
}

/// Apply the header-protection mask over freshly written ciphertext: low
/// header-byte bits and the packet-number field, mirroring decode.
fn protect(
    out: &mut BytesMut,
    start: usize,
    pn_offset: usize,
    pn_len: usize,
    space: KeySpace,
    crypto: &dyn PacketProtection,
    form: HeaderForm,
) -> Result<()> {
    let sample_start = start + pn_offset + 4;
    let sample_end = sample_start + crypto.sample_len();
    if sample_end > out.len() {
        return Err(QuicError::EncoderMisuse(
            "packet too short for header protection sampling".into(),
        ));
    }
    let mask = crypto.header_mask(space, &out[sample_start..sample_end])?;
    let hp_bits: u8 = match form {
        HeaderForm::Long => 0x0f,
        HeaderForm::Short => 0x1f,
    };
    out[start] ^= mask[0] & hp_bits;
    for i in 0..pn_len {
        out[start + pn_offset + i] ^= mask[1 + i];
    }
    Ok(())
}

fn put_cid(out: &mut BytesMut, cid: &ConnectionId) {
    out.put_u8(cid.len() as u8);
    out.put_slice(cid.as_bytes());
}

fn payload_len(frames: &[Frame]) -> usize {
    frames.iter().map(Frame::encoded_size).sum()
}

/// Header byte through end of SCID, plus the Initial token field when
/// `token_len` is given.
fn long_prefix_len(dcid: &ConnectionId, scid: &ConnectionId, token_len: Option<usize>) -> usize {
    1 + 4
        + 1
        + dcid.len()
        + 1
        + scid.len()
        + token_len.map_or(0, |len| varint::encoded_size(len as u64) + len)
}

fn long_total_size(prefix: usize, pn_len: usize, payload_size: usize, tag_len: usize) -> usize {
    let length_field = (pn_len + payload_size + tag_len) as u64;
    prefix + varint::encoded_size(length_field) + pn_len + payload_size + tag_len
}

/// Grow (or add) a padding frame so the packet-number field plus payload
/// covers the header-protection sample.
fn min_payload_pad(frames: &mut Vec<Frame>, pn_len: usize, sample_len: usize) {
    let deficit = (4 + sample_len).saturating_sub(pn_len + payload_len(frames));
    fold_padding(frames, deficit);
}

/// Add `extra` bytes of padding, folding into an existing padding frame
/// instead of stacking a second one.
fn fold_padding(frames: &mut Vec<Frame>, extra: usize) {
    if extra == 0 {
        return;
    }
    if let Some(Frame::Padding { len }) = frames
        .iter_mut()
        .find(|frame| matches!(frame, Frame::Padding { .. }))
    {
        *len += extra;
    } else {
        frames.push(Frame::Padding { len: extra });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_folds_into_existing_frame() {
        let mut frames = vec![Frame::Ping, Frame::Padding { len: 3 }];
        fold_padding(&mut frames, 10);
        assert_eq!(frames, vec![Frame::Ping, Frame::Padding { len: 13 }]);

        let mut frames = vec![Frame::Ping];
        fold_padding(&mut frames, 5);
        assert_eq!(frames, vec![Frame::Ping, Frame::Padding { len: 5 }]);

        let mut frames = vec![Frame::Ping];
        fold_padding(&mut frames, 0);
        assert_eq!(frames, vec![Frame::Ping]);
    }

    #[test]
    fn min_payload_padding_covers_sample() {
        let mut frames = vec![Frame::Ping];
        min_payload_pad(&mut frames, 1, 16);
        assert_eq!(payload_len(&frames) + 1, 20);

        // Already large enough: untouched.
        let mut frames = vec![Frame::Padding { len: 32 }];
        min_payload_pad(&mut frames, 2, 16);
        assert_eq!(frames, vec![Frame::Padding { len: 32 }]);
    }

    #[test]
    fn long_sizes_account_for_varint_growth() {
        // length field below 64 encodes in 1 byte, above in 2.
        let dcid = ConnectionId::from_slice(&[1; 8]).unwrap();
        let scid = ConnectionId::from_slice(&[2; 8]).unwrap();
        let prefix = long_prefix_len(&dcid, &scid, None);
        assert_eq!(prefix, 1 + 4 + 1 + 8 + 1 + 8);
        assert_eq!(long_total_size(prefix, 1, 20, 16), prefix + 1 + 37);
        assert_eq!(long_total_size(prefix, 1, 100, 16), prefix + 2 + 117);
    }
}
