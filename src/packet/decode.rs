//! Packet decoder pipeline.
//!
//! Decoding is a linear pass per packet: classify, read the cleartext
//! prefix, remove header protection, recover the packet number, decrypt,
//! then validate what only authenticated bytes can prove (reserved bits,
//! frame structure). Retry and Version Negotiation packets skip the
//! protected stages entirely.
//!
//! The input buffer is never mutated: header protection is undone into a
//! scratch header (which doubles as the AEAD associated data), so a failure
//! at any stage cannot leave a half-unmasked datagram behind.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::connection_id::{ConnectionId, MAX_CONNECTION_ID_LENGTH};
use crate::crypto::{PacketProtection, RETRY_TAG_LEN, TokenValidator};
use crate::error::{QuicError, Result};
use crate::frame;
use crate::packet::number::{self, LargestPn};
use crate::packet::peek::{self, HeaderForm};
use crate::packet::types::{KeySpace, Packet, PacketType};
use crate::varint;
use crate::version::QuicVersion;

/// Per-call context the decoder borrows from connection state.
pub struct DecodeContext<'a> {
    /// Record-layer capability performing AEAD and header-mask derivation.
    pub crypto: &'a dyn PacketProtection,
    /// Address-validation token check for Initial packets; `None` accepts
    /// every token.
    pub validator: Option<&'a dyn TokenValidator>,
    /// Length of the connection IDs this endpoint issues, needed to locate
    /// the packet number in short headers.
    pub dcid_len: usize,
    /// Largest successfully processed packet number per space.
    pub largest_pn: LargestPn,
    /// Destination connection ID of the original Initial, required to
    /// verify Retry integrity tags.
    pub retry_original_dcid: Option<ConnectionId>,
}

/// Header fields recovered by undoing header protection into scratch space.
struct Unprotected {
    first_byte: u8,
    packet_number: u64,
    pn_len: usize,
    /// The cleartext header image, used as AEAD associated data.
    aad: Vec<u8>,
}

/// Decoder for one protocol version.
///
/// A plain value; construct one per supported version and keep it wherever
/// the connection code finds convenient. It holds no mutable state.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    version: QuicVersion,
}

impl Decoder {
    /// Create a decoder for `version`.
    pub fn new(version: QuicVersion) -> Self {
        Self { version }
    }

    /// The protocol version this decoder parses.
    pub fn version(&self) -> QuicVersion {
        self.version
    }

    /// Decode one packet from `packet` (a slice covering exactly one
    /// packet, as produced by the demultiplexer).
    ///
    /// Returns `Ok(None)` when there is nothing to do rather than an error:
    /// the packet belongs to a different version, keys for its space have
    /// not arrived yet, or its address-validation token was rejected. The
    /// caller decides whether to buffer, ignore, or count such datagrams.
    pub fn decode(&self, packet: &[u8], ctx: &DecodeContext<'_>) -> Result<Option<Packet>> {
        let Some(ty) = peek::peek_packet_type(packet, 0, self.version) else {
            trace!(
                version = %self.version,
                len = packet.len(),
                "skipping unclassifiable packet"
            );
            return Ok(None);
        };
        match ty {
            PacketType::VersionNegotiation => self.decode_version_negotiation(packet).map(Some),
            PacketType::Retry => self.decode_retry(packet, ctx),
            PacketType::Initial | PacketType::ZeroRtt | PacketType::Handshake => {
                self.decode_long(ty, packet, ctx)
            }
            PacketType::OneRtt => self.decode_short(packet, ctx),
        }
    }

    fn decode_long(
        &self,
        ty: PacketType,
        packet: &[u8],
        ctx: &DecodeContext<'_>,
    ) -> Result<Option<Packet>> {
        let space = match ty.key_space() {
            Some(space) => space,
            None => return Err(QuicError::ProtocolViolation("packet type without key space")),
        };
        if !ctx.crypto.has_keys(space) {
            trace!(?ty, "keys not yet available, deferring packet");
            return Ok(None);
        }

        // Cleartext prefix: header byte and version were validated during
        // classification.
        let (dcid, after_dcid) = read_cid(packet, 5)?;
        let (scid, mut off) = read_cid(packet, after_dcid)?;

        let mut token = None;
        if ty == PacketType::Initial {
            let (token_len, consumed) = read_varint_at(packet, off)?;
            off += consumed;
            let token_len = usize::try_from(token_len).map_err(|_| QuicError::Underflow {
                need: usize::MAX,
                have: packet.len(),
            })?;
            let end = off.checked_add(token_len).ok_or(QuicError::Underflow {
                need: usize::MAX,
                have: packet.len(),
            })?;
            let token_bytes = packet.get(off..end).ok_or(QuicError::Underflow {
                need: end,
                have: packet.len(),
            })?;
            // Token verification runs before any decryption is attempted; a
            // rejected token drops the packet without surfacing an error so
            // probing tokens cannot become a decryption oracle.
            if let Some(validator) = ctx.validator {
                if !validator.validate(token_bytes, &dcid) {
                    debug!(dcid = %dcid, "dropping Initial packet with rejected token");
                    return Ok(None);
                }
            }
            if token_len > 0 {
                token = Some(Bytes::copy_from_slice(token_bytes));
            }
            off = end;
        }

        let (length, consumed) = read_varint_at(packet, off)?;
        off += consumed;
        let pn_offset = off;
        let length = usize::try_from(length).map_err(|_| QuicError::Underflow {
            need: usize::MAX,
            have: packet.len(),
        })?;
        let end = pn_offset.checked_add(length).ok_or(QuicError::Underflow {
            need: usize::MAX,
            have: packet.len(),
        })?;
        if end > packet.len() {
            return Err(QuicError::Underflow {
                need: end,
                have: packet.len(),
            });
        }
        // Bound every later read (header-protection sample included) to this
        // packet; coalesced successors must not leak into the sample.
        let packet = &packet[..end];

        let largest = spacewise_largest(ctx, ty);
        let up = self.unprotect(packet, pn_offset, space, largest, ctx.crypto, HeaderForm::Long)?;
        let ciphertext = packet
            .get(pn_offset + up.pn_len..)
            .ok_or(QuicError::Underflow {
                need: pn_offset + up.pn_len,
                have: packet.len(),
            })?;

        let plain = ctx
            .crypto
            .open(space, up.packet_number, 0, &up.aad, ciphertext)?;

        // Only authenticated bytes may produce protocol errors.
        if up.first_byte & 0x0c != 0 {
            return Err(QuicError::ProtocolViolation("nonzero reserved header bits"));
        }
        let frames = frame::decode_all(&plain)?;
        if frames.is_empty() {
            return Err(QuicError::ProtocolViolation("packet contains no frames"));
        }

        trace!(
            ?ty,
            packet_number = up.packet_number,
            size = end,
            frames = frames.len(),
            "decoded long-header packet"
        );
        let payload_size = plain.len();
        let packet = match ty {
            PacketType::Initial => Packet::Initial {
                version: self.version,
                dcid,
                scid,
                token,
                packet_number: up.packet_number,
                frames,
                payload_size,
                size: end,
            },
            PacketType::ZeroRtt => Packet::ZeroRtt {
                version: self.version,
                dcid,
                scid,
                packet_number: up.packet_number,
                frames,
                payload_size,
                size: end,
            },
            _ => Packet::Handshake {
                version: self.version,
                dcid,
                scid,
                packet_number: up.packet_number,
                frames,
                payload_size,
                size: end,
            },
        };
        Ok(Some(packet))
    }

    fn decode_short(&self, packet: &[u8], ctx: &DecodeContext<'_>) -> Result<Option<Packet>> {
        if !ctx.crypto.has_keys(KeySpace::OneRtt) {
            trace!("1-RTT keys not yet available, deferring packet");
            return Ok(None);
        }
        if ctx.dcid_len > MAX_CONNECTION_ID_LENGTH {
            return Err(QuicError::InvalidCidLength(ctx.dcid_len as u8));
        }
        let dcid_end = 1 + ctx.dcid_len;
        let dcid_bytes = packet.get(1..dcid_end).ok_or(QuicError::Underflow {
            need: dcid_end,
            have: packet.len(),
        })?;
        let dcid = ConnectionId::from_slice(dcid_bytes)
            .ok_or(QuicError::InvalidCidLength(ctx.dcid_len as u8))?;

        // The spin bit sits above the protected region and is readable now.
        let spin = packet[0] & 0x20 != 0;

        let largest = ctx.largest_pn.application;
        let up = self.unprotect(
            packet,
            dcid_end,
            KeySpace::OneRtt,
            largest,
            ctx.crypto,
            HeaderForm::Short,
        )?;
        let key_phase = up.first_byte & 0x04 != 0;
        let ciphertext = packet
            .get(dcid_end + up.pn_len..)
            .ok_or(QuicError::Underflow {
                need: dcid_end + up.pn_len,
                have: packet.len(),
            })?;

        let plain = ctx.crypto.open(
            KeySpace::OneRtt,
            up.packet_number,
            u8::from(key_phase),
            &up.aad,
            ciphertext,
        )?;

        if up.first_byte & 0x18 != 0 {
            return Err(QuicError::ProtocolViolation("nonzero reserved header bits"));
        }
        let frames = frame::decode_all(&plain)?;
        if frames.is_empty() {
            return Err(QuicError::ProtocolViolation("packet contains no frames"));
        }

        trace!(
            packet_number = up.packet_number,
            size = packet.len(),
            "decoded 1-RTT packet"
        );
        Ok(Some(Packet::OneRtt {
            dcid,
            spin,
            key_phase: Some(key_phase),
            packet_number: up.packet_number,
            frames,
            payload_size: plain.len(),
            size: packet.len(),
        }))
    }

    fn decode_retry(&self, packet: &[u8], ctx: &DecodeContext<'_>) -> Result<Option<Packet>> {
        let (dcid, after_dcid) = read_cid(packet, 5)?;
        let (scid, off) = read_cid(packet, after_dcid)?;

        let tag_start = packet
            .len()
            .checked_sub(RETRY_TAG_LEN)
            .filter(|&start| start >= off)
            .ok_or(QuicError::Underflow {
                need: off + RETRY_TAG_LEN,
                have: packet.len(),
            })?;
        let retry_token = &packet[off..tag_start];
        if retry_token.is_empty() {
            return Err(QuicError::ProtocolViolation("empty retry token"));
        }

        let Some(original_dcid) = ctx.retry_original_dcid.as_ref() else {
            debug!("dropping Retry packet: no original destination ID to verify against");
            return Ok(None);
        };

        // Integrity tag covers the pseudo-packet: length-prefixed original
        // DCID followed by the Retry packet up to the tag (RFC 9001 5.8).
        let mut pseudo = Vec::with_capacity(1 + original_dcid.len() + tag_start);
        pseudo.push(original_dcid.len() as u8);
        pseudo.extend_from_slice(original_dcid.as_bytes());
        pseudo.extend_from_slice(&packet[..tag_start]);

        let mut tag = [0u8; RETRY_TAG_LEN];
        tag.copy_from_slice(&packet[tag_start..]);
        if !ctx.crypto.verify_retry(&pseudo, &tag) {
            return Err(QuicError::AuthenticationFailed);
        }

        trace!(token_len = retry_token.len(), "decoded Retry packet");
        Ok(Some(Packet::Retry {
            version: self.version,
            dcid,
            scid,
            retry_token: Bytes::copy_from_slice(retry_token),
            size: packet.len(),
        }))
    }

    fn decode_version_negotiation(&self, packet: &[u8]) -> Result<Packet> {
        let (dcid, after_dcid) = read_cid(packet, 5)?;
        let (scid, off) = read_cid(packet, after_dcid)?;

        let rest = &packet[off..];
        if rest.is_empty() || rest.len() % 4 != 0 {
            return Err(QuicError::ProtocolViolation(
                "malformed version negotiation payload",
            ));
        }
        let supported_versions = rest
            .chunks_exact(4)
            .map(|chunk| QuicVersion::from_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect::<Vec<_>>();

        trace!(
            versions = supported_versions.len(),
            "decoded Version Negotiation packet"
        );
        Ok(Packet::VersionNegotiation {
            dcid,
            scid,
            supported_versions,
            size: packet.len(),
        })
    }

    /// Undo header protection into scratch space.
    ///
    /// Samples `sample_len` ciphertext bytes starting 4 bytes past the start
    /// of the packet-number field, asks the capability for the mask, and
    /// XORs it off the header byte (low 4 bits for long headers, 5 for
    /// short) and the packet-number field whose true length only the
    /// unmasked header byte reveals.
    fn unprotect(
        &self,
        packet: &[u8],
        pn_offset: usize,
        space: KeySpace,
        largest: Option<u64>,
        crypto: &dyn PacketProtection,
        form: HeaderForm,
    ) -> Result<Unprotected> {
        let sample_len = crypto.sample_len();
        let sample_start = pn_offset + 4;
        let sample = packet
            .get(sample_start..sample_start + sample_len)
            .ok_or(QuicError::Underflow {
                need: sample_start + sample_len,
                have: packet.len(),
            })?;
        let mask = crypto.header_mask(space, sample)?;

        let hp_bits: u8 = match form {
            HeaderForm::Long => 0x0f,
            HeaderForm::Short => 0x1f,
        };
        let first_byte = packet[0] ^ (mask[0] & hp_bits);
        let pn_len = usize::from(first_byte & 0x03) + 1;
        if pn_offset + pn_len > packet.len() {
            return Err(QuicError::Underflow {
                need: pn_offset + pn_len,
                have: packet.len(),
            });
        }

        let mut aad = Vec::with_capacity(pn_offset + pn_len);
        aad.push(first_byte);
        aad.extend_from_slice(&packet[1..pn_offset]);
        let mut truncated = 0u64;
        for i in 0..pn_len {
            let byte = packet[pn_offset + i] ^ mask[1 + i];
            truncated = (truncated << 8) | u64::from(byte);
            aad.push(byte);
        }

        Ok(Unprotected {
            first_byte,
            packet_number: number::decode(largest, truncated, pn_len),
            pn_len,
            aad,
        })
    }
}

fn spacewise_largest(ctx: &DecodeContext<'_>, ty: PacketType) -> Option<u64> {
    ty.packet_number_space()
        .and_then(|space| ctx.largest_pn.get(space))
}

/// Read a length-prefixed connection ID, failing (rather than abstaining,
/// unlike the peek layer) so the caller learns the datagram is poisoned.
fn read_cid(packet: &[u8], offset: usize) -> Result<(ConnectionId, usize)> {
    let &len = packet.get(offset).ok_or(QuicError::Underflow {
        need: offset + 1,
        have: packet.len(),
    })?;
    if usize::from(len) > MAX_CONNECTION_ID_LENGTH {
        return Err(QuicError::InvalidCidLength(len));
    }
    let start = offset + 1;
    let end = start + usize::from(len);
    let bytes = packet.get(start..end).ok_or(QuicError::Underflow {
        need: end,
        have: packet.len(),
    })?;
    let cid = ConnectionId::from_slice(bytes).ok_or(QuicError::InvalidCidLength(len))?;
    Ok((cid, end))
}

fn read_varint_at(packet: &[u8], offset: usize) -> Result<(u64, usize)> {
    varint::peek(packet, offset).ok_or_else(|| QuicError::Underflow {
        need: offset + varint::peek_size(packet, offset).unwrap_or(1),
        have: packet.len(),
    })
}
