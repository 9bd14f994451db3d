//! Packet type model and decoded packet values.
//!
//! Each packet type deterministically fixes its header form, packet number
//! space, key space, and whether the wire image carries an explicit Length
//! field. Decoded packets are plain immutable values; the decoder constructs
//! them once and nothing mutates them afterwards.

use bytes::Bytes;

use crate::connection_id::ConnectionId;
use crate::frame::Frame;
use crate::version::QuicVersion;

/// Independent packet-number sequences (RFC 9000 Section 12.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketNumberSpace {
    Initial,
    Handshake,
    ApplicationData,
}

/// Cryptographic key spaces tied to handshake phases (RFC 9001 Section 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySpace {
    Initial,
    Handshake,
    ZeroRtt,
    OneRtt,
    Retry,
}

/// The closed set of QUIC packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Initial packet (long header, carries an address-validation token).
    Initial,
    /// 0-RTT packet (long header, early data).
    ZeroRtt,
    /// Handshake packet (long header).
    Handshake,
    /// Retry packet (long header, unnumbered, integrity-tagged).
    Retry,
    /// 1-RTT packet (short header).
    OneRtt,
    /// Version Negotiation packet (long header form, version zero).
    VersionNegotiation,
}

impl PacketType {
    /// Whether this type uses the long header form.
    pub fn is_long_header(&self) -> bool {
        !matches!(self, PacketType::OneRtt)
    }

    /// The packet number space this type is numbered in, or `None` for the
    /// unnumbered types (Retry, Version Negotiation).
    pub fn packet_number_space(&self) -> Option<PacketNumberSpace> {
        match self {
            PacketType::Initial => Some(PacketNumberSpace::Initial),
            PacketType::Handshake => Some(PacketNumberSpace::Handshake),
            PacketType::ZeroRtt | PacketType::OneRtt => Some(PacketNumberSpace::ApplicationData),
            PacketType::Retry | PacketType::VersionNegotiation => None,
        }
    }

    /// The key space protecting this type, or `None` for Version
    /// Negotiation packets (which are unprotected).
    pub fn key_space(&self) -> Option<KeySpace> {
        match self {
            PacketType::Initial => Some(KeySpace::Initial),
            PacketType::ZeroRtt => Some(KeySpace::ZeroRtt),
            PacketType::Handshake => Some(KeySpace::Handshake),
            PacketType::Retry => Some(KeySpace::Retry),
            PacketType::OneRtt => Some(KeySpace::OneRtt),
            PacketType::VersionNegotiation => None,
        }
    }

    /// Whether the wire image carries an explicit Length field. True only
    /// for Initial, 0-RTT, and Handshake; these are the types that may be
    /// followed by further coalesced packets in the same datagram.
    pub fn has_length(&self) -> bool {
        matches!(
            self,
            PacketType::Initial | PacketType::ZeroRtt | PacketType::Handshake
        )
    }
}

/// A decoded (or to-be-encoded) QUIC packet.
///
/// Tagged union over the packet variants; field sets genuinely differ per
/// variant, so exhaustive matching replaces any shared base type. Values are
/// immutable once constructed: the decoder builds them after full
/// validation, the encoder builds them bottom-up from final frame sizes so
/// that [`size`] is known before any byte is written.
///
/// [`size`]: Packet::size
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Initial {
        version: QuicVersion,
        dcid: ConnectionId,
        scid: ConnectionId,
        /// Address-validation token; `None` when the token length was zero.
        token: Option<Bytes>,
        packet_number: u64,
        frames: Vec<Frame>,
        /// Plaintext payload size in bytes.
        payload_size: usize,
        /// Total encoded size, header through payload.
        size: usize,
    },
    ZeroRtt {
        version: QuicVersion,
        dcid: ConnectionId,
        scid: ConnectionId,
        packet_number: u64,
        frames: Vec<Frame>,
        payload_size: usize,
        size: usize,
    },
    Handshake {
        version: QuicVersion,
        dcid: ConnectionId,
        scid: ConnectionId,
        packet_number: u64,
        frames: Vec<Frame>,
        payload_size: usize,
        size: usize,
    },
    Retry {
        version: QuicVersion,
        dcid: ConnectionId,
        scid: ConnectionId,
        /// Never empty.
        retry_token: Bytes,
        size: usize,
    },
    OneRtt {
        dcid: ConnectionId,
        /// Latency spin bit as received or to be sent.
        spin: bool,
        /// Key phase bit; `None` on outgoing packets until the encoder reads
        /// the current phase from the protection backend.
        key_phase: Option<bool>,
        packet_number: u64,
        frames: Vec<Frame>,
        payload_size: usize,
        size: usize,
    },
    VersionNegotiation {
        dcid: ConnectionId,
        scid: ConnectionId,
        /// Never empty, order preserved from the wire.
        supported_versions: Vec<QuicVersion>,
        size: usize,
    },
}

impl Packet {
    /// The variant's packet type.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Initial { .. } => PacketType::Initial,
            Packet::ZeroRtt { .. } => PacketType::ZeroRtt,
            Packet::Handshake { .. } => PacketType::Handshake,
            Packet::Retry { .. } => PacketType::Retry,
            Packet::OneRtt { .. } => PacketType::OneRtt,
            Packet::VersionNegotiation { .. } => PacketType::VersionNegotiation,
        }
    }

    /// Destination connection ID.
    pub fn dcid(&self) -> &ConnectionId {
        match self {
            Packet::Initial { dcid, .. }
            | Packet::ZeroRtt { dcid, .. }
            | Packet::Handshake { dcid, .. }
            | Packet::Retry { dcid, .. }
            | Packet::OneRtt { dcid, .. }
            | Packet::VersionNegotiation { dcid, .. } => dcid,
        }
    }

    /// Source connection ID; only long-header variants carry one.
    pub fn scid(&self) -> Option<&ConnectionId> {
        match self {
            Packet::Initial { scid, .. }
            | Packet::ZeroRtt { scid, .. }
            | Packet::Handshake { scid, .. }
            | Packet::Retry { scid, .. }
            | Packet::VersionNegotiation { scid, .. } => Some(scid),
            Packet::OneRtt { .. } => None,
        }
    }

    /// Protocol version; `None` for short-header packets.
    pub fn version(&self) -> Option<QuicVersion> {
        match self {
            Packet::Initial { version, .. }
            | Packet::ZeroRtt { version, .. }
            | Packet::Handshake { version, .. }
            | Packet::Retry { version, .. } => Some(*version),
            Packet::VersionNegotiation { .. } => Some(QuicVersion::NEGOTIATION),
            Packet::OneRtt { .. } => None,
        }
    }

    /// Decoded packet number; `None` for the unnumbered variants.
    pub fn packet_number(&self) -> Option<u64> {
        match self {
            Packet::Initial { packet_number, .. }
            | Packet::ZeroRtt { packet_number, .. }
            | Packet::Handshake { packet_number, .. }
            | Packet::OneRtt { packet_number, .. } => Some(*packet_number),
            Packet::Retry { .. } | Packet::VersionNegotiation { .. } => None,
        }
    }

    /// Decoded frames; empty for the unnumbered variants.
    pub fn frames(&self) -> &[Frame] {
        match self {
            Packet::Initial { frames, .. }
            | Packet::ZeroRtt { frames, .. }
            | Packet::Handshake { frames, .. }
            | Packet::OneRtt { frames, .. } => frames,
            Packet::Retry { .. } | Packet::VersionNegotiation { .. } => &[],
        }
    }

    /// Plaintext payload size; `None` for the unnumbered variants.
    pub fn payload_size(&self) -> Option<usize> {
        match self {
            Packet::Initial { payload_size, .. }
            | Packet::ZeroRtt { payload_size, .. }
            | Packet::Handshake { payload_size, .. }
            | Packet::OneRtt { payload_size, .. } => Some(*payload_size),
            Packet::Retry { .. } | Packet::VersionNegotiation { .. } => None,
        }
    }

    /// Total encoded size in bytes, start of header through end of payload.
    pub fn size(&self) -> usize {
        match self {
            Packet::Initial { size, .. }
            | Packet::ZeroRtt { size, .. }
            | Packet::Handshake { size, .. }
            | Packet::Retry { size, .. }
            | Packet::OneRtt { size, .. }
            | Packet::VersionNegotiation { size, .. } => *size,
        }
    }

    /// Whether any decoded frame elicits an acknowledgement.
    pub fn is_ack_eliciting(&self) -> bool {
        self.frames().iter().any(Frame::is_ack_eliciting)
    }
}
