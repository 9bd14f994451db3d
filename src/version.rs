//! QUIC protocol versions and version-dependent wire details.
//!
//! The codec supports QUIC v1 (RFC 9000) and QUIC v2 (RFC 9369). The two
//! versions are wire-compatible except for the long-header packet type tag:
//! v2 rotates the tag assignment so that middleboxes cannot pattern-match on
//! v1 Initial packets. The tag tables here are therefore indexed by version,
//! never hardcoded.

use crate::packet::types::PacketType;

/// QUIC version identifier (32-bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuicVersion(u32);

impl QuicVersion {
    /// QUIC version 1 (RFC 9000).
    pub const V1: QuicVersion = QuicVersion(0x0000_0001);

    /// QUIC version 2 (RFC 9369).
    pub const V2: QuicVersion = QuicVersion(0x6b33_43cf);

    /// The reserved version value signalling a Version Negotiation packet.
    pub const NEGOTIATION: QuicVersion = QuicVersion(0);

    /// Create a version from its raw 32-bit identifier.
    pub fn new(version: u32) -> Self {
        Self(version)
    }

    /// Get the raw version number.
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Check whether this is the all-zero Version Negotiation marker.
    pub fn is_negotiation(&self) -> bool {
        self.0 == 0
    }

    /// Check if this is a reserved greasing version of the form 0x?a?a?a?a.
    pub fn is_reserved(&self) -> bool {
        (self.0 & 0x0f0f_0f0f) == 0x0a0a_0a0a
    }

    /// Check whether this codec build can decode packets of this version.
    pub fn is_supported(&self) -> bool {
        matches!(*self, QuicVersion::V1 | QuicVersion::V2)
    }

    /// Convert to wire format (big-endian bytes).
    pub fn to_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Create from wire format (big-endian bytes).
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    /// Long-header type tag (header byte bits 4-5) for `ty` under this
    /// version.
    ///
    /// Returns `None` for types that carry no tag (1-RTT, Version
    /// Negotiation) or for unsupported versions.
    pub fn long_type_bits(&self, ty: PacketType) -> Option<u8> {
        let bits = match (*self, ty) {
            (QuicVersion::V1, PacketType::Initial) => 0b00,
            (QuicVersion::V1, PacketType::ZeroRtt) => 0b01,
            (QuicVersion::V1, PacketType::Handshake) => 0b10,
            (QuicVersion::V1, PacketType::Retry) => 0b11,
            (QuicVersion::V2, PacketType::Initial) => 0b01,
            (QuicVersion::V2, PacketType::ZeroRtt) => 0b10,
            (QuicVersion::V2, PacketType::Handshake) => 0b11,
            (QuicVersion::V2, PacketType::Retry) => 0b00,
            _ => return None,
        };
        Some(bits)
    }

    /// Inverse of [`long_type_bits`]: classify a long-header tag under this
    /// version.
    ///
    /// [`long_type_bits`]: QuicVersion::long_type_bits
    pub fn long_type_from_bits(&self, bits: u8) -> Option<PacketType> {
        let ty = match (*self, bits & 0b11) {
            (QuicVersion::V1, 0b00) => PacketType::Initial,
            (QuicVersion::V1, 0b01) => PacketType::ZeroRtt,
            (QuicVersion::V1, 0b10) => PacketType::Handshake,
            (QuicVersion::V1, 0b11) => PacketType::Retry,
            (QuicVersion::V2, 0b01) => PacketType::Initial,
            (QuicVersion::V2, 0b10) => PacketType::ZeroRtt,
            (QuicVersion::V2, 0b11) => PacketType::Handshake,
            (QuicVersion::V2, 0b00) => PacketType::Retry,
            _ => return None,
        };
        Some(ty)
    }
}

impl std::fmt::Display for QuicVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            QuicVersion::V1 => write!(f, "v1"),
            QuicVersion::V2 => write!(f, "v2"),
            other => write!(f, "{:#010x}", other.0),
        }
    }
}
