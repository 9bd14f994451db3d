//! quicwire: QUIC packet codec.
//!
//! Turns raw datagram bytes into typed, validated packet values and back:
//! variable-length integers, windowed packet-number compression, header
//! protection, per-type structural rules, and coalesced-datagram
//! demultiplexing. Cryptography is injected through the
//! [`crypto::PacketProtection`] capability, so the codec runs against a real
//! TLS stack in production and a deterministic stub in tests. The codec is
//! stateless and performs no I/O; every call operates on caller-owned
//! buffers and a caller-supplied context.

// Protocol-wide value types
pub mod connection_id;
pub mod version;

// Error taxonomy
pub mod error;

// Wire primitives
pub mod varint;

// Frame codec (the packet pipeline's payload collaborator)
pub mod frame;

// Injected record-layer capabilities
pub mod crypto;

// Packet codec pipelines
pub mod packet;

// Re-export main types
pub use connection_id::ConnectionId;
pub use error::{QuicError, Result};
pub use frame::Frame;
pub use packet::{
    CoalescedPackets, DecodeContext, Decoder, EncodeContext, Encoder, HeaderForm, KeySpace,
    LargestPn, LongHeader, MIN_INITIAL_SIZE, Packet, PacketNumberSpace, PacketType,
};
pub use version::QuicVersion;

pub mod prelude {
    //! Convenience imports for codec consumers.
    pub use crate::connection_id::ConnectionId;
    pub use crate::crypto::{PacketProtection, TokenValidator};
    pub use crate::error::{QuicError, Result};
    pub use crate::frame::Frame;
    pub use crate::packet::{
        CoalescedPackets, DecodeContext, Decoder, EncodeContext, Encoder, LargestPn, Packet,
        PacketType,
    };
    pub use crate::version::QuicVersion;
}
