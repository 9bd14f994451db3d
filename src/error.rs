//! Error types for the packet codec.
//!
//! The taxonomy distinguishes failures by blast radius: an [`Underflow`]
//! poisons the rest of the datagram (packet boundaries can no longer be
//! trusted), while an authentication failure is confined to the packet it
//! occurred in and coalesced packets after it may still decode.
//!
//! [`Underflow`]: QuicError::Underflow

use thiserror::Error;

/// Errors surfaced by the packet codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuicError {
    /// Not enough bytes for a structurally required field.
    #[error("buffer underflow: need at least {need} bytes, have {have}")]
    Underflow {
        /// Minimum number of bytes required.
        need: usize,
        /// Number of bytes available.
        have: usize,
    },

    /// A connection ID length field exceeds the protocol maximum of 20 bytes.
    #[error("connection ID length {0} exceeds maximum of 20")]
    InvalidCidLength(u8),

    /// AEAD tag or Retry integrity tag verification failed.
    #[error("packet authentication failed")]
    AuthenticationFailed,

    /// Structural violation found after the packet authenticated: nonzero
    /// reserved bits, an empty frame list, a malformed frame, or a malformed
    /// Version Negotiation payload.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The encoder was driven outside its contract. This indicates a bug in
    /// the calling connection code, not a peer problem.
    #[error("encoder misuse: {0}")]
    EncoderMisuse(String),

    /// The injected protection backend failed for a reason other than
    /// authentication.
    #[error("crypto backend error: {0}")]
    Crypto(String),

    /// Long header carries a version this codec was not built for.
    #[error("unsupported QUIC version {0:#010x}")]
    UnsupportedVersion(u32),
}

impl QuicError {
    /// True when the rest of the datagram must be discarded because packet
    /// boundaries can no longer be trusted.
    pub fn poisons_datagram(&self) -> bool {
        matches!(
            self,
            QuicError::Underflow { .. } | QuicError::InvalidCidLength(_)
        )
    }

    /// True when the caller may keep processing coalesced packets that
    /// follow the failed one.
    pub fn is_packet_local(&self) -> bool {
        matches!(self, QuicError::AuthenticationFailed)
    }
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, QuicError>;
