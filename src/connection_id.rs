//! QUIC connection identifiers.
//!
//! A connection ID is an opaque byte string of 0 to 20 bytes chosen by the
//! endpoint that expects to route on it. The codec treats it as a value
//! type; rotation, retirement, and stateless reset tokens are connection
//! management concerns outside this crate.

use bytes::Bytes;

/// Maximum length of a connection ID (RFC 9000 Section 17.2).
pub const MAX_CONNECTION_ID_LENGTH: usize = 20;

/// Default length for locally generated connection IDs.
pub const DEFAULT_CONNECTION_ID_LENGTH: usize = 8;

/// An opaque connection identifier, 0-20 bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    data: Bytes,
}

impl ConnectionId {
    /// Create a connection ID from a byte slice.
    ///
    /// Returns `None` when the slice exceeds the 20-byte protocol maximum.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() > MAX_CONNECTION_ID_LENGTH {
            return None;
        }
        Some(Self {
            data: Bytes::copy_from_slice(data),
        })
    }

    /// Create a zero-length connection ID.
    pub fn empty() -> Self {
        Self { data: Bytes::new() }
    }

    /// Generate a random connection ID of the given length.
    ///
    /// Returns `None` when `length` exceeds the protocol maximum.
    pub fn random(length: usize) -> Option<Self> {
        if length > MAX_CONNECTION_ID_LENGTH {
            return None;
        }
        let mut data = vec![0u8; length];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut data);
        Some(Self {
            data: Bytes::from(data),
        })
    }

    /// Get the connection ID as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get the length of the connection ID.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the connection ID is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionId({})", hex::encode(&self.data))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlong_ids() {
        assert!(ConnectionId::from_slice(&[0u8; 21]).is_none());
        assert!(ConnectionId::random(21).is_none());
        assert!(ConnectionId::from_slice(&[0u8; 20]).is_some());
    }

    #[test]
    fn empty_id() {
        let cid = ConnectionId::empty();
        assert!(cid.is_empty());
        assert_eq!(cid.len(), 0);
        assert_eq!(cid, ConnectionId::from_slice(&[]).unwrap());
    }

    #[test]
    fn random_ids_have_requested_length() {
        let cid = ConnectionId::random(DEFAULT_CONNECTION_ID_LENGTH).unwrap();
        assert_eq!(cid.len(), DEFAULT_CONNECTION_ID_LENGTH);
    }

    #[test]
    fn debug_renders_hex() {
        let cid = ConnectionId::from_slice(&[0xab, 0xcd]).unwrap();
        assert_eq!(format!("{cid:?}"), "ConnectionId(abcd)");
    }
}
