//! Shared fixtures for the integration suite.

use quicwire::connection_id::ConnectionId;
use quicwire::crypto::TokenValidator;
use quicwire::crypto::testing::XorProtection;
use quicwire::packet::{DecodeContext, EncodeContext, LargestPn};

pub const TEST_KEY: [u8; 16] = [
    0x9a, 0x11, 0xe2, 0x5c, 0x03, 0x77, 0x48, 0xbe, 0xd1, 0x6a, 0x2f, 0x90, 0x05, 0xc4, 0x3b,
    0x6e,
];

/// Backend with every key space installed.
pub fn protection() -> XorProtection {
    XorProtection::new(TEST_KEY)
}

/// Accepts every address-validation token.
pub struct AcceptAll;

impl TokenValidator for AcceptAll {
    fn validate(&self, _token: &[u8], _dcid: &ConnectionId) -> bool {
        true
    }
}

/// Rejects every address-validation token.
pub struct RejectAll;

impl TokenValidator for RejectAll {
    fn validate(&self, _token: &[u8], _dcid: &ConnectionId) -> bool {
        false
    }
}

pub fn decode_ctx<'a>(crypto: &'a XorProtection) -> DecodeContext<'a> {
    DecodeContext {
        crypto,
        validator: None,
        dcid_len: 0,
        largest_pn: LargestPn::default(),
        retry_original_dcid: None,
    }
}

pub fn encode_ctx<'a>(crypto: &'a XorProtection) -> EncodeContext<'a> {
    EncodeContext {
        crypto,
        largest_acked: LargestPn::default(),
        retry_original_dcid: None,
    }
}

pub fn cid(len: usize) -> ConnectionId {
    let bytes: Vec<u8> = (0..len as u8).map(|i| 0xc1 ^ i).collect();
    ConnectionId::from_slice(&bytes).unwrap()
}
