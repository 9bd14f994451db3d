//! QUIC frame codec.
//!
//! The packet codec treats frames as an opaque ordered sequence: it needs to
//! decode a decrypted payload into frames, encode a frame list into a
//! payload, and ask each frame for its wire size and ack-eliciting flag.
//! This module implements the subset of RFC 9000 Section 19 the packet
//! pipeline exercises; a full connection stack would extend the enum, not
//! change its shape.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{QuicError, Result};
use crate::varint;

/// A single QUIC frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A run of PADDING bytes. Consecutive padding bytes on the wire decode
    /// into one frame carrying the run length.
    Padding { len: usize },
    /// PING (0x01).
    Ping,
    /// ACK (0x02) with a single range; ECN counts are not carried.
    Ack {
        largest: u64,
        delay: u64,
        first_range: u64,
    },
    /// CRYPTO (0x06).
    Crypto { offset: u64, data: Bytes },
    /// STREAM (0x08-0x0f).
    Stream {
        id: u64,
        offset: u64,
        fin: bool,
        data: Bytes,
    },
    /// CONNECTION_CLOSE (0x1c, transport flavour).
    ConnectionClose {
        error_code: u64,
        frame_type: u64,
        reason: String,
    },
    /// HANDSHAKE_DONE (0x1e).
    HandshakeDone,
}

impl Frame {
    /// Exact number of bytes this frame occupies on the wire.
    pub fn encoded_size(&self) -> usize {
        match self {
            Frame::Padding { len } => *len,
            Frame::Ping => 1,
            Frame::Ack {
                largest,
                delay,
                first_range,
            } => {
                1 + varint::encoded_size(*largest)
                    + varint::encoded_size(*delay)
                    + varint::encoded_size(0)
                    + varint::encoded_size(*first_range)
            }
            Frame::Crypto { offset, data } => {
                1 + varint::encoded_size(*offset)
                    + varint::encoded_size(data.len() as u64)
                    + data.len()
            }
            Frame::Stream {
                id, offset, data, ..
            } => {
                1 + varint::encoded_size(*id)
                    + if *offset > 0 {
                        varint::encoded_size(*offset)
                    } else {
                        0
                    }
                    + varint::encoded_size(data.len() as u64)
                    + data.len()
            }
            Frame::ConnectionClose {
                error_code,
                frame_type,
                reason,
            } => {
                1 + varint::encoded_size(*error_code)
                    + varint::encoded_size(*frame_type)
                    + varint::encoded_size(reason.len() as u64)
                    + reason.len()
            }
            Frame::HandshakeDone => 1,
        }
    }

    /// Whether receipt of this frame must elicit an acknowledgement
    /// (RFC 9002 Section 2: everything except ACK, PADDING, and
    /// CONNECTION_CLOSE).
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(
            self,
            Frame::Padding { .. } | Frame::Ack { .. } | Frame::ConnectionClose { .. }
        )
    }

    /// Append this frame's wire image to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            Frame::Padding { len } => {
                buf.put_bytes(0x00, *len);
            }
            Frame::Ping => buf.put_u8(0x01),
            Frame::Ack {
                largest,
                delay,
                first_range,
            } => {
                buf.put_u8(0x02);
                varint::write(buf, *largest)?;
                varint::write(buf, *delay)?;
                varint::write(buf, 0)?;
                varint::write(buf, *first_range)?;
            }
            Frame::Crypto { offset, data } => {
                buf.put_u8(0x06);
                varint::write(buf, *offset)?;
                varint::write(buf, data.len() as u64)?;
                buf.put_slice(data);
            }
            Frame::Stream {
                id,
                offset,
                fin,
                data,
            } => {
                let mut ty = 0x08 | 0x02; // LEN bit always set on encode
                if *offset > 0 {
                    ty |= 0x04;
                }
                if *fin {
                    ty |= 0x01;
                }
                buf.put_u8(ty);
                varint::write(buf, *id)?;
                if *offset > 0 {
                    varint::write(buf, *offset)?;
                }
                varint::write(buf, data.len() as u64)?;
                buf.put_slice(data);
            }
            Frame::ConnectionClose {
                error_code,
                frame_type,
                reason,
            } => {
                buf.put_u8(0x1c);
                varint::write(buf, *error_code)?;
                varint::write(buf, *frame_type)?;
                varint::write(buf, reason.len() as u64)?;
                buf.put_slice(reason.as_bytes());
            }
            Frame::HandshakeDone => buf.put_u8(0x1e),
        }
        Ok(())
    }
}

/// Decode an entire decrypted payload into its frame sequence.
///
/// The payload is already authenticated, so malformed contents are protocol
/// violations, never underflows. Every byte must belong to a frame; an
/// unknown frame type is rejected.
pub fn decode_all(payload: &[u8]) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos < payload.len() {
        let ty = payload[pos];
        match ty {
            0x00 => {
                let start = pos;
                while pos < payload.len() && payload[pos] == 0x00 {
                    pos += 1;
                }
                frames.push(Frame::Padding { len: pos - start });
            }
            0x01 => {
                frames.push(Frame::Ping);
                pos += 1;
            }
            0x02 => {
                pos += 1;
                let largest = read_field(payload, &mut pos)?;
                let delay = read_field(payload, &mut pos)?;
                let range_count = read_field(payload, &mut pos)?;
                let first_range = read_field(payload, &mut pos)?;
                if range_count != 0 {
                    return Err(QuicError::ProtocolViolation(
                        "ACK frame with multiple ranges not supported",
                    ));
                }
                frames.push(Frame::Ack {
                    largest,
                    delay,
                    first_range,
                });
            }
            0x06 => {
                pos += 1;
                let offset = read_field(payload, &mut pos)?;
                let len = read_field(payload, &mut pos)? as usize;
                let data = read_bytes(payload, &mut pos, len)?;
                frames.push(Frame::Crypto { offset, data });
            }
            0x08..=0x0f => {
                pos += 1;
                let id = read_field(payload, &mut pos)?;
                let offset = if ty & 0x04 != 0 {
                    read_field(payload, &mut pos)?
                } else {
                    0
                };
                let len = if ty & 0x02 != 0 {
                    read_field(payload, &mut pos)? as usize
                } else {
                    payload.len() - pos
                };
                let data = read_bytes(payload, &mut pos, len)?;
                frames.push(Frame::Stream {
                    id,
                    offset,
                    fin: ty & 0x01 != 0,
                    data,
                });
            }
            0x1c => {
                pos += 1;
                let error_code = read_field(payload, &mut pos)?;
                let frame_type = read_field(payload, &mut pos)?;
                let len = read_field(payload, &mut pos)? as usize;
                let bytes = read_bytes(payload, &mut pos, len)?;
                let reason = String::from_utf8(bytes.to_vec())
                    .map_err(|_| QuicError::ProtocolViolation("CONNECTION_CLOSE reason not UTF-8"))?;
                frames.push(Frame::ConnectionClose {
                    error_code,
                    frame_type,
                    reason,
                });
            }
            0x1e => {
                frames.push(Frame::HandshakeDone);
                pos += 1;
            }
            _ => return Err(QuicError::ProtocolViolation("unknown frame type")),
        }
    }
    Ok(frames)
}

fn read_field(payload: &[u8], pos: &mut usize) -> Result<u64> {
    let (value, consumed) = varint::peek(payload, *pos)
        .ok_or(QuicError::ProtocolViolation("truncated frame"))?;
    *pos += consumed;
    Ok(value)
}

fn read_bytes(payload: &[u8], pos: &mut usize, len: usize) -> Result<Bytes> {
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= payload.len())
        .ok_or(QuicError::ProtocolViolation("truncated frame"))?;
    let data = Bytes::copy_from_slice(&payload[*pos..end]);
    *pos = end;
    Ok(data)
}
