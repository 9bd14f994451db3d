//! End-to-end codec tests against the deterministic protection backend.

mod common;

use bytes::{Bytes, BytesMut};
use common::{AcceptAll, RejectAll, cid, decode_ctx, encode_ctx, protection};
use quicwire::crypto::PacketProtection;
use quicwire::packet::coalesce;
use quicwire::packet::{
    CoalescedPackets, Decoder, Encoder, KeySpace, LargestPn, MIN_INITIAL_SIZE, Packet,
    PacketNumberSpace,
};
use quicwire::{Frame, QuicError, QuicVersion};

fn sample_frames(count: usize) -> Vec<Frame> {
    match count {
        0 => vec![],
        1 => vec![Frame::Crypto {
            offset: 0,
            data: Bytes::from_static(b"hello quic"),
        }],
        _ => vec![
            Frame::Ack {
                largest: 7,
                delay: 20,
                first_range: 7,
            },
            Frame::Crypto {
                offset: 1200,
                data: Bytes::from_static(&[0x42; 48]),
            },
            Frame::Ping,
            Frame::Stream {
                id: 8,
                offset: 0,
                fin: true,
                data: Bytes::from_static(b"stream data"),
            },
        ],
    }
}

#[test]
fn initial_roundtrip_matrix() {
    let crypto = protection();
    for version in [QuicVersion::V1, QuicVersion::V2] {
        let encoder = Encoder::new(version);
        let decoder = Decoder::new(version);
        for cid_len in [0usize, 8, 20] {
            for frame_count in [0usize, 1, 4] {
                let token = (cid_len > 0).then(|| Bytes::from_static(b"addr-token"));
                let packet = encoder
                    .initial(
                        cid(cid_len),
                        cid(8),
                        token.clone(),
                        3,
                        sample_frames(frame_count),
                        &encode_ctx(&crypto),
                    )
                    .unwrap();
                let mut out = BytesMut::new();
                let written = encoder.encode(&packet, &encode_ctx(&crypto), &mut out).unwrap();
                assert_eq!(written, packet.size());
                assert_eq!(out.len(), packet.size());

                let decoded = decoder
                    .decode(&out, &decode_ctx(&crypto))
                    .unwrap()
                    .expect("packet should decode");
                assert_eq!(decoded, packet, "version={version} cid={cid_len} frames={frame_count}");
            }
        }
    }
}

#[test]
fn handshake_and_zero_rtt_roundtrip() {
    let crypto = protection();
    let encoder = Encoder::new(QuicVersion::V1);
    let decoder = Decoder::new(QuicVersion::V1);

    let hs = encoder
        .handshake(cid(8), cid(20), 77, sample_frames(4), &encode_ctx(&crypto))
        .unwrap();
    let mut out = BytesMut::new();
    encoder.encode(&hs, &encode_ctx(&crypto), &mut out).unwrap();
    assert_eq!(decoder.decode(&out, &decode_ctx(&crypto)).unwrap(), Some(hs));

    let zr = encoder
        .zero_rtt(cid(8), cid(0), 9, sample_frames(1), &encode_ctx(&crypto))
        .unwrap();
    let mut out = BytesMut::new();
    encoder.encode(&zr, &encode_ctx(&crypto), &mut out).unwrap();
    assert_eq!(decoder.decode(&out, &decode_ctx(&crypto)).unwrap(), Some(zr));
}

#[test]
fn one_rtt_roundtrip_and_key_phase() {
    let mut crypto = protection();
    crypto.set_key_phase(1);
    let encoder = Encoder::new(QuicVersion::V1);
    let decoder = Decoder::new(QuicVersion::V1);

    let packet = encoder
        .one_rtt(cid(8), true, 42, sample_frames(4), &encode_ctx(&crypto))
        .unwrap();
    // Outgoing packets leave the key phase unset until encode.
    let Packet::OneRtt { key_phase, .. } = &packet else {
        panic!("expected 1-RTT packet");
    };
    assert_eq!(*key_phase, None);

    let mut out = BytesMut::new();
    encoder.encode(&packet, &encode_ctx(&crypto), &mut out).unwrap();

    let mut ctx = decode_ctx(&crypto);
    ctx.dcid_len = 8;
    let decoded = decoder.decode(&out, &ctx).unwrap().expect("should decode");
    let Packet::OneRtt {
        dcid,
        spin,
        key_phase,
        packet_number,
        frames,
        ..
    } = &decoded
    else {
        panic!("expected 1-RTT packet");
    };
    assert_eq!(dcid, packet.dcid());
    assert!(*spin);
    assert_eq!(*key_phase, Some(true));
    assert_eq!(*packet_number, 42);
    assert_eq!(frames, packet.frames());
    assert_eq!(decoded.size(), packet.size());
}

#[test]
fn retry_roundtrip_and_tamper_detection() {
    let crypto = protection();
    let encoder = Encoder::new(QuicVersion::V1);
    let decoder = Decoder::new(QuicVersion::V1);
    let original_dcid = cid(8);

    let packet = encoder
        .retry(cid(20), cid(8), Bytes::from_static(b"retry-me"))
        .unwrap();
    let mut ectx = encode_ctx(&crypto);
    ectx.retry_original_dcid = Some(original_dcid.clone());
    let mut out = BytesMut::new();
    encoder.encode(&packet, &ectx, &mut out).unwrap();

    let mut dctx = decode_ctx(&crypto);
    dctx.retry_original_dcid = Some(original_dcid.clone());
    assert_eq!(decoder.decode(&out, &dctx).unwrap(), Some(packet));

    // Without the original DCID there is nothing to verify against.
    let blind = decode_ctx(&crypto);
    assert_eq!(decoder.decode(&out, &blind).unwrap(), None);

    // A flipped token byte must break the integrity tag.
    let mut tampered = out.to_vec();
    let token_pos = tampered.len() - 17;
    tampered[token_pos] ^= 0x01;
    assert_eq!(
        decoder.decode(&tampered, &dctx),
        Err(QuicError::AuthenticationFailed)
    );
}

#[test]
fn version_negotiation_roundtrip() {
    let crypto = protection();
    let encoder = Encoder::new(QuicVersion::V1);
    let decoder = Decoder::new(QuicVersion::V1);
    let versions = vec![QuicVersion::new(0x0000_0001), QuicVersion::new(0x709a_50c4)];

    let packet = encoder
        .version_negotiation(cid(8), cid(20), versions.clone())
        .unwrap();
    let mut out = BytesMut::new();
    encoder.encode(&packet, &encode_ctx(&crypto), &mut out).unwrap();

    let decoded = decoder
        .decode(&out, &decode_ctx(&crypto))
        .unwrap()
        .expect("should decode");
    let Packet::VersionNegotiation {
        supported_versions, ..
    } = &decoded
    else {
        panic!("expected version negotiation packet");
    };
    assert_eq!(supported_versions, &versions);

    assert!(matches!(
        encoder.version_negotiation(cid(8), cid(20), vec![]),
        Err(QuicError::EncoderMisuse(_))
    ));
}

#[test]
fn initial_meets_anti_amplification_floor() {
    let crypto = protection();
    let encoder = Encoder::new(QuicVersion::V1);
    let packet = encoder
        .initial(
            cid(8),
            cid(8),
            None,
            0,
            vec![Frame::Ping],
            &encode_ctx(&crypto),
        )
        .unwrap();
    assert!(packet.size() >= MIN_INITIAL_SIZE);

    let mut out = BytesMut::new();
    let written = encoder.encode(&packet, &encode_ctx(&crypto), &mut out).unwrap();
    assert!(written >= MIN_INITIAL_SIZE);

    // The padding folded into a single frame.
    let padding_frames = packet
        .frames()
        .iter()
        .filter(|f| matches!(f, Frame::Padding { .. }))
        .count();
    assert_eq!(padding_frames, 1);
}

#[test]
fn header_mask_is_idempotent() {
    let crypto = protection();
    let sample = [0x5au8; 16];
    let mask = crypto.header_mask(KeySpace::Initial, &sample).unwrap();

    let original: Vec<u8> = vec![0xc3, 0x9e, 0x11, 0x42, 0x07];
    let mut masked = original.clone();
    masked[0] ^= mask[0] & 0x0f;
    for i in 0..4 {
        masked[1 + i] ^= mask[1 + i];
    }
    assert_ne!(masked, original);

    masked[0] ^= mask[0] & 0x0f;
    for i in 0..4 {
        masked[1 + i] ^= mask[1 + i];
    }
    assert_eq!(masked, original);
}

#[test]
fn coalesced_datagram_demultiplexes_and_decodes() {
    let crypto = protection();
    let encoder = Encoder::new(QuicVersion::V1);
    let decoder = Decoder::new(QuicVersion::V1);

    let initial = encoder
        .initial(cid(8), cid(8), None, 0, sample_frames(1), &encode_ctx(&crypto))
        .unwrap();
    let handshake = encoder
        .handshake(cid(8), cid(8), 1, sample_frames(4), &encode_ctx(&crypto))
        .unwrap();

    let mut datagram = BytesMut::new();
    encoder.encode(&initial, &encode_ctx(&crypto), &mut datagram).unwrap();
    encoder.encode(&handshake, &encode_ctx(&crypto), &mut datagram).unwrap();

    let l1 = coalesce::peek_packet_size(&datagram, 0, QuicVersion::V1);
    assert_eq!(l1, initial.size());
    let l2 = coalesce::peek_packet_size(&datagram, l1, QuicVersion::V1);
    assert_eq!(l2, handshake.size());
    assert_eq!(l1 + l2, datagram.len());

    let decoded: Vec<Packet> = CoalescedPackets::new(&datagram, QuicVersion::V1)
        .map(|slice| {
            decoder
                .decode(slice, &decode_ctx(&crypto))
                .unwrap()
                .expect("each slice should decode")
        })
        .collect();
    assert_eq!(decoded, vec![initial, handshake]);
}

#[test]
fn truncated_length_is_contained() {
    let crypto = protection();
    let encoder = Encoder::new(QuicVersion::V1);
    let decoder = Decoder::new(QuicVersion::V1);

    let packet = encoder
        .initial(cid(8), cid(8), None, 0, sample_frames(1), &encode_ctx(&crypto))
        .unwrap();
    let mut out = BytesMut::new();
    encoder.encode(&packet, &encode_ctx(&crypto), &mut out).unwrap();

    // Drop the tail: the declared Length now overruns the buffer.
    let truncated = &out[..out.len() - 200];
    assert_eq!(
        coalesce::peek_packet_size(truncated, 0, QuicVersion::V1),
        truncated.len()
    );
    let err = decoder
        .decode(truncated, &decode_ctx(&crypto))
        .expect_err("truncated packet must not decode");
    assert!(err.poisons_datagram(), "got {err:?}");
}

#[test]
fn corrupted_ciphertext_fails_authentication_only() {
    let crypto = protection();
    let encoder = Encoder::new(QuicVersion::V1);
    let decoder = Decoder::new(QuicVersion::V1);

    let packet = encoder
        .handshake(cid(8), cid(8), 5, sample_frames(4), &encode_ctx(&crypto))
        .unwrap();
    let mut out = BytesMut::new();
    encoder.encode(&packet, &encode_ctx(&crypto), &mut out).unwrap();

    let mut corrupted = out.to_vec();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xff;
    let err = decoder
        .decode(&corrupted, &decode_ctx(&crypto))
        .expect_err("corrupted packet must not decode");
    assert_eq!(err, QuicError::AuthenticationFailed);
    assert!(err.is_packet_local());
    assert!(!err.poisons_datagram());
}

#[test]
fn missing_keys_defer_instead_of_erroring() {
    use quicwire::crypto::testing::XorProtection;
    let crypto = XorProtection::with_spaces(common::TEST_KEY, &[KeySpace::Initial]);
    let full = protection();
    let encoder = Encoder::new(QuicVersion::V1);
    let decoder = Decoder::new(QuicVersion::V1);

    let packet = encoder
        .handshake(cid(8), cid(8), 0, sample_frames(1), &encode_ctx(&full))
        .unwrap();
    let mut out = BytesMut::new();
    encoder.encode(&packet, &encode_ctx(&full), &mut out).unwrap();

    // Handshake keys not installed: abstain, do not error.
    let ctx = decode_ctx(&crypto);
    assert_eq!(decoder.decode(&out, &ctx).unwrap(), None);
    // Same bytes with full keys decode fine.
    assert!(decoder.decode(&out, &decode_ctx(&full)).unwrap().is_some());
}

#[test]
fn rejected_token_drops_silently() {
    let crypto = protection();
    let encoder = Encoder::new(QuicVersion::V1);
    let decoder = Decoder::new(QuicVersion::V1);

    let packet = encoder
        .initial(
            cid(8),
            cid(8),
            Some(Bytes::from_static(b"stale")),
            0,
            sample_frames(1),
            &encode_ctx(&crypto),
        )
        .unwrap();
    let mut out = BytesMut::new();
    encoder.encode(&packet, &encode_ctx(&crypto), &mut out).unwrap();

    let mut ctx = decode_ctx(&crypto);
    ctx.validator = Some(&RejectAll);
    assert_eq!(decoder.decode(&out, &ctx).unwrap(), None);

    ctx.validator = Some(&AcceptAll);
    assert!(decoder.decode(&out, &ctx).unwrap().is_some());
}

#[test]
fn foreign_version_is_skipped() {
    let crypto = protection();
    let encoder = Encoder::new(QuicVersion::V2);
    let decoder_v1 = Decoder::new(QuicVersion::V1);

    let packet = encoder
        .initial(cid(8), cid(8), None, 0, sample_frames(1), &encode_ctx(&crypto))
        .unwrap();
    let mut out = BytesMut::new();
    encoder.encode(&packet, &encode_ctx(&crypto), &mut out).unwrap();

    assert_eq!(decoder_v1.decode(&out, &decode_ctx(&crypto)).unwrap(), None);
}

#[test]
fn version_mismatch_in_encoder_is_misuse() {
    let crypto = protection();
    let v1 = Encoder::new(QuicVersion::V1);
    let v2 = Encoder::new(QuicVersion::V2);

    let packet = v1
        .initial(cid(8), cid(8), None, 0, sample_frames(1), &encode_ctx(&crypto))
        .unwrap();
    let mut out = BytesMut::new();
    assert!(matches!(
        v2.encode(&packet, &encode_ctx(&crypto), &mut out),
        Err(QuicError::EncoderMisuse(_))
    ));
}

#[test]
fn oversized_packet_number_gap_is_misuse() {
    let crypto = protection();
    let encoder = Encoder::new(QuicVersion::V1);
    let ctx = encode_ctx(&crypto);
    // largest_acked defaults to None, so the gap is pn + 1.
    assert!(matches!(
        encoder.one_rtt(cid(8), false, 1 << 40, sample_frames(1), &ctx),
        Err(QuicError::EncoderMisuse(_))
    ));
}

#[test]
fn reserved_bits_surface_after_authentication() {
    // Hand-build a v1 Handshake packet with reserved header bits set, sealed
    // and masked exactly the way the encoder would, then check the decoder
    // authenticates it and only then reports the violation.
    let crypto = protection();
    let decoder = Decoder::new(QuicVersion::V1);

    let dcid = cid(8);
    let scid = cid(8);
    let pn: u64 = 7;
    let pn_len = 1usize;
    let payload = {
        let mut buf = BytesMut::new();
        Frame::Ping.encode(&mut buf).unwrap();
        Frame::Padding { len: 30 }.encode(&mut buf).unwrap();
        buf
    };

    let mut out = BytesMut::new();
    // 0xe0 handshake | 0x08: one reserved bit set | pn_len-1 = 0.
    out.extend_from_slice(&[0xe0 | 0x08]);
    out.extend_from_slice(&QuicVersion::V1.to_bytes());
    out.extend_from_slice(&[dcid.len() as u8]);
    out.extend_from_slice(dcid.as_bytes());
    out.extend_from_slice(&[scid.len() as u8]);
    out.extend_from_slice(scid.as_bytes());
    let length = pn_len + payload.len() + crypto.tag_len();
    out.extend_from_slice(&[length as u8]); // small enough for 1-byte varint
    let pn_offset = out.len();
    out.extend_from_slice(&[pn as u8]);

    let ciphertext = crypto
        .seal(KeySpace::Handshake, pn, 0, &out, &payload)
        .unwrap();
    out.extend_from_slice(&ciphertext);

    let sample_start = pn_offset + 4;
    let mask = crypto
        .header_mask(
            KeySpace::Handshake,
            &out[sample_start..sample_start + crypto.sample_len()],
        )
        .unwrap();
    out[0] ^= mask[0] & 0x0f;
    out[pn_offset] ^= mask[1];

    assert_eq!(
        decoder.decode(&out, &decode_ctx(&crypto)),
        Err(QuicError::ProtocolViolation("nonzero reserved header bits"))
    );
}

#[test]
fn packet_number_windowing_across_spaces() {
    let crypto = protection();
    let encoder = Encoder::new(QuicVersion::V1);
    let decoder = Decoder::new(QuicVersion::V1);

    // Peer acked up to 0x3fff0; send 0x40000 with a short encoding and make
    // sure the decoder reconstructs it from its window.
    let largest_acked = LargestPn::default().with(PacketNumberSpace::Handshake, 0x3fff0);
    let mut ectx = encode_ctx(&crypto);
    ectx.largest_acked = largest_acked;

    let pn = 0x40000;
    let packet = encoder
        .handshake(cid(8), cid(8), pn, sample_frames(1), &ectx)
        .unwrap();
    let mut out = BytesMut::new();
    encoder.encode(&packet, &ectx, &mut out).unwrap();

    let mut dctx = decode_ctx(&crypto);
    dctx.largest_pn = LargestPn::default().with(PacketNumberSpace::Handshake, 0x3fffe);
    let decoded = decoder.decode(&out, &dctx).unwrap().expect("should decode");
    assert_eq!(decoded.packet_number(), Some(pn));
}
