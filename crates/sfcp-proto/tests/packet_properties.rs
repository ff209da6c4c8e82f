//! Property-based tests for packet header and body round-tripping.
//!
//! These check spec.md §8 properties 1 and 2 hold for all valid inputs, not
//! just hand-picked examples.

use proptest::prelude::*;
use sfcp_proto::{
    IdExtension, PROTOCOL_VERSION, PacketHeader, PacketType, ParsedBody, encode_crypto_header,
    encode_plain, packet_size_without_payload, parse, patch_tag,
};

fn arbitrary_packet_type() -> impl Strategy<Value = PacketType> {
    prop_oneof![
        Just(PacketType::MsgNeedsReply),
        Just(PacketType::MsgNoReply),
        Just(PacketType::Reply),
        Just(PacketType::ProtocolErrorReply),
    ]
}

proptest! {
    #[test]
    fn header_round_trips_for_all_fields(
        packet_type in arbitrary_packet_type(),
        uses_crypto in any::<bool>(),
        uses_id_ext in any::<bool>(),
        sender in any::<u8>(),
        receiver in any::<u8>(),
        message_id in any::<u8>(),
    ) {
        let header = PacketHeader::new(packet_type, uses_crypto, uses_id_ext, sender, receiver, message_id);
        let parsed = PacketHeader::parse(&header.to_bytes()).unwrap();

        prop_assert_eq!(parsed.packet_type(), packet_type);
        prop_assert_eq!(parsed.uses_cryptography(), uses_crypto);
        prop_assert_eq!(parsed.uses_id_extension(), uses_id_ext);
        prop_assert_eq!(parsed.sender_id(), sender);
        prop_assert_eq!(parsed.receiver_id(), receiver);
        prop_assert_eq!(parsed.message_id(), message_id);
        prop_assert_eq!(parsed.protocol_version(), PROTOCOL_VERSION);
    }

    #[test]
    fn header_rejects_any_other_version(bad_version in 0u8..16u8) {
        prop_assume!(bad_version != PROTOCOL_VERSION);
        let mut bytes = PacketHeader::new(PacketType::MsgNeedsReply, false, false, 0, 0, 0).to_bytes();
        bytes[0] = (bytes[0] & 0b1111_0000) | bad_version;
        prop_assert!(PacketHeader::parse(&bytes).is_err());
    }

    #[test]
    fn payload_offset_matches_formula(uses_crypto in any::<bool>(), uses_id_ext in any::<bool>()) {
        let expected = 4
            + if uses_crypto { 20 } else { 0 }
            + if uses_id_ext { 4 } else { 0 };
        prop_assert_eq!(packet_size_without_payload(uses_crypto, uses_id_ext), expected);
    }

    #[test]
    fn plain_packet_round_trips(
        uses_id_ext in any::<bool>(),
        sender in any::<u8>(),
        receiver in any::<u8>(),
        payload in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let header = PacketHeader::new(PacketType::MsgNoReply, false, uses_id_ext, sender, receiver, 0);
        let ext = uses_id_ext.then_some(IdExtension { client_id: 11, application_id: 22 });
        let mut buf = vec![0u8; 4 + 20 + 4 + payload.len()];
        let written = encode_plain(&mut buf, header, ext, &payload).unwrap();

        let parsed = parse(&buf, written).unwrap();
        match parsed.body {
            ParsedBody::Plain { id_extension, payload: got } => {
                prop_assert_eq!(id_extension, ext);
                prop_assert_eq!(got, payload.as_slice());
            },
            other => prop_assert!(false, "unexpected body: {other:?}"),
        }
    }

    #[test]
    fn crypto_packet_round_trips(
        seq_num in any::<u16>(),
        subnet_id in any::<u8>(),
        tag in prop::array::uniform16(any::<u8>()),
        payload in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let header = PacketHeader::new(PacketType::Reply, true, false, 1, 0, 3);
        let mut buf = vec![0u8; 4 + 20 + payload.len()];
        let (payload_offset, total) =
            encode_crypto_header(&mut buf, header, seq_num, 0, subnet_id, None, payload.len()).unwrap();
        buf[payload_offset..payload_offset + payload.len()].copy_from_slice(&payload);
        patch_tag(&mut buf, 4, tag);

        let parsed = parse(&buf, total).unwrap();
        match parsed.body {
            ParsedBody::Crypto { metadata, payload: got, .. } => {
                prop_assert_eq!(metadata.seq_num, seq_num);
                prop_assert_eq!(metadata.trusted_subnet_id, subnet_id);
                prop_assert_eq!(metadata.tag, tag);
                prop_assert_eq!(got, payload.as_slice());
            },
            other => prop_assert!(false, "unexpected body: {other:?}"),
        }
    }
}
