//! Fuzz target for the wire packet parser.
//!
//! Prevent out-of-bounds reads or panics on malformed packets (HIGH
//! priority) — `sfcp_proto::parse` is the first thing run on every byte
//! that arrives off a link, untrusted by construction.
//!
//! # Strategy
//!
//! - Arbitrary raw bytes, any length, fed straight to `parse`.
//! - A structured arm that builds a well-formed header with the
//!   `uses_cryptography`/`uses_id_extension` bits set independently of
//!   whether the rest of the buffer actually has room for them, to hit the
//!   boundary between "header says extension present" and "buffer too
//!   short for it".
//! - A round-trip arm: encode a plaintext packet, then parse it back and
//!   check every field survives.
//!
//! # Invariants
//!
//! - `parse` never panics, on any input.
//! - A successfully parsed header's `protocol_version()` always equals
//!   `PROTOCOL_VERSION`.
//! - Round-tripping `encode_plain` through `parse` preserves the header and
//!   payload exactly.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sfcp_proto::{
    IdExtension, MIN_PACKET_BUFFER_SIZE, PROTOCOL_VERSION, PacketHeader, PacketType, ParsedBody,
    encode_plain, parse,
};

#[derive(Debug, Clone, Arbitrary)]
enum Input {
    /// Arbitrary bytes, unconstrained.
    Raw(Vec<u8>),
    /// A well-formed header over an arbitrary-length remainder, to bias
    /// coverage toward "header parses, body framing doesn't".
    HeaderPlusTail {
        packet_type: u8,
        uses_cryptography: bool,
        uses_id_extension: bool,
        sender_id: u8,
        receiver_id: u8,
        message_id: u8,
        tail: Vec<u8>,
    },
    /// A round-trip through `encode_plain`.
    RoundTrip { client_id: u16, application_id: u16, has_id_extension: bool, payload: Vec<u8> },
}

fn packet_type_from(bits: u8) -> PacketType {
    match bits & 0b11 {
        0b00 => PacketType::MsgNeedsReply,
        0b01 => PacketType::MsgNoReply,
        0b10 => PacketType::Reply,
        _ => PacketType::ProtocolErrorReply,
    }
}

fuzz_target!(|input: Input| {
    match input {
        Input::Raw(bytes) => {
            let len = bytes.len();
            if let Ok(parsed) = parse(&bytes, len) {
                assert_eq!(parsed.header.protocol_version(), PROTOCOL_VERSION);
            }
        },

        Input::HeaderPlusTail {
            packet_type,
            uses_cryptography,
            uses_id_extension,
            sender_id,
            receiver_id,
            message_id,
            tail,
        } => {
            let header = PacketHeader::new(
                packet_type_from(packet_type),
                uses_cryptography,
                uses_id_extension,
                sender_id,
                receiver_id,
                message_id,
            );
            let mut buf = header.to_bytes().to_vec();
            buf.extend_from_slice(&tail);
            let len = buf.len();
            if let Ok(parsed) = parse(&buf, len) {
                assert_eq!(parsed.header.sender_id(), sender_id);
                assert_eq!(parsed.header.receiver_id(), receiver_id);
                assert_eq!(parsed.header.message_id(), message_id);
            }
        },

        Input::RoundTrip { client_id, application_id, has_id_extension, payload } => {
            let id_extension = has_id_extension.then_some(IdExtension { client_id, application_id });
            let header = PacketHeader::new(PacketType::MsgNeedsReply, false, has_id_extension, 1, 2, 3);
            let mut buf = vec![0u8; MIN_PACKET_BUFFER_SIZE.max(payload.len() + 16)];
            if let Ok(written) = encode_plain(&mut buf, header, id_extension, &payload) {
                let parsed = parse(&buf, written).expect("just-encoded packet must parse");
                match parsed.body {
                    ParsedBody::Plain { id_extension: parsed_ext, payload: parsed_payload } => {
                        assert_eq!(parsed_ext, id_extension);
                        assert_eq!(parsed_payload, payload.as_slice());
                    },
                    _ => panic!("encode_plain produced a non-plain body"),
                }
            }
        },
    }
});
