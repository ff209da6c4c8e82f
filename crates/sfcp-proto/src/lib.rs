//! Wire format and packet codec for the Secure Firmware Communications
//! Protocol (SFCP).
//!
//! This crate is pure: it has no notion of sessions, subnets, or handshake
//! state. It only knows how to turn bytes into a [`packet::ParsedPacket`]
//! and back, and how to decide whether a packet would need forwarding.
//! Everything stateful lives in `sfcp-core`.

pub mod errors;
pub mod forwarding;
pub mod header;
pub mod packet;
pub mod protocol_error;

pub use errors::{ProtocolError, Result};
pub use forwarding::needs_forwarding;
pub use header::{HEADER_SIZE, PROTOCOL_VERSION, PacketHeader, PacketType};
pub use packet::{
    CryptoMetadata, ERROR_REPLY_SIZE, IdExtension, MIN_PACKET_BUFFER_SIZE, ParsedBody,
    ParsedPacket, encode_crypto_header, encode_plain, make_protocol_error, parse,
    packet_size_without_payload, patch_tag,
};
pub use protocol_error::ProtocolErrorCode;
