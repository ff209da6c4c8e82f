//! 4-byte packet header: bit-packed metadata plus routing fields.
//!
//! The header is modeled as a plain `[u8; 4]` with named accessor methods
//! rather than a `#[repr]` struct, because the interesting field
//! (`metadata`) is itself a bitfield — there is no host layout that could
//! represent it directly. Bit offsets mirror the original implementation's
//! `GET_METADATA_FIELD`/`SET_METADATA_FIELD` macros so the wire format is
//! traceable field-by-field.

use crate::errors::{ProtocolError, Result};

const METADATA_PACKET_TYPE_OFFSET: u8 = 6;
const METADATA_PACKET_TYPE_MASK: u8 = 0b11;
const METADATA_USES_CRYPTOGRAPHY_OFFSET: u8 = 5;
const METADATA_USES_CRYPTOGRAPHY_MASK: u8 = 0b1;
const METADATA_USES_ID_EXTENSION_OFFSET: u8 = 4;
const METADATA_USES_ID_EXTENSION_MASK: u8 = 0b1;
const METADATA_PROTOCOL_VERSION_OFFSET: u8 = 0;
const METADATA_PROTOCOL_VERSION_MASK: u8 = 0b1111;

/// Packet type carried in `metadata` bits `[7:6]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// A message that expects a reply.
    MsgNeedsReply,
    /// A message that does not expect a reply.
    MsgNoReply,
    /// A reply to a previously sent message.
    Reply,
    /// A protocol-error reply (fixed 8-byte shape, never encrypted).
    ProtocolErrorReply,
}

impl PacketType {
    const fn to_bits(self) -> u8 {
        match self {
            Self::MsgNeedsReply => 0b00,
            Self::MsgNoReply => 0b01,
            Self::Reply => 0b10,
            Self::ProtocolErrorReply => 0b11,
        }
    }

    const fn from_bits(bits: u8) -> Self {
        match bits & METADATA_PACKET_TYPE_MASK {
            0b00 => Self::MsgNeedsReply,
            0b01 => Self::MsgNoReply,
            0b10 => Self::Reply,
            _ => Self::ProtocolErrorReply,
        }
    }

    /// True for either MSG variant (needs-reply or no-reply).
    #[must_use]
    pub const fn is_msg(self) -> bool {
        matches!(self, Self::MsgNeedsReply | Self::MsgNoReply)
    }

    /// True if the sender of this packet expects a reply.
    #[must_use]
    pub const fn needs_reply(self) -> bool {
        matches!(self, Self::MsgNeedsReply)
    }
}

/// Current wire protocol version (`0b010`).
pub const PROTOCOL_VERSION: u8 = 0b010;

/// Serialized size of the header, in bytes.
pub const HEADER_SIZE: usize = 4;

/// 4-byte packet header.
///
/// Layout (little-endian, no padding):
/// `metadata: u8, sender_id: u8, receiver_id: u8, message_id: u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    bytes: [u8; HEADER_SIZE],
}

impl PacketHeader {
    /// Build a new header with the current protocol version.
    #[must_use]
    pub fn new(
        packet_type: PacketType,
        uses_cryptography: bool,
        uses_id_extension: bool,
        sender_id: u8,
        receiver_id: u8,
        message_id: u8,
    ) -> Self {
        let metadata = (packet_type.to_bits() & METADATA_PACKET_TYPE_MASK)
            << METADATA_PACKET_TYPE_OFFSET
            | (u8::from(uses_cryptography) & METADATA_USES_CRYPTOGRAPHY_MASK)
                << METADATA_USES_CRYPTOGRAPHY_OFFSET
            | (u8::from(uses_id_extension) & METADATA_USES_ID_EXTENSION_MASK)
                << METADATA_USES_ID_EXTENSION_OFFSET
            | (PROTOCOL_VERSION & METADATA_PROTOCOL_VERSION_MASK)
                << METADATA_PROTOCOL_VERSION_OFFSET;

        Self { bytes: [metadata, sender_id, receiver_id, message_id] }
    }

    /// Parse a header from the first 4 bytes of `buf`.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::PacketTooShort`] if `buf` has fewer than 4 bytes.
    /// - [`ProtocolError::InvalidProtocolVersion`] if the version field does
    ///   not match [`PROTOCOL_VERSION`].
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::PacketTooShort { actual: buf.len() });
        }

        #[allow(clippy::expect_used)]
        let bytes: [u8; HEADER_SIZE] =
            buf[..HEADER_SIZE].try_into().expect("slice length checked above");
        let header = Self { bytes };

        let version = header.protocol_version();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::InvalidProtocolVersion {
                got: version,
                expected: PROTOCOL_VERSION,
            });
        }

        Ok(header)
    }

    /// Serialize to raw bytes.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; HEADER_SIZE] {
        self.bytes
    }

    /// `metadata` bits `[7:6]`.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        PacketType::from_bits(self.bytes[0] >> METADATA_PACKET_TYPE_OFFSET)
    }

    /// `metadata` bit `[5]`.
    #[must_use]
    pub const fn uses_cryptography(&self) -> bool {
        (self.bytes[0] >> METADATA_USES_CRYPTOGRAPHY_OFFSET) & METADATA_USES_CRYPTOGRAPHY_MASK != 0
    }

    /// `metadata` bit `[4]`.
    #[must_use]
    pub const fn uses_id_extension(&self) -> bool {
        (self.bytes[0] >> METADATA_USES_ID_EXTENSION_OFFSET) & METADATA_USES_ID_EXTENSION_MASK != 0
    }

    /// `metadata` bits `[3:0]`.
    #[must_use]
    pub const fn protocol_version(&self) -> u8 {
        (self.bytes[0] >> METADATA_PROTOCOL_VERSION_OFFSET) & METADATA_PROTOCOL_VERSION_MASK
    }

    /// Sender node ID.
    #[must_use]
    pub const fn sender_id(&self) -> u8 {
        self.bytes[1]
    }

    /// Receiver node ID.
    #[must_use]
    pub const fn receiver_id(&self) -> u8 {
        self.bytes[2]
    }

    /// Per-peer monotonic message ID (256-entry wrap).
    #[must_use]
    pub const fn message_id(&self) -> u8 {
        self.bytes[3]
    }
}
