//! Packet body variants and the discriminated parse/encode functions.
//!
//! A packet is a 4-byte [`PacketHeader`] followed by one of three body
//! shapes, selected by `packet_type` and the `uses_cryptography` /
//! `uses_id_extension` metadata bits (spec.md §3.1 / §6.1). These are pure
//! functions over byte slices — no host struct is ever cast over wire bytes.

use crate::{
    errors::{ProtocolError, Result},
    header::{HEADER_SIZE, PacketHeader, PacketType},
};

/// AEAD tag length, in bytes.
pub const TAG_SIZE: usize = 16;

/// Size of the crypto-config + tag block that precedes the ID extension or
/// payload on an encrypted packet: `seq_num(2) + mode(1) + subnet_id(1) +
/// tag(16)`.
pub const CRYPTO_METADATA_SIZE: usize = 2 + 1 + 1 + TAG_SIZE;

/// Size of the optional `{client_id, application_id}` block.
pub const ID_EXTENSION_SIZE: usize = 2 + 2;

/// Fixed size of a protocol-error reply packet: header + `client_id:u16` +
/// `protocol_error:u16`.
pub const ERROR_REPLY_SIZE: usize = HEADER_SIZE + 2 + 2;

/// Minimum buffer size the public session-engine API accepts (spec.md
/// §3.1).
pub const MIN_PACKET_BUFFER_SIZE: usize = 40;

/// Optional `{client_id, application_id}` extension carried by MSG and
/// REPLY packets (never by protocol-error replies, which have their own
/// fixed `client_id` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdExtension {
    /// Caller-chosen client identifier, used to route replies back to a
    /// registered reply handler.
    pub client_id: u16,
    /// Application identifier, used to route incoming messages to a
    /// registered message handler.
    pub application_id: u16,
}

/// The crypto-config + tag block of an encrypted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoMetadata {
    /// AEAD sequence number for this (subnet, peer) pair.
    pub seq_num: u16,
    /// Wire-encoded AEAD mode (see `sfcp-crypto::CryptographyMode`).
    pub mode: u8,
    /// Trusted subnet this packet was encrypted under.
    pub trusted_subnet_id: u8,
    /// 16-byte authentication tag.
    pub tag: [u8; TAG_SIZE],
}

/// A fully parsed packet borrowing its payload from the source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedBody<'a> {
    /// Fixed-shape protocol-error reply.
    Error {
        /// `client_id` of the message this error responds to.
        client_id: u16,
        /// Wire protocol error code.
        protocol_error: u16,
    },
    /// AEAD-encrypted MSG or REPLY.
    Crypto {
        /// Crypto configuration and authentication tag.
        metadata: CryptoMetadata,
        /// Present iff `uses_id_extension`.
        id_extension: Option<IdExtension>,
        /// Ciphertext (tag is carried separately in `metadata.tag`).
        payload: &'a [u8],
    },
    /// Plaintext MSG or REPLY.
    Plain {
        /// Present iff `uses_id_extension`.
        id_extension: Option<IdExtension>,
        /// Cleartext application payload.
        payload: &'a [u8],
    },
}

/// A parsed packet: header plus its discriminated body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPacket<'a> {
    /// The 4-byte header.
    pub header: PacketHeader,
    /// The discriminated body.
    pub body: ParsedBody<'a>,
}

/// Size of the packet up to (but not including) the payload, for the given
/// crypto/id-extension combination. Constant-time arithmetic, matching
/// `SFCP_PACKET_SIZE_WITHOUT_PAYLOAD`.
#[must_use]
pub const fn packet_size_without_payload(uses_crypto: bool, uses_id_extension: bool) -> usize {
    HEADER_SIZE
        + if uses_crypto { CRYPTO_METADATA_SIZE } else { 0 }
        + if uses_id_extension { ID_EXTENSION_SIZE } else { 0 }
}

fn read_u16(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[0], buf[1]])
}

fn write_u16(buf: &mut [u8], value: u16) {
    buf[..2].copy_from_slice(&value.to_le_bytes());
}

/// Parse `buf[..len]` as an SFCP packet.
///
/// # Errors
///
/// - [`ProtocolError::PacketTooShort`] / [`ProtocolError::InvalidProtocolVersion`]
///   from header parsing.
/// - [`ProtocolError::InvalidPacketSize`] if `buf` is shorter than the
///   discriminated body shape requires.
pub fn parse(buf: &[u8], len: usize) -> Result<ParsedPacket<'_>> {
    let buf = buf.get(..len).ok_or(ProtocolError::InvalidPacketSize { actual: buf.len(), required: len })?;
    let header = PacketHeader::parse(buf)?;

    if header.packet_type() == PacketType::ProtocolErrorReply {
        if buf.len() < ERROR_REPLY_SIZE {
            return Err(ProtocolError::InvalidPacketSize {
                actual: buf.len(),
                required: ERROR_REPLY_SIZE,
            });
        }
        let client_id = read_u16(&buf[HEADER_SIZE..]);
        let protocol_error = read_u16(&buf[HEADER_SIZE + 2..]);
        return Ok(ParsedPacket { header, body: ParsedBody::Error { client_id, protocol_error } });
    }

    let uses_crypto = header.uses_cryptography();
    let uses_id_ext = header.uses_id_extension();
    let required = packet_size_without_payload(uses_crypto, uses_id_ext);
    if buf.len() < required {
        return Err(ProtocolError::InvalidPacketSize { actual: buf.len(), required });
    }

    let mut offset = HEADER_SIZE;

    let metadata = if uses_crypto {
        let seq_num = read_u16(&buf[offset..]);
        let mode = buf[offset + 2];
        let trusted_subnet_id = buf[offset + 3];
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&buf[offset + 4..offset + 4 + TAG_SIZE]);
        offset += CRYPTO_METADATA_SIZE;
        Some(CryptoMetadata { seq_num, mode, trusted_subnet_id, tag })
    } else {
        None
    };

    let id_extension = if uses_id_ext {
        let client_id = read_u16(&buf[offset..]);
        let application_id = read_u16(&buf[offset + 2..]);
        offset += ID_EXTENSION_SIZE;
        Some(IdExtension { client_id, application_id })
    } else {
        None
    };

    let payload = &buf[offset..];

    let body = match metadata {
        Some(metadata) => ParsedBody::Crypto { metadata, id_extension, payload },
        None => ParsedBody::Plain { id_extension, payload },
    };

    Ok(ParsedPacket { header, body })
}

/// Write a plaintext MSG/REPLY packet (header + optional ID extension +
/// payload) into `dst`. Returns the number of bytes written.
///
/// # Errors
///
/// [`ProtocolError::PayloadTooLarge`] if the encoded packet would not fit in
/// `dst`.
pub fn encode_plain(
    dst: &mut [u8],
    header: PacketHeader,
    id_extension: Option<IdExtension>,
    payload: &[u8],
) -> Result<usize> {
    let total = packet_size_without_payload(false, id_extension.is_some()) + payload.len();
    if dst.len() < total {
        return Err(ProtocolError::PayloadTooLarge { size: total, capacity: dst.len() });
    }

    dst[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    let mut offset = HEADER_SIZE;
    if let Some(ext) = id_extension {
        write_u16(&mut dst[offset..], ext.client_id);
        write_u16(&mut dst[offset + 2..], ext.application_id);
        offset += ID_EXTENSION_SIZE;
    }
    dst[offset..offset + payload.len()].copy_from_slice(payload);

    Ok(total)
}

/// Write the header and crypto-config block (seq_num, mode, subnet_id) of
/// an encrypted packet, leaving the tag zeroed and the payload area
/// untouched. Returns the offset at which AEAD ciphertext (and, on success,
/// [`patch_tag`]) should be written, plus the total framed size for
/// `payload_len` bytes of ciphertext.
///
/// This two-phase shape exists because the tag is computed over the header
/// and payload by the crypto HAL, not known until after encryption runs.
///
/// # Errors
///
/// [`ProtocolError::PayloadTooLarge`] if the encoded packet would not fit in
/// `dst`.
pub fn encode_crypto_header(
    dst: &mut [u8],
    header: PacketHeader,
    seq_num: u16,
    mode: u8,
    trusted_subnet_id: u8,
    id_extension: Option<IdExtension>,
    payload_len: usize,
) -> Result<(usize, usize)> {
    let total = packet_size_without_payload(true, id_extension.is_some()) + payload_len;
    if dst.len() < total {
        return Err(ProtocolError::PayloadTooLarge { size: total, capacity: dst.len() });
    }

    dst[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    let mut offset = HEADER_SIZE;
    write_u16(&mut dst[offset..], seq_num);
    dst[offset + 2] = mode;
    dst[offset + 3] = trusted_subnet_id;
    dst[offset + 4..offset + 4 + TAG_SIZE].fill(0);
    offset += CRYPTO_METADATA_SIZE;

    if let Some(ext) = id_extension {
        write_u16(&mut dst[offset..], ext.client_id);
        write_u16(&mut dst[offset + 2..], ext.application_id);
        offset += ID_EXTENSION_SIZE;
    }

    Ok((offset, total))
}

/// Patch the 16-byte AEAD tag into an already-written crypto metadata
/// block at `crypto_metadata_offset` (the start of the crypto-config block,
/// i.e. `HEADER_SIZE`).
pub fn patch_tag(dst: &mut [u8], crypto_metadata_offset: usize, tag: [u8; TAG_SIZE]) {
    let tag_offset = crypto_metadata_offset + 4;
    dst[tag_offset..tag_offset + TAG_SIZE].copy_from_slice(&tag);
}

/// Write a fixed-shape protocol-error reply packet into `dst`. Returns the
/// number of bytes written ([`ERROR_REPLY_SIZE`]).
///
/// # Errors
///
/// [`ProtocolError::PayloadTooLarge`] if `dst` is smaller than
/// [`ERROR_REPLY_SIZE`].
pub fn make_protocol_error(
    dst: &mut [u8],
    sender_id: u8,
    receiver_id: u8,
    message_id: u8,
    client_id: u16,
    protocol_error: u16,
) -> Result<usize> {
    if dst.len() < ERROR_REPLY_SIZE {
        return Err(ProtocolError::PayloadTooLarge { size: ERROR_REPLY_SIZE, capacity: dst.len() });
    }

    let header =
        PacketHeader::new(PacketType::ProtocolErrorReply, false, false, sender_id, receiver_id, message_id);
    dst[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    write_u16(&mut dst[HEADER_SIZE..], client_id);
    write_u16(&mut dst[HEADER_SIZE + 2..], protocol_error);

    Ok(ERROR_REPLY_SIZE)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn payload_offset_matches_formula() {
        for uses_crypto in [false, true] {
            for uses_id_ext in [false, true] {
                let expected = HEADER_SIZE
                    + if uses_crypto { CRYPTO_METADATA_SIZE } else { 0 }
                    + if uses_id_ext { ID_EXTENSION_SIZE } else { 0 };
                assert_eq!(packet_size_without_payload(uses_crypto, uses_id_ext), expected);
            }
        }
    }

    #[test]
    fn plain_round_trip() {
        let header = PacketHeader::new(PacketType::MsgNeedsReply, false, true, 1, 2, 5);
        let ext = IdExtension { client_id: 9, application_id: 4 };
        let mut buf = [0u8; 64];
        let written = encode_plain(&mut buf, header, Some(ext), &[0xAA, 0xBB]).unwrap();

        let parsed = parse(&buf, written).unwrap();
        assert_eq!(parsed.header.sender_id(), 1);
        match parsed.body {
            ParsedBody::Plain { id_extension, payload } => {
                assert_eq!(id_extension, Some(ext));
                assert_eq!(payload, &[0xAA, 0xBB]);
            },
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn crypto_round_trip_with_patched_tag() {
        let header = PacketHeader::new(PacketType::Reply, true, false, 2, 1, 9);
        let mut buf = [0u8; 64];
        let (payload_offset, total) =
            encode_crypto_header(&mut buf, header, 7, 0, 3, None, 3).unwrap();
        buf[payload_offset..payload_offset + 3].copy_from_slice(&[1, 2, 3]);
        patch_tag(&mut buf, HEADER_SIZE, [0xFF; TAG_SIZE]);

        let parsed = parse(&buf, total).unwrap();
        match parsed.body {
            ParsedBody::Crypto { metadata, payload, .. } => {
                assert_eq!(metadata.seq_num, 7);
                assert_eq!(metadata.trusted_subnet_id, 3);
                assert_eq!(metadata.tag, [0xFF; TAG_SIZE]);
                assert_eq!(payload, &[1, 2, 3]);
            },
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn error_reply_round_trip() {
        let mut buf = [0u8; ERROR_REPLY_SIZE];
        make_protocol_error(&mut buf, 1, 0, 3, 55, 6).unwrap();
        let parsed = parse(&buf, ERROR_REPLY_SIZE).unwrap();
        assert_eq!(parsed.header.packet_type(), PacketType::ProtocolErrorReply);
        match parsed.body {
            ParsedBody::Error { client_id, protocol_error } => {
                assert_eq!(client_id, 55);
                assert_eq!(protocol_error, 6);
            },
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_crypto_packet() {
        let header = PacketHeader::new(PacketType::MsgNeedsReply, true, false, 0, 1, 0);
        let mut buf = [0u8; HEADER_SIZE + CRYPTO_METADATA_SIZE - 1];
        buf[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        let err = parse(&buf, buf.len()).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPacketSize { .. }));
    }
}
