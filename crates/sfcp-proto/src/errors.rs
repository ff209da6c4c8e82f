//! Wire-level parsing errors.
//!
//! These are distinct from the local `sfcp_error` taxonomy defined by
//! `sfcp-core`: they describe why a byte buffer could not be interpreted as
//! an SFCP packet, before any session or subnet context is available.

use thiserror::Error;

/// Result alias for packet codec operations.
pub type Result<T> = core::result::Result<T, ProtocolError>;

/// Errors returned while parsing or building a wire-format packet.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is smaller than the 40-byte minimum callable through the
    /// public API.
    #[error("buffer too small: {actual} bytes, minimum is {minimum}")]
    BufferTooSmall {
        /// Bytes actually supplied.
        actual: usize,
        /// Minimum required by the public API.
        minimum: usize,
    },

    /// Buffer is too short for the header alone (4 bytes).
    #[error("packet too short for header: {actual} bytes")]
    PacketTooShort {
        /// Bytes actually supplied.
        actual: usize,
    },

    /// `metadata.protocol_version` did not match the supported version.
    #[error("unsupported protocol version: got {got:#04x}, expected {expected:#04x}")]
    InvalidProtocolVersion {
        /// Version field read from the wire.
        got: u8,
        /// Version this build supports.
        expected: u8,
    },

    /// Buffer is shorter than the discriminated variant requires.
    #[error(
        "invalid packet size: {actual} bytes, need at least {required} for this packet shape"
    )]
    InvalidPacketSize {
        /// Bytes actually supplied.
        actual: usize,
        /// Bytes required for the decoded packet shape.
        required: usize,
    },

    /// Payload would make the encoded packet exceed the caller's buffer.
    #[error("payload too large: {size} bytes would not fit in a {capacity}-byte buffer")]
    PayloadTooLarge {
        /// Payload size requested.
        size: usize,
        /// Capacity of the destination buffer.
        capacity: usize,
    },
}
