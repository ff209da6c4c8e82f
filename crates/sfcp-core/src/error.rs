//! The local `sfcp_error` taxonomy returned by every public session-engine
//! operation, plus the wire `protocol_error` translation.

use thiserror::Error;

use sfcp_crypto::{CryptoError, CryptographyMode};
use sfcp_hal::HalError;
use sfcp_proto::{ProtocolError, ProtocolErrorCode};

/// Errors returned by `sfcp-core` operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SfcpError {
    /// Caller-supplied buffer was smaller than the engine's minimum.
    #[error("buffer too small: {actual} bytes, minimum is {minimum}")]
    BufferTooSmall {
        /// Bytes actually supplied.
        actual: usize,
        /// Minimum required.
        minimum: usize,
    },

    /// `init_msg`/`init_reply` was asked to address the local node.
    #[error("cannot address message to self")]
    SelfAddressed,

    /// A node id has no entry in the routing table or named subnet.
    #[error("invalid node id: {node_id}")]
    InvalidNode {
        /// The node id that was requested.
        node_id: u8,
    },

    /// A peer belongs to more than one trusted subnet; the caller must pass
    /// `trusted_subnet_id` explicitly.
    #[error("peer belongs to multiple trusted subnets; must be manually selected")]
    TrustedSubnetMustBeManuallySelected,

    /// `trusted_subnet_id` does not name a configured subnet.
    #[error("unknown trusted subnet: {0}")]
    UnknownTrustedSubnet(u8),

    /// A received packet's sequence number was already marked received.
    #[error("message already received")]
    MsgAlreadyReceived,

    /// A received packet's sequence number is too far ahead of the sliding
    /// window; may succeed if resent later.
    #[error("message out of order, try again later")]
    MsgOutOfOrderTemporaryFailure,

    /// The next send sequence number would reach `RE_KEY_SEQ_NUM` while a
    /// re-key is not yet possible to start (state != `SessionKeySetupValid`).
    #[error("send sequence number space exhausted while re-keying is pending")]
    SequenceNumberExhausted,

    /// A reply's `message_id` did not match the outstanding request.
    #[error("invalid sequence number")]
    InvalidSequenceNumber,

    /// A handshake/session message arrived while the subnet was in a state
    /// that does not expect it.
    #[error("invalid trusted subnet state for this operation")]
    InvalidTrustedSubnetState,

    /// A packet carrying a re-key sequence number arrived in a state that
    /// does not expect a re-key exchange.
    #[error("invalid re-key handshake message")]
    HandshakeInvalidReKeyMsg,

    /// A `SEND_IVS_MSG` did not contain this node's own previously-sent IV.
    #[error("received IV did not match the one this node generated")]
    HandshakeInvalidReceivedIv,

    /// A mutual-authentication message failed validation.
    #[error("invalid mutual authentication message")]
    HandshakeInvalidMutualAuthMsg,

    /// A handshake message of unexpected shape or id arrived for the
    /// current state.
    #[error("invalid handshake message for current state")]
    HandshakeInvalidMsg,

    /// An otherwise-unclassified handshake failure (should not happen).
    #[error("internal handshake failure")]
    InternalHandshakeFailure,

    /// AEAD encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(#[from] CryptoFailure),

    /// The requested AEAD mode has no local implementation.
    #[error("cryptography mode not supported: {mode:?}")]
    CryptographyNotSupported {
        /// The mode that was requested.
        mode: CryptographyMode,
    },

    /// Underlying mailbox transport error, offset through the HAL's own
    /// taxonomy rather than collapsed into one generic code.
    #[error("transport error: {0}")]
    Hal(#[from] HalError),

    /// The receive buffer slab had no free slots.
    #[error("buffer pool exhausted")]
    AllocateBufferFailed,

    /// A handle passed to `pop_msg_from_buffer`/`pop_reply_from_buffer` did
    /// not name a currently-allocated slot.
    #[error("invalid buffer handle")]
    InvalidBufferHandle,

    /// The message/reply handler table had no free slots.
    #[error("handler table full")]
    HandlerTableFull,

    /// No handler is registered for the incoming `application_id`.
    #[error("no handler registered for application id {0}")]
    InvalidApplicationId(u16),

    /// No handler is registered for the incoming `client_id`.
    #[error("no handler registered for client id {0}")]
    InvalidClientId(u16),

    /// A registered handler returned an error.
    #[error("handler returned an error")]
    HandlerFailed,

    /// The local node is neither the sender nor the receiver of this
    /// packet, and multi-hop forwarding is unsupported.
    #[error("forwarding required but unsupported")]
    ForwardingUnsupported,

    /// Forwarding a packet to its next hop failed at the transport layer.
    #[error("forwarding failed")]
    ForwardingFailed,

    /// Polling call found nothing to return.
    #[error("no message available")]
    NoMsgAvailable,

    /// The peer replied `TRY_AGAIN_LATER`; the caller should retry
    /// `send_msg`.
    #[error("peer asked to retry the send")]
    SendMsgAgain,

    /// The peer's error reply carried some other wire protocol error.
    #[error("peer reported protocol error: {0:?}")]
    PeerProtocolError(ProtocolErrorCode),

    /// A just-received buffer failed to parse as a well-formed packet.
    #[error("malformed packet: {0}")]
    Protocol(#[from] ProtocolError),

    /// A condition the implementation asserts cannot happen.
    #[error("internal error")]
    Internal,
}

/// Narrow wrapper so [`CryptoError`] composes into [`SfcpError::EncryptionFailed`]
/// without conflating encryption and decryption failures under one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error(transparent)]
pub struct CryptoFailure(#[from] pub CryptoError);

impl SfcpError {
    /// Translate a wire `protocol_error` code carried in an `Error` reply
    /// body into the local error taxonomy (`sfcp_protocol_error_to_sfcp_error`).
    ///
    /// Distinct from the `?`-based [`From<ProtocolError>`] conversion, which
    /// covers wire *parse* failures rather than a peer-reported error.
    #[must_use]
    pub const fn from_wire(code: ProtocolErrorCode) -> Self {
        match code {
            ProtocolErrorCode::TryAgainLater => Self::SendMsgAgain,
            ProtocolErrorCode::InvalidApplicationId => Self::InvalidApplicationId(0),
            ProtocolErrorCode::InvalidClientId => Self::InvalidClientId(0),
            ProtocolErrorCode::ForwardingUnsupported => Self::ForwardingUnsupported,
            ProtocolErrorCode::ForwardingFailed => Self::ForwardingFailed,
            ProtocolErrorCode::HandlerFailed => Self::HandlerFailed,
            ProtocolErrorCode::DecryptionFailed => {
                Self::EncryptionFailed(CryptoFailure(CryptoError::DecryptionFailed))
            },
            other => Self::PeerProtocolError(other),
        }
    }

    /// Map to a wire `protocol_error` code when a reply was requested,
    /// per spec.md §6.4's enumerated constants.
    #[must_use]
    pub const fn to_wire(&self) -> ProtocolErrorCode {
        match self {
            Self::SendMsgAgain => ProtocolErrorCode::TryAgainLater,
            Self::CryptographyNotSupported { .. } => ProtocolErrorCode::Unsupported,
            Self::EncryptionFailed(_) => ProtocolErrorCode::DecryptionFailed,
            Self::HandshakeInvalidReKeyMsg
            | Self::HandshakeInvalidReceivedIv
            | Self::HandshakeInvalidMutualAuthMsg
            | Self::HandshakeInvalidMsg
            | Self::InternalHandshakeFailure => ProtocolErrorCode::HandshakeFailed,
            Self::InvalidTrustedSubnetState | Self::InvalidSequenceNumber => {
                ProtocolErrorCode::InvalidContext
            },
            Self::InvalidApplicationId(_) => ProtocolErrorCode::InvalidApplicationId,
            Self::InvalidClientId(_) => ProtocolErrorCode::InvalidClientId,
            Self::TrustedSubnetMustBeManuallySelected | Self::InvalidNode { .. } => {
                ProtocolErrorCode::InvalidForwardingDestination
            },
            Self::ForwardingFailed => ProtocolErrorCode::ForwardingFailed,
            Self::ForwardingUnsupported => ProtocolErrorCode::ForwardingUnsupported,
            Self::Hal(HalError::SendMessageBusBusy { .. }) => ProtocolErrorCode::TryAgainLater,
            Self::AllocateBufferFailed => ProtocolErrorCode::MsgTooLargeToReceive,
            Self::HandlerFailed => ProtocolErrorCode::HandlerFailed,
            _ => ProtocolErrorCode::InternalError,
        }
    }
}
