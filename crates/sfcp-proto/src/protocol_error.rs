//! Wire-carried protocol error codes (`protocol_error: u16` in an error
//! reply packet).

/// The subset of local errors that may be reported to a peer when a reply
/// was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ProtocolErrorCode {
    /// The recipient could not process the message yet; resend it.
    TryAgainLater = 0,
    /// The requested operation is not supported.
    Unsupported = 1,
    /// AEAD decryption or tag verification failed.
    DecryptionFailed = 2,
    /// The handshake failed.
    HandshakeFailed = 3,
    /// The message arrived in a context that does not permit it.
    InvalidContext = 4,
    /// No handler is registered for the requested application ID.
    InvalidApplicationId = 5,
    /// No handler is registered for the requested client ID.
    InvalidClientId = 6,
    /// The requested forwarding destination is not valid.
    InvalidForwardingDestination = 7,
    /// Forwarding the packet to its destination failed.
    ForwardingFailed = 8,
    /// Forwarding is required but not supported by this protocol.
    ForwardingUnsupported = 9,
    /// The incoming message is too large for any available receive buffer.
    MsgTooLargeToReceive = 10,
    /// Message delivery failed transiently; resend later.
    MsgDeliveryTemporaryFailure = 11,
    /// The registered handler returned an error.
    HandlerFailed = 12,
    /// An internal error occurred that should not be possible.
    InternalError = 13,
}

impl ProtocolErrorCode {
    /// Decode a wire `protocol_error` value.
    ///
    /// Unknown values decode to [`Self::InternalError`] rather than failing,
    /// since a protocol-error reply itself must never be rejected for
    /// carrying an error the reader doesn't recognize.
    #[must_use]
    pub const fn from_wire(value: u16) -> Self {
        match value {
            0 => Self::TryAgainLater,
            1 => Self::Unsupported,
            2 => Self::DecryptionFailed,
            3 => Self::HandshakeFailed,
            4 => Self::InvalidContext,
            5 => Self::InvalidApplicationId,
            6 => Self::InvalidClientId,
            7 => Self::InvalidForwardingDestination,
            8 => Self::ForwardingFailed,
            9 => Self::ForwardingUnsupported,
            10 => Self::MsgTooLargeToReceive,
            11 => Self::MsgDeliveryTemporaryFailure,
            12 => Self::HandlerFailed,
            _ => Self::InternalError,
        }
    }

    /// Encode to the wire `u16` representation.
    #[must_use]
    pub const fn to_wire(self) -> u16 {
        self as u16
    }
}
