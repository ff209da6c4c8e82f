//! HAL error taxonomy (`sfcp_hal_error_t`).

use thiserror::Error;

/// Errors returned by [`crate::LinkHal`] and [`crate::DoorbellChannel`]
/// operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    /// No device backs the requested link id.
    #[error("unsupported device for link {link_id}")]
    UnsupportedDevice {
        /// The link that was requested.
        link_id: u8,
    },

    /// The destination node id has no route in the routing table.
    #[error("no route to node {node_id}")]
    CannotGetRoute {
        /// The node id that was requested.
        node_id: u8,
    },

    /// Attempted to send while the peer has an unconsumed transfer pending,
    /// or the peer attempted to send to us at the same time.
    #[error("bus busy on link {link_id}")]
    SendMessageBusBusy {
        /// The link that was busy.
        link_id: u8,
    },

    /// `send_message` failed at the channel level.
    #[error("device send failed on link {link_id}")]
    DeviceSendFail {
        /// The link the send was attempted on.
        link_id: u8,
    },

    /// `receive_message` was called with no message pending.
    #[error("no message available on link {link_id}")]
    MessageNotAvailable {
        /// The link that was polled.
        link_id: u8,
    },

    /// `message` pointer/slice failed alignment or non-empty checks.
    #[error("invalid message argument")]
    InvalidMessageArgument,

    /// `already_received + size_to_receive` exceeded the declared total
    /// message size.
    #[error("invalid receive size: {already_received} + {size_to_receive} > {total}")]
    InvalidReceiveSize {
        /// Bytes already received before this call.
        already_received: usize,
        /// Bytes requested in this call.
        size_to_receive: usize,
        /// Declared total message size.
        total: usize,
    },

    /// The message is larger than the destination buffer can hold.
    #[error("message of {actual} bytes does not fit in a buffer of {capacity} bytes")]
    MessageTooLarge {
        /// Size of the incoming message.
        actual: usize,
        /// Capacity of the destination buffer.
        capacity: usize,
    },
}
