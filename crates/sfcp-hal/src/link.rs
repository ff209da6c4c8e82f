//! The mailbox transport HAL consumed by `sfcp-core`.

use crate::error::HalError;

/// Identifies a physical link (a send/receive MHU device pair) between this
/// node and exactly one other node.
pub type LinkId = u8;

/// Mailbox transport operations `sfcp-core`'s session engine drives.
///
/// Every method returns a rich [`HalError`] rather than panicking; callers
/// translate these into protocol errors via a base-plus-offset mapping, per
/// spec.md §4.1's error contract, except for `SendMessageBusBusy` which maps
/// to its own dedicated protocol error.
pub trait LinkHal: Send + Sync {
    /// This node's id.
    fn my_node_id(&self) -> u8;

    /// Resolve the link to reach `node_id`.
    ///
    /// # Errors
    ///
    /// [`HalError::CannotGetRoute`] if `node_id` has no entry in the routing
    /// table.
    fn get_route(&self, node_id: u8) -> Result<LinkId, HalError>;

    /// Fragment and send `message` over `link_id`.
    ///
    /// # Errors
    ///
    /// [`HalError::SendMessageBusBusy`] if a transfer is already pending in
    /// either direction on this link. [`HalError::UnsupportedDevice`] if
    /// `link_id` does not name a configured link.
    fn send_message(&self, link_id: LinkId, message: &[u8]) -> Result<(), HalError>;

    /// True if a complete or in-progress message is waiting on `link_id`.
    ///
    /// # Errors
    ///
    /// [`HalError::UnsupportedDevice`] if `link_id` does not name a
    /// configured link.
    fn is_message_available(&self, link_id: LinkId) -> Result<bool, HalError>;

    /// Size in bytes of the message currently available on `link_id`.
    ///
    /// # Errors
    ///
    /// [`HalError::MessageNotAvailable`] if no message is pending.
    fn get_receive_message_size(&self, link_id: LinkId) -> Result<usize, HalError>;

    /// Receive `size_to_receive` bytes of a `total_len`-byte message,
    /// `already_received` bytes into the transfer, into `buf`.
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidReceiveSize`] if the requested range exceeds
    /// `total_len`. [`HalError::MessageNotAvailable`] if no message is
    /// pending. [`HalError::MessageTooLarge`] if `buf` cannot hold
    /// `size_to_receive` bytes.
    fn receive_message(
        &self,
        link_id: LinkId,
        buf: &mut [u8],
        total_len: usize,
        already_received: usize,
        size_to_receive: usize,
    ) -> Result<(), HalError>;

    /// Initialize all configured links (mask/unmask channels, enable the
    /// notify interrupt). Idempotent.
    ///
    /// # Errors
    ///
    /// [`HalError::UnsupportedDevice`] if a configured link names a device
    /// type this HAL cannot drive.
    fn init(&self) -> Result<(), HalError>;
}
