//! The single mailbox register pair a hardware MHU channel exposes.

use crate::fragment::MHU_NOTIFY_VALUE;

/// One mailbox register pair: a word a sender writes and a receiver reads.
///
/// Stands in for a single MHUv2/v3 channel. `raise`/`is_raised`/`clear` are
/// the doorbell-specific view of the same register (writing/reading the
/// reserved notify value) and have sensible defaults in terms of
/// `write_word`/`read_word`; most implementations only need to provide
/// those two.
pub trait DoorbellChannel: Send + Sync {
    /// Write a word to this channel.
    fn write_word(&self, value: u32);

    /// Read the word currently held by this channel.
    fn read_word(&self) -> u32;

    /// Signal this channel's doorbell.
    fn raise(&self) {
        self.write_word(MHU_NOTIFY_VALUE);
    }

    /// True if this channel's doorbell is currently signalled.
    fn is_raised(&self) -> bool {
        self.read_word() == MHU_NOTIFY_VALUE
    }

    /// Acknowledge and silence this channel's doorbell.
    fn clear(&self) {
        self.write_word(0);
    }
}
