//! Doorbell word-fragmentation math: which physical channel carries which
//! word of a message, independent of any particular transport.
//!
//! Channel `NUM_CHANNELS - 1` is reserved for the notify doorbell. Channel 0
//! carries the message length (in bytes) only on the very first round; every
//! other channel, on every round, carries one payload word. This mirrors
//! `mhu_send_message`/`mhu_receive_message`'s channel bookkeeping exactly so
//! a hardware MHU driver and [`crate::MemoryLinkHal`] agree on wire shape.

/// Number of mailbox channels required by this HAL (matches
/// `MHU_REQUIRED_NUMBER_CHANNELS`).
pub const NUM_CHANNELS: u32 = 4;

/// Value written to the notify channel to signal a pending transfer.
pub const MHU_NOTIFY_VALUE: u32 = 1234;

/// Data-carrying channels available on the very first round (channel 0 is
/// occupied by the message length).
pub const FIRST_ROUND_DATA_CHANNELS: u32 = NUM_CHANNELS - 2;

/// Data-carrying channels available on every round after the first (channel
/// 0 is free again).
pub const LATER_ROUND_DATA_CHANNELS: u32 = NUM_CHANNELS - 1;

/// Physical channel index that carries the payload word at `word_index`
/// (0-based, counting only payload words, not the length word).
#[must_use]
pub fn channel_for_word_index(word_index: u32) -> u32 {
    if word_index < FIRST_ROUND_DATA_CHANNELS {
        1 + word_index
    } else {
        (word_index - FIRST_ROUND_DATA_CHANNELS) % LATER_ROUND_DATA_CHANNELS
    }
}

/// True if writing/reading the word at `word_index` completes a round and
/// the sender must raise the notify doorbell / the receiver must wait for
/// the next one before continuing.
#[must_use]
pub fn completes_round(word_index: u32, total_words: u32) -> bool {
    let is_last_word = word_index + 1 == total_words;
    let channel = channel_for_word_index(word_index);
    channel == LATER_ROUND_DATA_CHANNELS - 1 && !is_last_word
}

/// Number of 32-bit words needed to carry `byte_len` bytes, rounding up.
#[must_use]
pub fn words_for_bytes(byte_len: usize) -> u32 {
    ((byte_len + 3) / 4) as u32
}

/// Pack `bytes` into little-endian 32-bit words, zero-padding the final
/// word if `bytes.len()` is not a multiple of 4.
#[must_use]
pub fn pack_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word_bytes = [0u8; 4];
            word_bytes[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word_bytes)
        })
        .collect()
}

/// Unpack `words` into exactly `byte_len` bytes (the final word may contain
/// padding beyond `byte_len`, which is dropped).
#[must_use]
pub fn unpack_words(words: &[u32], byte_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(byte_len);
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.truncate(byte_len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_two_words_use_channels_one_and_two() {
        assert_eq!(channel_for_word_index(0), 1);
        assert_eq!(channel_for_word_index(1), 2);
    }

    #[test]
    fn later_words_cycle_through_all_three_data_channels() {
        assert_eq!(channel_for_word_index(2), 0);
        assert_eq!(channel_for_word_index(3), 1);
        assert_eq!(channel_for_word_index(4), 2);
        assert_eq!(channel_for_word_index(5), 0);
    }

    #[test]
    fn pack_and_unpack_round_trip_with_padding() {
        let bytes = b"hello firmware!!".to_vec();
        let words = pack_words(&bytes);
        assert_eq!(words.len(), words_for_bytes(bytes.len()) as usize);
        let round_tripped = unpack_words(&words, bytes.len());
        assert_eq!(round_tripped, bytes);
    }

    #[test]
    fn pack_and_unpack_round_trip_unaligned() {
        let bytes = b"odd".to_vec();
        let words = pack_words(&bytes);
        assert_eq!(words.len(), 1);
        assert_eq!(unpack_words(&words, bytes.len()), bytes);
    }

    #[test]
    fn round_completes_when_last_data_channel_is_filled() {
        assert!(!completes_round(0, 10));
        assert!(completes_round(1, 10), "first round ends after channel 2 (word index 1)");
        assert!(completes_round(4, 10), "later rounds also end at channel 2 (word index 4)");
        assert!(!completes_round(9, 10), "final word never needs another round");
    }
}
