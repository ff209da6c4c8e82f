//! Forwarding detection (spec.md §4.2, §8 property 5).
//!
//! Multi-hop routing is unsupported: a packet whose local node is neither
//! sender nor receiver can never legitimately be handled here. MSG variants
//! are addressed by `receiver`; REPLY variants are addressed by `sender`
//! (the original requester).

use crate::header::PacketType;

/// Returns the node a packet would need to be forwarded to, if any.
///
/// - For MSG variants (`MsgNeedsReply` / `MsgNoReply`): `Some(receiver)` iff
///   `receiver != my_id`.
/// - For `Reply`: `Some(sender)` iff `sender != my_id`.
/// - For `ProtocolErrorReply`: never requires forwarding (treated like a
///   reply addressed to `sender`, but error replies are only ever emitted
///   directly back to the peer that sent the original packet).
#[must_use]
pub const fn needs_forwarding(
    sender_id: u8,
    receiver_id: u8,
    packet_type: PacketType,
    my_id: u8,
) -> Option<u8> {
    match packet_type {
        PacketType::MsgNeedsReply | PacketType::MsgNoReply => {
            if receiver_id != my_id { Some(receiver_id) } else { None }
        },
        PacketType::Reply => {
            if sender_id != my_id { Some(sender_id) } else { None }
        },
        PacketType::ProtocolErrorReply => None,
    }
}
