//! Trusted-subnet table: per-subnet handshake state, per-peer sequence
//! numbers, and the anti-replay sliding window (spec.md §3.2, §3.3, §8
//! property 4).

use sfcp_crypto::{CryptographyMode, KeyId};

use crate::error::SfcpError;

/// Width of the anti-replay sliding window, in sequence numbers
/// (`SFCP_INFLIGHT_BITFIELD_SIZE`).
pub const ANTI_REPLAY_WINDOW: u16 = 8;

/// Sequence number threshold at which a subnet must re-key
/// (`SFCP_TRUSTED_SUBNET_RE_KEY_SEQ_NUM`).
pub const RE_KEY_SEQ_NUM: u16 = u16::MAX - 16;

/// Trust level of a subnet, governing the handshake's initial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetType {
    /// No handshake required; always encrypted with a pre-shared key.
    TrustedLinks,
    /// Session-key setup first, then a mutual-auth round before the subnet
    /// is treated as trusted.
    InitiallyUntrustedLinks,
    /// Session-key setup required; never implicitly trusted.
    UntrustedLinks,
}

/// Trusted-subnet handshake state (spec.md §4.3).
///
/// 22 distinct values: the session-key setup and re-keying ladders, plus the
/// four mutual-authentication states layered on top for
/// [`SubnetType::InitiallyUntrustedLinks`] subnets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No handshake is required; the subnet is always encrypted (or never
    /// is) with a pre-provisioned key.
    SessionKeySetupNotRequired,
    /// Session-key setup has not yet started.
    SessionKeySetupRequired,
    /// This node is the initiator and has just started setup.
    SessionKeySetupInitiatorStarted,
    /// Client: sent `CLIENT_SESSION_KEY_REQUEST_MSG`, awaiting empty reply.
    SessionKeySetupSentClientRequest,
    /// Server: received a client request and sent its empty reply; about to
    /// broadcast `GET_IV_MSG`.
    SessionKeySetupReceivedClientRequest,
    /// Client: received the server's empty reply to the session key
    /// request, awaiting `GET_IV_MSG`.
    SessionKeySetupReceivedClientRequestServerReply,
    /// Server: broadcast `GET_IV_MSG` to every client, awaiting all
    /// `GET_IV_REPLY`s.
    SessionKeySetupSentGetIvMsg,
    /// Client: sent `GET_IV_REPLY`, awaiting `SEND_IVS_MSG`.
    SessionKeySetupSentGetIvReply,
    /// Server: broadcast `SEND_IVS_MSG`, awaiting empty replies from every
    /// client.
    SessionKeySetupSentSendIvsMsg,
    /// Client: acknowledged `SEND_IVS_MSG`; key derivation happens
    /// immediately (this state is transient).
    SessionKeySetupSentSendIvsReply,
    /// Session key installed and valid; the subnet may send and receive
    /// encrypted traffic.
    SessionKeySetupValid,
    /// The send sequence number has reached [`RE_KEY_SEQ_NUM`]; re-keying
    /// must run before any further send.
    ReKeyingRequired,
    /// This node is the initiator and has just started re-keying.
    ReKeyingInitiatorStarted,
    /// Client: sent `CLIENT_RE_KEY_REQUEST_MSG`, awaiting empty reply.
    ReKeyingSentClientRequest,
    /// Client: received the server's empty reply, awaiting
    /// `SERVER_RE_KEY_SEND_IVS_MSG`.
    ReKeyingReceivedClientRequestServerReply,
    /// Server: received a client's re-key request.
    ReKeyingReceivedClientRequest,
    /// Server: broadcast its single IV via `SEND_IVS_MSG`, awaiting empty
    /// replies.
    ReKeyingSendSendIvsMsg,
    /// Client: received `SERVER_RE_KEY_SEND_IVS_MSG`; key derivation
    /// happens immediately (transient).
    ReKeyingReceivedSendIvsMsg,
    /// Mutual authentication must run before the subnet is trusted.
    MutualAuthRequired,
    /// Server: broadcast `CLIENT_AUTH_MSG` to every peer, awaiting replies.
    MutualAuthSentAuthMsg,
    /// Client: session key installed, awaiting the server's
    /// `CLIENT_AUTH_MSG`.
    MutualAuthWaitingForAuthMsg,
    /// Mutual authentication is complete; the subnet is now treated as
    /// [`SubnetType::TrustedLinks`].
    MutualAuthCompleted,
}

impl HandshakeState {
    /// `(requires_handshake, requires_encryption)` for the current state,
    /// mirroring `sfcp_trusted_subnet_state_requires_handshake_encryption`.
    #[must_use]
    pub const fn requires_handshake_encryption(self) -> (bool, bool) {
        match self {
            Self::SessionKeySetupRequired => (true, true),
            Self::SessionKeySetupInitiatorStarted
            | Self::SessionKeySetupSentClientRequest
            | Self::SessionKeySetupReceivedClientRequest
            | Self::SessionKeySetupReceivedClientRequestServerReply
            | Self::SessionKeySetupSentGetIvMsg
            | Self::SessionKeySetupSentGetIvReply
            | Self::SessionKeySetupSentSendIvsMsg
            | Self::SessionKeySetupSentSendIvsReply => (false, false),
            Self::SessionKeySetupValid => (false, true),
            Self::ReKeyingRequired => (true, true),
            Self::ReKeyingInitiatorStarted
            | Self::ReKeyingSentClientRequest
            | Self::ReKeyingReceivedClientRequestServerReply
            | Self::ReKeyingReceivedClientRequest
            | Self::ReKeyingSendSendIvsMsg
            | Self::ReKeyingReceivedSendIvsMsg => (false, true),
            Self::SessionKeySetupNotRequired => (false, false),
            Self::MutualAuthRequired => (true, false),
            Self::MutualAuthSentAuthMsg | Self::MutualAuthWaitingForAuthMsg => (false, true),
            Self::MutualAuthCompleted => (false, false),
        }
    }
}

fn initial_state(subnet_type: SubnetType) -> HandshakeState {
    match subnet_type {
        SubnetType::TrustedLinks => HandshakeState::SessionKeySetupNotRequired,
        SubnetType::InitiallyUntrustedLinks => HandshakeState::MutualAuthRequired,
        SubnetType::UntrustedLinks => HandshakeState::SessionKeySetupRequired,
    }
}

/// Per-peer sequence-number and anti-replay state within a subnet.
#[derive(Debug, Clone, Copy)]
pub struct TrustedSubnetNode {
    /// This peer's node id.
    pub id: u8,
    send_seq_num: u16,
    recv_seq_num: u16,
    bitfield_start_index: u8,
    inflight_bitfield: u8,
}

impl TrustedSubnetNode {
    fn new(id: u8) -> Self {
        Self { id, send_seq_num: 0, recv_seq_num: 0, bitfield_start_index: 0, inflight_bitfield: 0 }
    }

    fn reset_seq_nums(&mut self) {
        self.send_seq_num = 0;
        self.recv_seq_num = 0;
        self.bitfield_start_index = 0;
        self.inflight_bitfield = 0;
    }

    /// Current receive low-edge, for tests and diagnostics.
    #[must_use]
    pub const fn recv_seq_num(&self) -> u16 {
        self.recv_seq_num
    }

    /// Current send high-edge, for tests and diagnostics.
    #[must_use]
    pub const fn send_seq_num(&self) -> u16 {
        self.send_seq_num
    }
}

/// Platform-supplied, engine-owned per-subnet state (spec.md §3.2).
#[derive(Debug, Clone)]
pub struct TrustedSubnetConfig {
    /// This subnet's id.
    pub id: u8,
    subnet_type: SubnetType,
    mode: CryptographyMode,
    key_id: Option<KeyId>,
    nodes: Vec<TrustedSubnetNode>,
    state: HandshakeState,
    server_node_id: u8,
}

impl TrustedSubnetConfig {
    /// Construct a subnet from its platform-provided member list.
    ///
    /// The server is always `min(node_ids)`, computed once here and
    /// asserted stable for the subnet's lifetime (spec.md §9 Open Question
    /// (b)).
    ///
    /// # Panics
    ///
    /// Panics if `node_ids` is empty; a subnet with no members is a platform
    /// configuration error caught at startup, not a runtime condition.
    #[must_use]
    pub fn new(id: u8, subnet_type: SubnetType, mode: CryptographyMode, node_ids: &[u8]) -> Self {
        assert!(!node_ids.is_empty(), "trusted subnet {id} configured with no members");
        let server_node_id = node_ids.iter().copied().min().unwrap_or(0);
        Self {
            id,
            subnet_type,
            mode,
            key_id: None,
            nodes: node_ids.iter().copied().map(TrustedSubnetNode::new).collect(),
            state: initial_state(subnet_type),
            server_node_id,
        }
    }

    /// This subnet's configured AEAD mode.
    #[must_use]
    pub const fn mode(&self) -> CryptographyMode {
        self.mode
    }

    /// Currently-installed session key, if any.
    #[must_use]
    pub const fn key_id(&self) -> Option<KeyId> {
        self.key_id
    }

    /// Install a new session key (setup or re-key completion).
    pub fn set_key_id(&mut self, key_id: KeyId) {
        self.key_id = Some(key_id);
    }

    /// Current handshake state.
    #[must_use]
    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    /// Drive the handshake state machine forward.
    pub fn set_state(&mut self, state: HandshakeState) {
        tracing::debug!(subnet = self.id, ?state, "trusted subnet state transition");
        self.state = state;
    }

    /// Subnet type. After mutual-auth completion this becomes
    /// [`SubnetType::TrustedLinks`].
    #[must_use]
    pub const fn subnet_type(&self) -> SubnetType {
        self.subnet_type
    }

    /// Promote the subnet to [`SubnetType::TrustedLinks`] after mutual
    /// authentication completes.
    pub fn promote_to_trusted(&mut self) {
        self.subnet_type = SubnetType::TrustedLinks;
    }

    /// The lowest-id member, which coordinates the handshake.
    #[must_use]
    pub const fn server_node_id(&self) -> u8 {
        self.server_node_id
    }

    /// True if `my_id` is this subnet's server.
    #[must_use]
    pub fn is_server(&self, my_id: u8) -> bool {
        self.server_node_id == my_id
    }

    /// True if `peer` is a member of this subnet.
    #[must_use]
    pub fn has_node(&self, peer: u8) -> bool {
        self.nodes.iter().any(|n| n.id == peer)
    }

    /// Iterate the ids of every member other than `my_id`.
    pub fn other_members(&self, my_id: u8) -> impl Iterator<Item = u8> + '_ {
        self.nodes.iter().map(|n| n.id).filter(move |&id| id != my_id)
    }

    /// Number of members in this subnet.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.nodes.len()
    }

    fn node_index(&self, peer: u8) -> Result<usize, SfcpError> {
        self.nodes
            .iter()
            .position(|n| n.id == peer)
            .ok_or(SfcpError::InvalidNode { node_id: peer })
    }

    /// Allocate the next strictly-increasing send sequence number for
    /// `peer` (spec.md §8 property 3).
    ///
    /// # Errors
    ///
    /// [`SfcpError::InvalidNode`] if `peer` is not a member.
    /// [`SfcpError::SequenceNumberExhausted`] if the next sequence number
    /// would reach [`RE_KEY_SEQ_NUM`] while re-keying is not yet possible to
    /// start (spec.md §9 Open Question (a)).
    pub fn get_send_seq_num(&mut self, peer: u8) -> Result<u16, SfcpError> {
        let idx = self.node_index(peer)?;
        let seq = self.nodes[idx].send_seq_num;

        if seq >= RE_KEY_SEQ_NUM && self.state != HandshakeState::SessionKeySetupValid {
            return Err(SfcpError::SequenceNumberExhausted);
        }

        let next = seq.wrapping_add(1);
        self.nodes[idx].send_seq_num = next;

        // The original post-increments the counter and checks the
        // incremented value, so the transition fires one call earlier than
        // checking the returned (pre-increment) `seq` would: no message is
        // ever sent with `seq == RE_KEY_SEQ_NUM` under the old key.
        if next >= RE_KEY_SEQ_NUM && self.state == HandshakeState::SessionKeySetupValid {
            self.set_state(HandshakeState::ReKeyingRequired);
        }

        Ok(seq)
    }

    /// Validate and absorb a received sequence number against the sliding
    /// anti-replay window (spec.md §8 property 4).
    ///
    /// # Errors
    ///
    /// [`SfcpError::InvalidNode`], [`SfcpError::MsgAlreadyReceived`], or
    /// [`SfcpError::MsgOutOfOrderTemporaryFailure`].
    pub fn check_recv_seq_num(&mut self, peer: u8, seq: u16) -> Result<(), SfcpError> {
        let idx = self.node_index(peer)?;
        let node = &mut self.nodes[idx];

        if seq < node.recv_seq_num {
            return Err(SfcpError::MsgAlreadyReceived);
        }

        let offset = seq - node.recv_seq_num;
        if offset >= ANTI_REPLAY_WINDOW {
            return Err(SfcpError::MsgOutOfOrderTemporaryFailure);
        }

        let bit_index = (u16::from(node.bitfield_start_index) + offset) % ANTI_REPLAY_WINDOW;
        let mask = 1u8 << bit_index;
        if node.inflight_bitfield & mask != 0 {
            return Err(SfcpError::MsgAlreadyReceived);
        }
        node.inflight_bitfield |= mask;

        while node.inflight_bitfield & (1u8 << node.bitfield_start_index) != 0 {
            node.inflight_bitfield &= !(1u8 << node.bitfield_start_index);
            node.bitfield_start_index = ((u16::from(node.bitfield_start_index) + 1)
                % ANTI_REPLAY_WINDOW) as u8;
            node.recv_seq_num = node.recv_seq_num.wrapping_add(1);
        }

        Ok(())
    }

    /// Reset every member's sequence counters and anti-replay window to
    /// zero, as required after a successful re-key.
    pub fn reset_all_seq_nums(&mut self) {
        for node in &mut self.nodes {
            node.reset_seq_nums();
        }
    }

    /// Borrow a member's sequence/window state, for tests and diagnostics.
    #[must_use]
    pub fn node(&self, peer: u8) -> Option<&TrustedSubnetNode> {
        self.nodes.iter().find(|n| n.id == peer)
    }

    /// Set `peer`'s send sequence number directly, bypassing
    /// [`TrustedSubnetConfig::get_send_seq_num`]'s normal allocation path.
    /// Lets integration tests reach the re-key threshold without driving
    /// tens of thousands of real sends first.
    #[cfg(feature = "test-support")]
    pub fn force_send_seq_num(&mut self, peer: u8, seq_num: u16) {
        if let Ok(idx) = self.node_index(peer) {
            self.nodes[idx].send_seq_num = seq_num;
        }
    }

    /// Set `peer`'s receive low-edge directly, discarding any in-flight
    /// anti-replay window state. Companion to
    /// [`TrustedSubnetConfig::force_send_seq_num`]: lets a test move a
    /// sender and its peer's receive window to the same point together.
    #[cfg(feature = "test-support")]
    pub fn force_recv_seq_num(&mut self, peer: u8, seq_num: u16) {
        if let Ok(idx) = self.node_index(peer) {
            self.nodes[idx].recv_seq_num = seq_num;
            self.nodes[idx].bitfield_start_index = 0;
            self.nodes[idx].inflight_bitfield = 0;
        }
    }
}

/// Platform-wide table of configured trusted subnets.
#[derive(Debug, Default)]
pub struct SubnetTable {
    subnets: Vec<TrustedSubnetConfig>,
}

impl SubnetTable {
    /// Build a table from the platform-provided subnet vector.
    #[must_use]
    pub fn new(subnets: Vec<TrustedSubnetConfig>) -> Self {
        Self { subnets }
    }

    /// Look up a subnet by id.
    #[must_use]
    pub fn get(&self, id: u8) -> Option<&TrustedSubnetConfig> {
        self.subnets.iter().find(|s| s.id == id)
    }

    /// Look up a subnet by id, mutably.
    pub fn get_mut(&mut self, id: u8) -> Option<&mut TrustedSubnetConfig> {
        self.subnets.iter_mut().find(|s| s.id == id)
    }

    /// Resolve the unique subnet containing `peer`, if exactly one exists.
    ///
    /// # Errors
    ///
    /// [`SfcpError::TrustedSubnetMustBeManuallySelected`] if `peer` belongs
    /// to more than one configured subnet.
    pub fn resolve_for_peer(&self, peer: u8) -> Result<Option<u8>, SfcpError> {
        let mut matches = self.subnets.iter().filter(|s| s.has_node(peer));
        match (matches.next(), matches.next()) {
            (None, _) => Ok(None),
            (Some(s), None) => Ok(Some(s.id)),
            (Some(_), Some(_)) => Err(SfcpError::TrustedSubnetMustBeManuallySelected),
        }
    }

    /// Iterate every configured subnet.
    pub fn iter(&self) -> impl Iterator<Item = &TrustedSubnetConfig> {
        self.subnets.iter()
    }

    /// Iterate every configured subnet, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrustedSubnetConfig> {
        self.subnets.iter_mut()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn subnet() -> TrustedSubnetConfig {
        TrustedSubnetConfig::new(0, SubnetType::UntrustedLinks, CryptographyMode::Aes256Ccm, &[1, 2])
    }

    #[test]
    fn server_is_lowest_id() {
        let s = TrustedSubnetConfig::new(
            0,
            SubnetType::UntrustedLinks,
            CryptographyMode::Aes256Ccm,
            &[5, 1, 3],
        );
        assert_eq!(s.server_node_id(), 1);
    }

    #[test]
    fn initial_state_matches_subnet_type() {
        assert_eq!(
            TrustedSubnetConfig::new(0, SubnetType::TrustedLinks, CryptographyMode::Aes256Ccm, &[1])
                .state(),
            HandshakeState::SessionKeySetupNotRequired
        );
        assert_eq!(
            TrustedSubnetConfig::new(
                0,
                SubnetType::InitiallyUntrustedLinks,
                CryptographyMode::Aes256Ccm,
                &[1]
            )
            .state(),
            HandshakeState::MutualAuthRequired
        );
        assert_eq!(subnet().state(), HandshakeState::SessionKeySetupRequired);
    }

    #[test]
    fn send_seq_num_is_strictly_monotonic() {
        let mut s = subnet();
        s.set_state(HandshakeState::SessionKeySetupValid);
        for expected in 0u16..10 {
            assert_eq!(s.get_send_seq_num(1).unwrap(), expected);
        }
    }

    #[test]
    fn send_seq_num_triggers_re_key_at_threshold() {
        let mut s = subnet();
        s.set_state(HandshakeState::SessionKeySetupValid);
        for expected in 0..(RE_KEY_SEQ_NUM - 1) {
            assert_eq!(s.get_send_seq_num(1).unwrap(), expected);
            assert_eq!(s.state(), HandshakeState::SessionKeySetupValid);
        }
        // The call returning RE_KEY_SEQ_NUM - 1 is the last one sent under
        // the old key: the counter it bumps to is RE_KEY_SEQ_NUM itself, so
        // the transition fires on this very call, not the next one.
        assert_eq!(s.get_send_seq_num(1).unwrap(), RE_KEY_SEQ_NUM - 1);
        assert_eq!(s.state(), HandshakeState::ReKeyingRequired);
    }

    #[test]
    fn send_seq_num_exhausted_while_rekey_pending() {
        let mut s = subnet();
        s.set_state(HandshakeState::ReKeyingSentClientRequest);
        for node in &mut s.nodes {
            node.send_seq_num = RE_KEY_SEQ_NUM;
        }
        let err = s.get_send_seq_num(1).unwrap_err();
        assert_eq!(err, SfcpError::SequenceNumberExhausted);
    }

    #[test]
    fn recv_window_detects_replay_and_out_of_order() {
        let mut s = subnet();
        s.check_recv_seq_num(1, 0).unwrap();
        assert_eq!(s.check_recv_seq_num(1, 0).unwrap_err(), SfcpError::MsgAlreadyReceived);
        assert_eq!(
            s.check_recv_seq_num(1, ANTI_REPLAY_WINDOW).unwrap_err(),
            SfcpError::MsgOutOfOrderTemporaryFailure
        );
    }

    #[test]
    fn recv_window_slides_on_contiguous_delivery() {
        let mut s = subnet();
        for seq in 0..5 {
            s.check_recv_seq_num(1, seq).unwrap();
        }
        assert_eq!(s.node(1).unwrap().recv_seq_num(), 5);
    }

    #[test]
    fn recv_window_slides_once_gap_fills_in() {
        let mut s = subnet();
        s.check_recv_seq_num(1, 0).unwrap();
        s.check_recv_seq_num(1, 2).unwrap();
        assert_eq!(s.node(1).unwrap().recv_seq_num(), 1, "seq 1 still missing");
        s.check_recv_seq_num(1, 1).unwrap();
        assert_eq!(s.node(1).unwrap().recv_seq_num(), 3);
    }

    #[test]
    fn resolve_for_peer_requires_manual_selection_on_overlap() {
        let a = TrustedSubnetConfig::new(0, SubnetType::UntrustedLinks, CryptographyMode::Aes256Ccm, &[1, 2]);
        let b = TrustedSubnetConfig::new(1, SubnetType::UntrustedLinks, CryptographyMode::Aes256Ccm, &[1, 3]);
        let table = SubnetTable::new(vec![a, b]);
        assert_eq!(table.resolve_for_peer(2).unwrap(), Some(0));
        assert_eq!(
            table.resolve_for_peer(1).unwrap_err(),
            SfcpError::TrustedSubnetMustBeManuallySelected
        );
        assert_eq!(table.resolve_for_peer(9).unwrap(), None);
    }
}
