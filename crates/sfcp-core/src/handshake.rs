//! Trusted-subnet handshake state machine: key-setup, re-keying, and
//! mutual-auth (spec.md §4.3).
//!
//! Pure Sans-IO logic: every entry point takes the current subnet and
//! scratchpad state plus the crypto HAL (for hashing, random IVs, and key
//! derivation — never for transport) and returns a list of
//! [`HandshakeAction`]s describing what to send. No method here ever
//! touches a [`sfcp_hal::LinkHal`] directly; the caller (`sfcp-core::engine`)
//! executes the actions through its own send path, which is also the layer
//! that knows whether the current state requires the action's payload to be
//! encrypted.

use std::collections::HashMap;

use sfcp_crypto::{CryptoHal, IV_SIZE};

use crate::error::SfcpError;
use crate::subnet::{HandshakeState, SubnetType, TrustedSubnetConfig};

/// Wire-encoded handshake message type (`sfcp_handshake_msg_type_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum HandshakeMsgType {
    /// Client → server: request session-key setup.
    ClientSessionKeyRequest = 0x1010,
    /// Server → client: request this client's IV.
    ServerGetIv = 0x1020,
    /// Server → client: broadcast every member's IV.
    ServerSendIvs = 0x1030,
    /// Client → server: request a re-key.
    ClientReKeyRequest = 0x2010,
    /// Server → client: broadcast the re-key IV.
    ServerReKeySendIvs = 0x2030,
    /// Server → client: mutual-authentication challenge.
    ClientAuth = 0x3010,
}

impl HandshakeMsgType {
    const fn to_wire(self) -> u16 {
        self as u16
    }

    const fn from_wire(value: u16) -> Option<Self> {
        match value {
            0x1010 => Some(Self::ClientSessionKeyRequest),
            0x1020 => Some(Self::ServerGetIv),
            0x1030 => Some(Self::ServerSendIvs),
            0x2010 => Some(Self::ClientReKeyRequest),
            0x2030 => Some(Self::ServerReKeySendIvs),
            0x3010 => Some(Self::ClientAuth),
            _ => None,
        }
    }
}

/// The 3-byte `{type, trusted_subnet_id}` header carried by every
/// non-reply handshake message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MsgHeader {
    msg_type: HandshakeMsgType,
    trusted_subnet_id: u8,
}

impl MsgHeader {
    fn encode(self) -> [u8; 3] {
        let bytes = self.msg_type.to_wire().to_le_bytes();
        [bytes[0], bytes[1], self.trusted_subnet_id]
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 3 {
            return None;
        }
        let msg_type = HandshakeMsgType::from_wire(u16::from_le_bytes([buf[0], buf[1]]))?;
        Some(Self { msg_type, trusted_subnet_id: buf[2] })
    }
}

fn encode_send_ivs(header: MsgHeader, ivs: &[[u8; IV_SIZE]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + ivs.len() * IV_SIZE);
    out.extend_from_slice(&header.encode());
    #[allow(clippy::cast_possible_truncation)]
    out.push(ivs.len() as u8);
    for iv in ivs {
        out.extend_from_slice(iv);
    }
    out
}

fn decode_send_ivs(buf: &[u8]) -> Option<(MsgHeader, Vec<[u8; IV_SIZE]>)> {
    let header = MsgHeader::decode(buf)?;
    let iv_amount = usize::from(*buf.get(3)?);
    let body = buf.get(4..4 + iv_amount * IV_SIZE)?;
    let ivs = body.chunks_exact(IV_SIZE).map(|c| c.try_into().unwrap_or([0u8; IV_SIZE])).collect();
    Some((header, ivs))
}

/// A side effect the handshake state machine wants performed. The caller
/// executes these through the session engine's own send path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Send a new handshake message expecting a reply.
    SendMsg {
        /// Destination node.
        to: u8,
        /// Raw payload bytes (a handshake message shape, pre-serialized).
        payload: Vec<u8>,
    },
    /// Acknowledge a received handshake message.
    SendReply {
        /// Destination node.
        to: u8,
        /// `message_id` of the request being replied to.
        message_id: u8,
        /// Raw reply payload (empty for a bare ack, or an IV for
        /// `GET_IV_REPLY`).
        payload: Vec<u8>,
    },
}

/// Outcome of feeding the driver a poll tick or inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeProgress {
    /// The handshake has not yet reached a terminal state.
    Waiting,
    /// The subnet is ready (`SessionKeySetupValid` or `MutualAuthCompleted`).
    Complete,
}

/// Per-subnet handshake scratchpad (spec.md §3.3): outstanding request ids,
/// which peers have replied this round, and collected IVs.
#[derive(Debug, Default)]
pub struct HandshakeScratch {
    send_message_id: HashMap<u8, u8>,
    received_node_replies: HashMap<u8, bool>,
    node_ivs: HashMap<u8, [u8; IV_SIZE]>,
    own_iv: Option<[u8; IV_SIZE]>,
    next_message_id: u8,
}

impl HandshakeScratch {
    fn alloc_message_id(&mut self, peer: u8) -> u8 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        self.send_message_id.insert(peer, id);
        id
    }

    fn reset_round(&mut self, members: impl Iterator<Item = u8>) {
        self.received_node_replies.clear();
        self.node_ivs.clear();
        for peer in members {
            self.received_node_replies.insert(peer, false);
        }
    }

    fn mark_replied(&mut self, peer: u8) {
        self.received_node_replies.insert(peer, true);
    }

    fn all_replied(&self) -> bool {
        !self.received_node_replies.is_empty() && self.received_node_replies.values().all(|&v| v)
    }
}

fn random_iv(crypto: &dyn CryptoHal) -> Result<[u8; IV_SIZE], SfcpError> {
    let mut iv = [0u8; IV_SIZE];
    crypto.random(&mut iv).map_err(|_| SfcpError::InternalHandshakeFailure)?;
    Ok(iv)
}

fn derive_initial_key(
    crypto: &dyn CryptoHal,
    subnet: &mut TrustedSubnetConfig,
    ivs: &[[u8; IV_SIZE]],
) -> Result<(), SfcpError> {
    let key_id =
        crypto.derive_session_key(ivs).map_err(|_| SfcpError::InternalHandshakeFailure)?;
    subnet.set_key_id(key_id);
    Ok(())
}

fn derive_rekey(
    crypto: &dyn CryptoHal,
    subnet: &mut TrustedSubnetConfig,
    iv: &[u8; IV_SIZE],
) -> Result<(), SfcpError> {
    let key_id =
        crypto.rekey_session_key(iv).map_err(|_| SfcpError::InternalHandshakeFailure)?;
    subnet.set_key_id(key_id);
    subnet.reset_all_seq_nums();
    Ok(())
}

fn complete_mutual_auth(crypto: &dyn CryptoHal, subnet: &mut TrustedSubnetConfig) {
    if let Some(key_id) = subnet.key_id() {
        let _ = crypto.invalidate_key(key_id);
    }
    subnet.promote_to_trusted();
    subnet.set_state(HandshakeState::MutualAuthCompleted);
}

/// Start (or restart) the handshake for `subnet`, per its current state.
///
/// # Errors
///
/// [`SfcpError::InvalidTrustedSubnetState`] if the current state is not one
/// from which a handshake may be initiated.
pub fn initiate(
    subnet: &mut TrustedSubnetConfig,
    scratch: &mut HandshakeScratch,
    crypto: &dyn CryptoHal,
    my_node_id: u8,
) -> Result<Vec<HandshakeAction>, SfcpError> {
    let re_keying = match subnet.state() {
        HandshakeState::MutualAuthRequired | HandshakeState::SessionKeySetupRequired => false,
        HandshakeState::ReKeyingRequired => true,
        _ => return Err(SfcpError::InvalidTrustedSubnetState),
    };

    subnet.set_state(if re_keying {
        HandshakeState::ReKeyingInitiatorStarted
    } else {
        HandshakeState::SessionKeySetupInitiatorStarted
    });

    if subnet.is_server(my_node_id) {
        scratch.reset_round(subnet.other_members(my_node_id));

        if re_keying {
            let iv = random_iv(crypto)?;
            scratch.own_iv = Some(iv);
            let header =
                MsgHeader { msg_type: HandshakeMsgType::ServerReKeySendIvs, trusted_subnet_id: subnet.id };
            let payload = encode_send_ivs(header, &[iv]);
            subnet.set_state(HandshakeState::ReKeyingSendSendIvsMsg);
            Ok(broadcast(subnet, my_node_id, scratch, payload))
        } else {
            let header = MsgHeader { msg_type: HandshakeMsgType::ServerGetIv, trusted_subnet_id: subnet.id };
            let payload = header.encode().to_vec();
            subnet.set_state(HandshakeState::SessionKeySetupSentGetIvMsg);
            Ok(broadcast(subnet, my_node_id, scratch, payload))
        }
    } else {
        let server = subnet.server_node_id();
        let msg_type =
            if re_keying { HandshakeMsgType::ClientReKeyRequest } else { HandshakeMsgType::ClientSessionKeyRequest };
        let header = MsgHeader { msg_type, trusted_subnet_id: subnet.id };
        let message_id = scratch.alloc_message_id(server);
        subnet.set_state(if re_keying {
            HandshakeState::ReKeyingSentClientRequest
        } else {
            HandshakeState::SessionKeySetupSentClientRequest
        });
        let _ = message_id;
        Ok(vec![HandshakeAction::SendMsg { to: server, payload: header.encode().to_vec() }])
    }
}

fn broadcast(
    subnet: &TrustedSubnetConfig,
    my_node_id: u8,
    scratch: &mut HandshakeScratch,
    payload: Vec<u8>,
) -> Vec<HandshakeAction> {
    subnet
        .other_members(my_node_id)
        .map(|peer| {
            scratch.alloc_message_id(peer);
            HandshakeAction::SendMsg { to: peer, payload: payload.clone() }
        })
        .collect()
}

/// Whether an inbound packet's sequence number places it in the re-key
/// window, per spec.md §4.3's ordering rules.
#[must_use]
pub const fn is_rekey_seq(seq_num: u16) -> bool {
    seq_num >= crate::subnet::RE_KEY_SEQ_NUM
}

/// Feed an inbound handshake message (or empty reply) through the
/// responder's state dispatch.
///
/// `is_reply` distinguishes a bare acknowledgement/reply packet (matched by
/// `message_id`) from a new request/broadcast packet (matched by payload
/// shape). `encrypted` reports whether the packet arrived AEAD-protected
/// (already verified by the caller); the re-key window requires it.
/// `seq_num` is the packet's AEAD sequence number when `encrypted` is true
/// (`None` for cleartext packets, which carry none) — checked against
/// [`is_rekey_seq`] independently of what the local state machine expects,
/// per spec.md §4.3's ordering rule.
///
/// # Errors
///
/// [`SfcpError::HandshakeInvalidMsg`], [`SfcpError::HandshakeInvalidReKeyMsg`],
/// [`SfcpError::HandshakeInvalidReceivedIv`], or
/// [`SfcpError::HandshakeInvalidMutualAuthMsg`] if the packet does not match
/// what the current state expects.
#[allow(clippy::too_many_lines)]
pub fn handle_message(
    subnet: &mut TrustedSubnetConfig,
    scratch: &mut HandshakeScratch,
    crypto: &dyn CryptoHal,
    my_node_id: u8,
    sender: u8,
    message_id: u8,
    is_reply: bool,
    encrypted: bool,
    seq_num: Option<u16>,
    payload: &[u8],
) -> Result<Vec<HandshakeAction>, SfcpError> {
    // Handshake control traffic travels in the clear during session-key
    // setup (there is no key yet); a session key exists by the time
    // re-keying or mutual-auth runs, and those exchanges are required to use
    // it, independent of `requires_handshake_encryption` (which governs
    // ordinary application traffic sent while a handshake is in flight, not
    // the handshake messages themselves).
    let state = subnet.state();
    let in_rekey_ladder = matches!(
        state,
        HandshakeState::ReKeyingRequired
            | HandshakeState::ReKeyingInitiatorStarted
            | HandshakeState::ReKeyingSentClientRequest
            | HandshakeState::ReKeyingReceivedClientRequestServerReply
            | HandshakeState::ReKeyingReceivedClientRequest
            | HandshakeState::ReKeyingSendSendIvsMsg
            | HandshakeState::ReKeyingReceivedSendIvsMsg
    );
    let in_mutual_auth_round =
        matches!(state, HandshakeState::MutualAuthSentAuthMsg | HandshakeState::MutualAuthWaitingForAuthMsg);
    if in_rekey_ladder && !encrypted {
        return Err(SfcpError::HandshakeInvalidReKeyMsg);
    }
    if in_mutual_auth_round && !encrypted {
        return Err(SfcpError::HandshakeInvalidMutualAuthMsg);
    }
    // The packet's own wire sequence number can claim to be a re-key
    // message even when the local state machine never entered the rekey
    // ladder (a lagging peer, or a node that reached the threshold and
    // raced this one). Either way a re-key-numbered packet outside the
    // ladder is invalid on its face.
    if seq_num.is_some_and(is_rekey_seq) && !in_rekey_ladder {
        return Err(SfcpError::HandshakeInvalidReKeyMsg);
    }

    let reply_matches = |scratch: &HandshakeScratch| {
        scratch.send_message_id.get(&sender).is_some_and(|&id| id == message_id)
    };

    match state {
        HandshakeState::SessionKeySetupRequired | HandshakeState::MutualAuthRequired
            if !is_reply && subnet.is_server(my_node_id) =>
        {
            let header = MsgHeader::decode(payload).ok_or(SfcpError::HandshakeInvalidMsg)?;
            if header.msg_type != HandshakeMsgType::ClientSessionKeyRequest {
                return Err(SfcpError::HandshakeInvalidMsg);
            }
            subnet.set_state(HandshakeState::SessionKeySetupReceivedClientRequest);
            let mut actions = vec![HandshakeAction::SendReply { to: sender, message_id, payload: Vec::new() }];
            actions.extend(initiate_from_received_client_request(subnet, scratch, my_node_id)?);
            Ok(actions)
        },

        HandshakeState::SessionKeySetupSentClientRequest if is_reply && reply_matches(scratch) && payload.is_empty() => {
            subnet.set_state(HandshakeState::SessionKeySetupReceivedClientRequestServerReply);
            Ok(Vec::new())
        },

        HandshakeState::SessionKeySetupReceivedClientRequestServerReply if !is_reply => {
            let header = MsgHeader::decode(payload).ok_or(SfcpError::HandshakeInvalidMsg)?;
            if header.msg_type != HandshakeMsgType::ServerGetIv {
                return Err(SfcpError::HandshakeInvalidMsg);
            }
            let iv = random_iv(crypto)?;
            scratch.own_iv = Some(iv);
            subnet.set_state(HandshakeState::SessionKeySetupSentGetIvReply);
            Ok(vec![HandshakeAction::SendReply { to: sender, message_id, payload: iv.to_vec() }])
        },

        HandshakeState::SessionKeySetupSentGetIvMsg if is_reply && reply_matches(scratch) => {
            let iv: [u8; IV_SIZE] = payload.try_into().map_err(|_| SfcpError::HandshakeInvalidMsg)?;
            scratch.node_ivs.insert(sender, iv);
            scratch.mark_replied(sender);
            if !scratch.all_replied() {
                return Ok(Vec::new());
            }
            let own_iv = random_iv(crypto)?;
            scratch.node_ivs.insert(my_node_id, own_iv);
            let mut ivs: Vec<[u8; IV_SIZE]> = subnet
                .other_members(my_node_id)
                .map(|id| scratch.node_ivs.get(&id).copied().unwrap_or([0u8; IV_SIZE]))
                .collect();
            ivs.insert(0, own_iv);
            let header = MsgHeader { msg_type: HandshakeMsgType::ServerSendIvs, trusted_subnet_id: subnet.id };
            let body = encode_send_ivs(header, &ivs);
            subnet.set_state(HandshakeState::SessionKeySetupSentSendIvsMsg);
            scratch.own_iv = Some(own_iv);
            Ok(broadcast(subnet, my_node_id, scratch, body))
        },

        HandshakeState::SessionKeySetupSentGetIvReply if !is_reply => {
            let (header, ivs) = decode_send_ivs(payload).ok_or(SfcpError::HandshakeInvalidMsg)?;
            if header.msg_type != HandshakeMsgType::ServerSendIvs {
                return Err(SfcpError::HandshakeInvalidMsg);
            }
            let reply = HandshakeAction::SendReply { to: sender, message_id, payload: Vec::new() };

            if ivs.len() != subnet.member_count() {
                return Err(SfcpError::HandshakeInvalidReceivedIv);
            }
            let own_iv = scratch.own_iv.ok_or(SfcpError::InternalHandshakeFailure)?;
            if !ivs.contains(&own_iv) {
                return Err(SfcpError::HandshakeInvalidReceivedIv);
            }

            subnet.set_state(HandshakeState::SessionKeySetupSentSendIvsReply);
            derive_initial_key(crypto, subnet, &ivs)?;
            if subnet.subnet_type() == SubnetType::InitiallyUntrustedLinks {
                subnet.set_state(HandshakeState::MutualAuthWaitingForAuthMsg);
            } else {
                subnet.set_state(HandshakeState::SessionKeySetupValid);
            }
            Ok(vec![reply])
        },

        HandshakeState::SessionKeySetupSentSendIvsMsg if is_reply && reply_matches(scratch) && payload.is_empty() => {
            scratch.mark_replied(sender);
            if !scratch.all_replied() {
                return Ok(Vec::new());
            }
            let own_iv = scratch.own_iv.ok_or(SfcpError::InternalHandshakeFailure)?;
            let mut ivs: Vec<[u8; IV_SIZE]> = subnet
                .other_members(my_node_id)
                .map(|id| scratch.node_ivs.get(&id).copied().unwrap_or([0u8; IV_SIZE]))
                .collect();
            ivs.insert(0, own_iv);
            derive_initial_key(crypto, subnet, &ivs)?;

            if subnet.subnet_type() == SubnetType::InitiallyUntrustedLinks {
                let header = MsgHeader { msg_type: HandshakeMsgType::ClientAuth, trusted_subnet_id: subnet.id };
                subnet.set_state(HandshakeState::MutualAuthSentAuthMsg);
                Ok(broadcast(subnet, my_node_id, scratch, header.encode().to_vec()))
            } else {
                subnet.set_state(HandshakeState::SessionKeySetupValid);
                Ok(Vec::new())
            }
        },

        HandshakeState::MutualAuthWaitingForAuthMsg if !is_reply => {
            let header = MsgHeader::decode(payload).ok_or(SfcpError::HandshakeInvalidMutualAuthMsg)?;
            if header.msg_type != HandshakeMsgType::ClientAuth {
                return Err(SfcpError::HandshakeInvalidMutualAuthMsg);
            }
            let reply = HandshakeAction::SendReply { to: sender, message_id, payload: Vec::new() };
            complete_mutual_auth(crypto, subnet);
            Ok(vec![reply])
        },

        HandshakeState::MutualAuthSentAuthMsg if is_reply && reply_matches(scratch) && payload.is_empty() => {
            scratch.mark_replied(sender);
            if scratch.all_replied() {
                complete_mutual_auth(crypto, subnet);
            }
            Ok(Vec::new())
        },

        // --- Re-keying ladder ---
        HandshakeState::ReKeyingRequired | HandshakeState::SessionKeySetupValid
            if !is_reply && subnet.is_server(my_node_id) =>
        {
            let header = MsgHeader::decode(payload).ok_or(SfcpError::HandshakeInvalidReKeyMsg)?;
            if header.msg_type != HandshakeMsgType::ClientReKeyRequest {
                return Err(SfcpError::HandshakeInvalidReKeyMsg);
            }
            subnet.set_state(HandshakeState::ReKeyingReceivedClientRequest);
            let mut actions = vec![HandshakeAction::SendReply { to: sender, message_id, payload: Vec::new() }];
            let iv = random_iv(crypto)?;
            scratch.own_iv = Some(iv);
            let body_header =
                MsgHeader { msg_type: HandshakeMsgType::ServerReKeySendIvs, trusted_subnet_id: subnet.id };
            let body = encode_send_ivs(body_header, &[iv]);
            subnet.set_state(HandshakeState::ReKeyingSendSendIvsMsg);
            actions.extend(broadcast(subnet, my_node_id, scratch, body));
            Ok(actions)
        },

        HandshakeState::ReKeyingSentClientRequest if is_reply && reply_matches(scratch) && payload.is_empty() => {
            subnet.set_state(HandshakeState::ReKeyingReceivedClientRequestServerReply);
            Ok(Vec::new())
        },

        HandshakeState::ReKeyingReceivedClientRequestServerReply if !is_reply => {
            let (header, ivs) = decode_send_ivs(payload).ok_or(SfcpError::HandshakeInvalidReKeyMsg)?;
            if header.msg_type != HandshakeMsgType::ServerReKeySendIvs || ivs.len() != 1 {
                return Err(SfcpError::HandshakeInvalidReKeyMsg);
            }
            let reply = HandshakeAction::SendReply { to: sender, message_id, payload: Vec::new() };
            subnet.set_state(HandshakeState::ReKeyingReceivedSendIvsMsg);
            derive_rekey(crypto, subnet, &ivs[0])?;
            subnet.set_state(HandshakeState::SessionKeySetupValid);
            Ok(vec![reply])
        },

        HandshakeState::ReKeyingSendSendIvsMsg if is_reply && reply_matches(scratch) && payload.is_empty() => {
            scratch.mark_replied(sender);
            if !scratch.all_replied() {
                return Ok(Vec::new());
            }
            let own_iv = scratch.own_iv.ok_or(SfcpError::InternalHandshakeFailure)?;
            derive_rekey(crypto, subnet, &own_iv)?;
            subnet.set_state(HandshakeState::SessionKeySetupValid);
            Ok(Vec::new())
        },

        _ => Err(SfcpError::InvalidTrustedSubnetState),
    }
}

fn initiate_from_received_client_request(
    subnet: &mut TrustedSubnetConfig,
    scratch: &mut HandshakeScratch,
    my_node_id: u8,
) -> Result<Vec<HandshakeAction>, SfcpError> {
    scratch.reset_round(subnet.other_members(my_node_id));
    let header = MsgHeader { msg_type: HandshakeMsgType::ServerGetIv, trusted_subnet_id: subnet.id };
    let payload = header.encode().to_vec();
    subnet.set_state(HandshakeState::SessionKeySetupSentGetIvMsg);
    Ok(broadcast(subnet, my_node_id, scratch, payload))
}

/// Cooperative, non-blocking check of where the handshake stands.
#[must_use]
pub const fn progress(subnet: &TrustedSubnetConfig) -> HandshakeProgress {
    match subnet.state() {
        HandshakeState::SessionKeySetupValid | HandshakeState::MutualAuthCompleted => {
            HandshakeProgress::Complete
        },
        _ => HandshakeProgress::Waiting,
    }
}

/// Borrowing wrapper around the free functions above, named to match the
/// cooperative-scheduler shape a caller pumps without disabling interrupts
/// (spec.md §9's design note). `sfcp-core::engine` uses this for
/// `send_msg`'s non-blocking path; the blocking `block=true` initiator
/// instead loops the free functions directly under a
/// [`crate::lock::CriticalSection`].
///
/// There is no `Failed` progress variant: every failure surfaces
/// immediately as a `Result::Err` from [`Self::initiate`]/[`Self::on_message`]
/// rather than being latched into the subnet's state, since the underlying
/// state machine (grounded on the original's enumeration) has no terminal
/// failure state of its own — a rejected message simply leaves the subnet
/// in its current state for the caller to retry or abandon.
pub struct HandshakeDriver<'a> {
    subnet: &'a mut TrustedSubnetConfig,
    scratch: &'a mut HandshakeScratch,
    my_node_id: u8,
}

impl<'a> HandshakeDriver<'a> {
    /// Borrow the subnet and scratchpad this driver will advance.
    pub fn new(subnet: &'a mut TrustedSubnetConfig, scratch: &'a mut HandshakeScratch, my_node_id: u8) -> Self {
        Self { subnet, scratch, my_node_id }
    }

    /// Start (or restart) the handshake. See [`initiate`].
    ///
    /// # Errors
    ///
    /// See [`initiate`].
    pub fn initiate(&mut self, crypto: &dyn CryptoHal) -> Result<Vec<HandshakeAction>, SfcpError> {
        initiate(self.subnet, self.scratch, crypto, self.my_node_id)
    }

    /// Feed one inbound handshake message. See [`handle_message`].
    ///
    /// # Errors
    ///
    /// See [`handle_message`].
    #[allow(clippy::too_many_arguments)]
    pub fn on_message(
        &mut self,
        crypto: &dyn CryptoHal,
        sender: u8,
        message_id: u8,
        is_reply: bool,
        encrypted: bool,
        seq_num: Option<u16>,
        payload: &[u8],
    ) -> Result<Vec<HandshakeAction>, SfcpError> {
        handle_message(
            self.subnet,
            self.scratch,
            crypto,
            self.my_node_id,
            sender,
            message_id,
            is_reply,
            encrypted,
            seq_num,
            payload,
        )
    }

    /// Where the handshake currently stands. See [`progress`].
    #[must_use]
    pub fn progress(&self) -> HandshakeProgress {
        progress(self.subnet)
    }
}
