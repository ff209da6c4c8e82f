//! The public session-engine API: `init_msg`/`send_msg`/`receive_msg`,
//! `init_reply`/`send_reply`/`receive_reply`, and the interrupt-handler /
//! buffer-pop pipeline behind them (spec.md §4.5, §4.6).
//!
//! Every shared singleton (subnet table, handshake scratchpads, buffer
//! slab, handler tables, message-id generator) lives in one [`EngineInner`]
//! behind a single [`CriticalSection`], so "only one mutator active at a
//! time" (spec.md §5) holds structurally rather than by convention.

use std::collections::HashMap;

use sfcp_crypto::CryptoHal;
use sfcp_hal::{HalError, LinkHal, LinkId};
use sfcp_proto::{
    self, CryptoMetadata, ERROR_REPLY_SIZE, IdExtension, MIN_PACKET_BUFFER_SIZE, PacketHeader, PacketType,
    ParsedBody, ProtocolErrorCode,
};

use crate::buffer::{BufferHandle, BufferPool};
use crate::encryption;
use crate::error::SfcpError;
use crate::handlers::{HandlerFn, HandlerTable};
use crate::handshake::{self, HandshakeAction, HandshakeScratch};
use crate::lock::{CriticalSection, MutexCriticalSection};
use crate::platform::Platform;
use crate::subnet::{HandshakeState, SubnetTable, TrustedSubnetConfig, TrustedSubnetNode};

/// Capacities for the fixed-size tables an engine allocates at `new()`.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Receive buffer slab size (`MAX_CONCURRENT_REQ`).
    pub buffer_capacity: usize,
    /// Message handler table size (`MAX_MSG_HANDLERS`).
    pub msg_handler_capacity: usize,
    /// Reply handler table size (`MAX_REPLY_HANDLERS`).
    pub reply_handler_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { buffer_capacity: 16, msg_handler_capacity: 16, reply_handler_capacity: 16 }
    }
}

/// Everything `send_reply`/`receive_reply` need to address a reply back to
/// where a message came from, captured at `init_msg`/`pop_msg_from_buffer`
/// time (spec.md §3.3's "metadata is a value type" design note).
#[derive(Debug, Clone, Copy)]
pub struct MsgMetadata {
    /// Peer this message was sent to (or, for an inbound message, received
    /// from).
    pub peer: u8,
    /// Whether this message is/was AEAD-encrypted.
    pub uses_cryptography: bool,
    /// Caller-chosen client identifier.
    pub client_id: u16,
    /// Application identifier.
    pub application_id: u16,
    /// Per-peer message id this exchange is pinned to.
    pub message_id: u8,
    /// Subnet this message travels under, if any.
    pub trusted_subnet_id: Option<u8>,
    /// Whether the original message requested a reply.
    pub needs_reply: bool,
}

/// A fully decoded inbound message, ready for the application.
#[derive(Debug, Clone)]
pub struct ReceivedMsg {
    /// Sender node id.
    pub sender: u8,
    /// Cleartext application payload.
    pub payload: Vec<u8>,
    /// Metadata to pass to `init_reply`.
    pub metadata: MsgMetadata,
}

/// A fully decoded inbound reply, ready for the application.
#[derive(Debug, Clone)]
pub struct ReceivedReply {
    /// Cleartext application payload.
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct PendingMsg {
    sender: u8,
    message_id: u8,
    needs_reply: bool,
    uses_cryptography: bool,
    trusted_subnet_id: Option<u8>,
    application_id: u16,
    client_id: u16,
    header: PacketHeader,
    crypto_metadata: Option<CryptoMetadata>,
    id_extension: Option<IdExtension>,
}

#[derive(Debug, Clone, Copy)]
struct PendingReply {
    sender: u8,
    message_id: u8,
    uses_cryptography: bool,
    client_id: u16,
    header: PacketHeader,
    crypto_metadata: Option<CryptoMetadata>,
    id_extension: Option<IdExtension>,
    protocol_error: Option<ProtocolErrorCode>,
}

struct EngineInner {
    subnets: SubnetTable,
    scratch: HashMap<u8, HandshakeScratch>,
    buffers: BufferPool,
    msg_handlers: HandlerTable,
    reply_handlers: HandlerTable,
    next_message_id: HashMap<u8, u8>,
    pending_msgs: Vec<(BufferHandle, PendingMsg)>,
    pending_replies: Vec<(BufferHandle, PendingReply)>,
}

impl EngineInner {
    fn alloc_message_id(&mut self, peer: u8) -> u8 {
        let id = self.next_message_id.entry(peer).or_insert(0);
        let current = *id;
        *id = id.wrapping_add(1);
        current
    }
}

const fn handshake_requires_transport_encryption(state: HandshakeState) -> bool {
    matches!(
        state,
        HandshakeState::ReKeyingRequired
            | HandshakeState::ReKeyingInitiatorStarted
            | HandshakeState::ReKeyingSentClientRequest
            | HandshakeState::ReKeyingReceivedClientRequestServerReply
            | HandshakeState::ReKeyingReceivedClientRequest
            | HandshakeState::ReKeyingSendSendIvsMsg
            | HandshakeState::ReKeyingReceivedSendIvsMsg
            | HandshakeState::MutualAuthSentAuthMsg
            | HandshakeState::MutualAuthWaitingForAuthMsg
    )
}

const fn handshake_in_progress(state: HandshakeState) -> bool {
    !matches!(
        state,
        HandshakeState::SessionKeySetupNotRequired
            | HandshakeState::SessionKeySetupValid
            | HandshakeState::MutualAuthCompleted
    )
}

/// The node on the other end of the wire, regardless of which header field
/// carries it. MSG/error packets carry it in `sender_id` (the transmitting
/// node); `Reply` carries it in `receiver_id`, since `sender_id` on a reply
/// is the original requester (see `sfcp_proto::forwarding`).
fn remote_peer_id(header: PacketHeader) -> u8 {
    if header.packet_type() == PacketType::Reply { header.receiver_id() } else { header.sender_id() }
}

/// The SFCP session engine: one instance per node, owning every shared
/// singleton spec.md §5 names.
pub struct SessionEngine {
    my_node_id: u8,
    hal: Box<dyn LinkHal>,
    crypto: Box<dyn CryptoHal>,
    lock: MutexCriticalSection<EngineInner>,
}

impl SessionEngine {
    /// Build a new engine from platform-provided identity/subnet
    /// configuration, initializing the HAL.
    ///
    /// # Errors
    ///
    /// Propagates [`sfcp_hal::HalError`] from `hal.init()`.
    pub fn new(
        platform: &dyn Platform,
        hal: Box<dyn LinkHal>,
        crypto: Box<dyn CryptoHal>,
        config: EngineConfig,
    ) -> Result<Self, SfcpError> {
        hal.init()?;
        let subnets = platform.trusted_subnets();
        let scratch = subnets.iter().map(|s| (s.id, HandshakeScratch::default())).collect();
        let inner = EngineInner {
            subnets: SubnetTable::new(subnets),
            scratch,
            buffers: BufferPool::new(config.buffer_capacity),
            msg_handlers: HandlerTable::new(config.msg_handler_capacity),
            reply_handlers: HandlerTable::new(config.reply_handler_capacity),
            next_message_id: HashMap::new(),
            pending_msgs: Vec::new(),
            pending_replies: Vec::new(),
        };
        Ok(Self { my_node_id: platform.my_node_id(), hal, crypto, lock: MutexCriticalSection::new(inner) })
    }

    /// This node's id.
    #[must_use]
    pub const fn my_node_id(&self) -> u8 {
        self.my_node_id
    }

    /// Resolve the link used to reach `peer`.
    ///
    /// # Errors
    ///
    /// [`sfcp_hal::HalError`] if no route to `peer` is configured.
    pub fn route_to(&self, peer: u8) -> Result<LinkId, SfcpError> {
        Ok(self.hal.get_route(peer)?)
    }

    /// Current handshake state of `subnet_id`, for diagnostics and tests.
    #[must_use]
    pub fn handshake_state(&self, subnet_id: u8) -> Option<HandshakeState> {
        self.lock.with(|inner| inner.subnets.get(subnet_id).map(TrustedSubnetConfig::state))
    }

    /// Next send sequence number that would be allocated for `peer` within
    /// `subnet_id`, without allocating it. For diagnostics and tests.
    #[must_use]
    pub fn peek_send_seq_num(&self, subnet_id: u8, peer: u8) -> Option<u16> {
        self.lock.with(|inner| inner.subnets.get(subnet_id).and_then(|s| s.node(peer)).map(TrustedSubnetNode::send_seq_num))
    }

    /// Force `peer`'s send sequence number within `subnet_id` to `seq_num`.
    /// Test-only escape hatch: see [`TrustedSubnetConfig::force_send_seq_num`].
    #[cfg(feature = "test-support")]
    pub fn force_send_seq_num(&self, subnet_id: u8, peer: u8, seq_num: u16) {
        self.lock.with(|inner| {
            if let Some(subnet) = inner.subnets.get_mut(subnet_id) {
                subnet.force_send_seq_num(peer, seq_num);
            }
        });
    }

    /// Force `peer`'s receive low-edge within `subnet_id` to `seq_num`.
    /// Test-only escape hatch: see [`TrustedSubnetConfig::force_recv_seq_num`].
    #[cfg(feature = "test-support")]
    pub fn force_recv_seq_num(&self, subnet_id: u8, peer: u8, seq_num: u16) {
        self.lock.with(|inner| {
            if let Some(subnet) = inner.subnets.get_mut(subnet_id) {
                subnet.force_recv_seq_num(peer, seq_num);
            }
        });
    }

    /// Send pre-encoded bytes directly over `link_id`, bypassing header
    /// construction. For harnesses that need to inject a deliberately
    /// malformed or misaddressed packet; ordinary callers should use
    /// [`SessionEngine::send_msg`]/[`SessionEngine::send_reply`].
    ///
    /// # Errors
    ///
    /// [`sfcp_hal::HalError`].
    pub fn send_raw(&self, link_id: LinkId, bytes: &[u8]) -> Result<(), SfcpError> {
        Ok(self.hal.send_message(link_id, bytes)?)
    }

    /// Register a handler for inbound messages carrying `application_id`.
    ///
    /// # Errors
    ///
    /// [`SfcpError::HandlerTableFull`].
    pub fn register_msg_handler(&self, application_id: u16, handler: HandlerFn) -> Result<(), SfcpError> {
        self.lock.with(|inner| inner.msg_handlers.register(application_id, handler))
    }

    /// Register a handler for inbound replies carrying `client_id`.
    ///
    /// # Errors
    ///
    /// [`SfcpError::HandlerTableFull`].
    pub fn register_reply_handler(&self, client_id: u16, handler: HandlerFn) -> Result<(), SfcpError> {
        self.lock.with(|inner| inner.reply_handlers.register(client_id, handler))
    }

    /// Prepare to send a new message to `peer`.
    ///
    /// # Errors
    ///
    /// [`SfcpError::SelfAddressed`], [`SfcpError::UnknownTrustedSubnet`],
    /// [`SfcpError::TrustedSubnetMustBeManuallySelected`].
    pub fn init_msg(
        &self,
        peer: u8,
        application_id: u16,
        client_id: u16,
        needs_reply: bool,
        trusted_subnet_id: Option<u8>,
    ) -> Result<MsgMetadata, SfcpError> {
        if peer == self.my_node_id {
            return Err(SfcpError::SelfAddressed);
        }

        self.lock.with(|inner| {
            let resolved = match trusted_subnet_id {
                Some(id) => {
                    let subnet = inner.subnets.get(id).ok_or(SfcpError::UnknownTrustedSubnet(id))?;
                    if !subnet.has_node(peer) {
                        return Err(SfcpError::InvalidNode { node_id: peer });
                    }
                    Some(id)
                },
                None => inner.subnets.resolve_for_peer(peer)?,
            };

            let uses_cryptography = resolved
                .and_then(|id| inner.subnets.get(id))
                .is_some_and(|s| s.state().requires_handshake_encryption().1);

            let message_id = inner.alloc_message_id(peer);

            Ok(MsgMetadata {
                peer,
                uses_cryptography,
                client_id,
                application_id,
                message_id,
                trusted_subnet_id: resolved,
                needs_reply,
            })
        })
    }

    /// Drive the handshake to completion (if required) and send `payload`.
    ///
    /// # Errors
    ///
    /// Handshake errors, [`sfcp_hal::HalError`], or encryption failures.
    pub fn send_msg(&self, metadata: &MsgMetadata, payload: &[u8]) -> Result<(), SfcpError> {
        if metadata.uses_cryptography {
            self.drive_handshake_blocking(metadata.trusted_subnet_id.ok_or(SfcpError::Internal)?)?;
        }

        let packet_type =
            if metadata.needs_reply { PacketType::MsgNeedsReply } else { PacketType::MsgNoReply };
        self.send_packet(
            packet_type,
            metadata.peer,
            metadata.message_id,
            metadata.uses_cryptography,
            metadata.trusted_subnet_id,
            Some(IdExtension { client_id: metadata.client_id, application_id: metadata.application_id })
                .filter(|_| metadata.client_id != 0 || metadata.application_id != 0),
            payload,
            false,
        )
    }

    /// Prepare to reply to a previously received message, mirroring its
    /// addressing and message id.
    #[must_use]
    pub fn init_reply(&self, received: &MsgMetadata) -> MsgMetadata {
        MsgMetadata {
            peer: received.peer,
            uses_cryptography: received.uses_cryptography,
            client_id: received.client_id,
            application_id: received.application_id,
            message_id: received.message_id,
            trusted_subnet_id: received.trusted_subnet_id,
            needs_reply: false,
        }
    }

    /// Send a reply. Unlike `send_msg`, never initiates a handshake (a
    /// reply is only ever sent once the exchange that solicited it has
    /// already cleared any handshake requirement).
    ///
    /// # Errors
    ///
    /// [`sfcp_hal::HalError`] or encryption failures.
    pub fn send_reply(&self, metadata: &MsgMetadata, payload: &[u8]) -> Result<(), SfcpError> {
        self.send_packet(
            PacketType::Reply,
            metadata.peer,
            metadata.message_id,
            metadata.uses_cryptography,
            metadata.trusted_subnet_id,
            Some(IdExtension { client_id: metadata.client_id, application_id: metadata.application_id })
                .filter(|_| metadata.client_id != 0 || metadata.application_id != 0),
            payload,
            false,
        )
    }

    fn send_packet(
        &self,
        packet_type: PacketType,
        peer: u8,
        message_id: u8,
        encrypt: bool,
        trusted_subnet_id: Option<u8>,
        id_extension: Option<IdExtension>,
        payload: &[u8],
        retry_on_busy: bool,
    ) -> Result<(), SfcpError> {
        // A reply's sender_id/receiver_id mirror the request it answers:
        // sender_id is the original requester, receiver_id the node now
        // replying. MSG (and error) packets use sender_id for whoever is
        // transmitting right now.
        let header = if packet_type == PacketType::Reply {
            PacketHeader::new(packet_type, encrypt, id_extension.is_some(), peer, self.my_node_id, message_id)
        } else {
            PacketHeader::new(packet_type, encrypt, id_extension.is_some(), self.my_node_id, peer, message_id)
        };
        let mut buf = vec![0u8; MIN_PACKET_BUFFER_SIZE.max(payload.len() + 64)];

        let written = if encrypt {
            let subnet_id = trusted_subnet_id.ok_or(SfcpError::Internal)?;
            let (_, total, metadata) = self.lock.with(|inner| -> Result<_, SfcpError> {
                let subnet = inner.subnets.get_mut(subnet_id).ok_or(SfcpError::UnknownTrustedSubnet(subnet_id))?;
                let mut ciphertext = payload.to_vec();
                let metadata = encryption::encrypt(
                    self.crypto.as_ref(),
                    subnet,
                    peer,
                    header,
                    id_extension,
                    &mut ciphertext,
                )?;
                let (payload_offset, total) = sfcp_proto::encode_crypto_header(
                    &mut buf,
                    header,
                    metadata.seq_num,
                    metadata.mode,
                    metadata.trusted_subnet_id,
                    id_extension,
                    ciphertext.len(),
                )?;
                buf[payload_offset..payload_offset + ciphertext.len()].copy_from_slice(&ciphertext);
                Ok((payload_offset, total, metadata))
            })?;
            sfcp_proto::patch_tag(&mut buf, sfcp_proto::HEADER_SIZE, metadata.tag);
            total
        } else {
            sfcp_proto::encode_plain(&mut buf, header, id_extension, payload)?
        };

        let link_id = self.hal.get_route(peer)?;
        let framed = &buf[..written];
        if retry_on_busy {
            // A single inbound handshake event can produce several outbound
            // actions addressed to the same peer (an ack plus a broadcast),
            // with nothing in between to let the peer drain its single-slot
            // mailbox. There is no application caller here to hand the
            // retry decision back to, so wait the same way a real MHU
            // doorbell write would.
            loop {
                match self.hal.send_message(link_id, framed) {
                    Err(HalError::SendMessageBusBusy { .. }) => continue,
                    other => break other?,
                }
            }
        } else {
            self.hal.send_message(link_id, framed)?;
        }
        Ok(())
    }

    fn drive_handshake_blocking(&self, subnet_id: u8) -> Result<(), SfcpError> {
        loop {
            let already_done = self.lock.with(|inner| {
                inner.subnets.get(subnet_id).is_none_or(|s| !handshake_in_progress(s.state()))
            });
            if already_done {
                return Ok(());
            }

            let needs_start = self.lock.with(|inner| {
                inner.subnets.get(subnet_id).is_some_and(|s| {
                    matches!(
                        s.state(),
                        HandshakeState::SessionKeySetupRequired
                            | HandshakeState::MutualAuthRequired
                            | HandshakeState::ReKeyingRequired
                    )
                })
            });

            if needs_start {
                let actions = self.lock.with(|inner| -> Result<_, SfcpError> {
                    let subnet = inner.subnets.get_mut(subnet_id).ok_or(SfcpError::UnknownTrustedSubnet(subnet_id))?;
                    let scratch = inner.scratch.entry(subnet_id).or_default();
                    handshake::initiate(subnet, scratch, self.crypto.as_ref(), self.my_node_id)
                })?;
                self.send_handshake_actions(subnet_id, actions)?;
                continue;
            }

            // Waiting on a peer: poll every link we might hear from.
            let links: Vec<LinkId> = self.lock.with(|inner| {
                inner
                    .subnets
                    .get(subnet_id)
                    .map(|s| s.other_members(self.my_node_id).filter_map(|peer| self.hal.get_route(peer).ok()).collect())
                    .unwrap_or_default()
            });
            for link in links {
                self.interrupt_handler(link)?;
            }
        }
    }

    fn send_handshake_actions(&self, subnet_id: u8, actions: Vec<HandshakeAction>) -> Result<(), SfcpError> {
        for action in actions {
            let (peer, packet_type, message_id, payload) = match action {
                HandshakeAction::SendMsg { to, payload } => {
                    let message_id = self.lock.with(|inner| inner.alloc_message_id(to));
                    (to, PacketType::MsgNeedsReply, message_id, payload)
                },
                HandshakeAction::SendReply { to, message_id, payload } => {
                    (to, PacketType::Reply, message_id, payload)
                },
            };
            let encrypt = self
                .lock
                .with(|inner| inner.subnets.get(subnet_id).is_some_and(|s| handshake_requires_transport_encryption(s.state())));
            self.send_packet(packet_type, peer, message_id, encrypt, Some(subnet_id), None, &payload, true)?;
        }
        Ok(())
    }

    /// Drain one pending transfer from `link_id`: parse, reject forwarding,
    /// feed the handshake responder, or buffer for `receive_msg`/
    /// `receive_reply` (spec.md §4.6).
    ///
    /// # Errors
    ///
    /// [`SfcpError::Hal`], [`SfcpError::Protocol`],
    /// [`SfcpError::ForwardingUnsupported`], [`SfcpError::ForwardingFailed`].
    pub fn interrupt_handler(&self, link_id: LinkId) -> Result<(), SfcpError> {
        if !self.hal.is_message_available(link_id)? {
            return Ok(());
        }
        let size = self.hal.get_receive_message_size(link_id)?;
        let mut buf = vec![0u8; size];
        self.hal.receive_message(link_id, &mut buf, size, 0, size)?;

        let parsed = sfcp_proto::parse(&buf, size)?;
        let header = parsed.header;

        if sfcp_proto::needs_forwarding(header.sender_id(), header.receiver_id(), header.packet_type(), self.my_node_id)
            .is_some()
        {
            if header.packet_type().needs_reply() {
                self.emit_protocol_error(header.sender_id(), header.message_id(), 0, ProtocolErrorCode::ForwardingUnsupported)?;
                return Err(SfcpError::ForwardingUnsupported);
            }
            return Ok(());
        }

        match parsed.body {
            ParsedBody::Error { client_id, protocol_error } => {
                self.lock.with(|inner| -> Result<(), SfcpError> {
                    let h = inner.buffers.allocate(Vec::new())?;
                    inner.pending_replies.push((
                        h,
                        PendingReply {
                            sender: header.sender_id(),
                            message_id: header.message_id(),
                            uses_cryptography: false,
                            client_id,
                            header,
                            crypto_metadata: None,
                            id_extension: None,
                            protocol_error: Some(ProtocolErrorCode::from_wire(protocol_error)),
                        },
                    ));
                    Ok(())
                })
            },

            ParsedBody::Plain { id_extension, payload } => {
                let is_reply = header.packet_type() == PacketType::Reply;
                let remote = remote_peer_id(header);
                let handshaking = self.lock.with(|inner| {
                    inner
                        .subnets
                        .resolve_for_peer(remote)
                        .ok()
                        .flatten()
                        .and_then(|id| inner.subnets.get(id).map(|s| (id, s.state())))
                });
                if id_extension.is_none() {
                    if let Some((subnet_id, state)) = handshaking {
                        if handshake_in_progress(state) {
                            let actions = self.lock.with(|inner| -> Result<_, SfcpError> {
                                let subnet =
                                    inner.subnets.get_mut(subnet_id).ok_or(SfcpError::UnknownTrustedSubnet(subnet_id))?;
                                let scratch = inner.scratch.entry(subnet_id).or_default();
                                handshake::handle_message(
                                    subnet,
                                    scratch,
                                    self.crypto.as_ref(),
                                    self.my_node_id,
                                    remote,
                                    header.message_id(),
                                    is_reply,
                                    false,
                                    None,
                                    payload,
                                )
                            })?;
                            self.send_handshake_actions(subnet_id, actions)?;
                            return Ok(());
                        }
                    }
                }
                self.buffer_application_packet(header, is_reply, None, id_extension, payload.to_vec())
            },

            ParsedBody::Crypto { metadata, id_extension, payload } => {
                let is_reply = header.packet_type() == PacketType::Reply;
                let remote = remote_peer_id(header);
                let subnet_id = metadata.trusted_subnet_id;
                let in_progress =
                    self.lock.with(|inner| inner.subnets.get(subnet_id).is_some_and(|s| handshake_in_progress(s.state())));

                if in_progress {
                    let mut cleartext = payload.to_vec();
                    self.lock.with(|inner| -> Result<(), SfcpError> {
                        let subnet = inner.subnets.get_mut(subnet_id).ok_or(SfcpError::UnknownTrustedSubnet(subnet_id))?;
                        encryption::decrypt(
                            self.crypto.as_ref(),
                            subnet,
                            remote,
                            header,
                            metadata,
                            id_extension,
                            &mut cleartext,
                        )
                    })?;
                    let actions = self.lock.with(|inner| -> Result<_, SfcpError> {
                        let subnet = inner.subnets.get_mut(subnet_id).ok_or(SfcpError::UnknownTrustedSubnet(subnet_id))?;
                        let scratch = inner.scratch.entry(subnet_id).or_default();
                        handshake::handle_message(
                            subnet,
                            scratch,
                            self.crypto.as_ref(),
                            self.my_node_id,
                            remote,
                            header.message_id(),
                            is_reply,
                            true,
                            Some(metadata.seq_num),
                            &cleartext,
                        )
                    })?;
                    self.send_handshake_actions(subnet_id, actions)?;
                    return Ok(());
                }

                self.buffer_application_packet(header, is_reply, Some(metadata), id_extension, payload.to_vec())
            },
        }
    }

    fn buffer_application_packet(
        &self,
        header: PacketHeader,
        is_reply: bool,
        crypto_metadata: Option<CryptoMetadata>,
        id_extension: Option<IdExtension>,
        raw: Vec<u8>,
    ) -> Result<(), SfcpError> {
        // A message for an application_id with no registered handler is
        // rejected at ingest rather than buffered: nobody will ever drain
        // it, so it would sit in the slab until the pool fills up.
        if !is_reply {
            let application_id = id_extension.map_or(0, |e| e.application_id);
            let registered = self.lock.with(|inner| inner.msg_handlers.contains(application_id));
            if !registered {
                if header.packet_type().needs_reply() {
                    let client_id = id_extension.map_or(0, |e| e.client_id);
                    self.emit_protocol_error(
                        header.sender_id(),
                        header.message_id(),
                        client_id,
                        ProtocolErrorCode::InvalidApplicationId,
                    )?;
                }
                return Ok(());
            }
        }

        self.lock.with(|inner| -> Result<(), SfcpError> {
            let handle = inner.buffers.allocate(raw)?;
            if is_reply {
                inner.pending_replies.push((
                    handle,
                    PendingReply {
                        sender: remote_peer_id(header),
                        message_id: header.message_id(),
                        uses_cryptography: crypto_metadata.is_some(),
                        client_id: id_extension.map_or(0, |e| e.client_id),
                        header,
                        crypto_metadata,
                        id_extension,
                        protocol_error: None,
                    },
                ));
            } else {
                let (client_id, application_id) =
                    id_extension.map_or((0, 0), |e| (e.client_id, e.application_id));
                inner.pending_msgs.push((
                    handle,
                    PendingMsg {
                        sender: header.sender_id(),
                        message_id: header.message_id(),
                        needs_reply: header.packet_type().needs_reply(),
                        uses_cryptography: crypto_metadata.is_some(),
                        trusted_subnet_id: crypto_metadata.map(|m| m.trusted_subnet_id),
                        application_id,
                        client_id,
                        header,
                        crypto_metadata,
                        id_extension,
                    },
                ));
            }
            Ok(())
        })
    }

    fn emit_protocol_error(
        &self,
        peer: u8,
        message_id: u8,
        client_id: u16,
        code: ProtocolErrorCode,
    ) -> Result<(), SfcpError> {
        let mut buf = [0u8; ERROR_REPLY_SIZE];
        let written =
            sfcp_proto::make_protocol_error(&mut buf, self.my_node_id, peer, message_id, client_id, code.to_wire())?;
        let link_id = self.hal.get_route(peer)?;
        self.hal.send_message(link_id, &buf[..written])?;
        Ok(())
    }

    /// Poll `links` (in the given order) and return the first fully
    /// decoded message matching `sender`/`application_id`, decrypting it if
    /// required.
    ///
    /// # Errors
    ///
    /// [`SfcpError::NoMsgAvailable`] if nothing matched. Propagates HAL and
    /// decryption errors encountered while polling.
    pub fn receive_msg(
        &self,
        links: &[LinkId],
        sender: Option<u8>,
        application_id: u16,
    ) -> Result<ReceivedMsg, SfcpError> {
        for &link in links {
            self.interrupt_handler(link)?;
        }

        let candidate = self.lock.with(|inner| {
            let mut indices: Vec<usize> = (0..inner.pending_msgs.len())
                .filter(|&i| sender.is_none_or(|s| inner.pending_msgs[i].1.sender == s))
                .collect();
            indices.sort_by_key(|&i| inner.pending_msgs[i].1.sender);
            indices.first().copied()
        });

        let Some(index) = candidate else {
            return Err(SfcpError::NoMsgAvailable);
        };

        let (handle, pending) = self.lock.with(|inner| inner.pending_msgs.remove(index));

        if pending.application_id != application_id {
            if pending.needs_reply {
                self.emit_protocol_error(
                    pending.sender,
                    pending.message_id,
                    pending.client_id,
                    ProtocolErrorCode::TryAgainLater,
                )?;
            }
            self.lock.with(|inner| inner.buffers.pop(handle)).ok();
            return Err(SfcpError::NoMsgAvailable);
        }

        self.pop_msg_from_buffer(handle, pending)
    }

    fn pop_msg_from_buffer(&self, handle: BufferHandle, pending: PendingMsg) -> Result<ReceivedMsg, SfcpError> {
        let mut raw = self.lock.with(|inner| inner.buffers.pop(handle))?;

        if let Some(metadata) = pending.crypto_metadata {
            let subnet_id = metadata.trusted_subnet_id;
            let decrypted = self.lock.with(|inner| -> Result<(), SfcpError> {
                let subnet = inner.subnets.get_mut(subnet_id).ok_or(SfcpError::UnknownTrustedSubnet(subnet_id))?;
                encryption::decrypt(
                    self.crypto.as_ref(),
                    subnet,
                    pending.sender,
                    pending.header,
                    metadata,
                    pending.id_extension,
                    &mut raw,
                )
            });
            if let Err(err) = decrypted {
                if pending.needs_reply {
                    self.emit_protocol_error(pending.sender, pending.message_id, pending.client_id, err.to_wire())?;
                }
                return Err(err);
            }
        }

        Ok(ReceivedMsg {
            sender: pending.sender,
            payload: raw,
            metadata: MsgMetadata {
                peer: pending.sender,
                uses_cryptography: pending.uses_cryptography,
                client_id: pending.client_id,
                application_id: pending.application_id,
                message_id: pending.message_id,
                trusted_subnet_id: pending.trusted_subnet_id,
                needs_reply: pending.needs_reply,
            },
        })
    }

    /// Poll `link_id` and return the reply matching `sent` (by peer and
    /// message id), decrypting and validating it.
    ///
    /// # Errors
    ///
    /// [`SfcpError::NoMsgAvailable`] if nothing matched yet.
    /// [`SfcpError::InvalidSequenceNumber`] on a `message_id` mismatch.
    /// Translates a peer protocol-error reply via [`SfcpError::from_wire`].
    pub fn receive_reply(&self, link_id: LinkId, sent: &MsgMetadata) -> Result<ReceivedReply, SfcpError> {
        self.interrupt_handler(link_id)?;

        let index = self.lock.with(|inner| {
            inner
                .pending_replies
                .iter()
                .position(|(_, r)| r.sender == sent.peer && r.message_id == sent.message_id)
        });

        let Some(index) = index else {
            return Err(SfcpError::NoMsgAvailable);
        };

        let (handle, pending) = self.lock.with(|inner| inner.pending_replies.remove(index));

        if let Some(code) = pending.protocol_error {
            self.lock.with(|inner| inner.buffers.pop(handle)).ok();
            return Err(SfcpError::from_wire(code));
        }

        if pending.message_id != sent.message_id {
            self.lock.with(|inner| inner.buffers.pop(handle)).ok();
            return Err(SfcpError::InvalidSequenceNumber);
        }

        let mut raw = self.lock.with(|inner| inner.buffers.pop(handle))?;

        if let Some(metadata) = pending.crypto_metadata {
            let subnet_id = metadata.trusted_subnet_id;
            self.lock.with(|inner| -> Result<(), SfcpError> {
                let subnet = inner.subnets.get_mut(subnet_id).ok_or(SfcpError::UnknownTrustedSubnet(subnet_id))?;
                encryption::decrypt(self.crypto.as_ref(), subnet, pending.sender, pending.header, metadata, pending.id_extension, &mut raw)
            })?;
        }

        Ok(ReceivedReply { payload: raw })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sfcp_crypto::{CryptographyMode, DefaultCryptoHal};
    use sfcp_hal::MemoryLinkHal;

    use crate::platform::StaticPlatform;
    use crate::subnet::SubnetType;

    fn build_pair() -> (SessionEngine, SessionEngine) {
        let mut mesh = MemoryLinkHal::build_mesh(&[0, 1]);
        let hal0 = mesh.remove(&0).unwrap();
        let hal1 = mesh.remove(&1).unwrap();

        let platform0 = StaticPlatform::new(0, Vec::new());
        let platform1 = StaticPlatform::new(1, Vec::new());

        let engine0 =
            SessionEngine::new(&platform0, Box::new(hal0), Box::new(DefaultCryptoHal::new()), EngineConfig::default())
                .unwrap();
        let engine1 =
            SessionEngine::new(&platform1, Box::new(hal1), Box::new(DefaultCryptoHal::new()), EngineConfig::default())
                .unwrap();
        (engine0, engine1)
    }

    #[test]
    fn plain_msg_and_reply_round_trip() {
        let (engine0, engine1) = build_pair();
        engine1.register_msg_handler(0, Box::new(|_| Ok(()))).unwrap();

        let sent = engine0.init_msg(1, 0, 0, true, None).unwrap();
        assert!(!sent.uses_cryptography);
        engine0.send_msg(&sent, &[0xAA]).unwrap();

        let link1 = engine1.hal.get_route(0).unwrap();
        let received = engine1.receive_msg(&[link1], None, 0).unwrap();
        assert_eq!(received.payload, vec![0xAA]);
        assert_eq!(received.sender, 0);

        let reply_meta = engine1.init_reply(&received.metadata);
        engine1.send_reply(&reply_meta, &[0xBB]).unwrap();

        let link0 = engine0.hal.get_route(1).unwrap();
        let reply = engine0.receive_reply(link0, &sent).unwrap();
        assert_eq!(reply.payload, vec![0xBB]);
    }

    #[test]
    fn unknown_application_id_yields_protocol_error_reply() {
        // Node 1 never registers a handler for application id 7: the
        // message is rejected at ingest, not merely left unmatched.
        let (engine0, engine1) = build_pair();
        let sent = engine0.init_msg(1, 7, 0, true, None).unwrap();
        engine0.send_msg(&sent, &[1]).unwrap();

        let link1 = engine1.hal.get_route(0).unwrap();
        let err = engine1.receive_msg(&[link1], None, 7).unwrap_err();
        assert_eq!(err, SfcpError::NoMsgAvailable);

        let link0 = engine0.hal.get_route(1).unwrap();
        let err = engine0.receive_reply(link0, &sent).unwrap_err();
        assert_eq!(err, SfcpError::InvalidApplicationId(0));
    }

    #[test]
    fn registered_but_currently_unpolled_application_id_yields_try_again_later() {
        // A handler IS registered for application id 5, but the caller
        // polls `receive_msg` for a different id while it is head-of-queue:
        // this is "try again", not "unknown application".
        let (engine0, engine1) = build_pair();
        engine1.register_msg_handler(5, Box::new(|_| Ok(()))).unwrap();

        let sent = engine0.init_msg(1, 5, 0, true, None).unwrap();
        engine0.send_msg(&sent, &[1]).unwrap();

        let link1 = engine1.hal.get_route(0).unwrap();
        let err = engine1.receive_msg(&[link1], None, 9).unwrap_err();
        assert_eq!(err, SfcpError::NoMsgAvailable);

        let link0 = engine0.hal.get_route(1).unwrap();
        let err = engine0.receive_reply(link0, &sent).unwrap_err();
        assert_eq!(err, SfcpError::SendMsgAgain);
    }

    #[test]
    fn forwarding_to_a_third_node_is_rejected() {
        let (engine0, engine1) = build_pair();
        // Node 0 addresses node 2 but routes it through node 1's link.
        let header = PacketHeader::new(PacketType::MsgNeedsReply, false, false, 0, 2, 0);
        let mut buf = vec![0u8; MIN_PACKET_BUFFER_SIZE];
        let written = sfcp_proto::encode_plain(&mut buf, header, None, &[]).unwrap();
        let link = engine0.hal.get_route(1).unwrap();
        engine0.hal.send_message(link, &buf[..written]).unwrap();

        let link1 = engine1.hal.get_route(0).unwrap();
        let err = engine1.interrupt_handler(link1).unwrap_err();
        assert_eq!(err, SfcpError::ForwardingUnsupported);
    }

    #[test]
    fn session_key_setup_then_encrypted_round_trip() {
        // Node 0 is the subnet's server (lowest id): it only ever responds
        // to inbound handshake messages, never initiates. Node 1, the
        // client, drives the handshake when it sends its first message.
        let mut mesh = MemoryLinkHal::build_mesh(&[0, 1]);
        let hal0 = mesh.remove(&0).unwrap();
        let hal1 = mesh.remove(&1).unwrap();

        let subnet0 = TrustedSubnetConfig::new(0, SubnetType::UntrustedLinks, CryptographyMode::Aes256Ccm, &[0, 1]);
        let subnet1 = subnet0.clone();
        let platform0 = StaticPlatform::new(0, vec![subnet0]);
        let platform1 = StaticPlatform::new(1, vec![subnet1]);

        let engine0 =
            SessionEngine::new(&platform0, Box::new(hal0), Box::new(DefaultCryptoHal::new()), EngineConfig::default())
                .unwrap();
        let engine1 =
            SessionEngine::new(&platform1, Box::new(hal1), Box::new(DefaultCryptoHal::new()), EngineConfig::default())
                .unwrap();

        engine0.register_msg_handler(0, Box::new(|_| Ok(()))).unwrap();

        let sent = engine1.init_msg(0, 0, 0, true, None).unwrap();
        assert!(sent.uses_cryptography);

        let link0 = engine0.hal.get_route(1).unwrap();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                engine1.send_msg(&sent, &[0x42]).unwrap();
            });
            loop {
                if let Ok(received) = engine0.receive_msg(&[link0], None, 0) {
                    assert_eq!(received.payload, vec![0x42]);
                    break;
                }
            }
        });
    }
}
