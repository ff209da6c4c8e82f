//! In-memory reference [`LinkHal`] used by tests and the simulation harness.
//!
//! Models a link as a pair of shared mailboxes (one per direction), each
//! gated by a [`DoorbellChannel`] notify register exactly as
//! `sfcp_link_hal.c` gates a real MHU channel set, but stores the whole
//! message in one shot instead of replaying the word-at-a-time fragmentation
//! a physical mailbox requires — the fragmentation math itself is covered
//! standalone in [`crate::fragment`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::DoorbellChannel;
use crate::error::HalError;
use crate::link::{LinkHal, LinkId};

struct RegisterChannel {
    word: AtomicU32,
}

impl RegisterChannel {
    fn new() -> Self {
        Self { word: AtomicU32::new(0) }
    }
}

impl DoorbellChannel for RegisterChannel {
    fn write_word(&self, value: u32) {
        self.word.store(value, Ordering::SeqCst);
    }

    fn read_word(&self) -> u32 {
        self.word.load(Ordering::SeqCst)
    }
}

struct Mailbox {
    notify: RegisterChannel,
    buffer: Mutex<Option<Vec<u8>>>,
}

impl Mailbox {
    fn new() -> Arc<Self> {
        Arc::new(Self { notify: RegisterChannel::new(), buffer: Mutex::new(None) })
    }
}

struct Link {
    /// This node's outgoing mailbox for this link (the peer's recv).
    send: Arc<Mailbox>,
    /// This node's incoming mailbox for this link (the peer's send).
    recv: Arc<Mailbox>,
}

/// In-memory [`LinkHal`]: one instance per simulated node, wired together
/// with its peers' instances via shared [`Mailbox`]es.
pub struct MemoryLinkHal {
    node_id: u8,
    routes: HashMap<u8, LinkId>,
    links: HashMap<LinkId, Link>,
}

impl MemoryLinkHal {
    /// Build a fully-connected mesh of [`MemoryLinkHal`]s, one per id in
    /// `node_ids`, with `link_id == node_id` of the peer on each side
    /// (mirroring the routing-table convention `get_route` exposes).
    #[must_use]
    pub fn build_mesh(node_ids: &[u8]) -> HashMap<u8, Self> {
        let mut halves: HashMap<u8, (HashMap<u8, LinkId>, HashMap<LinkId, Link>)> =
            node_ids.iter().map(|&id| (id, (HashMap::new(), HashMap::new()))).collect();

        for (i, &a) in node_ids.iter().enumerate() {
            for &b in &node_ids[i + 1..] {
                let a_to_b = Mailbox::new();
                let b_to_a = Mailbox::new();

                if let Some((a_routes, a_links)) = halves.get_mut(&a) {
                    a_routes.insert(b, b);
                    a_links.insert(b, Link { send: a_to_b.clone(), recv: b_to_a.clone() });
                }

                if let Some((b_routes, b_links)) = halves.get_mut(&b) {
                    b_routes.insert(a, a);
                    b_links.insert(a, Link { send: b_to_a, recv: a_to_b });
                }
            }
        }

        halves
            .into_iter()
            .map(|(id, (routes, links))| (id, Self { node_id: id, routes, links }))
            .collect()
    }
}

impl LinkHal for MemoryLinkHal {
    fn my_node_id(&self) -> u8 {
        self.node_id
    }

    fn get_route(&self, node_id: u8) -> Result<LinkId, HalError> {
        self.routes.get(&node_id).copied().ok_or(HalError::CannotGetRoute { node_id })
    }

    fn send_message(&self, link_id: LinkId, message: &[u8]) -> Result<(), HalError> {
        let link =
            self.links.get(&link_id).ok_or(HalError::UnsupportedDevice { link_id })?;

        if message.is_empty() {
            return Err(HalError::InvalidMessageArgument);
        }

        if link.recv.notify.is_raised() {
            return Err(HalError::SendMessageBusBusy { link_id });
        }

        if link.send.notify.is_raised() {
            return Err(HalError::SendMessageBusBusy { link_id });
        }

        *link.send.buffer.lock().unwrap_or_else(|p| p.into_inner()) = Some(message.to_vec());
        link.send.notify.raise();

        tracing::trace!(link_id, len = message.len(), "sent message over in-memory link");
        Ok(())
    }

    fn is_message_available(&self, link_id: LinkId) -> Result<bool, HalError> {
        let link =
            self.links.get(&link_id).ok_or(HalError::UnsupportedDevice { link_id })?;
        Ok(link.recv.notify.is_raised())
    }

    fn get_receive_message_size(&self, link_id: LinkId) -> Result<usize, HalError> {
        let link =
            self.links.get(&link_id).ok_or(HalError::UnsupportedDevice { link_id })?;
        if !link.recv.notify.is_raised() {
            return Err(HalError::MessageNotAvailable { link_id });
        }
        let buffer = link.recv.buffer.lock().unwrap_or_else(|p| p.into_inner());
        Ok(buffer.as_ref().map(Vec::len).unwrap_or(0))
    }

    fn receive_message(
        &self,
        link_id: LinkId,
        buf: &mut [u8],
        total_len: usize,
        already_received: usize,
        size_to_receive: usize,
    ) -> Result<(), HalError> {
        let link =
            self.links.get(&link_id).ok_or(HalError::UnsupportedDevice { link_id })?;

        if already_received + size_to_receive > total_len {
            return Err(HalError::InvalidReceiveSize {
                already_received,
                size_to_receive,
                total: total_len,
            });
        }
        if buf.len() < size_to_receive {
            return Err(HalError::MessageTooLarge { actual: size_to_receive, capacity: buf.len() });
        }
        if !link.recv.notify.is_raised() {
            return Err(HalError::MessageNotAvailable { link_id });
        }

        let mut guard = link.recv.buffer.lock().unwrap_or_else(|p| p.into_inner());
        let message = guard.as_ref().ok_or(HalError::MessageNotAvailable { link_id })?;

        buf[..size_to_receive]
            .copy_from_slice(&message[already_received..already_received + size_to_receive]);

        if already_received + size_to_receive == total_len {
            link.recv.notify.clear();
            *guard = None;
        }

        Ok(())
    }

    fn init(&self) -> Result<(), HalError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn single_shot_send_and_receive() {
        let mesh = MemoryLinkHal::build_mesh(&[1, 2]);
        let node1 = &mesh[&1];
        let node2 = &mesh[&2];

        let link = node1.get_route(2).unwrap();
        node1.send_message(link, b"hello").unwrap();

        let recv_link = node2.get_route(1).unwrap();
        assert!(node2.is_message_available(recv_link).unwrap());
        let len = node2.get_receive_message_size(recv_link).unwrap();
        assert_eq!(len, 5);

        let mut buf = [0u8; 5];
        node2.receive_message(recv_link, &mut buf, len, 0, len).unwrap();
        assert_eq!(&buf, b"hello");
        assert!(!node2.is_message_available(recv_link).unwrap());
    }

    #[test]
    fn chunked_receive_clears_only_on_final_chunk() {
        let mesh = MemoryLinkHal::build_mesh(&[1, 2]);
        let node1 = &mesh[&1];
        let node2 = &mesh[&2];

        let link = node1.get_route(2).unwrap();
        node1.send_message(link, b"firmware-update-blob").unwrap();

        let recv_link = node2.get_route(1).unwrap();
        let total = node2.get_receive_message_size(recv_link).unwrap();

        let mut first = [0u8; 10];
        node2.receive_message(recv_link, &mut first, total, 0, 10).unwrap();
        assert!(node2.is_message_available(recv_link).unwrap(), "not yet fully drained");

        let mut rest = vec![0u8; total - 10];
        node2.receive_message(recv_link, &mut rest, total, 10, total - 10).unwrap();
        assert!(!node2.is_message_available(recv_link).unwrap());

        let mut whole = first.to_vec();
        whole.extend_from_slice(&rest);
        assert_eq!(whole, b"firmware-update-blob");
    }

    #[test]
    fn send_while_unread_message_pending_is_bus_busy() {
        let mesh = MemoryLinkHal::build_mesh(&[1, 2]);
        let node1 = &mesh[&1];
        let node2 = &mesh[&2];

        let link12 = node1.get_route(2).unwrap();
        node1.send_message(link12, b"first").unwrap();

        let link21 = node2.get_route(1).unwrap();
        let err = node2.send_message(link21, b"reply-before-reading").unwrap_err();
        assert_eq!(err, HalError::SendMessageBusBusy { link_id: link21 });
    }

    #[test]
    fn unknown_link_is_unsupported_device() {
        let mesh = MemoryLinkHal::build_mesh(&[1, 2]);
        let node1 = &mesh[&1];
        let err = node1.send_message(99, b"x").unwrap_err();
        assert_eq!(err, HalError::UnsupportedDevice { link_id: 99 });
    }

    #[test]
    fn invalid_receive_size_is_rejected() {
        let mesh = MemoryLinkHal::build_mesh(&[1, 2]);
        let node1 = &mesh[&1];
        let node2 = &mesh[&2];
        let link = node1.get_route(2).unwrap();
        node1.send_message(link, b"hi").unwrap();

        let recv_link = node2.get_route(1).unwrap();
        let mut buf = [0u8; 10];
        let err = node2.receive_message(recv_link, &mut buf, 2, 1, 5).unwrap_err();
        assert_eq!(
            err,
            HalError::InvalidReceiveSize { already_received: 1, size_to_receive: 5, total: 2 }
        );
    }
}
