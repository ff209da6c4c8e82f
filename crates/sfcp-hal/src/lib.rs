//! Mailbox transport HAL: doorbell fragmentation and an in-memory reference
//! link.
//!
//! `sfcp-core` only depends on [`LinkHal`]; [`MemoryLinkHal`] is the
//! reference transport this workspace ships for tests and the simulation
//! harness, analogous to the donor codebase's in-memory storage backend.

mod channel;
mod error;
pub mod fragment;
mod link;
mod memory;

pub use channel::DoorbellChannel;
pub use error::HalError;
pub use link::{LinkHal, LinkId};
pub use memory::MemoryLinkHal;
