//! Session engine for the Secure Firmware Communications Protocol: trusted
//! subnet state, the handshake state machine, the encryption wrapper, and
//! the `init`/`send`/`receive` operations applications call (spec.md §4).
//!
//! `sfcp-proto` owns the wire format, `sfcp-crypto` owns AEAD/hashing/RNG,
//! `sfcp-hal` owns the transport. This crate is where they meet: it is the
//! only place that knows what a sequence number, a trusted subnet, or a
//! handshake round *means*.

pub mod buffer;
pub mod encryption;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod handshake;
pub mod lock;
pub mod platform;
pub mod subnet;

pub use buffer::{BufferHandle, BufferPool};
pub use engine::{EngineConfig, ReceivedMsg, ReceivedReply, SessionEngine};
pub use error::SfcpError;
pub use handlers::{HandlerFn, HandlerTable};
pub use handshake::{HandshakeAction, HandshakeDriver, HandshakeProgress, HandshakeScratch};
pub use lock::{CriticalSection, MutexCriticalSection};
pub use platform::{Platform, StaticPlatform};
pub use subnet::{HandshakeState, SubnetTable, SubnetType, TrustedSubnetConfig};
