//! AEAD, hashing, and session-key derivation primitives behind the SFCP
//! crypto HAL.
//!
//! `sfcp-core` depends only on the [`CryptoHal`] trait in this crate; swap
//! [`DefaultCryptoHal`] for a hardware-backed implementation without
//! touching the protocol state machine.

mod aead;
mod default_hal;
mod error;
mod key;
mod mode;

pub use aead::{CryptoHal, HASH_SIZE, IV_SIZE, NONCE_SIZE, TAG_SIZE};
pub use default_hal::DefaultCryptoHal;
pub use error::CryptoError;
pub use key::{KeyId, SessionKey};
pub use mode::CryptographyMode;
