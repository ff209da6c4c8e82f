//! The abstract crypto HAL consumed by `sfcp-core`'s encryption wrapper.
//!
//! spec.md §1 deliberately keeps AEAD primitives, RNG, and hashing out of
//! the protocol core: the core only knows about `encrypt_packet` /
//! `decrypt_packet` / `hash` / `random` / `derive_session_key` / `rekey` /
//! `invalidate_key`. This trait is that boundary; [`crate::DefaultCryptoHal`]
//! is the concrete implementation this workspace ships so the protocol is
//! runnable and testable end to end.

use crate::{error::CryptoError, key::KeyId, mode::CryptographyMode};

/// Length of the AEAD nonce: `header (4 bytes) || crypto config (4 bytes)`.
pub const NONCE_SIZE: usize = 8;

/// Length of the AEAD authentication tag.
pub const TAG_SIZE: usize = 16;

/// Length of a handshake IV.
pub const IV_SIZE: usize = 32;

/// Length of a SHA-384 digest.
pub const HASH_SIZE: usize = 48;

/// Abstract cryptographic operations consumed by the encryption wrapper and
/// handshake state machine.
///
/// Implementations must be safe to call concurrently from at most one
/// mutator at a time (spec.md §5 guarantees this structurally at the
/// `sfcp-core` layer via a single critical section), but may use interior
/// mutability to track key material.
pub trait CryptoHal: Send + Sync {
    /// Encrypt `buf` in place under `key_id` using `mode`, returning the
    /// 16-byte authentication tag.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::UnknownKey`] if `key_id` is not held.
    /// - [`CryptoError::CryptographyNotSupported`] if `mode` has no local
    ///   implementation.
    /// - [`CryptoError::EncryptionFailed`] on any other AEAD failure.
    fn encrypt_packet(
        &self,
        key_id: KeyId,
        mode: CryptographyMode,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        buf: &mut [u8],
    ) -> Result<[u8; TAG_SIZE], CryptoError>;

    /// Decrypt `buf` in place under `key_id` using `mode`, verifying
    /// `tag`.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::UnknownKey`] if `key_id` is not held.
    /// - [`CryptoError::CryptographyNotSupported`] if `mode` has no local
    ///   implementation.
    /// - [`CryptoError::DecryptionFailed`] if the tag does not verify.
    fn decrypt_packet(
        &self,
        key_id: KeyId,
        mode: CryptographyMode,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        buf: &mut [u8],
        tag: &[u8; TAG_SIZE],
    ) -> Result<(), CryptoError>;

    /// SHA-384 over the concatenation of `chunks`, in order.
    fn hash_sha384(&self, chunks: &[&[u8]]) -> [u8; HASH_SIZE];

    /// Fill `out` with cryptographically secure random bytes.
    ///
    /// # Errors
    ///
    /// [`CryptoError::GenerateRandomFailure`] if entropy is unavailable.
    fn random(&self, out: &mut [u8]) -> Result<(), CryptoError>;

    /// Derive and store a new session key from the initial handshake IVs
    /// (one per subnet node, in node-index order), returning its handle.
    ///
    /// # Errors
    ///
    /// [`CryptoError::SetupSessionKeyFailure`] if derivation fails.
    fn derive_session_key(&self, ivs: &[[u8; IV_SIZE]]) -> Result<KeyId, CryptoError>;

    /// Derive and store a re-keyed session key from the server-supplied
    /// re-key IV, returning its handle. The previous key remains valid
    /// until explicitly invalidated.
    ///
    /// # Errors
    ///
    /// [`CryptoError::RekeySessionKeyFailure`] if derivation fails.
    fn rekey_session_key(&self, iv: &[u8; IV_SIZE]) -> Result<KeyId, CryptoError>;

    /// Discard key material for `key_id`. Subsequent operations against it
    /// fail with [`CryptoError::UnknownKey`].
    ///
    /// # Errors
    ///
    /// [`CryptoError::InvalidateSessionKeyFailure`] if the key is unknown.
    fn invalidate_key(&self, key_id: KeyId) -> Result<(), CryptoError>;
}
