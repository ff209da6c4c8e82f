//! Crypto HAL error taxonomy.

use thiserror::Error;

/// Errors returned by [`crate::CryptoHal`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD encryption failed (should only happen for unsupported modes).
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption or tag verification failed.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The requested [`crate::CryptographyMode`] is not implemented by this
    /// HAL (maps to the wire `SM4_*` modes, which decode correctly but have
    /// no local implementation).
    #[error("cryptography mode not supported: {mode:?}")]
    CryptographyNotSupported {
        /// The mode that was requested.
        mode: crate::mode::CryptographyMode,
    },

    /// `key_id` does not refer to a key this HAL currently holds.
    #[error("unknown key id: {0}")]
    UnknownKey(u32),

    /// Random byte generation failed.
    #[error("random generation failure")]
    GenerateRandomFailure,

    /// Hashing failed.
    #[error("hash failure")]
    HashFailure,

    /// Session-key setup (initial derivation) failed.
    #[error("session key setup failed")]
    SetupSessionKeyFailure,

    /// Session-key re-derivation (re-key) failed.
    #[error("session key re-key failed")]
    RekeySessionKeyFailure,

    /// Invalidating a previously valid key failed.
    #[error("session key invalidation failed")]
    InvalidateSessionKeyFailure,
}
