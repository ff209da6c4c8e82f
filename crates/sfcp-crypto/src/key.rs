//! Session key material and the opaque key handle returned to `sfcp-core`.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque handle identifying a session key, stored in the trusted subnet
/// config's `key_id` field. Carries no key material itself.
pub type KeyId = u32;

/// 32-byte AES-256 key, zeroized on drop.
///
/// Never exposed to `sfcp-core` directly: callers only ever see a
/// [`KeyId`] handle and hand it back to [`crate::CryptoHal`] methods.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey").field("bytes", &"<redacted>").finish()
    }
}
