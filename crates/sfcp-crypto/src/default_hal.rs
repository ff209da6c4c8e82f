//! The workspace's reference [`CryptoHal`] implementation.
//!
//! AES-256-CCM and AES-256-GCM via RustCrypto, SHA-384 via `sha2`, and
//! `rand`'s OS-backed RNG. Key material lives behind a single `Mutex`,
//! mirroring the registry pattern used elsewhere in this workspace for
//! shared mutable state touched from both foreground and interrupt
//! contexts.

use std::collections::HashMap;
use std::sync::Mutex;

use aead::{AeadInPlace, KeyInit};
use aes_gcm::AesGcm;
use ccm::Ccm;
use ccm::aead::generic_array::GenericArray;
use ccm::consts::{U8, U16};
use rand::RngCore;
use sha2::{Digest, Sha384};

use crate::aead::{CryptoHal, HASH_SIZE, IV_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::CryptoError;
use crate::key::{KeyId, SessionKey};
use crate::mode::CryptographyMode;

type Aes256Ccm8 = Ccm<aes::Aes256, U16, U8>;
type Aes256Gcm8 = AesGcm<aes::Aes256, U8>;

struct Inner {
    keys: HashMap<KeyId, SessionKey>,
    next_id: u32,
}

impl Inner {
    fn insert(&mut self, key: SessionKey) -> KeyId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.keys.insert(id, key);
        id
    }
}

/// Reference [`CryptoHal`] backed by RustCrypto AEAD implementations.
pub struct DefaultCryptoHal {
    inner: Mutex<Inner>,
}

impl Default for DefaultCryptoHal {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultCryptoHal {
    /// Construct an empty HAL with no session keys registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                keys: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    fn with_key<R>(
        &self,
        key_id: KeyId,
        f: impl FnOnce(&SessionKey) -> R,
    ) -> Result<R, CryptoError> {
        let guard = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        let key = guard.keys.get(&key_id).ok_or(CryptoError::UnknownKey(key_id))?;
        Ok(f(key))
    }

    fn derive_key_from_ivs(&self, ivs: &[[u8; IV_SIZE]]) -> SessionKey {
        let chunks: Vec<&[u8]> = ivs.iter().map(|iv| iv.as_slice()).collect();
        let digest = self.hash_sha384(&chunks);
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&digest[..32]);
        SessionKey::from_bytes(key_bytes)
    }
}

impl CryptoHal for DefaultCryptoHal {
    fn encrypt_packet(
        &self,
        key_id: KeyId,
        mode: CryptographyMode,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        buf: &mut [u8],
    ) -> Result<[u8; TAG_SIZE], CryptoError> {
        if !mode.is_locally_supported() {
            return Err(CryptoError::CryptographyNotSupported { mode });
        }
        self.with_key(key_id, |key| {
            let key_bytes = GenericArray::from_slice(key.as_bytes());
            let nonce = GenericArray::from_slice(nonce);
            let tag = match mode {
                CryptographyMode::Aes256Ccm => {
                    let cipher = Aes256Ccm8::new(key_bytes);
                    cipher.encrypt_in_place_detached(nonce, aad, buf)
                }
                CryptographyMode::Aes256Gcm => {
                    let cipher = Aes256Gcm8::new(key_bytes);
                    cipher.encrypt_in_place_detached(nonce, aad, buf)
                }
                CryptographyMode::Sm4Ccm | CryptographyMode::Sm4Gcm => unreachable!(),
            }
            .map_err(|_| CryptoError::EncryptionFailed)?;
            let mut out = [0u8; TAG_SIZE];
            out.copy_from_slice(tag.as_slice());
            Ok(out)
        })?
    }

    fn decrypt_packet(
        &self,
        key_id: KeyId,
        mode: CryptographyMode,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        buf: &mut [u8],
        tag: &[u8; TAG_SIZE],
    ) -> Result<(), CryptoError> {
        if !mode.is_locally_supported() {
            return Err(CryptoError::CryptographyNotSupported { mode });
        }
        self.with_key(key_id, |key| {
            let key_bytes = GenericArray::from_slice(key.as_bytes());
            let nonce = GenericArray::from_slice(nonce);
            let tag = GenericArray::from_slice(tag);
            match mode {
                CryptographyMode::Aes256Ccm => {
                    let cipher = Aes256Ccm8::new(key_bytes);
                    cipher.decrypt_in_place_detached(nonce, aad, buf, tag)
                }
                CryptographyMode::Aes256Gcm => {
                    let cipher = Aes256Gcm8::new(key_bytes);
                    cipher.decrypt_in_place_detached(nonce, aad, buf, tag)
                }
                CryptographyMode::Sm4Ccm | CryptographyMode::Sm4Gcm => unreachable!(),
            }
            .map_err(|_| CryptoError::DecryptionFailed)
        })?
    }

    fn hash_sha384(&self, chunks: &[&[u8]]) -> [u8; HASH_SIZE] {
        let mut hasher = Sha384::new();
        for chunk in chunks {
            hasher.update(chunk);
        }
        let digest = hasher.finalize();
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&digest);
        out
    }

    fn random(&self, out: &mut [u8]) -> Result<(), CryptoError> {
        rand::thread_rng().try_fill_bytes(out).map_err(|_| CryptoError::GenerateRandomFailure)
    }

    fn derive_session_key(&self, ivs: &[[u8; IV_SIZE]]) -> Result<KeyId, CryptoError> {
        let key = self.derive_key_from_ivs(ivs);
        let mut guard = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        Ok(guard.insert(key))
    }

    fn rekey_session_key(&self, iv: &[u8; IV_SIZE]) -> Result<KeyId, CryptoError> {
        let key = self.derive_key_from_ivs(std::slice::from_ref(iv));
        let mut guard = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        Ok(guard.insert(key))
    }

    fn invalidate_key(&self, key_id: KeyId) -> Result<(), CryptoError> {
        let mut guard = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        guard
            .keys
            .remove(&key_id)
            .map(|_| ())
            .ok_or(CryptoError::InvalidateSessionKeyFailure)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_aes_256_ccm() {
        let hal = DefaultCryptoHal::new();
        let ivs = [[7u8; IV_SIZE], [9u8; IV_SIZE]];
        let key_id = hal.derive_session_key(&ivs).unwrap();

        let nonce = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let aad = [0xAAu8, 0xBB];
        let mut buf = b"hello firmware".to_vec();
        let plaintext = buf.clone();

        let tag = hal
            .encrypt_packet(key_id, CryptographyMode::Aes256Ccm, &nonce, &aad, &mut buf)
            .unwrap();
        assert_ne!(buf, plaintext);

        hal.decrypt_packet(key_id, CryptographyMode::Aes256Ccm, &nonce, &aad, &mut buf, &tag)
            .unwrap();
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn round_trips_aes_256_gcm() {
        let hal = DefaultCryptoHal::new();
        let ivs = [[3u8; IV_SIZE]];
        let key_id = hal.derive_session_key(&ivs).unwrap();

        let nonce = [9u8; NONCE_SIZE];
        let aad: [u8; 0] = [];
        let mut buf = b"rse-comms".to_vec();
        let plaintext = buf.clone();

        let tag = hal
            .encrypt_packet(key_id, CryptographyMode::Aes256Gcm, &nonce, &aad, &mut buf)
            .unwrap();
        hal.decrypt_packet(key_id, CryptographyMode::Aes256Gcm, &nonce, &aad, &mut buf, &tag)
            .unwrap();
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let hal = DefaultCryptoHal::new();
        let key_id = hal.derive_session_key(&[[1u8; IV_SIZE]]).unwrap();
        let nonce = [0u8; NONCE_SIZE];
        let aad: [u8; 0] = [];
        let mut buf = b"payload".to_vec();
        let tag = hal
            .encrypt_packet(key_id, CryptographyMode::Aes256Ccm, &nonce, &aad, &mut buf)
            .unwrap();
        buf[0] ^= 0xFF;
        let err = hal
            .decrypt_packet(key_id, CryptographyMode::Aes256Ccm, &nonce, &aad, &mut buf, &tag)
            .unwrap_err();
        assert_eq!(err, CryptoError::DecryptionFailed);
    }

    #[test]
    fn unknown_key_id_errors() {
        let hal = DefaultCryptoHal::new();
        let nonce = [0u8; NONCE_SIZE];
        let mut buf = b"x".to_vec();
        let err = hal
            .encrypt_packet(42, CryptographyMode::Aes256Ccm, &nonce, &[], &mut buf)
            .unwrap_err();
        assert_eq!(err, CryptoError::UnknownKey(42));
    }

    #[test]
    fn unsupported_mode_errors() {
        let hal = DefaultCryptoHal::new();
        let key_id = hal.derive_session_key(&[[1u8; IV_SIZE]]).unwrap();
        let nonce = [0u8; NONCE_SIZE];
        let mut buf = b"x".to_vec();
        let err = hal
            .encrypt_packet(key_id, CryptographyMode::Sm4Ccm, &nonce, &[], &mut buf)
            .unwrap_err();
        assert_eq!(err, CryptoError::CryptographyNotSupported { mode: CryptographyMode::Sm4Ccm });
    }

    #[test]
    fn rekey_produces_independent_key_id() {
        let hal = DefaultCryptoHal::new();
        let first = hal.derive_session_key(&[[1u8; IV_SIZE]]).unwrap();
        let second = hal.rekey_session_key(&[2u8; IV_SIZE]).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn invalidated_key_is_unusable() {
        let hal = DefaultCryptoHal::new();
        let key_id = hal.derive_session_key(&[[1u8; IV_SIZE]]).unwrap();
        hal.invalidate_key(key_id).unwrap();
        let nonce = [0u8; NONCE_SIZE];
        let mut buf = b"x".to_vec();
        let err = hal
            .encrypt_packet(key_id, CryptographyMode::Aes256Ccm, &nonce, &[], &mut buf)
            .unwrap_err();
        assert_eq!(err, CryptoError::UnknownKey(key_id));
    }

    #[test]
    fn hash_is_deterministic_and_48_bytes() {
        let hal = DefaultCryptoHal::new();
        let a = hal.hash_sha384(&[b"abc", b"def"]);
        let b = hal.hash_sha384(&[b"abc", b"def"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), HASH_SIZE);
    }
}
