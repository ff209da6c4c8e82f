//! Encryption wrapper: turns `(subnet, peer, seq)` bookkeeping into AEAD
//! calls on the crypto HAL (spec.md §4.4).
//!
//! Nonce = `header (4 bytes) || crypto config (4 bytes)` = 8 bytes. AAD is
//! the remaining non-crypto header fields, which in this wire format is
//! exactly the serialized `IdExtension` when present (the header itself is
//! already folded into the nonce, and there is nothing else outside the
//! ciphertext and the tag).

use sfcp_crypto::{CryptoHal, CryptographyMode, NONCE_SIZE};
use sfcp_proto::{CryptoMetadata, IdExtension, PacketHeader};

use crate::error::{CryptoFailure, SfcpError};
use crate::subnet::TrustedSubnetConfig;

fn nonce_from(header: PacketHeader, metadata_bytes: [u8; 4]) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..4].copy_from_slice(&header.to_bytes());
    nonce[4..].copy_from_slice(&metadata_bytes);
    nonce
}

fn crypto_config_bytes(seq_num: u16, mode: u8, trusted_subnet_id: u8) -> [u8; 4] {
    let mut bytes = [0u8; 4];
    bytes[..2].copy_from_slice(&seq_num.to_le_bytes());
    bytes[2] = mode;
    bytes[3] = trusted_subnet_id;
    bytes
}

fn aad_for(id_extension: Option<IdExtension>) -> Vec<u8> {
    match id_extension {
        Some(ext) => {
            let mut aad = Vec::with_capacity(4);
            aad.extend_from_slice(&ext.client_id.to_le_bytes());
            aad.extend_from_slice(&ext.application_id.to_le_bytes());
            aad
        },
        None => Vec::new(),
    }
}

/// Encrypt `buf` in place (the ciphertext region only, not header/metadata)
/// for `peer` under `subnet`, stamping a freshly-allocated send sequence
/// number into the returned [`CryptoMetadata`].
///
/// # Errors
///
/// [`SfcpError::CryptographyNotSupported`] if the subnet's mode has no local
/// implementation. [`SfcpError::EncryptionFailed`] on any other AEAD
/// failure. Propagates [`crate::subnet::TrustedSubnetConfig::get_send_seq_num`]
/// errors.
pub fn encrypt(
    hal: &dyn CryptoHal,
    subnet: &mut TrustedSubnetConfig,
    peer: u8,
    header: PacketHeader,
    id_extension: Option<IdExtension>,
    buf: &mut [u8],
) -> Result<CryptoMetadata, SfcpError> {
    let mode = subnet.mode();
    if !mode.is_locally_supported() {
        return Err(SfcpError::CryptographyNotSupported { mode });
    }

    let seq_num = subnet.get_send_seq_num(peer)?;
    let key_id = subnet.key_id().ok_or(SfcpError::InvalidTrustedSubnetState)?;

    let config_bytes = crypto_config_bytes(seq_num, mode.to_wire(), subnet.id);
    let nonce = nonce_from(header, config_bytes);
    let aad = aad_for(id_extension);

    let tag = hal
        .encrypt_packet(key_id, mode, &nonce, &aad, buf)
        .map_err(|e| SfcpError::EncryptionFailed(CryptoFailure(e)))?;

    Ok(CryptoMetadata { seq_num, mode: mode.to_wire(), trusted_subnet_id: subnet.id, tag })
}

/// Decrypt `buf` in place for `peer` within `subnet`, validating the
/// anti-replay window first.
///
/// # Errors
///
/// [`SfcpError::CryptographyNotSupported`], [`SfcpError::MsgAlreadyReceived`],
/// [`SfcpError::MsgOutOfOrderTemporaryFailure`], or
/// [`SfcpError::EncryptionFailed`] (tag verification failure).
pub fn decrypt(
    hal: &dyn CryptoHal,
    subnet: &mut TrustedSubnetConfig,
    peer: u8,
    header: PacketHeader,
    metadata: CryptoMetadata,
    id_extension: Option<IdExtension>,
    buf: &mut [u8],
) -> Result<(), SfcpError> {
    let mode = CryptographyMode::from_wire(metadata.mode);
    if !mode.is_locally_supported() {
        return Err(SfcpError::CryptographyNotSupported { mode });
    }

    subnet.check_recv_seq_num(peer, metadata.seq_num)?;
    let key_id = subnet.key_id().ok_or(SfcpError::InvalidTrustedSubnetState)?;

    let config_bytes = crypto_config_bytes(metadata.seq_num, metadata.mode, metadata.trusted_subnet_id);
    let nonce = nonce_from(header, config_bytes);
    let aad = aad_for(id_extension);

    hal.decrypt_packet(key_id, mode, &nonce, &aad, buf, &metadata.tag)
        .map_err(|e| SfcpError::EncryptionFailed(CryptoFailure(e)))
}
