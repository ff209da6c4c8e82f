//! Wire-encoded AEAD mode (`sfcp_cryptography_mode_t`).

/// AEAD algorithm selected for a trusted subnet.
///
/// All four wire values decode without error; only the two AES variants
/// have a local implementation (see [`crate::DefaultCryptoHal`]). The SM4
/// variants exist so a packet naming them can still be parsed and forwarded
/// through code that doesn't need to decrypt it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CryptographyMode {
    /// AES-256 in CCM mode. Protocol default.
    Aes256Ccm = 0,
    /// AES-256 in GCM mode.
    Aes256Gcm = 1,
    /// SM4 in CCM mode. Not implemented locally.
    Sm4Ccm = 2,
    /// SM4 in GCM mode. Not implemented locally.
    Sm4Gcm = 3,
}

impl CryptographyMode {
    /// Decode a wire mode byte.
    ///
    /// Unrecognized values fall back to [`Self::Aes256Ccm`] rather than
    /// erroring here; parsing never fails on this field, since mode
    /// validity is an encryption-time concern, not a framing concern.
    #[must_use]
    pub const fn from_wire(value: u8) -> Self {
        match value {
            1 => Self::Aes256Gcm,
            2 => Self::Sm4Ccm,
            3 => Self::Sm4Gcm,
            _ => Self::Aes256Ccm,
        }
    }

    /// Encode to the wire byte.
    #[must_use]
    pub const fn to_wire(self) -> u8 {
        self as u8
    }

    /// True if [`crate::DefaultCryptoHal`] can encrypt/decrypt this mode.
    #[must_use]
    pub const fn is_locally_supported(self) -> bool {
        matches!(self, Self::Aes256Ccm | Self::Aes256Gcm)
    }
}
