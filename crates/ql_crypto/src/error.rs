use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("AEAD encryption failed")]
    SealFailed,

    #[error("AEAD decryption failed (authentication tag mismatch — possible tampering)")]
    AuthFailed,

    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Key encoding failed: {0}")]
    KeyEncoding(String),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
