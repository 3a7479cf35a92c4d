//! Authenticated encryption.
//!
//! AES-256-GCM.  Key: 32 bytes.  IV: 12 bytes (random, carried beside the
//! ciphertext on the wire).  Tag: 16 bytes, appended to the ciphertext.
//!
//! Unlike the local-store helpers, the wire format keeps the IV as a
//! separate field, so `seal`/`open` take it explicitly.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::rng;

/// AES-GCM IV length (96 bits).
pub const IV_LEN: usize = 12;
/// AES-GCM authentication tag length (128 bits).
pub const TAG_LEN: usize = 16;

/// Encrypt `plaintext` under a 32-byte key and 12-byte IV.
/// The 16-byte tag is appended to the returned ciphertext.
pub fn seal(key: &[u8; 32], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::SealFailed)?;
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| CryptoError::SealFailed)
}

/// Decrypt and authenticate `ciphertext` (tag appended).
pub fn open(
    key: &[u8; 32],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::AuthFailed);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AuthFailed)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::AuthFailed)?;
    Ok(Zeroizing::new(plaintext))
}

// ── Key wrapping (file envelope mode) ─────────────────────────────────────────

/// Wrap a 32-byte file key under the session key.
/// Wire format: `[ iv (12 bytes) | ciphertext + tag ]`.
pub fn wrap_key(session_key: &[u8; 32], file_key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let iv = rng::gcm_iv();
    let ct = seal(session_key, &iv, file_key)?;
    let mut out = Vec::with_capacity(IV_LEN + ct.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Unwrap a file key wrapped by `wrap_key`.
pub fn unwrap_key(session_key: &[u8; 32], wrapped: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    if wrapped.len() < IV_LEN {
        return Err(CryptoError::AuthFailed);
    }
    let (iv_bytes, ct) = wrapped.split_at(IV_LEN);
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(iv_bytes);

    let plaintext = open(session_key, &iv, ct)?;
    if plaintext.len() != 32 {
        return Err(CryptoError::InvalidKey("unwrapped key wrong length".into()));
    }
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&plaintext);
    Ok(out)
}
