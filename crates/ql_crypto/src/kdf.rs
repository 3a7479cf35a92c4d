//! Key derivation.
//!
//! `derive_session_key` — HKDF-SHA-256 over the raw ECDH shared secret,
//!   salted with both handshake nonces in a fixed order. Both parties MUST
//!   pass the initiator nonce first; earlier protocol revisions disagreed
//!   on the order and never interoperated.
//!
//! `vault_key_from_password` — Argon2id, derives the 32-byte key that
//!   encrypts the local key store.

use argon2::{Argon2, Params, Version};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::rng;

/// HKDF info string binding derived keys to this protocol.
pub const SESSION_KEY_INFO: &[u8] = b"secure-messaging-session-key";

// ── Session key (HKDF-SHA256) ─────────────────────────────────────────────────

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::DerivationFailed(e.to_string()))
}

/// Derive the 32-byte AES-256-GCM session key from the raw ECDH shared
/// secret `z` and the two handshake nonces.
///
/// `salt = initiator_nonce ‖ responder_nonce`, in that order on both sides.
pub fn derive_session_key(
    z: &[u8; 32],
    initiator_nonce: &[u8; 32],
    responder_nonce: &[u8; 32],
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut salt = Zeroizing::new([0u8; 64]);
    salt[..32].copy_from_slice(initiator_nonce);
    salt[32..].copy_from_slice(responder_nonce);

    let mut key = Zeroizing::new([0u8; 32]);
    hkdf_expand(z, Some(&*salt), SESSION_KEY_INFO, &mut *key)?;
    Ok(key)
}

// ── Vault key (Argon2id) ──────────────────────────────────────────────────────

/// 32-byte vault key derived from the user password. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct VaultKey(pub [u8; 32]);

/// Argon2id parameters — tuned for interactive client use.
fn argon2_params() -> Params {
    Params::new(
        64 * 1024, // m_cost: 64 MiB
        3,         // t_cost: 3 iterations
        1,         // p_cost: 1 thread
        Some(32),  // output len
    )
    .expect("Static Argon2 params are always valid")
}

/// Derive a vault key from a user password + 16-byte salt.
/// The salt is stored alongside the encrypted store (not secret).
pub fn vault_key_from_password(password: &[u8], salt: &[u8; 16]) -> Result<VaultKey, CryptoError> {
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params());
    let mut output = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| CryptoError::DerivationFailed(e.to_string()))?;
    Ok(VaultKey(output))
}

/// Fresh random 16-byte vault salt (call once per store; persist beside it).
pub fn generate_salt() -> [u8; 16] {
    rng::random_array::<16>()
}
