//! Ephemeral ECDH over P-256.
//!
//! Public points travel as 65-byte SEC1 uncompressed encodings
//! (`0x04 || X || Y`).  The shared secret is the raw X coordinate of the
//! shared point, 32 bytes, consumed immediately by HKDF and zeroized.
//!
//! One key pair per handshake; the secret half is exportable only so the
//! client key store can persist a pending handshake across restarts.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// SEC1 uncompressed P-256 point length.
pub const POINT_LEN: usize = 65;

/// An ephemeral P-256 key pair for one handshake.
pub struct EphemeralKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a fresh pair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// 65-byte uncompressed public point.
    pub fn public_bytes(&self) -> [u8; POINT_LEN] {
        let point = self.public.to_encoded_point(false);
        let mut out = [0u8; POINT_LEN];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Raw scalar bytes for key-store persistence. Treat as secret.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(&self.secret.to_bytes());
        out
    }

    /// Rebuild a pair from persisted scalar bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|_| CryptoError::InvalidKey("invalid P-256 scalar".into()))?;
        let public = secret.public_key();
        Ok(Self { secret, public })
    }

    /// Compute the shared secret with a peer's 65-byte public point.
    /// Returns the 32-byte X coordinate, zeroized on drop.
    pub fn derive(&self, peer_public: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let peer = decode_public(peer_public)?;
        let shared = p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(shared.raw_secret_bytes());
        Ok(out)
    }
}

/// Parse a SEC1-encoded public point, rejecting anything off-curve.
pub fn decode_public(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    if bytes.len() != POINT_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "ephemeral public key must be {POINT_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|_| CryptoError::InvalidKey("point not on P-256".into()))
}
