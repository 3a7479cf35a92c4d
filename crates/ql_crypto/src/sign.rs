//! RSA-PSS signatures — SHA-256 digest, 32-byte salt, 2048-bit modulus.
//!
//! Verification NEVER errors: any malformed key, signature, or payload is
//! reported as `false`.  The relay validator depends on this to map every
//! bad signature to the same rejection without special-casing parse
//! failures.

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// RSA modulus size for long-term identity keys.
pub const MODULUS_BITS: usize = 2048;
/// PSS salt length.
pub const SALT_LEN: usize = 32;

/// A long-term RSA signing key pair.
pub struct SigningKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl SigningKeyPair {
    /// Generate a fresh 2048-bit pair. Slow (seconds on small devices);
    /// call once per identity, not per session.
    pub fn generate() -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut OsRng, MODULUS_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Sign `msg` with RSA-PSS / SHA-256 / salt 32.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = SigningKey::<Sha256>::new_with_salt_len(self.private.clone(), SALT_LEN);
        let signature = key
            .try_sign_with_rng(&mut OsRng, msg)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        Ok(signature.to_vec())
    }

    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }

    /// SubjectPublicKeyInfo DER of the public half. The directory stores
    /// and serves exactly these bytes.
    pub fn public_spki_der(&self) -> Result<Vec<u8>, CryptoError> {
        spki_der(&self.public)
    }

    /// PKCS#8 DER of the private half, for the encrypted key store only.
    pub fn private_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let doc = self
            .private
            .to_pkcs8_der()
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    /// Rebuild a pair from PKCS#8 DER.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }
}

/// SubjectPublicKeyInfo DER for any RSA public key.
pub fn spki_der(public: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    public
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))
}

/// Verify an RSA-PSS signature against a SubjectPublicKeyInfo-encoded
/// verification key.  Returns `false` on ANY malformed input.
pub fn verify_spki(spki: &[u8], msg: &[u8], signature: &[u8]) -> bool {
    let Ok(public) = RsaPublicKey::from_public_key_der(spki) else {
        return false;
    };
    verify(&public, msg, signature)
}

/// Verify an RSA-PSS signature with an already-parsed public key.
pub fn verify(public: &RsaPublicKey, msg: &[u8], signature: &[u8]) -> bool {
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    let key = VerifyingKey::<Sha256>::new_with_salt_len(public.clone(), SALT_LEN);
    key.verify(msg, &signature).is_ok()
}
