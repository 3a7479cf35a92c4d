//! Long-term identity key material.
//!
//! Each user owns two RSA-2048 pairs, generated client-side:
//! - a **signing** pair (RSA-PSS) that authenticates handshake messages;
//! - an **encryption** pair, kept for directory-level fingerprinting and
//!   key-transport uses outside the session handshake.
//!
//! Only the public halves (as SubjectPublicKeyInfo DER) ever leave the
//! device; private halves live in the encrypted key store.
//!
//! Fingerprint = first 16 bytes of SHA-256 over the SPKI encoding,
//! hex, space-grouped for side-by-side comparison.

use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::hash::sha256;
use crate::sign::{spki_der, SigningKeyPair, MODULUS_BITS};

/// Both long-term pairs for one user.
pub struct Identity {
    pub user_id: String,
    pub signing: SigningKeyPair,
    pub encryption: EncryptionKeyPair,
}

impl Identity {
    /// Generate both pairs. Expensive; done once at enrolment.
    pub fn generate(user_id: &str) -> Result<Self, CryptoError> {
        Ok(Self {
            user_id: user_id.to_string(),
            signing: SigningKeyPair::generate()?,
            encryption: EncryptionKeyPair::generate()?,
        })
    }
}

/// RSA pair reserved for key transport; not used by the session handshake.
pub struct EncryptionKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl EncryptionKeyPair {
    pub fn generate() -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut OsRng, MODULUS_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn public_spki_der(&self) -> Result<Vec<u8>, CryptoError> {
        spki_der(&self.public)
    }

    pub fn private_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let doc = self
            .private
            .to_pkcs8_der()
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }
}

/// Fingerprint of a public key from its SPKI encoding: first 16 bytes of
/// SHA-256, hex, grouped in fours.
///
/// Example: "a1b2 c3d4 e5f6 7890 abcd ef01 2345 6789"
pub fn fingerprint(spki: &[u8]) -> String {
    let digest = sha256(spki);
    let hex = hex::encode(&digest[..16]);
    hex.as_bytes()
        .chunks(4)
        .map(|c| std::str::from_utf8(c).expect("hex is ASCII").to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_grouped() {
        let pair = SigningKeyPair::generate().unwrap();
        let spki = pair.public_spki_der().unwrap();

        let fp1 = fingerprint(&spki);
        let fp2 = fingerprint(&spki);
        assert_eq!(fp1, fp2);
        // 16 bytes → 32 hex chars → 8 groups of 4 + 7 spaces.
        assert_eq!(fp1.len(), 39);
        assert_eq!(fp1.split(' ').count(), 8);
    }

    #[test]
    fn distinct_keys_have_distinct_fingerprints() {
        let a = SigningKeyPair::generate().unwrap();
        let b = SigningKeyPair::generate().unwrap();
        assert_ne!(
            fingerprint(&a.public_spki_der().unwrap()),
            fingerprint(&b.public_spki_der().unwrap())
        );
    }

    #[test]
    fn encryption_pair_round_trips_through_pkcs8() {
        let pair = EncryptionKeyPair::generate().unwrap();
        let der = pair.private_pkcs8_der().unwrap();
        let restored = EncryptionKeyPair::from_pkcs8_der(&der).unwrap();
        assert_eq!(
            pair.public_spki_der().unwrap(),
            restored.public_spki_der().unwrap()
        );
    }
}
