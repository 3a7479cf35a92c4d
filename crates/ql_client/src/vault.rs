//! Vault: in-memory key material unlocked by user password.
//!
//! The vault holds the 32-byte store encryption key in memory while the
//! client is unlocked.  Locking zeroizes the key; every blob the key
//! store persists goes through `seal_blob`/`open_blob`.
//!
//! Blob wire format: base64( iv (12 bytes) || ciphertext + tag ).

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::sync::RwLock;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use ql_crypto::{aead, kdf, rng};

use crate::error::ClientError;

#[derive(ZeroizeOnDrop)]
struct VaultInner {
    key: [u8; 32],
}

/// Thread-safe vault handle. Clone to share across tasks.
#[derive(Clone)]
pub struct Vault {
    inner: Arc<RwLock<Option<VaultInner>>>,
}

impl Vault {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(None)) }
    }

    /// Unlock with the user password and the salt stored beside the data.
    pub async fn unlock(&self, password: &[u8], salt: &[u8; 16]) -> Result<(), ClientError> {
        let vault_key = kdf::vault_key_from_password(password, salt)?;
        let mut guard = self.inner.write().await;
        *guard = Some(VaultInner { key: vault_key.0 });
        Ok(())
    }

    /// Unlock with an already-derived key (e.g. from an OS keyring).
    pub async fn unlock_with_key(&self, key: [u8; 32]) {
        let mut guard = self.inner.write().await;
        *guard = Some(VaultInner { key });
    }

    /// Lock the vault — zeroizes the key.
    pub async fn lock(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }

    pub async fn is_locked(&self) -> bool {
        self.inner.read().await.is_none()
    }

    /// Run `f` with the raw key. Fails when locked.
    pub async fn with_key<F, R>(&self, f: F) -> Result<R, ClientError>
    where
        F: FnOnce(&[u8; 32]) -> Result<R, ClientError>,
    {
        let guard = self.inner.read().await;
        match guard.as_ref() {
            Some(inner) => f(&inner.key),
            None => Err(ClientError::VaultLocked),
        }
    }

    /// Encrypt a blob for at-rest storage.
    pub async fn seal_blob(&self, plaintext: &[u8]) -> Result<String, ClientError> {
        self.with_key(|key| {
            let iv = rng::gcm_iv();
            let ct = aead::seal(key, &iv, plaintext)?;
            let mut out = Vec::with_capacity(iv.len() + ct.len());
            out.extend_from_slice(&iv);
            out.extend_from_slice(&ct);
            Ok(STANDARD.encode(out))
        })
        .await
    }

    /// Decrypt a blob sealed by `seal_blob`.
    pub async fn open_blob(&self, sealed_b64: &str) -> Result<Zeroizing<Vec<u8>>, ClientError> {
        let sealed = STANDARD
            .decode(sealed_b64)
            .map_err(|e| ClientError::Crypto(e.into()))?;
        if sealed.len() < aead::IV_LEN {
            return Err(ClientError::Crypto(ql_crypto::CryptoError::AuthFailed));
        }
        let (iv_bytes, ct) = sealed.split_at(aead::IV_LEN);
        let mut iv = [0u8; aead::IV_LEN];
        iv.copy_from_slice(iv_bytes);

        self.with_key(|key| Ok(aead::open(key, &iv, ct)?)).await
    }
}

impl Default for Vault {
    fn default() -> Self {
        Self::new()
    }
}

/// Fresh salt for a new store. Persist beside the encrypted data.
pub fn new_vault_salt() -> [u8; 16] {
    kdf::generate_salt()
}
