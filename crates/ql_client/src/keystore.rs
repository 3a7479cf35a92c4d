//! Local key store — typed, vault-encrypted blobs.
//!
//! Holds exactly what the client needs to survive a restart:
//! - the long-term signing and encryption private keys (PKCS#8 DER),
//! - pending-handshake state (ephemeral secret + nonce) keyed by session,
//! - one `SessionKeyEntry` per completed session.
//!
//! Every value is sealed by the vault before it touches the blob map, so
//! the at-rest representation never contains raw key material.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use ql_crypto::identity::EncryptionKeyPair;
use ql_crypto::sign::SigningKeyPair;
use ql_proto::Role;

use crate::error::ClientError;
use crate::vault::Vault;

/// Session key + channel counters, stored alongside the partner id so
/// later operations can address the peer without a directory round trip.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SessionKeyEntry {
    #[zeroize(skip)]
    pub partner_id: String,
    pub key_data: [u8; 32],
    /// Last sequence number the relay accepted from us.
    #[zeroize(skip)]
    pub sequence_number: u64,
    /// Last sequence number we accepted from the peer.
    #[zeroize(skip)]
    pub received_sequence: u64,
}

/// In-flight handshake state, persisted so `resume` works after a restart.
#[derive(Serialize, Deserialize, ZeroizeOnDrop)]
pub struct PendingHandshake {
    #[zeroize(skip)]
    pub session_id: String,
    #[zeroize(skip)]
    pub role: Role,
    #[zeroize(skip)]
    pub peer_id: String,
    pub ephemeral_secret: [u8; 32],
    pub our_nonce: [u8; 32],
}

pub struct LocalKeyStore {
    vault: Vault,
    blobs: RwLock<HashMap<String, String>>,
}

impl LocalKeyStore {
    pub fn new(vault: Vault) -> Self {
        Self { vault, blobs: RwLock::new(HashMap::new()) }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    async fn put(&self, key: &str, plaintext: &[u8]) -> Result<(), ClientError> {
        let sealed = self.vault.seal_blob(plaintext).await?;
        self.blobs.write().insert(key.to_string(), sealed);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, ClientError> {
        let sealed = self.blobs.read().get(key).cloned();
        match sealed {
            Some(sealed) => Ok(Some(self.vault.open_blob(&sealed).await?)),
            None => Ok(None),
        }
    }

    fn remove(&self, key: &str) {
        self.blobs.write().remove(key);
    }

    // ── Long-term identity keys ──────────────────────────────────────────

    pub async fn store_signing_key(&self, pair: &SigningKeyPair) -> Result<(), ClientError> {
        let der = pair.private_pkcs8_der()?;
        self.put("identity/signing", &der).await
    }

    pub async fn load_signing_key(&self) -> Result<Option<SigningKeyPair>, ClientError> {
        match self.get("identity/signing").await? {
            Some(der) => Ok(Some(SigningKeyPair::from_pkcs8_der(&der)?)),
            None => Ok(None),
        }
    }

    pub async fn store_encryption_key(&self, pair: &EncryptionKeyPair) -> Result<(), ClientError> {
        let der = pair.private_pkcs8_der()?;
        self.put("identity/encryption", &der).await
    }

    pub async fn load_encryption_key(&self) -> Result<Option<EncryptionKeyPair>, ClientError> {
        match self.get("identity/encryption").await? {
            Some(der) => Ok(Some(EncryptionKeyPair::from_pkcs8_der(&der)?)),
            None => Ok(None),
        }
    }

    // ── Pending handshakes ───────────────────────────────────────────────

    pub async fn store_pending(&self, pending: &PendingHandshake) -> Result<(), ClientError> {
        let json = serde_json::to_vec(pending).map_err(|e| ClientError::State(e.to_string()))?;
        self.put(&format!("pending/{}", pending.session_id), &json).await
    }

    pub async fn load_pending(
        &self,
        session_id: &str,
    ) -> Result<Option<PendingHandshake>, ClientError> {
        match self.get(&format!("pending/{session_id}")).await? {
            Some(json) => Ok(Some(
                serde_json::from_slice(&json).map_err(|e| ClientError::State(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn remove_pending(&self, session_id: &str) {
        self.remove(&format!("pending/{session_id}"));
    }

    // ── Session keys ─────────────────────────────────────────────────────

    pub async fn store_session(
        &self,
        session_id: &str,
        entry: &SessionKeyEntry,
    ) -> Result<(), ClientError> {
        let json = serde_json::to_vec(entry).map_err(|e| ClientError::State(e.to_string()))?;
        self.put(&format!("session/{session_id}"), &json).await
    }

    pub async fn load_session(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionKeyEntry>, ClientError> {
        match self.get(&format!("session/{session_id}")).await? {
            Some(json) => Ok(Some(
                serde_json::from_slice(&json).map_err(|e| ClientError::State(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Persist advanced channel counters for a session.
    pub async fn update_session_counters(
        &self,
        session_id: &str,
        sequence_number: u64,
        received_sequence: u64,
    ) -> Result<(), ClientError> {
        let mut entry = self
            .load_session(session_id)
            .await?
            .ok_or_else(|| ClientError::UnknownSession(session_id.to_string()))?;
        entry.sequence_number = sequence_number;
        entry.received_sequence = received_sequence;
        self.store_session(session_id, &entry).await
    }

    pub fn remove_session(&self, session_id: &str) {
        self.remove(&format!("session/{session_id}"));
    }
}
