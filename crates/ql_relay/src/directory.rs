//! Identity directory collaborator — long-term verification keys by user id.
//!
//! Registration, password handling, and the directory's own storage are
//! external; the validator only ever asks two questions: does this user
//! exist, and what is their signing key.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StoreError;

#[async_trait]
pub trait DirectoryLookup: Send + Sync {
    /// Whether a user id is known to the directory.
    async fn exists(&self, user_id: &str) -> Result<bool, StoreError>;

    /// The user's RSA-PSS verification key as SubjectPublicKeyInfo DER.
    /// `None` when the user exists but never registered a signing key.
    async fn signing_key_spki(&self, user_id: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// In-memory directory for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<String, Option<Vec<u8>>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with their signing verification key.
    pub fn register(&self, user_id: &str, signing_spki: Vec<u8>) {
        self.users
            .write()
            .insert(user_id.to_string(), Some(signing_spki));
    }

    /// Register a user that has no signing key (exercises `NoSigningKey`).
    pub fn register_without_key(&self, user_id: &str) {
        self.users.write().insert(user_id.to_string(), None);
    }
}

#[async_trait]
impl DirectoryLookup for MemoryDirectory {
    async fn exists(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.users.read().contains_key(user_id))
    }

    async fn signing_key_spki(&self, user_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.users.read().get(user_id).cloned().flatten())
    }
}
