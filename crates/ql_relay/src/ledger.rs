//! Session ledger collaborator — durable handshake records and messages.
//!
//! Updates are serialised per record by optimistic concurrency: every
//! `HandshakeRecord` carries the `version` it was read at, and writes are
//! refused with `StoreError::Conflict` when the stored version moved.
//! Sequence-counter updates persist atomically with message storage, so a
//! crash can never accept a message without advancing the counter.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use ql_proto::{HandshakeRecord, MessageRecord, SessionStatus};

use crate::error::StoreError;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create a record. Fails with `Duplicate` if the session id is taken.
    async fn insert_record(&self, record: HandshakeRecord) -> Result<(), StoreError>;

    async fn get_record(&self, session_id: &str) -> Result<Option<HandshakeRecord>, StoreError>;

    /// Compare-and-set update: `record.version` must equal the stored
    /// version; the stored copy is bumped on success.
    async fn update_record(&self, record: HandshakeRecord) -> Result<(), StoreError>;

    /// `Initiated` records addressed to `responder_id`.
    async fn pending_for(&self, responder_id: &str) -> Result<Vec<HandshakeRecord>, StoreError>;

    /// Records below `Completed` whose deadline has passed (TTL scan).
    async fn stale_records(&self, now_ms: i64) -> Result<Vec<HandshakeRecord>, StoreError>;

    /// Atomically CAS-update the handshake record (sequence counter) and
    /// append the message.
    async fn append_message(
        &self,
        record: HandshakeRecord,
        message: MessageRecord,
    ) -> Result<(), StoreError>;

    /// Chronological ciphertext history between two users.
    async fn conversation(&self, a: &str, b: &str) -> Result<Vec<MessageRecord>, StoreError>;
}

// ── In-memory implementation ──────────────────────────────────────────────────

#[derive(Default)]
struct LedgerInner {
    records: HashMap<String, HandshakeRecord>,
    messages: Vec<MessageRecord>,
}

/// In-memory ledger. One mutex linearises all writes; the CAS contract is
/// still honoured so the validator behaves identically against a
/// database-backed implementation.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<LedgerInner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn cas_store(
        inner: &mut LedgerInner,
        mut record: HandshakeRecord,
    ) -> Result<(), StoreError> {
        let stored = inner
            .records
            .get(&record.session_id)
            .ok_or(StoreError::NotFound)?;
        if stored.version != record.version {
            return Err(StoreError::Conflict);
        }
        record.version += 1;
        inner.records.insert(record.session_id.clone(), record);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn insert_record(&self, record: HandshakeRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.records.contains_key(&record.session_id) {
            return Err(StoreError::Duplicate);
        }
        inner.records.insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn get_record(&self, session_id: &str) -> Result<Option<HandshakeRecord>, StoreError> {
        Ok(self.inner.lock().records.get(session_id).cloned())
    }

    async fn update_record(&self, record: HandshakeRecord) -> Result<(), StoreError> {
        Self::cas_store(&mut self.inner.lock(), record)
    }

    async fn pending_for(&self, responder_id: &str) -> Result<Vec<HandshakeRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut pending: Vec<_> = inner
            .records
            .values()
            .filter(|r| r.status == SessionStatus::Initiated && r.responder_id == responder_id)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn stale_records(&self, now_ms: i64) -> Result<Vec<HandshakeRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .records
            .values()
            .filter(|r| r.is_expired(now_ms))
            .cloned()
            .collect())
    }

    async fn append_message(
        &self,
        record: HandshakeRecord,
        message: MessageRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::cas_store(&mut inner, record)?;
        inner.messages.push(message);
        Ok(())
    }

    async fn conversation(&self, a: &str, b: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut history: Vec<_> = inner
            .messages
            .iter()
            .filter(|m| (m.from == a && m.to == b) || (m.from == b && m.to == a))
            .cloned()
            .collect();
        history.sort_by(|x, y| x.server_timestamp.cmp(&y.server_timestamp));
        Ok(history)
    }
}
