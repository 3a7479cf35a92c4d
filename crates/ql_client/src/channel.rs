//! Secure channel — sealing and opening payloads under a completed
//! session's key.
//!
//! Per-direction sequence discipline:
//! - The send counter increments under the channel mutex, and the
//!   increment COMMITS only after the relay accepts the message — a
//!   rejected send leaves the counter where it was, so the next attempt
//!   carries the true next value.
//! - The receive counter advances only after AEAD authentication
//!   succeeds; a tampered message is discarded without moving it.
//!
//! Counter updates persist to the key store so a restarted client
//! continues the sequence instead of replaying it.

use std::sync::Arc;

use tokio::sync::Mutex;
use zeroize::Zeroizing;

use ql_crypto::{aead, rng};
use ql_proto::api::{SendMessageRequest, SendMessageResponse};
use ql_proto::encoding::{b64, b64d, b64d_array};
use ql_proto::message::{FileMetadata, MAX_PLAINTEXT_BYTES};
use ql_proto::{Clock, MessageRecord, MessageType, ProtocolError};

use crate::error::ClientError;
use crate::keystore::LocalKeyStore;
use crate::transport::Transport;

struct Counters {
    send: u64,
    recv: u64,
}

pub struct SecureChannel {
    pub(crate) user_id: String,
    pub(crate) session_id: String,
    pub(crate) partner_id: String,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    store: Arc<LocalKeyStore>,
    pub(crate) key: Zeroizing<[u8; 32]>,
    counters: Mutex<Counters>,
}

impl SecureChannel {
    /// Open the channel for a completed session from the local key store.
    pub async fn open(
        user_id: &str,
        session_id: &str,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        store: Arc<LocalKeyStore>,
    ) -> Result<Self, ClientError> {
        let entry = store
            .load_session(session_id)
            .await?
            .ok_or_else(|| ClientError::UnknownSession(session_id.to_string()))?;
        Ok(Self {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            partner_id: entry.partner_id.clone(),
            transport,
            clock,
            store,
            key: Zeroizing::new(entry.key_data),
            counters: Mutex::new(Counters {
                send: entry.sequence_number,
                recv: entry.received_sequence,
            }),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn partner_id(&self) -> &str {
        &self.partner_id
    }

    /// Seal and send a text payload.
    pub async fn send_text(&self, text: &str) -> Result<SendMessageResponse, ClientError> {
        self.send_payload(MessageType::Text, text.as_bytes(), None, None)
            .await
    }

    /// Seal `plaintext` (under the session key, or `seal_key` for
    /// envelope-mode file chunks) and submit it with the next sequence
    /// number. The counter is claimed under the mutex and committed only
    /// on relay acceptance.
    pub(crate) async fn send_payload(
        &self,
        message_type: MessageType,
        plaintext: &[u8],
        seal_key: Option<&[u8; 32]>,
        file_metadata: Option<FileMetadata>,
    ) -> Result<SendMessageResponse, ClientError> {
        if plaintext.len() > MAX_PLAINTEXT_BYTES {
            return Err(ClientError::Protocol(ProtocolError::MessageTooLarge));
        }
        let key = seal_key.unwrap_or(&*self.key);

        // Held across the send so sequence numbers and IVs are claimed
        // strictly serially per session.
        let mut counters = self.counters.lock().await;
        let sequence = counters.send + 1;

        let iv = rng::gcm_iv();
        let ciphertext = aead::seal(key, &iv, plaintext)?;
        let request = SendMessageRequest {
            to: self.partner_id.clone(),
            session_id: self.session_id.clone(),
            ciphertext: b64(&ciphertext),
            iv: b64(&iv),
            message_type,
            sequence_number: sequence,
            nonce: b64(&rng::handshake_nonce()),
            timestamp: self.clock.now_ms(),
            file_metadata,
        };

        // A rejected send must not consume the sequence slot.
        let response = self.transport.send_message(&self.user_id, &request).await?;
        counters.send = sequence;
        self.store
            .update_session_counters(&self.session_id, counters.send, counters.recv)
            .await?;
        Ok(response)
    }

    /// Open an incoming text message.
    pub async fn receive_text(&self, record: &MessageRecord) -> Result<String, ClientError> {
        let plaintext = self.receive(record).await?;
        String::from_utf8(plaintext.to_vec())
            .map_err(|_| ClientError::State("payload is not UTF-8".into()))
    }

    /// Open an incoming message sealed under the session key.
    pub async fn receive(
        &self,
        record: &MessageRecord,
    ) -> Result<Zeroizing<Vec<u8>>, ClientError> {
        self.open_with(record, &self.key).await
    }

    pub(crate) async fn open_with(
        &self,
        record: &MessageRecord,
        key: &[u8; 32],
    ) -> Result<Zeroizing<Vec<u8>>, ClientError> {
        if record.session_id != self.session_id || record.to != self.user_id {
            return Err(ClientError::State("message does not belong to this channel".into()));
        }
        let iv = b64d_array::<12>(&record.iv)?;
        let ciphertext = b64d(&record.ciphertext)?;

        let mut counters = self.counters.lock().await;
        let expected = counters.recv + 1;
        if record.sequence_number != expected {
            return Err(ClientError::OutOfOrder);
        }

        // Authentication failure leaves the counter untouched.
        let plaintext = aead::open(key, &iv, &ciphertext)?;

        counters.recv = expected;
        self.store
            .update_session_counters(&self.session_id, counters.send, counters.recv)
            .await?;
        Ok(plaintext)
    }

    /// The stored ciphertext history with this channel's peer.
    pub async fn fetch_conversation(&self) -> Result<Vec<MessageRecord>, ClientError> {
        let resp = self
            .transport
            .conversation(&self.user_id, &self.partner_id)
            .await?;
        Ok(resp.messages)
    }
}
