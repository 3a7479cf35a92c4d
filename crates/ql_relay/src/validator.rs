//! Relay-side validator — guards every ledger transition.
//!
//! Check order for handshake transitions, in this exact sequence:
//!   1. field presence and canonical encoding,
//!   2. timestamp freshness (BEFORE any signature work or ledger mutation),
//!   3. record fetch, then caller authorization against it (the transport
//!      has already authenticated the caller id; here it must also be the
//!      expected party for the attempted transition),
//!   4. signature over the reconstructed canonical payload,
//!   5. status gate,
//!   6. record expiry,
//!   7. sequence monotonicity (channel messages).
//!
//! Failures abort the transition, leave the record untouched, and write an
//! audit entry.  Concurrent transitions on one record are serialised by
//! the ledger's compare-and-set versioning: the loser re-reads,
//! re-validates, and usually discovers `InvalidStatus` or `ReplayDetected`.

use std::sync::Arc;

use ql_crypto::{ecdh, sign};
use ql_proto::api::{
    ConfirmRequest, ConfirmResponse, ConversationResponse, InitiateRequest, InitiateResponse,
    PendingResponse, ReportFailureRequest, RespondRequest, RespondResponse, SendMessageRequest,
    SendMessageResponse, StatusResponse,
};
use ql_proto::canonical;
use ql_proto::encoding::{b64d, b64d_array};
use ql_proto::message::MAX_SEALED_BYTES;
use ql_proto::record::FRESHNESS_WINDOW_MS;
use ql_proto::{
    Clock, HandshakeRecord, MessageRecord, ProtocolError, Role, SessionStatus, SessionView,
};

use crate::audit::{AuditEvent, AuditSink};
use crate::directory::DirectoryLookup;
use crate::error::StoreError;
use crate::ledger::LedgerStore;

/// Attempts before giving up on a contended record.
const CAS_RETRIES: usize = 3;

pub struct RelayValidator {
    directory: Arc<dyn DirectoryLookup>,
    ledger: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl RelayValidator {
    pub fn new(
        directory: Arc<dyn DirectoryLookup>,
        ledger: Arc<dyn LedgerStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { directory, ledger, audit, clock }
    }

    // ── Handshake: Init ──────────────────────────────────────────────────

    /// `POST /keys/exchange/initiate`
    pub async fn initiate(
        &self,
        caller: &str,
        ip: &str,
        req: &InitiateRequest,
    ) -> Result<InitiateResponse, ProtocolError> {
        let result = self.initiate_inner(caller, req).await;
        self.audit_outcome("key_exchange_init", result.as_ref().ok().map(|r| r.session_id.as_str()), caller, ip, &result)
            .await;
        result
    }

    async fn initiate_inner(
        &self,
        caller: &str,
        req: &InitiateRequest,
    ) -> Result<InitiateResponse, ProtocolError> {
        if caller.is_empty()
            || req.responder_id.is_empty()
            || req.ephemeral_public.is_empty()
            || req.nonce.is_empty()
            || req.signature.is_empty()
        {
            return Err(ProtocolError::MissingFields);
        }
        if req.responder_id == caller {
            // A party cannot hand-shake with itself.
            return Err(ProtocolError::MissingFields);
        }
        check_handshake_encodings(&req.ephemeral_public, &req.nonce, &req.signature)?;

        let now = self.clock.now_ms();
        check_freshness(now, req.timestamp)?;

        if !self.directory.exists(&req.responder_id).await.map_err(internal)? {
            return Err(ProtocolError::UserNotFound);
        }

        let payload = canonical::init_signing_payload(
            &req.responder_id,
            &req.ephemeral_public,
            &req.nonce,
            req.timestamp,
        );
        self.verify_caller_signature(caller, &payload, &req.signature).await?;

        let record = HandshakeRecord::initiated(
            caller,
            &req.responder_id,
            &req.ephemeral_public,
            &req.nonce,
            &req.signature,
            now,
        );
        let session_id = record.session_id.clone();
        match self.ledger.insert_record(record).await {
            Ok(()) => Ok(InitiateResponse { session_id }),
            // Same pair, same millisecond: the minted id is taken. Init
            // never mutates an existing record.
            Err(StoreError::Duplicate) => Err(ProtocolError::InvalidStatus),
            Err(e) => Err(internal(e)),
        }
    }

    // ── Handshake: Respond ───────────────────────────────────────────────

    /// `POST /keys/exchange/respond`
    pub async fn respond(
        &self,
        caller: &str,
        ip: &str,
        req: &RespondRequest,
    ) -> Result<RespondResponse, ProtocolError> {
        let result = self.respond_inner(caller, req).await;
        self.audit_outcome("key_exchange_respond", Some(req.session_id.as_str()), caller, ip, &result)
            .await;
        result
    }

    async fn respond_inner(
        &self,
        caller: &str,
        req: &RespondRequest,
    ) -> Result<RespondResponse, ProtocolError> {
        if req.session_id.is_empty()
            || req.ephemeral_public.is_empty()
            || req.nonce.is_empty()
            || req.signature.is_empty()
        {
            return Err(ProtocolError::MissingFields);
        }
        check_handshake_encodings(&req.ephemeral_public, &req.nonce, &req.signature)?;

        let now = self.clock.now_ms();
        check_freshness(now, req.timestamp)?;

        let payload = canonical::response_signing_payload(
            &req.session_id,
            &req.ephemeral_public,
            &req.nonce,
            req.timestamp,
        );

        for _ in 0..CAS_RETRIES {
            let mut record = self.fetch(&req.session_id).await?;
            if record.responder_id != caller {
                return Err(ProtocolError::Unauthorized);
            }
            self.verify_caller_signature(caller, &payload, &req.signature).await?;

            match record.status {
                SessionStatus::Initiated => {}
                SessionStatus::Expired => return Err(ProtocolError::SessionExpired),
                _ => return Err(ProtocolError::InvalidStatus),
            }
            if record.is_expired(now) {
                self.transition_expired(record).await;
                return Err(ProtocolError::SessionExpired);
            }

            let initiator_public_key = record.initiator_ephemeral_pub.clone();
            record.responder_ephemeral_pub = Some(req.ephemeral_public.clone());
            record.responder_nonce = Some(req.nonce.clone());
            record.responder_signature = Some(req.signature.clone());
            record.status = SessionStatus::Responded;

            match self.ledger.update_record(record).await {
                Ok(()) => {
                    return Ok(RespondResponse {
                        session_id: req.session_id.clone(),
                        initiator_public_key,
                    })
                }
                Err(StoreError::Conflict) => continue,
                Err(e) => return Err(internal(e)),
            }
        }
        // Contention exhausted: someone else moved the record first.
        Err(ProtocolError::InvalidStatus)
    }

    // ── Handshake: Confirm ───────────────────────────────────────────────

    /// `POST /keys/exchange/confirm`
    pub async fn confirm(
        &self,
        caller: &str,
        ip: &str,
        req: &ConfirmRequest,
    ) -> Result<ConfirmResponse, ProtocolError> {
        let result = self.confirm_inner(caller, req).await;
        self.audit_outcome("key_exchange_confirm", Some(req.session_id.as_str()), caller, ip, &result)
            .await;
        result
    }

    async fn confirm_inner(
        &self,
        caller: &str,
        req: &ConfirmRequest,
    ) -> Result<ConfirmResponse, ProtocolError> {
        if req.session_id.is_empty() || req.confirmation.is_empty() {
            return Err(ProtocolError::MissingFields);
        }
        // HMAC-SHA-256 tag: exactly 32 bytes.
        b64d_array::<32>(&req.confirmation)?;

        let role = if req.is_initiator { Role::Initiator } else { Role::Responder };
        let now = self.clock.now_ms();

        for _ in 0..CAS_RETRIES {
            let mut record = self.fetch(&req.session_id).await?;
            let expected_caller = match role {
                Role::Initiator => &record.initiator_id,
                Role::Responder => &record.responder_id,
            };
            if expected_caller != caller {
                return Err(ProtocolError::Unauthorized);
            }

            match record.status {
                SessionStatus::Responded | SessionStatus::Confirmed => {}
                SessionStatus::Expired => return Err(ProtocolError::SessionExpired),
                _ => return Err(ProtocolError::InvalidStatus),
            }
            if record.confirmation(role).is_some() {
                return Err(ProtocolError::InvalidStatus);
            }
            if record.is_expired(now) {
                self.transition_expired(record).await;
                return Err(ProtocolError::SessionExpired);
            }

            record.set_confirmation(role, &req.confirmation);
            let both_confirmed = record.initiator_confirmation.is_some()
                && record.responder_confirmation.is_some();
            record.status = if both_confirmed {
                record.completed_at = Some(now);
                SessionStatus::Completed
            } else {
                SessionStatus::Confirmed
            };
            let status = record.status;

            match self.ledger.update_record(record).await {
                Ok(()) => return Ok(ConfirmResponse { status }),
                Err(StoreError::Conflict) => continue,
                Err(e) => return Err(internal(e)),
            }
        }
        Err(ProtocolError::InvalidStatus)
    }

    // ── Handshake: peer-reported failure ─────────────────────────────────

    /// `POST /keys/exchange/fail` — confirmation mismatch observed by a
    /// participant. Terminal; the session key must never be used.
    pub async fn report_failure(
        &self,
        caller: &str,
        ip: &str,
        req: &ReportFailureRequest,
    ) -> Result<ConfirmResponse, ProtocolError> {
        let result = self.report_failure_inner(caller, req).await;
        self.audit_outcome("key_exchange_fail_report", Some(req.session_id.as_str()), caller, ip, &result)
            .await;
        result
    }

    async fn report_failure_inner(
        &self,
        caller: &str,
        req: &ReportFailureRequest,
    ) -> Result<ConfirmResponse, ProtocolError> {
        if req.session_id.is_empty() {
            return Err(ProtocolError::MissingFields);
        }
        for _ in 0..CAS_RETRIES {
            let mut record = self.fetch(&req.session_id).await?;
            if record.role_of(caller).is_none() {
                return Err(ProtocolError::Unauthorized);
            }
            if record.status == SessionStatus::Failed {
                // Idempotent: the peer may have reported first.
                return Ok(ConfirmResponse { status: SessionStatus::Failed });
            }
            record.status = SessionStatus::Failed;
            match self.ledger.update_record(record).await {
                Ok(()) => return Ok(ConfirmResponse { status: SessionStatus::Failed }),
                Err(StoreError::Conflict) => continue,
                Err(e) => return Err(internal(e)),
            }
        }
        Err(ProtocolError::Internal("record contention".into()))
    }

    // ── Handshake: reads ─────────────────────────────────────────────────

    /// `GET /keys/exchange/session/{id}`
    pub async fn session(
        &self,
        caller: &str,
        ip: &str,
        session_id: &str,
    ) -> Result<SessionView, ProtocolError> {
        let result = self.session_inner(caller, session_id).await;
        if result.is_err() {
            self.audit_outcome("session_read", Some(session_id), caller, ip, &result).await;
        }
        result
    }

    async fn session_inner(
        &self,
        caller: &str,
        session_id: &str,
    ) -> Result<SessionView, ProtocolError> {
        let record = self.fetch_lazily_expiring(session_id).await?;
        if record.role_of(caller).is_none() {
            return Err(ProtocolError::Unauthorized);
        }
        Ok(SessionView::from(&record))
    }

    /// `GET /keys/exchange/status/{id}`
    pub async fn status(
        &self,
        caller: &str,
        ip: &str,
        session_id: &str,
    ) -> Result<StatusResponse, ProtocolError> {
        let view = self.session(caller, ip, session_id).await?;
        Ok(StatusResponse {
            session_id: view.session_id,
            status: view.status,
            initiator_id: view.initiator_id,
            responder_id: view.responder_id,
            expires_at: view.expires_at,
            completed_at: view.completed_at,
        })
    }

    /// `GET /keys/exchange/pending` — `Initiated` records addressed to the
    /// caller, minus anything already past its deadline.
    pub async fn pending(&self, caller: &str) -> Result<PendingResponse, ProtocolError> {
        let now = self.clock.now_ms();
        let records = self.ledger.pending_for(caller).await.map_err(internal)?;
        let sessions = records
            .iter()
            .filter(|r| !r.is_expired(now))
            .map(SessionView::from)
            .collect();
        Ok(PendingResponse { sessions })
    }

    // ── Secure channel: message storage ──────────────────────────────────

    /// `POST /messages`
    pub async fn store_message(
        &self,
        caller: &str,
        ip: &str,
        req: &SendMessageRequest,
    ) -> Result<SendMessageResponse, ProtocolError> {
        let result = self.store_message_inner(caller, req).await;
        self.audit_outcome("message_store", Some(req.session_id.as_str()), caller, ip, &result)
            .await;
        result
    }

    async fn store_message_inner(
        &self,
        caller: &str,
        req: &SendMessageRequest,
    ) -> Result<SendMessageResponse, ProtocolError> {
        if req.to.is_empty()
            || req.session_id.is_empty()
            || req.ciphertext.is_empty()
            || req.iv.is_empty()
            || req.nonce.is_empty()
        {
            return Err(ProtocolError::MissingFields);
        }
        let ciphertext = b64d(&req.ciphertext)?;
        let iv = b64d(&req.iv)?;
        if iv.len() != ql_crypto::aead::IV_LEN {
            return Err(ProtocolError::InvalidEncoding);
        }
        // Replay canary: 32 random bytes, distinct from the AEAD IV.
        b64d_array::<32>(&req.nonce)?;

        if ciphertext.len() + iv.len() > MAX_SEALED_BYTES {
            return Err(ProtocolError::MessageTooLarge);
        }

        // On this endpoint a stale timestamp is a replay as far as the
        // wire contract goes, not a handshake-style TIMESTAMP_EXPIRED.
        let now = self.clock.now_ms();
        check_freshness(now, req.timestamp)
            .map_err(|_| ProtocolError::MessageTimestampExpired)?;

        for _ in 0..CAS_RETRIES {
            let mut record = self.fetch(&req.session_id).await?;
            let sender_role = record.role_of(caller).ok_or(ProtocolError::Unauthorized)?;
            if record.peer_of(caller) != Some(req.to.as_str()) {
                return Err(ProtocolError::Unauthorized);
            }
            if record.status != SessionStatus::Completed {
                return Err(ProtocolError::InvalidStatus);
            }

            let expected = record.last_sequence(sender_role) + 1;
            if req.sequence_number != expected {
                return Err(ProtocolError::ReplayDetected);
            }
            record.set_last_sequence(sender_role, expected);

            let message = MessageRecord {
                message_id: uuid::Uuid::new_v4().to_string(),
                from: caller.to_string(),
                to: req.to.clone(),
                session_id: req.session_id.clone(),
                ciphertext: req.ciphertext.clone(),
                iv: req.iv.clone(),
                message_type: req.message_type,
                sequence_number: req.sequence_number,
                file_metadata: req.file_metadata.clone(),
                server_timestamp: now,
            };
            let message_id = message.message_id.clone();

            match self.ledger.append_message(record, message).await {
                Ok(()) => return Ok(SendMessageResponse { message_id, timestamp: now }),
                Err(StoreError::Conflict) => continue,
                Err(e) => return Err(internal(e)),
            }
        }
        // A concurrent sender claimed the sequence slot first.
        Err(ProtocolError::ReplayDetected)
    }

    /// `GET /messages/conversation/{userId}`
    pub async fn conversation(
        &self,
        caller: &str,
        peer: &str,
    ) -> Result<ConversationResponse, ProtocolError> {
        let messages = self.ledger.conversation(caller, peer).await.map_err(internal)?;
        Ok(ConversationResponse { messages })
    }

    // ── Maintenance ──────────────────────────────────────────────────────

    /// Sweep records stuck below `Completed` past their deadline.
    /// Returns how many were transitioned.
    pub async fn expire_stale(&self) -> Result<usize, ProtocolError> {
        let now = self.clock.now_ms();
        let stale = self.ledger.stale_records(now).await.map_err(internal)?;
        let mut expired = 0;
        for record in stale {
            let session_id = record.session_id.clone();
            if self.transition_expired(record).await {
                expired += 1;
                self.audit
                    .record(AuditEvent {
                        event_type: "session_expired".into(),
                        session_id: Some(session_id),
                        user_id: None,
                        details: "SESSION_EXPIRED".into(),
                        ip: "-".into(),
                        timestamp: now,
                    })
                    .await;
            }
        }
        Ok(expired)
    }

    // ── Internals ────────────────────────────────────────────────────────

    async fn fetch(&self, session_id: &str) -> Result<HandshakeRecord, ProtocolError> {
        self.ledger
            .get_record(session_id)
            .await
            .map_err(internal)?
            .ok_or(ProtocolError::SessionNotFound)
    }

    /// Fetch, transitioning a stale record to `Expired` on the way out so
    /// reads are stable afterwards.
    async fn fetch_lazily_expiring(
        &self,
        session_id: &str,
    ) -> Result<HandshakeRecord, ProtocolError> {
        let record = self.fetch(session_id).await?;
        if record.is_expired(self.clock.now_ms()) {
            self.transition_expired(record).await;
            return self.fetch(session_id).await;
        }
        Ok(record)
    }

    /// Best-effort CAS transition to `Expired`; a concurrent writer that
    /// beat us has already settled the record's fate.
    async fn transition_expired(&self, mut record: HandshakeRecord) -> bool {
        record.status = SessionStatus::Expired;
        self.ledger.update_record(record).await.is_ok()
    }

    async fn verify_caller_signature(
        &self,
        caller: &str,
        payload: &[u8],
        signature_b64: &str,
    ) -> Result<(), ProtocolError> {
        let spki = self
            .directory
            .signing_key_spki(caller)
            .await
            .map_err(internal)?
            .ok_or(ProtocolError::NoSigningKey)?;
        let signature = b64d(signature_b64)?;
        if !sign::verify_spki(&spki, payload, &signature) {
            return Err(ProtocolError::InvalidSignature);
        }
        Ok(())
    }

    async fn audit_outcome<T>(
        &self,
        event_type: &str,
        session_id: Option<&str>,
        caller: &str,
        ip: &str,
        result: &Result<T, ProtocolError>,
    ) {
        let details = match result {
            Ok(_) => "accepted".to_string(),
            Err(e) => e.code().to_string(),
        };
        if let Err(e) = result {
            tracing::warn!(
                event_type,
                session_id = session_id.unwrap_or("-"),
                caller,
                code = e.code(),
                "validation failure"
            );
        }
        self.audit
            .record(AuditEvent {
                event_type: event_type.to_string(),
                session_id: session_id.map(str::to_string),
                user_id: Some(caller.to_string()),
                details,
                ip: ip.to_string(),
                timestamp: self.clock.now_ms(),
            })
            .await;
    }
}

fn internal(e: StoreError) -> ProtocolError {
    ProtocolError::Internal(e.to_string())
}

fn check_freshness(now_ms: i64, timestamp_ms: i64) -> Result<(), ProtocolError> {
    if (now_ms - timestamp_ms).abs() > FRESHNESS_WINDOW_MS {
        return Err(ProtocolError::TimestampExpired);
    }
    Ok(())
}

/// Shared encoding gate for Init and Respond bodies: a real P-256 point,
/// a 32-byte nonce, and decodable signature bytes.
fn check_handshake_encodings(
    ephemeral_public_b64: &str,
    nonce_b64: &str,
    signature_b64: &str,
) -> Result<(), ProtocolError> {
    let point = b64d(ephemeral_public_b64)?;
    ecdh::decode_public(&point).map_err(|_| ProtocolError::InvalidEncoding)?;
    b64d_array::<32>(nonce_b64)?;
    b64d(signature_b64)?;
    Ok(())
}
