//! Validator gate tests: every rejection path leaves the ledger unchanged
//! and every accepted transition lands exactly once.

use std::sync::{Arc, OnceLock};

use ql_crypto::ecdh::EphemeralKeyPair;
use ql_crypto::rng;
use ql_crypto::sign::SigningKeyPair;
use ql_proto::api::{ConfirmRequest, InitiateRequest, RespondRequest, SendMessageRequest};
use ql_proto::canonical;
use ql_proto::clock::ManualClock;
use ql_proto::encoding::b64;
use ql_proto::record::{HANDSHAKE_TTL_MS, SessionStatus};
use ql_proto::{MessageType, ProtocolError};
use ql_relay::{LedgerStore, MemoryAudit, MemoryDirectory, MemoryLedger, RelayValidator};

const T0: i64 = 1_700_000_000_000;
const IP: &str = "198.51.100.7";

/// RSA keygen is expensive; share one set of identities across tests.
fn keys() -> &'static [Arc<SigningKeyPair>; 3] {
    static KEYS: OnceLock<[Arc<SigningKeyPair>; 3]> = OnceLock::new();
    KEYS.get_or_init(|| {
        [
            Arc::new(SigningKeyPair::generate().expect("keygen")),
            Arc::new(SigningKeyPair::generate().expect("keygen")),
            Arc::new(SigningKeyPair::generate().expect("keygen")),
        ]
    })
}

struct Harness {
    ledger: Arc<MemoryLedger>,
    audit: Arc<MemoryAudit>,
    clock: Arc<ManualClock>,
    validator: Arc<RelayValidator>,
}

impl Harness {
    fn new() -> Self {
        let [u1, u2, u3] = keys();
        let directory = Arc::new(MemoryDirectory::new());
        directory.register("u1", u1.public_spki_der().expect("spki"));
        directory.register("u2", u2.public_spki_der().expect("spki"));
        directory.register("u3", u3.public_spki_der().expect("spki"));
        directory.register_without_key("keyless");

        let ledger = Arc::new(MemoryLedger::new());
        let audit = Arc::new(MemoryAudit::new());
        let clock = Arc::new(ManualClock::new(T0));
        let validator = Arc::new(RelayValidator::new(
            directory,
            ledger.clone(),
            audit.clone(),
            clock.clone(),
        ));
        Self { ledger, audit, clock, validator }
    }

    async fn record(&self, session_id: &str) -> ql_proto::HandshakeRecord {
        self.ledger
            .get_record(session_id)
            .await
            .expect("ledger")
            .expect("record exists")
    }

    /// Drive u1 → u2 through Init and Respond.
    async fn responded_session(&self) -> String {
        let (req, _, _) = init_request(&keys()[0], "u2", self.clock_now());
        let session_id = self
            .validator
            .initiate("u1", IP, &req)
            .await
            .expect("initiate")
            .session_id;

        let (respond, _, _) = respond_request(&keys()[1], &session_id, self.clock_now());
        self.validator
            .respond("u2", IP, &respond)
            .await
            .expect("respond");
        session_id
    }

    /// Drive a session all the way to Completed.
    async fn completed_session(&self) -> String {
        let session_id = self.responded_session().await;
        self.validator
            .confirm("u1", IP, &confirm_request(&session_id, true))
            .await
            .expect("initiator confirm");
        self.validator
            .confirm("u2", IP, &confirm_request(&session_id, false))
            .await
            .expect("responder confirm");
        session_id
    }

    fn clock_now(&self) -> i64 {
        use ql_proto::Clock;
        self.clock.now_ms()
    }
}

fn init_request(
    identity: &SigningKeyPair,
    responder_id: &str,
    timestamp: i64,
) -> (InitiateRequest, EphemeralKeyPair, [u8; 32]) {
    let ephemeral = EphemeralKeyPair::generate();
    let nonce = rng::handshake_nonce();
    let ephemeral_public = b64(&ephemeral.public_bytes());
    let nonce_b64 = b64(&nonce);

    let payload =
        canonical::init_signing_payload(responder_id, &ephemeral_public, &nonce_b64, timestamp);
    let signature = b64(&identity.sign(&payload).expect("sign"));

    (
        InitiateRequest {
            responder_id: responder_id.to_string(),
            ephemeral_public,
            nonce: nonce_b64,
            timestamp,
            signature,
        },
        ephemeral,
        nonce,
    )
}

fn respond_request(
    identity: &SigningKeyPair,
    session_id: &str,
    timestamp: i64,
) -> (RespondRequest, EphemeralKeyPair, [u8; 32]) {
    let ephemeral = EphemeralKeyPair::generate();
    let nonce = rng::handshake_nonce();
    let ephemeral_public = b64(&ephemeral.public_bytes());
    let nonce_b64 = b64(&nonce);

    let payload =
        canonical::response_signing_payload(session_id, &ephemeral_public, &nonce_b64, timestamp);
    let signature = b64(&identity.sign(&payload).expect("sign"));

    (
        RespondRequest {
            session_id: session_id.to_string(),
            ephemeral_public,
            nonce: nonce_b64,
            timestamp,
            signature,
        },
        ephemeral,
        nonce,
    )
}

fn confirm_request(session_id: &str, is_initiator: bool) -> ConfirmRequest {
    // Gate tests only exercise relay-side checks; any 32-byte tag passes
    // the encoding gate (the relay cannot verify the HMAC itself).
    ConfirmRequest {
        session_id: session_id.to_string(),
        confirmation: b64(&rng::handshake_nonce()),
        is_initiator,
    }
}

fn message_request(to: &str, session_id: &str, sequence: u64, timestamp: i64) -> SendMessageRequest {
    SendMessageRequest {
        to: to.to_string(),
        session_id: session_id.to_string(),
        ciphertext: b64(b"opaque-ciphertext"),
        iv: b64(&rng::gcm_iv()),
        message_type: MessageType::Text,
        sequence_number: sequence,
        nonce: b64(&rng::handshake_nonce()),
        timestamp,
        file_metadata: None,
    }
}

// ── Handshake lifecycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn full_handshake_reaches_completed() {
    let h = Harness::new();
    let session_id = h.completed_session().await;

    let record = h.record(&session_id).await;
    assert_eq!(record.status, SessionStatus::Completed);
    assert!(record.initiator_confirmation.is_some());
    assert!(record.responder_confirmation.is_some());
    assert_eq!(record.completed_at, Some(T0));
}

#[tokio::test]
async fn responder_may_confirm_first() {
    let h = Harness::new();
    let session_id = h.responded_session().await;

    let first = h
        .validator
        .confirm("u2", IP, &confirm_request(&session_id, false))
        .await
        .unwrap();
    assert_eq!(first.status, SessionStatus::Confirmed);

    let second = h
        .validator
        .confirm("u1", IP, &confirm_request(&session_id, true))
        .await
        .unwrap();
    assert_eq!(second.status, SessionStatus::Completed);
}

#[tokio::test]
async fn reinitiating_mints_a_fresh_session() {
    let h = Harness::new();
    let (first, _, _) = init_request(&keys()[0], "u2", T0);
    let s1 = h.validator.initiate("u1", IP, &first).await.unwrap().session_id;

    h.clock.advance(1); // distinct creation millis → distinct minted id
    let (second, _, _) = init_request(&keys()[0], "u2", T0 + 1);
    let s2 = h.validator.initiate("u1", IP, &second).await.unwrap().session_id;

    assert_ne!(s1, s2);
    assert_eq!(h.record(&s1).await.status, SessionStatus::Initiated);
    assert_eq!(h.record(&s2).await.status, SessionStatus::Initiated);
}

// ── Freshness (scenario 2, P3) ───────────────────────────────────────────────

#[tokio::test]
async fn stale_init_is_rejected_before_any_record_exists() {
    let h = Harness::new();
    let stale = T0 - 10 * 60 * 1000;
    let (req, _, _) = init_request(&keys()[0], "u2", stale);

    let err = h.validator.initiate("u1", IP, &req).await.unwrap_err();
    assert_eq!(err, ProtocolError::TimestampExpired);

    // No record was created for the would-be minted id.
    assert!(h
        .ledger
        .get_record(&format!("u1|u2|{T0}"))
        .await
        .unwrap()
        .is_none());
    assert!(h.validator.pending("u2").await.unwrap().sessions.is_empty());
}

#[tokio::test]
async fn future_timestamps_are_equally_stale() {
    let h = Harness::new();
    let (req, _, _) = init_request(&keys()[0], "u2", T0 + 6 * 60 * 1000);
    assert_eq!(
        h.validator.initiate("u1", IP, &req).await.unwrap_err(),
        ProtocolError::TimestampExpired
    );
}

// ── Signatures (scenario 3, P2) ──────────────────────────────────────────────

#[tokio::test]
async fn garbage_signature_is_rejected_without_a_record() {
    let h = Harness::new();
    let (mut req, _, _) = init_request(&keys()[0], "u2", T0);
    req.signature = b64(b"invalid");

    let err = h.validator.initiate("u1", IP, &req).await.unwrap_err();
    assert_eq!(err, ProtocolError::InvalidSignature);
    assert!(h.validator.pending("u2").await.unwrap().sessions.is_empty());
}

#[tokio::test]
async fn substituted_ephemeral_breaks_the_signature() {
    let h = Harness::new();
    let (mut req, _, _) = init_request(&keys()[0], "u2", T0);
    // MITM swaps in its own ephemeral point; the signature no longer covers it.
    req.ephemeral_public = b64(&EphemeralKeyPair::generate().public_bytes());

    let err = h.validator.initiate("u1", IP, &req).await.unwrap_err();
    assert_eq!(err, ProtocolError::InvalidSignature);
}

#[tokio::test]
async fn substituted_responder_ephemeral_leaves_record_untouched() {
    let h = Harness::new();
    let (init, _, _) = init_request(&keys()[0], "u2", T0);
    let session_id = h.validator.initiate("u1", IP, &init).await.unwrap().session_id;

    let (mut respond, _, _) = respond_request(&keys()[1], &session_id, T0);
    respond.ephemeral_public = b64(&EphemeralKeyPair::generate().public_bytes());

    let err = h.validator.respond("u2", IP, &respond).await.unwrap_err();
    assert_eq!(err, ProtocolError::InvalidSignature);

    let record = h.record(&session_id).await;
    assert_eq!(record.status, SessionStatus::Initiated);
    assert!(record.responder_ephemeral_pub.is_none());
}

#[tokio::test]
async fn signature_by_the_wrong_key_is_rejected() {
    let h = Harness::new();
    // u3 signs, but the caller is u1, so verification uses u1's directory key.
    let (req, _, _) = init_request(&keys()[2], "u2", T0);
    assert_eq!(
        h.validator.initiate("u1", IP, &req).await.unwrap_err(),
        ProtocolError::InvalidSignature
    );
}

#[tokio::test]
async fn caller_without_signing_key_is_rejected() {
    let h = Harness::new();
    let (req, _, _) = init_request(&keys()[0], "u2", T0);
    assert_eq!(
        h.validator.initiate("keyless", IP, &req).await.unwrap_err(),
        ProtocolError::NoSigningKey
    );
}

#[tokio::test]
async fn unknown_responder_is_rejected() {
    let h = Harness::new();
    let (req, _, _) = init_request(&keys()[0], "nobody", T0);
    assert_eq!(
        h.validator.initiate("u1", IP, &req).await.unwrap_err(),
        ProtocolError::UserNotFound
    );
}

// ── Authorization (scenario 4) ───────────────────────────────────────────────

#[tokio::test]
async fn third_party_respond_is_unauthorized() {
    let h = Harness::new();
    let (init, _, _) = init_request(&keys()[0], "u2", T0);
    let session_id = h.validator.initiate("u1", IP, &init).await.unwrap().session_id;

    let (respond, _, _) = respond_request(&keys()[2], &session_id, T0);
    let err = h.validator.respond("u3", IP, &respond).await.unwrap_err();
    assert_eq!(err, ProtocolError::Unauthorized);
    assert_eq!(h.record(&session_id).await.status, SessionStatus::Initiated);
}

#[tokio::test]
async fn outsiders_cannot_read_sessions() {
    let h = Harness::new();
    let session_id = h.responded_session().await;
    assert_eq!(
        h.validator.session("u3", IP, &session_id).await.unwrap_err(),
        ProtocolError::Unauthorized
    );
}

// ── Status gates ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_respond_hits_the_status_gate() {
    let h = Harness::new();
    let session_id = h.responded_session().await;

    let (respond, _, _) = respond_request(&keys()[1], &session_id, T0);
    assert_eq!(
        h.validator.respond("u2", IP, &respond).await.unwrap_err(),
        ProtocolError::InvalidStatus
    );
}

#[tokio::test]
async fn confirm_before_respond_is_invalid() {
    let h = Harness::new();
    let (init, _, _) = init_request(&keys()[0], "u2", T0);
    let session_id = h.validator.initiate("u1", IP, &init).await.unwrap().session_id;

    assert_eq!(
        h.validator
            .confirm("u1", IP, &confirm_request(&session_id, true))
            .await
            .unwrap_err(),
        ProtocolError::InvalidStatus
    );
}

#[tokio::test]
async fn a_party_cannot_confirm_twice() {
    let h = Harness::new();
    let session_id = h.responded_session().await;

    h.validator
        .confirm("u1", IP, &confirm_request(&session_id, true))
        .await
        .unwrap();
    assert_eq!(
        h.validator
            .confirm("u1", IP, &confirm_request(&session_id, true))
            .await
            .unwrap_err(),
        ProtocolError::InvalidStatus
    );
}

#[tokio::test]
async fn confirm_role_must_match_caller() {
    let h = Harness::new();
    let session_id = h.responded_session().await;

    // u2 claims the initiator slot.
    assert_eq!(
        h.validator
            .confirm("u2", IP, &confirm_request(&session_id, true))
            .await
            .unwrap_err(),
        ProtocolError::Unauthorized
    );
}

// ── Expiry (scenario 5) ──────────────────────────────────────────────────────

#[tokio::test]
async fn respond_after_deadline_expires_the_record() {
    let h = Harness::new();
    let (init, _, _) = init_request(&keys()[0], "u2", T0);
    let session_id = h.validator.initiate("u1", IP, &init).await.unwrap().session_id;

    h.clock.advance(6 * 60 * 1000);
    let (respond, _, _) = respond_request(&keys()[1], &session_id, h.clock_now());

    let err = h.validator.respond("u2", IP, &respond).await.unwrap_err();
    assert_eq!(err, ProtocolError::SessionExpired);
    assert_eq!(h.record(&session_id).await.status, SessionStatus::Expired);
}

#[tokio::test]
async fn sweep_expires_everything_stale() {
    let h = Harness::new();
    let (init, _, _) = init_request(&keys()[0], "u2", T0);
    let session_id = h.validator.initiate("u1", IP, &init).await.unwrap().session_id;
    h.clock.advance(1); // distinct creation millis for the second session
    let completed = h.completed_session().await;

    h.clock.advance(HANDSHAKE_TTL_MS + 1);
    let swept = h.validator.expire_stale().await.unwrap();

    assert_eq!(swept, 1);
    assert_eq!(h.record(&session_id).await.status, SessionStatus::Expired);
    // Completed sessions outlive the handshake deadline.
    assert_eq!(h.record(&completed).await.status, SessionStatus::Completed);
}

#[tokio::test]
async fn terminal_reads_are_idempotent() {
    let h = Harness::new();
    let (init, _, _) = init_request(&keys()[0], "u2", T0);
    let session_id = h.validator.initiate("u1", IP, &init).await.unwrap().session_id;
    h.clock.advance(HANDSHAKE_TTL_MS + 1);

    let first = h.validator.session("u1", IP, &session_id).await.unwrap();
    let second = h.validator.session("u1", IP, &session_id).await.unwrap();
    assert_eq!(first.status, SessionStatus::Expired);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

// ── Sequence numbers (scenario 6, P4) ────────────────────────────────────────

#[tokio::test]
async fn sequence_must_increment_by_exactly_one() {
    let h = Harness::new();
    let session_id = h.completed_session().await;
    let now = h.clock_now();

    h.validator
        .store_message("u1", IP, &message_request("u2", &session_id, 1, now))
        .await
        .unwrap();

    // Replay of an accepted sequence.
    assert_eq!(
        h.validator
            .store_message("u1", IP, &message_request("u2", &session_id, 1, now))
            .await
            .unwrap_err(),
        ProtocolError::ReplayDetected
    );

    // Gap: 3 while 2 is expected.
    assert_eq!(
        h.validator
            .store_message("u1", IP, &message_request("u2", &session_id, 3, now))
            .await
            .unwrap_err(),
        ProtocolError::ReplayDetected
    );

    // The true next value still works, and the rejections stored nothing.
    h.validator
        .store_message("u1", IP, &message_request("u2", &session_id, 2, now))
        .await
        .unwrap();
    assert_eq!(h.validator.conversation("u1", "u2").await.unwrap().messages.len(), 2);
}

#[tokio::test]
async fn directions_count_independently() {
    let h = Harness::new();
    let session_id = h.completed_session().await;
    let now = h.clock_now();

    h.validator
        .store_message("u1", IP, &message_request("u2", &session_id, 1, now))
        .await
        .unwrap();
    // Bob's first message is seq 1 in his own direction.
    h.validator
        .store_message("u2", IP, &message_request("u1", &session_id, 1, now))
        .await
        .unwrap();

    let record = h.record(&session_id).await;
    assert_eq!(record.initiator_last_sequence, 1);
    assert_eq!(record.responder_last_sequence, 1);
}

#[tokio::test]
async fn messages_require_a_completed_session() {
    let h = Harness::new();
    let session_id = h.responded_session().await;
    assert_eq!(
        h.validator
            .store_message("u1", IP, &message_request("u2", &session_id, 1, h.clock_now()))
            .await
            .unwrap_err(),
        ProtocolError::InvalidStatus
    );
}

#[tokio::test]
async fn stale_message_timestamps_carry_the_replay_wire_code() {
    let h = Harness::new();
    let session_id = h.completed_session().await;

    let stale = h.clock_now() - 10 * 60 * 1000;
    let err = h
        .validator
        .store_message("u1", IP, &message_request("u2", &session_id, 1, stale))
        .await
        .unwrap_err();

    assert_eq!(err, ProtocolError::MessageTimestampExpired);
    assert_eq!(err.code(), "REPLAY_DETECTED");
    // Nothing was stored and the counter did not move.
    assert!(h.validator.conversation("u1", "u2").await.unwrap().messages.is_empty());
    assert_eq!(h.record(&session_id).await.initiator_last_sequence, 0);

    // The freshly timestamped retry with the same sequence still lands.
    h.validator
        .store_message("u1", IP, &message_request("u2", &session_id, 1, h.clock_now()))
        .await
        .unwrap();
}

#[tokio::test]
async fn oversized_messages_are_rejected_up_front() {
    let h = Harness::new();
    let session_id = h.completed_session().await;
    let mut req = message_request("u2", &session_id, 1, h.clock_now());
    req.ciphertext = b64(&vec![0u8; 256 * 1024]);

    assert_eq!(
        h.validator.store_message("u1", IP, &req).await.unwrap_err(),
        ProtocolError::MessageTooLarge
    );
}

#[tokio::test]
async fn message_recipient_must_be_the_session_peer() {
    let h = Harness::new();
    let session_id = h.completed_session().await;
    assert_eq!(
        h.validator
            .store_message("u1", IP, &message_request("u3", &session_id, 1, h.clock_now()))
            .await
            .unwrap_err(),
        ProtocolError::Unauthorized
    );
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_responds_produce_exactly_one_winner() {
    let h = Harness::new();
    let (init, _, _) = init_request(&keys()[0], "u2", T0);
    let session_id = h.validator.initiate("u1", IP, &init).await.unwrap().session_id;

    let (respond_a, _, _) = respond_request(&keys()[1], &session_id, T0);
    let (respond_b, _, _) = respond_request(&keys()[1], &session_id, T0);

    let va = h.validator.clone();
    let vb = h.validator.clone();
    let ta = tokio::spawn(async move { va.respond("u2", IP, &respond_a).await });
    let tb = tokio::spawn(async move { vb.respond("u2", IP, &respond_b).await });

    let results = [ta.await.unwrap(), tb.await.unwrap()];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one respond must transition the record");
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ProtocolError::InvalidStatus))));
    assert_eq!(h.record(&session_id).await.status, SessionStatus::Responded);
}

// ── Failure reporting & audit ────────────────────────────────────────────────

#[tokio::test]
async fn reported_failure_is_terminal_and_idempotent() {
    let h = Harness::new();
    let session_id = h.completed_session().await;

    let req = ql_proto::api::ReportFailureRequest {
        session_id: session_id.clone(),
        reason: "CONFIRMATION_MISMATCH".into(),
    };
    let resp = h.validator.report_failure("u1", IP, &req).await.unwrap();
    assert_eq!(resp.status, SessionStatus::Failed);

    // Second report (from the peer) is a no-op, not an error.
    let resp = h.validator.report_failure("u2", IP, &req).await.unwrap();
    assert_eq!(resp.status, SessionStatus::Failed);

    // Failed is terminal: nothing moves it.
    assert_eq!(
        h.validator
            .confirm("u1", IP, &confirm_request(&session_id, true))
            .await
            .unwrap_err(),
        ProtocolError::InvalidStatus
    );
}

#[tokio::test]
async fn failures_leave_audit_entries() {
    let h = Harness::new();
    let (mut req, _, _) = init_request(&keys()[0], "u2", T0);
    req.signature = b64(b"invalid");
    let _ = h.validator.initiate("u1", IP, &req).await;

    let events = h.audit.snapshot();
    let entry = events
        .iter()
        .find(|e| e.event_type == "key_exchange_init")
        .expect("audit entry");
    assert_eq!(entry.details, "INVALID_SIGNATURE");
    assert_eq!(entry.user_id.as_deref(), Some("u1"));
    assert_eq!(entry.ip, IP);
}

#[tokio::test]
async fn pending_lists_initiated_sessions_for_the_responder() {
    let h = Harness::new();
    let (init, _, _) = init_request(&keys()[0], "u2", T0);
    let session_id = h.validator.initiate("u1", IP, &init).await.unwrap().session_id;

    let pending = h.validator.pending("u2").await.unwrap();
    assert_eq!(pending.sessions.len(), 1);
    assert_eq!(pending.sessions[0].session_id, session_id);
    assert!(h.validator.pending("u1").await.unwrap().sessions.is_empty());
}
