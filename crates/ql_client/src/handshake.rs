//! Client-side handshake state machine.
//!
//! Three messages negotiate a session key:
//!   Init (signed ephemeral + nonce) → Respond (signed ephemeral + nonce)
//!   → Confirm (HMAC tags, one per party, keyed by the raw shared secret).
//!
//! The engine keeps an in-memory map of active handshakes keyed by
//! `session_id`, re-hydratable from the ledger plus the local key store
//! (`resume`), so a restart mid-handshake is survivable.  The raw shared
//! secret `z` and the ephemeral private key live exactly as long as
//! confirmation needs them; completion stores only the derived session
//! key and drops everything else.
//!
//! A session key is NEVER stored before the peer's confirmation verifies:
//! an unconfirmed key must not outlive the handshake attempt.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use zeroize::Zeroizing;

use ql_crypto::ecdh::EphemeralKeyPair;
use ql_crypto::{hash, kdf, mac, rng};
use ql_proto::api::{ConfirmRequest, InitiateRequest, ReportFailureRequest, RespondRequest};
use ql_proto::canonical;
use ql_proto::encoding::{b64, b64d, b64d_array};
use ql_proto::{Clock, Role, SessionStatus, SessionView};

use crate::error::ClientError;
use crate::keystore::{LocalKeyStore, PendingHandshake, SessionKeyEntry};
use crate::poll::{Backoff, PollConfig};

/// One `advance` step's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeProgress {
    /// Waiting on the peer; poll again later.
    Waiting,
    /// Session key verified and stored; the channel may open.
    Completed,
    /// The ledger moved to a terminal status underneath us.
    Failed(SessionStatus),
}

struct SharedState {
    /// Raw ECDH output; zeroized as soon as the handshake settles.
    z: Zeroizing<[u8; 32]>,
    session_key: Zeroizing<[u8; 32]>,
    /// base64(SHA-256(z)), bound into both confirmation tags.
    shared_hash_b64: String,
}

struct ActiveHandshake {
    role: Role,
    peer_id: String,
    ephemeral: EphemeralKeyPair,
    our_nonce: [u8; 32],
    shared: Option<SharedState>,
    confirmation_sent: bool,
}

pub struct HandshakeEngine {
    user_id: String,
    transport: Arc<dyn crate::Transport>,
    clock: Arc<dyn Clock>,
    store: Arc<LocalKeyStore>,
    active: Mutex<HashMap<String, ActiveHandshake>>,
}

impl HandshakeEngine {
    pub fn new(
        user_id: &str,
        transport: Arc<dyn crate::Transport>,
        clock: Arc<dyn Clock>,
        store: Arc<LocalKeyStore>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            transport,
            clock,
            store,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    // ── Init ─────────────────────────────────────────────────────────────

    /// Open a new handshake towards `responder_id`. Returns the minted
    /// session id; poll with `advance`/`run_to_completion` afterwards.
    pub async fn initiate(&self, responder_id: &str) -> Result<String, ClientError> {
        let signing = self
            .store
            .load_signing_key()
            .await?
            .ok_or_else(|| ClientError::State("no signing key enrolled".into()))?;

        let ephemeral = EphemeralKeyPair::generate();
        let our_nonce = rng::handshake_nonce();
        let timestamp = self.clock.now_ms();
        let ephemeral_public = b64(&ephemeral.public_bytes());
        let nonce_b64 = b64(&our_nonce);

        let payload = canonical::init_signing_payload(
            responder_id,
            &ephemeral_public,
            &nonce_b64,
            timestamp,
        );
        let signature = b64(&sign_blocking(signing, payload).await?);

        let resp = self
            .transport
            .initiate(
                &self.user_id,
                &InitiateRequest {
                    responder_id: responder_id.to_string(),
                    ephemeral_public,
                    nonce: nonce_b64,
                    timestamp,
                    signature,
                },
            )
            .await?;
        let session_id = resp.session_id;
        tracing::debug!(%session_id, peer = responder_id, "handshake initiated");

        self.store
            .store_pending(&PendingHandshake {
                session_id: session_id.clone(),
                role: Role::Initiator,
                peer_id: responder_id.to_string(),
                ephemeral_secret: *ephemeral.secret_bytes(),
                our_nonce,
            })
            .await?;
        self.active.lock().await.insert(
            session_id.clone(),
            ActiveHandshake {
                role: Role::Initiator,
                peer_id: responder_id.to_string(),
                ephemeral,
                our_nonce,
                shared: None,
                confirmation_sent: false,
            },
        );
        Ok(session_id)
    }

    /// Handshakes awaiting our Respond.
    pub async fn pending(&self) -> Result<Vec<SessionView>, ClientError> {
        Ok(self.transport.pending(&self.user_id).await?.sessions)
    }

    // ── Respond ──────────────────────────────────────────────────────────

    /// Answer a pending Init addressed to us. Derives the shared secret
    /// immediately (both ephemerals are known once the relay accepts).
    pub async fn respond(&self, session_id: &str) -> Result<(), ClientError> {
        let view = self.transport.session(&self.user_id, session_id).await?;
        if view.responder_id != self.user_id {
            return Err(ClientError::State("session is not addressed to us".into()));
        }
        let signing = self
            .store
            .load_signing_key()
            .await?
            .ok_or_else(|| ClientError::State("no signing key enrolled".into()))?;

        let ephemeral = EphemeralKeyPair::generate();
        let our_nonce = rng::handshake_nonce();
        let timestamp = self.clock.now_ms();
        let ephemeral_public = b64(&ephemeral.public_bytes());
        let nonce_b64 = b64(&our_nonce);

        let payload = canonical::response_signing_payload(
            session_id,
            &ephemeral_public,
            &nonce_b64,
            timestamp,
        );
        let signature = b64(&sign_blocking(signing, payload).await?);

        let resp = self
            .transport
            .respond(
                &self.user_id,
                &RespondRequest {
                    session_id: session_id.to_string(),
                    ephemeral_public,
                    nonce: nonce_b64,
                    timestamp,
                    signature,
                },
            )
            .await?;

        let shared = derive_shared(
            &ephemeral,
            &resp.initiator_public_key,
            &view.initiator_nonce,
            &b64(&our_nonce),
        )?;

        self.store
            .store_pending(&PendingHandshake {
                session_id: session_id.to_string(),
                role: Role::Responder,
                peer_id: view.initiator_id.clone(),
                ephemeral_secret: *ephemeral.secret_bytes(),
                our_nonce,
            })
            .await?;
        self.active.lock().await.insert(
            session_id.to_string(),
            ActiveHandshake {
                role: Role::Responder,
                peer_id: view.initiator_id,
                ephemeral,
                our_nonce,
                shared: Some(shared),
                confirmation_sent: false,
            },
        );
        Ok(())
    }

    // ── Progress driver ──────────────────────────────────────────────────

    /// Run one step of the state machine: read the ledger record, derive
    /// or verify what the new state allows, and send our confirmation
    /// when it is our turn.
    pub async fn advance(&self, session_id: &str) -> Result<HandshakeProgress, ClientError> {
        let view = self.transport.session(&self.user_id, session_id).await?;

        let mut active = self.active.lock().await;
        let hs = active
            .get_mut(session_id)
            .ok_or_else(|| ClientError::UnknownSession(session_id.to_string()))?;

        match view.status {
            SessionStatus::Failed | SessionStatus::Expired => {
                let status = view.status;
                active.remove(session_id);
                self.store.remove_pending(session_id);
                Ok(HandshakeProgress::Failed(status))
            }

            SessionStatus::Initiated => Ok(HandshakeProgress::Waiting),

            SessionStatus::Responded => {
                if hs.role == Role::Initiator {
                    ensure_shared(hs, &view)?;
                    if !hs.confirmation_sent {
                        self.send_confirmation(session_id, hs).await?;
                    }
                }
                // Responder: our tag goes out only after the initiator's
                // verifies, so nothing to do yet.
                Ok(HandshakeProgress::Waiting)
            }

            SessionStatus::Confirmed => {
                ensure_shared(hs, &view)?;
                let our_slot_filled = view_confirmation(&view, hs.role).is_some();
                if hs.confirmation_sent || our_slot_filled {
                    // Ours is in; the peer still owes theirs.
                    return Ok(HandshakeProgress::Waiting);
                }
                // The peer confirmed first: verify before answering.
                if !self.verify_peer_tag(session_id, hs, &view)? {
                    drop(active);
                    return self.fail_mismatch(session_id).await;
                }
                let status = self.send_confirmation(session_id, hs).await?;
                if status == SessionStatus::Completed {
                    self.finalize(session_id, &mut active).await?;
                    return Ok(HandshakeProgress::Completed);
                }
                Ok(HandshakeProgress::Waiting)
            }

            SessionStatus::Completed => {
                ensure_shared(hs, &view)?;
                if !self.verify_peer_tag(session_id, hs, &view)? {
                    drop(active);
                    return self.fail_mismatch(session_id).await;
                }
                self.finalize(session_id, &mut active).await?;
                Ok(HandshakeProgress::Completed)
            }
        }
    }

    /// Poll `advance` under a backoff until the handshake settles.
    /// On deadline: abandon locally (the ledger record expires on its own).
    pub async fn run_to_completion(
        &self,
        session_id: &str,
        config: PollConfig,
    ) -> Result<(), ClientError> {
        let mut backoff = Backoff::new(config);
        loop {
            match self.advance(session_id).await? {
                HandshakeProgress::Completed => return Ok(()),
                HandshakeProgress::Failed(status) => {
                    return Err(ClientError::HandshakeFailed(status.to_string()))
                }
                HandshakeProgress::Waiting => {
                    if !backoff.wait().await {
                        self.abandon(session_id).await;
                        return Err(ClientError::Timeout);
                    }
                }
            }
        }
    }

    // ── Resume / abandon ─────────────────────────────────────────────────

    /// Re-hydrate an in-flight handshake after a restart, from the ledger
    /// record plus the persisted pending state.
    pub async fn resume(&self, session_id: &str) -> Result<(), ClientError> {
        if self.active.lock().await.contains_key(session_id) {
            return Ok(());
        }
        let pending = self
            .store
            .load_pending(session_id)
            .await?
            .ok_or_else(|| ClientError::UnknownSession(session_id.to_string()))?;
        let ephemeral = EphemeralKeyPair::from_secret_bytes(&pending.ephemeral_secret)?;

        let view = self.transport.session(&self.user_id, session_id).await?;
        let mut hs = ActiveHandshake {
            role: pending.role,
            peer_id: pending.peer_id.clone(),
            ephemeral,
            our_nonce: pending.our_nonce,
            shared: None,
            confirmation_sent: view_confirmation(&view, pending.role).is_some(),
        };
        if view.responder_ephemeral_pub.is_some() {
            ensure_shared(&mut hs, &view)?;
        }
        self.active.lock().await.insert(session_id.to_string(), hs);
        Ok(())
    }

    /// Drop all local state for an attempt. Never touches the ledger.
    pub async fn abandon(&self, session_id: &str) {
        self.active.lock().await.remove(session_id);
        self.store.remove_pending(session_id);
    }

    // ── Internals ────────────────────────────────────────────────────────

    async fn send_confirmation(
        &self,
        session_id: &str,
        hs: &mut ActiveHandshake,
    ) -> Result<SessionStatus, ClientError> {
        let shared = hs
            .shared
            .as_ref()
            .ok_or_else(|| ClientError::State("confirmation before derivation".into()))?;
        let input = canonical::confirmation_input(session_id, hs.role, &shared.shared_hash_b64);
        let tag = mac::hmac_sha256(&*shared.z, input.as_bytes());

        let resp = self
            .transport
            .confirm(
                &self.user_id,
                &ConfirmRequest {
                    session_id: session_id.to_string(),
                    confirmation: b64(&tag),
                    is_initiator: hs.role == Role::Initiator,
                },
            )
            .await?;
        hs.confirmation_sent = true;
        Ok(resp.status)
    }

    /// Check the peer's confirmation tag against our own derivation.
    fn verify_peer_tag(
        &self,
        session_id: &str,
        hs: &ActiveHandshake,
        view: &SessionView,
    ) -> Result<bool, ClientError> {
        let shared = hs
            .shared
            .as_ref()
            .ok_or_else(|| ClientError::State("verification before derivation".into()))?;
        let peer_role = hs.role.peer();
        let Some(tag_b64) = view_confirmation(view, peer_role) else {
            return Err(ClientError::State("peer confirmation missing".into()));
        };
        let tag = b64d(tag_b64)?;
        let input = canonical::confirmation_input(session_id, peer_role, &shared.shared_hash_b64);
        Ok(mac::hmac_sha256_verify(&*shared.z, input.as_bytes(), &tag))
    }

    /// Confirmation mismatch: report, discard every secret, surface MITM.
    async fn fail_mismatch(&self, session_id: &str) -> Result<HandshakeProgress, ClientError> {
        tracing::warn!(session_id, "key confirmation mismatch — discarding session");
        let report = ReportFailureRequest {
            session_id: session_id.to_string(),
            reason: "CONFIRMATION_MISMATCH".into(),
        };
        // Best effort: the local discard matters even if the report fails.
        let _ = self.transport.report_failure(&self.user_id, &report).await;
        self.abandon(session_id).await;
        Err(ClientError::ConfirmationMismatch)
    }

    /// Both confirmations verified: persist the session key, then drop the
    /// ephemeral secret and `z` by removing the active entry.
    async fn finalize(
        &self,
        session_id: &str,
        active: &mut HashMap<String, ActiveHandshake>,
    ) -> Result<(), ClientError> {
        let hs = active
            .get(session_id)
            .ok_or_else(|| ClientError::UnknownSession(session_id.to_string()))?;
        let shared = hs
            .shared
            .as_ref()
            .ok_or_else(|| ClientError::State("completion before derivation".into()))?;

        self.store
            .store_session(
                session_id,
                &SessionKeyEntry {
                    partner_id: hs.peer_id.clone(),
                    key_data: *shared.session_key,
                    sequence_number: 0,
                    received_sequence: 0,
                },
            )
            .await?;
        self.store.remove_pending(session_id);
        active.remove(session_id);
        tracing::debug!(session_id, "handshake completed");
        Ok(())
    }
}

/// RSA-PSS is the one CPU-heavy step on the client path; run it on the
/// blocking pool so the cooperative task stays responsive.
async fn sign_blocking(
    signing: ql_crypto::sign::SigningKeyPair,
    payload: Vec<u8>,
) -> Result<Vec<u8>, ClientError> {
    tokio::task::spawn_blocking(move || signing.sign(&payload))
        .await
        .map_err(|e| ClientError::State(e.to_string()))?
        .map_err(ClientError::from)
}

/// Derive `z`, the session key, and the confirmation hash from our
/// ephemeral secret plus the peer's public point and both nonces.
fn derive_shared(
    ephemeral: &EphemeralKeyPair,
    peer_public_b64: &str,
    initiator_nonce_b64: &str,
    responder_nonce_b64: &str,
) -> Result<SharedState, ClientError> {
    let peer_public = b64d(peer_public_b64)?;
    let z = ephemeral.derive(&peer_public)?;

    let n_a = b64d_array::<32>(initiator_nonce_b64)?;
    let n_b = b64d_array::<32>(responder_nonce_b64)?;
    let session_key = kdf::derive_session_key(&z, &n_a, &n_b)?;

    let shared_hash_b64 = b64(&hash::sha256(&*z));
    Ok(SharedState { z, session_key, shared_hash_b64 })
}

/// Fill `hs.shared` once the record carries the peer's half.
/// Our own nonce comes from local state, never from the relay.
fn ensure_shared(hs: &mut ActiveHandshake, view: &SessionView) -> Result<(), ClientError> {
    if hs.shared.is_some() {
        return Ok(());
    }
    let missing = || ClientError::State("record is missing the responder half".into());
    let shared = match hs.role {
        Role::Initiator => derive_shared(
            &hs.ephemeral,
            view.responder_ephemeral_pub.as_deref().ok_or_else(missing)?,
            &b64(&hs.our_nonce),
            view.responder_nonce.as_deref().ok_or_else(missing)?,
        )?,
        Role::Responder => derive_shared(
            &hs.ephemeral,
            &view.initiator_ephemeral_pub,
            &view.initiator_nonce,
            &b64(&hs.our_nonce),
        )?,
    };
    hs.shared = Some(shared);
    Ok(())
}

fn view_confirmation(view: &SessionView, role: Role) -> Option<&str> {
    match role {
        Role::Initiator => view.initiator_confirmation.as_deref(),
        Role::Responder => view.responder_confirmation.as_deref(),
    }
}
