//! Handshake ledger records — what the relay knows about a key agreement.
//!
//! The relay sees ephemeral public values, nonces, signatures, and
//! confirmation tags.  It never sees private scalars, the shared secret,
//! or the derived session key, so the record is safe to store on an
//! untrusted host.

use serde::{Deserialize, Serialize};

/// A handshake record older than this, still short of `Completed`, is dead.
pub const HANDSHAKE_TTL_MS: i64 = 5 * 60 * 1000;

/// Allowed skew between a request timestamp and relay time.
pub const FRESHNESS_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Which side of the handshake a party is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiator => "initiator",
            Self::Responder => "responder",
        }
    }

    pub fn peer(self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }
}

/// Lifecycle of a handshake record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initiated,
    Responded,
    Confirmed,
    Completed,
    Failed,
    Expired,
}

impl SessionStatus {
    /// `Failed` and `Expired` records never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Expired)
    }

    /// True once both confirmations are in and the session key is live.
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initiated => "initiated",
            Self::Responded => "responded",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Mint the session id for a new handshake.
pub fn mint_session_id(initiator_id: &str, responder_id: &str, created_ms: i64) -> String {
    format!("{initiator_id}|{responder_id}|{created_ms}")
}

/// Durable handshake state, keyed by `session_id`.
///
/// `version` is a compare-and-set guard: every update must carry the
/// version it read, and the ledger rejects stale writes, which serialises
/// concurrent transitions on the same record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRecord {
    pub session_id: String,
    pub initiator_id: String,
    pub responder_id: String,

    /// 65-byte uncompressed P-256 points, base64.
    pub initiator_ephemeral_pub: String,
    pub responder_ephemeral_pub: Option<String>,

    /// 32-byte random values, base64.
    pub initiator_nonce: String,
    pub responder_nonce: Option<String>,

    /// RSA-PSS signatures over the canonical signing payloads, base64.
    pub initiator_signature: String,
    pub responder_signature: Option<String>,

    /// HMAC key-confirmation tags, base64.
    pub initiator_confirmation: Option<String>,
    pub responder_confirmation: Option<String>,

    /// Last accepted sequence number per direction.
    pub initiator_last_sequence: u64,
    pub responder_last_sequence: u64,

    pub status: SessionStatus,

    pub created_at: i64,
    pub expires_at: i64,
    pub completed_at: Option<i64>,

    pub version: u64,
}

impl HandshakeRecord {
    /// Build a fresh record in `Initiated` from validated Init fields.
    pub fn initiated(
        initiator_id: &str,
        responder_id: &str,
        ephemeral_pub_b64: &str,
        nonce_b64: &str,
        signature_b64: &str,
        created_ms: i64,
    ) -> Self {
        Self {
            session_id: mint_session_id(initiator_id, responder_id, created_ms),
            initiator_id: initiator_id.to_string(),
            responder_id: responder_id.to_string(),
            initiator_ephemeral_pub: ephemeral_pub_b64.to_string(),
            responder_ephemeral_pub: None,
            initiator_nonce: nonce_b64.to_string(),
            responder_nonce: None,
            initiator_signature: signature_b64.to_string(),
            responder_signature: None,
            initiator_confirmation: None,
            responder_confirmation: None,
            initiator_last_sequence: 0,
            responder_last_sequence: 0,
            status: SessionStatus::Initiated,
            created_at: created_ms,
            expires_at: created_ms + HANDSHAKE_TTL_MS,
            completed_at: None,
            version: 0,
        }
    }

    /// The role `user_id` plays in this record, if any.
    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        if user_id == self.initiator_id {
            Some(Role::Initiator)
        } else if user_id == self.responder_id {
            Some(Role::Responder)
        } else {
            None
        }
    }

    /// The other party's id.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        match self.role_of(user_id)? {
            Role::Initiator => Some(&self.responder_id),
            Role::Responder => Some(&self.initiator_id),
        }
    }

    /// Last accepted sequence for the given sender role.
    pub fn last_sequence(&self, sender: Role) -> u64 {
        match sender {
            Role::Initiator => self.initiator_last_sequence,
            Role::Responder => self.responder_last_sequence,
        }
    }

    pub fn set_last_sequence(&mut self, sender: Role, sequence: u64) {
        match sender {
            Role::Initiator => self.initiator_last_sequence = sequence,
            Role::Responder => self.responder_last_sequence = sequence,
        }
    }

    /// Confirmation tag slot for a role.
    pub fn confirmation(&self, role: Role) -> Option<&str> {
        match role {
            Role::Initiator => self.initiator_confirmation.as_deref(),
            Role::Responder => self.responder_confirmation.as_deref(),
        }
    }

    pub fn set_confirmation(&mut self, role: Role, tag_b64: &str) {
        let slot = match role {
            Role::Initiator => &mut self.initiator_confirmation,
            Role::Responder => &mut self.responder_confirmation,
        };
        *slot = Some(tag_b64.to_string());
    }

    /// True when the record sits below `Completed` past its deadline.
    /// `expires_at` stops mattering once the handshake completes.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        !self.status.is_completed() && !self.status.is_terminal() && now_ms > self.expires_at
    }
}

/// The record as served to participants; counters stay relay-internal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub initiator_id: String,
    pub responder_id: String,
    pub initiator_ephemeral_pub: String,
    pub responder_ephemeral_pub: Option<String>,
    pub initiator_nonce: String,
    pub responder_nonce: Option<String>,
    pub initiator_confirmation: Option<String>,
    pub responder_confirmation: Option<String>,
    pub status: SessionStatus,
    pub created_at: i64,
    pub expires_at: i64,
    pub completed_at: Option<i64>,
}

impl From<&HandshakeRecord> for SessionView {
    fn from(record: &HandshakeRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            initiator_id: record.initiator_id.clone(),
            responder_id: record.responder_id.clone(),
            initiator_ephemeral_pub: record.initiator_ephemeral_pub.clone(),
            responder_ephemeral_pub: record.responder_ephemeral_pub.clone(),
            initiator_nonce: record.initiator_nonce.clone(),
            responder_nonce: record.responder_nonce.clone(),
            initiator_confirmation: record.initiator_confirmation.clone(),
            responder_confirmation: record.responder_confirmation.clone(),
            status: record.status,
            created_at: record.created_at,
            expires_at: record.expires_at,
            completed_at: record.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> HandshakeRecord {
        HandshakeRecord::initiated("u1", "u2", "cHVi", "bm9uY2U=", "c2ln", 1_000)
    }

    #[test]
    fn session_id_embeds_parties_and_time() {
        assert_eq!(mint_session_id("u1", "u2", 42), "u1|u2|42");
        assert_eq!(record().session_id, "u1|u2|1000");
    }

    #[test]
    fn roles_resolve_both_ways() {
        let r = record();
        assert_eq!(r.role_of("u1"), Some(Role::Initiator));
        assert_eq!(r.role_of("u2"), Some(Role::Responder));
        assert_eq!(r.role_of("u3"), None);
        assert_eq!(r.peer_of("u1"), Some("u2"));
        assert_eq!(r.peer_of("u3"), None);
    }

    #[test]
    fn expiry_only_applies_below_completed() {
        let mut r = record();
        assert!(!r.is_expired(r.expires_at));
        assert!(r.is_expired(r.expires_at + 1));

        r.status = SessionStatus::Completed;
        assert!(!r.is_expired(r.expires_at + 1));

        r.status = SessionStatus::Failed;
        assert!(!r.is_expired(r.expires_at + 1));
    }

    #[test]
    fn view_hides_counters() {
        let mut r = record();
        r.initiator_last_sequence = 7;
        let view = SessionView::from(&r);
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("initiatorLastSequence").is_none());
        assert!(json.get("version").is_none());
        assert_eq!(json["sessionId"], "u1|u2|1000");
    }

    #[test]
    fn status_serialises_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Initiated).unwrap(),
            r#""initiated""#
        );
    }
}
