//! API request/response bodies shared between clients and the relay.
//! These map directly to JSON bodies on the wire.
//!
//! Caller identity is NOT in the bodies: the transport authenticates the
//! caller (bearer token) and hands the validator an already-verified id.

use serde::{Deserialize, Serialize};

use crate::message::{FileMetadata, MessageRecord, MessageType};
use crate::record::{SessionStatus, SessionView};

// ── Handshake ────────────────────────────────────────────────────────────────

/// `POST /keys/exchange/initiate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub responder_id: String,
    /// 65-byte uncompressed P-256 point, base64.
    pub ephemeral_public: String,
    /// 32-byte random value, base64.
    pub nonce: String,
    pub timestamp: i64,
    /// RSA-PSS over the canonical init payload, base64.
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub session_id: String,
}

/// `POST /keys/exchange/respond`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondRequest {
    pub session_id: String,
    pub ephemeral_public: String,
    pub nonce: String,
    pub timestamp: i64,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondResponse {
    pub session_id: String,
    /// The initiator's ephemeral public point, echoed so the responder can
    /// derive without a second fetch.
    pub initiator_public_key: String,
}

/// `POST /keys/exchange/confirm`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub session_id: String,
    /// HMAC key-confirmation tag, base64.
    pub confirmation: String,
    pub is_initiator: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub status: SessionStatus,
}

/// `POST /keys/exchange/fail` — a party that detected a confirmation
/// mismatch reports it; the record is marked failed and audited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFailureRequest {
    pub session_id: String,
    pub reason: String,
}

/// `GET /keys/exchange/status/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub initiator_id: String,
    pub responder_id: String,
    pub expires_at: i64,
    pub completed_at: Option<i64>,
}

/// `GET /keys/exchange/pending`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResponse {
    pub sessions: Vec<SessionView>,
}

// ── Messages ─────────────────────────────────────────────────────────────────

/// `POST /messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub to: String,
    pub session_id: String,
    pub ciphertext: String,
    pub iv: String,
    pub message_type: MessageType,
    pub sequence_number: u64,
    /// 32-byte replay canary, base64. Distinct from the AEAD IV.
    pub nonce: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_metadata: Option<FileMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message_id: String,
    pub timestamp: i64,
}

/// `GET /messages/conversation/{userId}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub messages: Vec<MessageRecord>,
}

// ── Common ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<&crate::error::ProtocolError> for ErrorResponse {
    fn from(err: &crate::error::ProtocolError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiate_request_wire_shape() {
        let body: InitiateRequest = serde_json::from_str(
            r#"{"responderId":"u2","ephemeralPublic":"cHVi","nonce":"bm9uY2U=",
                "timestamp":1700000000000,"signature":"c2ln"}"#,
        )
        .unwrap();
        assert_eq!(body.responder_id, "u2");
        assert_eq!(body.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn error_response_carries_stable_code() {
        let resp = ErrorResponse::from(&crate::error::ProtocolError::InvalidSignature);
        assert_eq!(resp.code, "INVALID_SIGNATURE");
    }
}
