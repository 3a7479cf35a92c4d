//! Protocol error taxonomy.
//!
//! Each variant carries a stable string code surfaced to clients in
//! `ErrorResponse` bodies and written verbatim to the audit log.  Codes
//! are distinguishable by class so clients never mistake rate limiting or
//! clock drift for a cryptographic failure.  One deliberate alias: a
//! stale channel-message timestamp shares `REPLAY_DETECTED` with sequence
//! violations, per the message-endpoint wire contract.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    // ── Input faults ─────────────────────────────────────────────────────
    #[error("required fields missing or malformed")]
    MissingFields,

    #[error("field is not canonically encoded")]
    InvalidEncoding,

    #[error("sealed payload exceeds the size bound")]
    MessageTooLarge,

    // ── Freshness / ordering ─────────────────────────────────────────────
    #[error("timestamp outside the freshness window")]
    TimestampExpired,

    /// A channel message with a stale timestamp. The wire contract treats
    /// it as a replay (`REPLAY_DETECTED` on `POST /messages`), keeping
    /// `TIMESTAMP_EXPIRED` for handshake transitions only.
    #[error("message timestamp outside the freshness window")]
    MessageTimestampExpired,

    #[error("sequence number replayed or out of order")]
    ReplayDetected,

    #[error("handshake record has expired")]
    SessionExpired,

    // ── Authentication / authorization ───────────────────────────────────
    #[error("caller has no registered signing key")]
    NoSigningKey,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("caller is not a party to this operation")]
    Unauthorized,

    #[error("no such user")]
    UserNotFound,

    // ── State ────────────────────────────────────────────────────────────
    #[error("no such session")]
    SessionNotFound,

    #[error("session is not in a status that permits this transition")]
    InvalidStatus,

    #[error("key confirmation mismatch — possible man-in-the-middle")]
    ConfirmationMismatch,

    // ── Storage / transport ──────────────────────────────────────────────
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// Stable wire code. Never changes for a shipped variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingFields => "MISSING_FIELDS",
            Self::InvalidEncoding => "INVALID_ENCODING",
            Self::MessageTooLarge => "MESSAGE_TOO_LARGE",
            Self::TimestampExpired => "TIMESTAMP_EXPIRED",
            Self::MessageTimestampExpired => "REPLAY_DETECTED",
            Self::ReplayDetected => "REPLAY_DETECTED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::NoSigningKey => "NO_SIGNING_KEY",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::InvalidStatus => "INVALID_STATUS",
            Self::ConfirmationMismatch => "CONFIRMATION_MISMATCH",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the transport layer maps this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::MissingFields | Self::InvalidEncoding | Self::MessageTooLarge => 400,
            Self::TimestampExpired => 400,
            Self::InvalidSignature | Self::NoSigningKey => 401,
            Self::Unauthorized => 403,
            Self::UserNotFound | Self::SessionNotFound => 404,
            Self::MessageTimestampExpired
            | Self::ReplayDetected
            | Self::InvalidStatus
            | Self::ConfirmationMismatch => 409,
            Self::SessionExpired => 410,
            Self::Internal(_) => 500,
        }
    }
}
