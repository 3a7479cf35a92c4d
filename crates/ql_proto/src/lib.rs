//! ql_proto — Wire types, canonical payloads, and serialisation for Quietline
//!
//! All on-wire bodies are camelCase JSON.  Numeric timestamps are integer
//! milliseconds since epoch; byte fields are standard base64 with padding.
//!
//! # Modules
//! - `api`       — request/response bodies shared between clients and the relay
//! - `canonical` — the ONE canonical JSON form, signing payloads, confirmation input
//! - `clock`     — `Clock` collaborator trait + system/manual implementations
//! - `encoding`  — base64 helpers for wire byte fields
//! - `error`     — protocol error taxonomy with stable string codes
//! - `message`   — immutable ciphertext message records + file metadata
//! - `record`    — handshake ledger record, status state machine, session views

pub mod api;
pub mod canonical;
pub mod clock;
pub mod encoding;
pub mod error;
pub mod message;
pub mod record;

pub use clock::{Clock, SystemClock};
pub use error::ProtocolError;
pub use message::{MessageRecord, MessageType};
pub use record::{HandshakeRecord, Role, SessionStatus, SessionView};
