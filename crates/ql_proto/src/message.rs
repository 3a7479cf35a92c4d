//! Ciphertext message records — what the relay stores and serves.
//!
//! A record is immutable once stored.  No plaintext and no key material:
//! the relay holds `{from, to, session_id, ciphertext, iv, message_type,
//! sequence_number, server_timestamp}` plus opaque file metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ql_crypto::aead::{IV_LEN, TAG_LEN};

/// Upper bound on decoded `ciphertext + iv` per message.
pub const MAX_SEALED_BYTES: usize = 256 * 1024;

/// Largest plaintext that seals within `MAX_SEALED_BYTES`
/// (IV and GCM tag overhead subtracted).
pub const MAX_PLAINTEXT_BYTES: usize = MAX_SEALED_BYTES - IV_LEN - TAG_LEN;

/// File chunk size: chunks must individually respect the sealed bound.
pub const FILE_CHUNK_BYTES: usize = MAX_PLAINTEXT_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    File,
}

/// Descriptor attached to file-chunk messages.
///
/// In envelope mode the chunk is sealed under a fresh per-file key, and
/// `wrapped_keys` carries that key wrapped under the session key, one
/// entry per recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub chunk_index: u32,
    pub chunk_count: u32,
    /// recipient id → base64 wrapped file key. Empty outside envelope mode.
    #[serde(default)]
    pub wrapped_keys: BTreeMap<String, String>,
}

/// One stored ciphertext message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub message_id: String,
    pub from: String,
    pub to: String,
    pub session_id: String,
    /// AES-256-GCM ciphertext with tag appended, base64.
    pub ciphertext: String,
    /// 96-bit AEAD IV, base64.
    pub iv: String,
    pub message_type: MessageType,
    pub sequence_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_metadata: Option<FileMetadata>,
    /// Stamped by the relay at acceptance.
    pub server_timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_bound_accounts_for_overhead() {
        assert_eq!(MAX_PLAINTEXT_BYTES, 256 * 1024 - 28);
        assert_eq!(FILE_CHUNK_BYTES + IV_LEN + TAG_LEN, MAX_SEALED_BYTES);
    }

    #[test]
    fn record_serialises_camel_case() {
        let record = MessageRecord {
            message_id: "m1".into(),
            from: "u1".into(),
            to: "u2".into(),
            session_id: "u1|u2|1".into(),
            ciphertext: "YWJj".into(),
            iv: "aXY=".into(),
            message_type: MessageType::Text,
            sequence_number: 1,
            file_metadata: None,
            server_timestamp: 123,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sessionId"], "u1|u2|1");
        assert_eq!(json["sequenceNumber"], 1);
        assert_eq!(json["messageType"], "text");
        assert!(json.get("fileMetadata").is_none());
    }
}
