//! Canonical JSON and the strings that get signed or MAC'd.
//!
//! ONE canonical form, used for every byte string fed into RSA-PSS or
//! HMAC: object keys sorted ascending by UTF-8 byte order, no
//! insignificant whitespace, UTF-8 output.  Signer and verifier both call
//! the builders here, so the bytes match or the protocol fails closed.

use serde_json::Value;

use crate::record::Role;

/// Serialise a JSON value canonically: sorted keys, compact separators.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out.into_bytes()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            // serde_json's map is sorted already (BTreeMap backing), but a
            // transitively enabled `preserve_order` feature would silently
            // change that. Sort explicitly so the encoding cannot drift.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serialises"));
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        leaf => out.push_str(&serde_json::to_string(leaf).expect("leaf serialises")),
    }
}

// ── Signing payloads ──────────────────────────────────────────────────────────

/// Payload the initiator signs. Binds the intended responder into the
/// signature so an Init cannot be spliced into a session with a different
/// counterparty.
pub fn init_signing_payload(
    responder_id: &str,
    ephemeral_public_b64: &str,
    nonce_b64: &str,
    timestamp_ms: i64,
) -> Vec<u8> {
    canonical_bytes(&serde_json::json!({
        "ephemeralPublic": ephemeral_public_b64,
        "nonce": nonce_b64,
        "responderId": responder_id,
        "timestamp": timestamp_ms,
        "type": "key_exchange_init",
    }))
}

/// Payload the responder signs. Binds the minted session id.
pub fn response_signing_payload(
    session_id: &str,
    ephemeral_public_b64: &str,
    nonce_b64: &str,
    timestamp_ms: i64,
) -> Vec<u8> {
    canonical_bytes(&serde_json::json!({
        "ephemeralPublic": ephemeral_public_b64,
        "nonce": nonce_b64,
        "sessionId": session_id,
        "timestamp": timestamp_ms,
        "type": "key_exchange_response",
    }))
}

/// Input to the key-confirmation HMAC: session id, party role, and the
/// base64 SHA-256 of the raw shared secret.
pub fn confirmation_input(session_id: &str, role: Role, shared_hash_b64: &str) -> String {
    format!("{session_id}|{}|{shared_hash_b64}", role.as_str())
}
