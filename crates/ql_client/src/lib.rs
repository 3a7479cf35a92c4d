//! ql_client — the Quietline client engine.
//!
//! One logical task per open session: the handshake engine negotiates a
//! session key against the relay, hands it to the secure channel, and the
//! channel seals/opens payloads with strict sequence discipline.  All
//! long-term and session key material lives in the vault-encrypted local
//! key store.
//!
//! # Modules
//! - `channel`   — secure channel: sealing, opening, per-direction counters
//! - `error`     — client error type
//! - `files`     — file chunking + envelope-mode key wrapping
//! - `handshake` — client-side handshake state machine
//! - `keystore`  — typed blobs over the vault (keys, pending state, sessions)
//! - `poll`      — bounded backoff for waiting on peer progress
//! - `transport` — the client's authenticated view of the relay
//! - `vault`     — Argon2id-unlocked blob encryption

pub mod channel;
pub mod error;
pub mod files;
pub mod handshake;
pub mod keystore;
pub mod poll;
pub mod transport;
pub mod vault;

pub use channel::SecureChannel;
pub use error::ClientError;
pub use handshake::{HandshakeEngine, HandshakeProgress};
pub use keystore::LocalKeyStore;
pub use poll::PollConfig;
pub use transport::Transport;
pub use vault::Vault;
