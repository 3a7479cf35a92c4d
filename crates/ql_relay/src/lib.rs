//! ql_relay — the trust boundary around the Quietline session ledger.
//!
//! The relay is untrusted for confidentiality (it only ever holds
//! ciphertext and handshake metadata) but it IS the arbiter of ledger
//! transitions: signatures, freshness, authorization, status gates, and
//! monotonic sequence numbers are all enforced here.
//!
//! # Modules
//! - `audit`     — audit sink trait + tracing/in-memory implementations
//! - `directory` — long-term verification-key lookup (collaborator trait)
//! - `error`     — storage error type shared by the collaborator traits
//! - `ledger`    — durable handshake/message store with CAS serialisation
//! - `validator` — the relay-side validator itself
//!
//! Persistence is a collaborator: `MemoryLedger` and `MemoryDirectory`
//! implement the traits for tests and single-process deployments; a
//! database-backed implementation plugs in behind the same traits.

pub mod audit;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod validator;

pub use audit::{AuditEvent, AuditSink, MemoryAudit, TracingAudit};
pub use directory::{DirectoryLookup, MemoryDirectory};
pub use error::StoreError;
pub use ledger::{LedgerStore, MemoryLedger};
pub use validator::RelayValidator;
