//! ql_crypto — Quietline cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited RustCrypto crates.
//! - Zeroize all secret material on drop.
//! - Deterministic encodings everywhere a byte string feeds a signature
//!   or MAC: SEC1 uncompressed points, SubjectPublicKeyInfo DER, standard
//!   base64 with padding.
//!
//! # Module layout
//! - `identity` — long-term RSA identity (signing + encryption pairs) and fingerprints
//! - `sign`     — RSA-PSS (SHA-256, salt 32) sign/verify
//! - `ecdh`     — ephemeral ECDH over P-256, 65-byte uncompressed points
//! - `kdf`      — HKDF-SHA-256 session-key derivation + Argon2id vault key
//! - `aead`     — AES-256-GCM seal/open + 32-byte key wrap for file envelopes
//! - `mac`      — HMAC-SHA-256 key-confirmation tags
//! - `hash`     — SHA-256 utilities
//! - `rng`      — CSPRNG helpers
//! - `error`    — unified error type

pub mod aead;
pub mod ecdh;
pub mod error;
pub mod hash;
pub mod identity;
pub mod kdf;
pub mod mac;
pub mod rng;
pub mod sign;

pub use error::CryptoError;
