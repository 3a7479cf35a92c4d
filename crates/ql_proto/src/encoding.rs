//! Base64 helpers for wire byte fields.
//!
//! Standard alphabet, padding required.  Every byte string that crosses
//! the wire goes through these two functions so a non-canonical encoding
//! can never reach a signature check.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::ProtocolError;

/// Encode bytes for the wire.
pub fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a wire byte field. Rejects non-standard or unpadded input.
pub fn b64d(s: &str) -> Result<Vec<u8>, ProtocolError> {
    STANDARD.decode(s).map_err(|_| ProtocolError::InvalidEncoding)
}

/// Decode a wire byte field that must be exactly `N` bytes.
pub fn b64d_array<const N: usize>(s: &str) -> Result<[u8; N], ProtocolError> {
    let bytes = b64d(s)?;
    bytes
        .try_into()
        .map_err(|_| ProtocolError::InvalidEncoding)
}
