use thiserror::Error;

use ql_crypto::CryptoError;
use ql_proto::ProtocolError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("vault is locked")]
    VaultLocked,

    #[error("no such session in the local store: {0}")]
    UnknownSession(String),

    #[error("key confirmation mismatch — possible man-in-the-middle; session key discarded")]
    ConfirmationMismatch,

    #[error("handshake abandoned: peer made no progress before the deadline")]
    Timeout,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("incoming message out of sequence")]
    OutOfOrder,

    #[error("state error: {0}")]
    State(String),
}
