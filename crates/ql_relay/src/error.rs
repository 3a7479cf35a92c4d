use thiserror::Error;

/// Errors surfaced by the storage collaborators (ledger, directory).
///
/// `Conflict` is the compare-and-set signal: the caller read a record,
/// someone else updated it first, and the write was refused. The
/// validator re-reads and re-validates instead of clobbering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("record already exists")]
    Duplicate,

    #[error("stale version — record was updated concurrently")]
    Conflict,

    #[error("record not found")]
    NotFound,

    #[error("storage backend error: {0}")]
    Backend(String),
}
