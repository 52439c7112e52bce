use std::io;

use thiserror::Error;

/// Errors surfaced by the store.
///
/// Validation and semantic failures leave the tree unmodified; `Corrupted`
/// and `InvalidChecksum` during a read are fatal for that call only.
#[derive(Debug, Error)]
pub enum Error {
    /// The key is empty.
    #[error("nil key")]
    NilKey,

    /// The key exceeds 65535 bytes.
    #[error("key too large")]
    KeyTooLarge,

    /// The value exceeds 2^32 - 1 bytes.
    #[error("value too large")]
    ValueTooLarge,

    /// `add` was called with a key that already exists as a record.
    #[error("duplicate key")]
    DuplicateKey,

    /// The key does not exist in the index.
    #[error("key not found")]
    KeyNotFound,

    /// An in-memory node checksum failed verification.
    #[error("invalid checksum")]
    InvalidChecksum,

    /// Persisted bytes are unusable: wrong magic, wrong version, CRC
    /// mismatch, truncation, or an internal inconsistency.
    #[error("corrupted data")]
    Corrupted,

    /// An underlying I/O operation failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
