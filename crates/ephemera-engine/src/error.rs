//! Error types for the expiration engine.

use ephemera_core::{CoreError, ExpirationType, RecordId, RecordKind};
use ephemera_dht::DhtError;
use ephemera_store::StoreError;
use thiserror::Error;

/// Errors that can occur while scheduling, pushing or pulling.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Envelope, derivation or reconstruction failure.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Document store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// External store failure.
    #[error("external store error: {0}")]
    Dht(#[from] DhtError),

    /// The record's kind and expiration type have no push procedure.
    #[error("record {record}: no push procedure for {kind:?} with {expiration_type:?}")]
    UnknownExpirationType {
        record: RecordId,
        kind: RecordKind,
        expiration_type: ExpirationType,
    },

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Every push attempt for a record was refused.
    #[error("push for record {record} failed after {attempts} attempts")]
    PushFailed { record: RecordId, attempts: u32 },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
