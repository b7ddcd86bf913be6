//! Error types for the Authority.

use ephemera_core::{CoreError, RecordId};
use ephemera_engine::EngineError;
use ephemera_store::StoreError;
use thiserror::Error;

/// Errors that can occur during Authority operations.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// Engine error.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// A time span ends at or before its start.
    #[error("invalid time span: {0}")]
    InvalidTimeSpan(String),

    /// No record of the expected kind with this id.
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),
}

/// Result type for Authority operations.
pub type Result<T> = std::result::Result<T, AuthorityError>;
