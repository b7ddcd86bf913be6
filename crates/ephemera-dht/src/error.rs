//! Error types for external store access.

use thiserror::Error;

/// Errors raised by an external store backend.
#[derive(Debug, Error)]
pub enum DhtError {
    /// The backend could not be reached.
    #[error("external store unavailable: {0}")]
    Unavailable(String),

    /// A bulk push was given a different number of locations and values.
    #[error("bulk push length mismatch: {locations} locations, {values} values")]
    LengthMismatch { locations: usize, values: usize },

    /// A location has the wrong size for this backend.
    #[error("invalid location size: expected {expected}, got {actual}")]
    InvalidLocation { expected: usize, actual: usize },
}

/// Result type for external store operations.
pub type Result<T> = std::result::Result<T, DhtError>;
