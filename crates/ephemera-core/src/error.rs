//! Error types for Ephemera Core.

use thiserror::Error;

/// Errors raised while deriving, encoding, verifying, or recombining
/// externally stored secret material.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed envelope or share set.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid signature")]
    SignatureInvalid,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Not enough valid, distinct-index shares to recombine the secret.
    #[error("insufficient shares: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    /// A share value is not a canonical field element.
    #[error("invalid share at index {0}")]
    InvalidShare(u32),

    /// The recombined key does not match the ciphertext's key check.
    #[error("reconstructed key failed the key check")]
    KeyCheckFailed,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
