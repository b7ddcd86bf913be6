//! ExternalStore trait: bulk access to an untrusted key-value service.
//!
//! The service gives no durability or ordering guarantees. Callers treat a
//! missing value as "try elsewhere", never as proof of deletion.

use async_trait::async_trait;
use ephemera_core::Location;

use crate::error::Result;

/// Default location size in bytes.
pub const DEFAULT_ITEM_IDENTIFIER_SIZE: usize = 20;

/// Bulk get/put of opaque blobs keyed by fixed-size locations.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait ExternalStore: Send + Sync {
    /// Fetch values for all `locations`.
    ///
    /// The result has one entry per location, `None` on miss.
    async fn get_bulk(&self, locations: &[Location]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Store `values[i]` at `locations[i]`.
    ///
    /// Returns `true` only if every item was accepted.
    async fn push_bulk(&self, locations: &[Location], values: &[Vec<u8>]) -> Result<bool>;

    /// Stable name mixed into every location and key derivation.
    fn identifier(&self) -> &str;

    /// Location size this backend expects.
    fn item_identifier_size(&self) -> usize {
        DEFAULT_ITEM_IDENTIFIER_SIZE
    }
}
