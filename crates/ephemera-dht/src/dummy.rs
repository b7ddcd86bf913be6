//! Placeholder backend used when no real external store is configured.
//!
//! Every get misses and every push is refused, so records keep cycling
//! through the reschedule path without ever reaching the network.

use async_trait::async_trait;
use ephemera_core::Location;

use crate::error::Result;
use crate::traits::ExternalStore;

/// Identifier of the placeholder backend.
pub const DUMMY_IDENTIFIER: &str = "Dummy";

/// An external store that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyDht;

impl DummyDht {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExternalStore for DummyDht {
    async fn get_bulk(&self, locations: &[Location]) -> Result<Vec<Option<Vec<u8>>>> {
        Ok(vec![None; locations.len()])
    }

    async fn push_bulk(&self, locations: &[Location], _values: &[Vec<u8>]) -> Result<bool> {
        tracing::debug!(items = locations.len(), "dummy store refusing push");
        Ok(false)
    }

    fn identifier(&self) -> &str {
        DUMMY_IDENTIFIER
    }
}
