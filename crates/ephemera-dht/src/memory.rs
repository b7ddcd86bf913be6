//! In-memory external store for testing.
//!
//! Behaves like a perfectly reliable DHT unless told otherwise: failures can
//! be injected per push, the whole backend can be taken offline, and stored
//! values can be dropped or corrupted to simulate a lossy or hostile store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use ephemera_core::Location;
use tokio::sync::RwLock;

use crate::error::{DhtError, Result};
use crate::traits::{ExternalStore, DEFAULT_ITEM_IDENTIFIER_SIZE};

/// Identifier of the in-memory backend.
pub const MEMORY_DHT_IDENTIFIER: &str = "MemoryDHT";

/// In-memory external store.
pub struct MemoryDht {
    identifier: String,
    item_size: usize,
    values: RwLock<HashMap<Location, Vec<u8>>>,
    /// Number of upcoming pushes to reject.
    failing_pushes: AtomicUsize,
    offline: AtomicBool,
    push_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl MemoryDht {
    /// Create an empty store with the default identifier and location size.
    pub fn new() -> Self {
        Self::with_identifier(MEMORY_DHT_IDENTIFIER, DEFAULT_ITEM_IDENTIFIER_SIZE)
    }

    /// Create an empty store with a custom identifier and location size.
    pub fn with_identifier(identifier: impl Into<String>, item_size: usize) -> Self {
        Self {
            identifier: identifier.into(),
            item_size,
            values: RwLock::new(HashMap::new()),
            failing_pushes: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
            push_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Failure Injection
    // ─────────────────────────────────────────────────────────────────────────

    /// Reject the next `n` pushes (they return `false` and store nothing).
    pub fn fail_next_pushes(&self, n: usize) {
        self.failing_pushes.store(n, Ordering::SeqCst);
    }

    /// Take the backend offline; every call errors until brought back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop the value at a location, as a lossy DHT might.
    pub async fn forget(&self, location: &Location) -> Option<Vec<u8>> {
        self.values.write().await.remove(location)
    }

    /// Overwrite a stored value in place.
    pub async fn tamper<F>(&self, location: &Location, f: F) -> bool
    where
        F: FnOnce(&mut Vec<u8>),
    {
        match self.values.write().await.get_mut(location) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    /// The value currently stored at a location.
    pub async fn value(&self, location: &Location) -> Option<Vec<u8>> {
        self.values.read().await.get(location).cloned()
    }

    /// Number of stored values.
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    /// True if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }

    /// Number of `push_bulk` calls so far, including failed ones.
    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    /// Number of `get_bulk` calls so far.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DhtError::Unavailable(format!("{} is offline", self.identifier)));
        }
        Ok(())
    }

    fn check_location(&self, location: &Location) -> Result<()> {
        if location.len() != self.item_size {
            return Err(DhtError::InvalidLocation {
                expected: self.item_size,
                actual: location.len(),
            });
        }
        Ok(())
    }

    /// Consume one injected failure, if any remain.
    fn take_failure(&self) -> bool {
        self.failing_pushes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryDht {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExternalStore for MemoryDht {
    async fn get_bulk(&self, locations: &[Location]) -> Result<Vec<Option<Vec<u8>>>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        for location in locations {
            self.check_location(location)?;
        }

        let values = self.values.read().await;
        Ok(locations.iter().map(|l| values.get(l).cloned()).collect())
    }

    async fn push_bulk(&self, locations: &[Location], values: &[Vec<u8>]) -> Result<bool> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if locations.len() != values.len() {
            return Err(DhtError::LengthMismatch {
                locations: locations.len(),
                values: values.len(),
            });
        }
        for location in locations {
            self.check_location(location)?;
        }

        if self.take_failure() {
            tracing::debug!(items = locations.len(), "injected push failure");
            return Ok(false);
        }

        let mut stored = self.values.write().await;
        for (location, value) in locations.iter().zip(values) {
            stored.insert(location.clone(), value.clone());
        }
        Ok(true)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn item_identifier_size(&self) -> usize {
        self.item_size
    }
}
