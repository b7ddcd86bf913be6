//! In-memory implementation of the DocumentStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use ephemera_core::{ExpirableRecord, RecordId, RecordKind};

use crate::error::{Result, StoreError};
use crate::traits::DocumentStore;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

struct MemoryStoreInner {
    /// Last assigned id.
    last_id: u64,

    /// Records indexed by id.
    records: BTreeMap<RecordId, ExpirableRecord>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                last_id: 0,
                records: BTreeMap::new(),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_record(&self, record: &ExpirableRecord) -> Result<RecordId> {
        let mut inner = self.inner.write().expect("memory store lock poisoned");

        inner.last_id += 1;
        let id = RecordId::new(inner.last_id);

        let mut stored = record.clone();
        stored.id = id;
        inner.records.insert(id, stored);

        Ok(id)
    }

    async fn load_record(&self, id: RecordId) -> Result<Option<ExpirableRecord>> {
        let inner = self.inner.read().expect("memory store lock poisoned");
        Ok(inner.records.get(&id).cloned())
    }

    async fn save_record(&self, record: &ExpirableRecord) -> Result<()> {
        let mut inner = self.inner.write().expect("memory store lock poisoned");

        match inner.records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id.to_string())),
        }
    }

    async fn delete_record(&self, id: RecordId) -> Result<bool> {
        let mut inner = self.inner.write().expect("memory store lock poisoned");
        Ok(inner.records.remove(&id).is_some())
    }

    async fn list_records(&self, kind: RecordKind) -> Result<Vec<ExpirableRecord>> {
        let inner = self.inner.read().expect("memory store lock poisoned");
        Ok(inner
            .records
            .values()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect())
    }

    async fn record_count(&self) -> Result<usize> {
        let inner = self.inner.read().expect("memory store lock poisoned");
        Ok(inner.records.len())
    }
}
