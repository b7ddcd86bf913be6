//! DocumentStore trait: the abstract interface for record persistence.
//!
//! The engine never holds records across calls; it reloads them through
//! this trait before acting. Implementations include SQLite (primary) and
//! in-memory (for tests).

use async_trait::async_trait;
use ephemera_core::{ExpirableRecord, RecordId, RecordKind};

use crate::error::{Result, StoreError};

/// Async interface for expirable record persistence.
///
/// # Design Notes
///
/// - **Atomic calls**: every method is its own transaction. A record and its
///   time spans are always written and deleted together.
/// - **Store-assigned ids**: `insert_record` ignores the record's `id` and
///   returns a fresh one.
/// - **Idempotent delete**: deleting a missing record returns `false`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Record Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a new record with its time spans. Returns the assigned id.
    async fn insert_record(&self, record: &ExpirableRecord) -> Result<RecordId>;

    /// Load a record by id.
    async fn load_record(&self, id: RecordId) -> Result<Option<ExpirableRecord>>;

    /// Overwrite an existing record and replace its time spans.
    ///
    /// Returns `NotFound` if the record does not exist.
    async fn save_record(&self, record: &ExpirableRecord) -> Result<()>;

    /// Purge a record and its time spans.
    ///
    /// Returns `true` if the record existed.
    async fn delete_record(&self, id: RecordId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Scan Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// All records of one kind, ordered by id.
    async fn list_records(&self, kind: RecordKind) -> Result<Vec<ExpirableRecord>>;

    /// Total number of stored records.
    async fn record_count(&self) -> Result<usize>;
}

/// Extension trait for common store patterns.
pub trait DocumentStoreExt: DocumentStore {
    /// Load a record, set its pending-deletion flag and save it.
    ///
    /// Returns the updated record.
    fn mark_for_deletion(
        &self,
        id: RecordId,
    ) -> impl std::future::Future<Output = Result<ExpirableRecord>> + Send;
}

impl<S: DocumentStore + ?Sized> DocumentStoreExt for S {
    async fn mark_for_deletion(&self, id: RecordId) -> Result<ExpirableRecord> {
        let mut record = self
            .load_record(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if !record.delete {
            record.delete = true;
            self.save_record(&record).await?;
        }

        Ok(record)
    }
}
