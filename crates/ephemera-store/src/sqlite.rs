//! SQLite implementation of the DocumentStore trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use ephemera_core::{ExpirableRecord, ExpirationType, RecordBody, RecordId, RecordKind, TimeSpan};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::DocumentStore;

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

fn encode_body(body: &RecordBody) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(body, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_body(bytes: &[u8]) -> Result<RecordBody> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn id_to_sql(id: RecordId) -> Result<i64> {
    i64::try_from(id.get()).map_err(|_| StoreError::InvalidData(format!("record id {} out of range", id)))
}

fn insert_spans(tx: &Transaction<'_>, id: i64, spans: &[TimeSpan]) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO timespans (record_id, start_ms, end_ms, strict) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for span in spans {
        stmt.execute(params![id, span.start, span.end, span.strict])?;
    }
    Ok(())
}

fn load_spans(conn: &Connection, id: i64) -> Result<Vec<TimeSpan>> {
    let mut stmt = conn.prepare_cached(
        "SELECT start_ms, end_ms, strict FROM timespans
         WHERE record_id = ?1 ORDER BY start_ms, end_ms",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, Option<i64>>(1)?,
            row.get::<_, bool>(2)?,
        ))
    })?;

    let mut spans = Vec::new();
    for row in rows {
        let (start, end, strict) = row?;
        let span = TimeSpan::new(start, end, strict)
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;
        spans.push(span);
    }
    spans.sort();
    Ok(spans)
}

/// Raw `records` row before its spans are attached.
struct RecordRow {
    id: i64,
    expiration_type: i64,
    delete_pending: bool,
    body: Vec<u8>,
}

impl RecordRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            expiration_type: row.get("expiration_type")?,
            delete_pending: row.get("delete_pending")?,
            body: row.get("body")?,
        })
    }

    fn into_record(self, conn: &Connection) -> Result<ExpirableRecord> {
        let expiration_type = u8::try_from(self.expiration_type)
            .ok()
            .and_then(ExpirationType::from_u8)
            .ok_or_else(|| {
                StoreError::InvalidData(format!(
                    "record #{} has unknown expiration type {}",
                    self.id, self.expiration_type
                ))
            })?;

        Ok(ExpirableRecord {
            id: RecordId::new(self.id as u64),
            expiration_type,
            timespans: load_spans(conn, self.id)?,
            delete: self.delete_pending,
            body: decode_body(&self.body)?,
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert_record(&self, record: &ExpirableRecord) -> Result<RecordId> {
        let body = encode_body(&record.body)?;
        let kind = record.kind().as_u8();
        let expiration_type = record.expiration_type.as_u8();
        let delete = record.delete;
        let spans = record.timespans.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO records (kind, expiration_type, delete_pending, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![kind, expiration_type, delete, body, now_millis()],
            )?;
            let id = tx.last_insert_rowid();
            insert_spans(&tx, id, &spans)?;
            tx.commit()?;

            tracing::debug!(record = id, kind, "inserted record");
            Ok(RecordId::new(id as u64))
        })
        .await
    }

    async fn load_record(&self, id: RecordId) -> Result<Option<ExpirableRecord>> {
        let id = id_to_sql(id)?;

        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, expiration_type, delete_pending, body FROM records WHERE id = ?1",
                    params![id],
                    RecordRow::from_row,
                )
                .optional()?;

            row.map(|r| r.into_record(conn)).transpose()
        })
        .await
    }

    async fn save_record(&self, record: &ExpirableRecord) -> Result<()> {
        let id = id_to_sql(record.id)?;
        let body = encode_body(&record.body)?;
        let kind = record.kind().as_u8();
        let expiration_type = record.expiration_type.as_u8();
        let delete = record.delete;
        let spans = record.timespans.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE records
                 SET kind = ?2, expiration_type = ?3, delete_pending = ?4, body = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![id, kind, expiration_type, delete, body, now_millis()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("#{}", id)));
            }

            tx.execute("DELETE FROM timespans WHERE record_id = ?1", params![id])?;
            insert_spans(&tx, id, &spans)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_record(&self, id: RecordId) -> Result<bool> {
        let id = id_to_sql(id)?;

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM timespans WHERE record_id = ?1", params![id])?;
            let removed = tx.execute("DELETE FROM records WHERE id = ?1", params![id])?;
            tx.commit()?;

            if removed > 0 {
                tracing::debug!(record = id, "purged record");
            }
            Ok(removed > 0)
        })
        .await
    }

    async fn list_records(&self, kind: RecordKind) -> Result<Vec<ExpirableRecord>> {
        let kind = kind.as_u8();

        self.blocking(move |conn| {
            let rows: Vec<RecordRow> = {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, expiration_type, delete_pending, body FROM records
                     WHERE kind = ?1 ORDER BY id",
                )?;
                let rows = stmt.query_map(params![kind], RecordRow::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                let id = row.id;
                match row.into_record(conn) {
                    Ok(record) => records.push(record),
                    // One undecodable row must not hide every other record.
                    Err(e) => tracing::warn!(record = id, error = %e, "skipping unreadable record"),
                }
            }
            Ok(records)
        })
        .await
    }

    async fn record_count(&self) -> Result<usize> {
        self.blocking(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}
