//! # Ephemera Store
//!
//! Document store abstraction for expirable records. Provides a trait-based
//! interface with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`DocumentStore`] - The async trait for all record operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ephemera_store::{DocumentStore, SqliteStore};
//! use ephemera_core::RecordKind;
//!
//! async fn example() {
//!     let store = SqliteStore::open("authority.db").unwrap();
//!     let bags = store.list_records(RecordKind::FileBag).await.unwrap();
//!     println!("{} file bags", bags.len());
//! }
//! ```

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{DocumentStore, DocumentStoreExt};
