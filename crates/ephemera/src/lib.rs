//! # Ephemera
//!
//! Time-limited access to encrypted material through an untrusted external
//! store.
//!
//! ## Overview
//!
//! An authority keeps expirable records in a local document store and
//! pushes signed, encrypted envelopes to an external key-value store
//! (typically a DHT) on a schedule:
//!
//! - **Attribute grants** (Type1): one attribute secret-key component,
//!   replicated to N locations derived from the user's seed. Refreshed
//!   while a grant is active, overwritten with deletion markers when it ends.
//! - **File bags** (Type2): a data-encryption key masked and split into N
//!   threshold shares. Once the shares are deleted the key is unrecoverable.
//!
//! ## Key Concepts
//!
//! - **Main Event**: periodic full rescan that plans the next window.
//! - **Between Event**: a start or stop due inside the current window.
//! - **Reevaluation**: debounced replanning of records that just changed.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ephemera::{Authority, EngineConfig};
//! use ephemera::core::{Keypair, TimeSpan};
//! use ephemera::dht::MemoryDht;
//! use ephemera::store::SqliteStore;
//!
//! async fn example() {
//!     let store = Arc::new(SqliteStore::open("authority.db").unwrap());
//!     let dht = Arc::new(MemoryDht::new());
//!     let (authority, _engine) =
//!         Authority::launch(store, dht, Keypair::generate(), EngineConfig::default()).unwrap();
//!
//!     let id = authority
//!         .grant_attribute("alice", "clearance=secret", b"alice seed", b"component", 1, vec![])
//!         .await
//!         .unwrap();
//!     authority.revoke_attribute(id).await.unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `ephemera::core` - Record model, crypto, envelopes, threshold sharing
//! - `ephemera::store` - Document store and SQLite
//! - `ephemera::dht` - External store contract and test doubles
//! - `ephemera::engine` - Scheduler, executor and pull path

pub mod authority;
pub mod error;

pub use ephemera_core as core;
pub use ephemera_dht as dht;
pub use ephemera_engine as engine;
pub use ephemera_store as store;

pub use authority::Authority;
pub use error::{AuthorityError, Result};

pub use ephemera_engine::{EngineConfig, PulledComponent, Puller, Scheduler, UpdateReport};
