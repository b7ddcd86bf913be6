//! # Ephemera DHT
//!
//! The external store contract: bulk get/put of opaque values at
//! fixed-size locations in an untrusted, possibly lossy key-value service.
//!
//! ## Key Types
//!
//! - [`ExternalStore`] - The async trait every backend implements
//! - [`MemoryDht`] - In-memory backend with failure injection, for tests
//! - [`DummyDht`] - Placeholder backend that refuses every push
//!
//! Network backends (Kademlia, HTTP gateways) live outside this workspace
//! and plug in through [`ExternalStore`].

pub mod dummy;
pub mod error;
pub mod memory;
pub mod traits;

pub use dummy::{DummyDht, DUMMY_IDENTIFIER};
pub use error::{DhtError, Result};
pub use memory::{MemoryDht, MEMORY_DHT_IDENTIFIER};
pub use traits::{ExternalStore, DEFAULT_ITEM_IDENTIFIER_SIZE};
