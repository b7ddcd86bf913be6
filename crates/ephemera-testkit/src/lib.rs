//! # Ephemera Testkit
//!
//! Testing utilities for the Ephemera authority.
//!
//! ## Overview
//!
//! - **Fixtures**: an [`Authority`](ephemera::Authority) wired to in-memory
//!   stores and manual time, plus record builders
//! - **Generators**: Proptest strategies for seeds, spans and records
//!
//! ## Test Fixtures
//!
//! ```rust
//! use ephemera_testkit::fixtures::{TestAuthority, HOUR};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let fx = TestAuthority::new();
//! let id = fx
//!     .authority
//!     .grant_attribute("alice", "role", b"seed", b"component", 1, vec![])
//!     .await
//!     .unwrap();
//! fx.advance(HOUR).await;
//! # let _ = id;
//! # });
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use ephemera_testkit::generators::timespans;
//!
//! proptest! {
//!     #[test]
//!     fn spans_are_well_formed(spans in timespans(0, 4)) {
//!         for s in spans {
//!             prop_assert!(s.end.map_or(true, |e| e > s.start));
//!         }
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{attribute_record, file_bag_record, TestAuthority};
pub use generators::{record_params, RecordParams};
