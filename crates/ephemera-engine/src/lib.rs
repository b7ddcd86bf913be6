//! # Ephemera Engine
//!
//! The expiration engine: decides when each record must be refreshed or
//! revoked, pushes signed envelopes to the external store, and pulls them
//! back on the reader side.
//!
//! ## Key Types
//!
//! - [`Scheduler`] - Main events, between events and the reevaluation inbox
//! - [`UpdateExecutor`] - Builds and pushes envelopes for due records
//! - [`Puller`] - Fetches attribute components and key shares
//! - [`PendingTable`] - Between-event buckets joined by granularity
//! - [`JobTimer`] / [`Clock`] - Injectable time, real or manual
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ephemera_core::Keypair;
//! use ephemera_dht::MemoryDht;
//! use ephemera_engine::{EngineConfig, Scheduler, SystemClock, TokioTimer};
//! use ephemera_store::MemoryStore;
//!
//! async fn example() {
//!     let clock = Arc::new(SystemClock);
//!     let (timer, jobs) = TokioTimer::new(clock.clone());
//!     let scheduler = Arc::new(
//!         Scheduler::new(
//!             Arc::new(MemoryStore::new()),
//!             Arc::new(MemoryDht::new()),
//!             Arc::new(Keypair::generate()),
//!             clock,
//!             Arc::new(timer),
//!             EngineConfig::default(),
//!         )
//!         .unwrap(),
//!     );
//!     scheduler.start();
//!     scheduler.spawn(jobs);
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod plan;
pub mod puller;
pub mod scheduler;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use executor::{PushOutcome, UpdateExecutor};
pub use plan::{evaluate_record, Action, Batch, PendingTable, RecordPlan};
pub use puller::{PulledComponent, Puller};
pub use scheduler::{Scheduler, UpdateReport};
pub use timer::{Job, JobTimer, ManualTimer, TokioTimer};
