//! Territory lookup facade for the Holdfast territory layer.
//!
//! This crate composes the caches and the hook pipeline in front of the
//! authoritative store and owns the deferred save queue.
//!
//! ```text
//! read:    resolve_owner --> TerritoryCache --(miss)--> TerritoryStore --> cache fill
//! mutate:  apply_mutation --> HookPipeline --(allowed)--> TerritoryStore
//!                         --> invalidate caches --> SaveQueue::enqueue
//! timers:  drain_saves / idle_sweep / sweep_expired (called by a driver)
//! ```
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `holdfast-config.yaml` into
//!   strongly-typed structs.
//! - [`error`] -- [`StoreError`], [`SaveError`], [`LookupError`].
//! - [`lookup`] -- [`TerritoryLookup`], the read/mutate facade.
//! - [`save_queue`] -- [`SaveQueue`], FIFO deferred persistence with a
//!   single-flight drain.
//! - [`store`] -- [`TerritoryStore`] boundary trait and the in-memory
//!   [`MemoryStore`].

pub mod config;
pub mod error;
pub mod lookup;
pub mod save_queue;
pub mod store;

pub use config::{ConfigError, HoldfastConfig};
pub use error::{LookupError, SaveError, StoreError};
pub use lookup::{LookupStats, MutationOutcome, TerritoryLookup};
pub use save_queue::{DrainReport, PendingSave, SaveAction, SaveQueue, SaveQueueStats};
pub use store::{MemoryStore, TerritoryStore};
