//! Caching layer between high-frequency territory lookups and the
//! authoritative store.
//!
//! Nothing in this crate performs I/O. Callers fill the caches from the
//! store on a miss and invalidate them synchronously on every mutation.
//!
//! # Modules
//!
//! - [`clock`] -- [`Clock`] abstraction with a monotonic production clock and
//!   a manually advanced test clock.
//! - [`ttl`] -- [`TtlCache`], a sliding-expiry cache, and [`KeySpaces`], the
//!   three isolated key spaces (entity, membership, balance) sharing one TTL.
//! - [`territory`] -- [`TerritoryCache`], the bounded cell-to-owner cache with
//!   least-recently-used eviction.
//! - [`locality`] -- [`LocalityTracker`], per-observer nearby-cell sets and
//!   idle-cell sweeping.

pub mod clock;
pub mod locality;
pub mod territory;
pub mod ttl;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use locality::{LocalityTracker, NeighborhoodShape, RefreshReport};
pub use territory::{OwnerLookup, TerritoryCache, TerritoryCacheStats};
pub use ttl::{KeySpace, KeySpaces, TtlCache, TtlCacheStats};
