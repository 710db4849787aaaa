//! Shared type definitions for the Holdfast territory lookup layer.
//!
//! Every crate in the workspace speaks in these types: the spatial
//! [`CellId`], the typed identifiers, the [`TerritoryRecord`] held by the
//! authoritative store, and the [`Mutation`] requests that flow through the
//! hook pipeline before they reach it.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for territories, actors and observers
//! - [`cell`] -- [`CellId`], the fixed-size spatial partition key
//! - [`structs`] -- [`TerritoryRecord`] and [`MutationEffect`]
//! - [`mutation`] -- [`Mutation`] requests and their [`MutationKind`]
//! - [`hook_names`] -- Well-known hook names and their required context keys

pub mod cell;
pub mod hook_names;
pub mod ids;
pub mod mutation;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use cell::{CELL_SHIFT, CellId};
pub use ids::{ActorId, ObserverId, TerritoryId};
pub use mutation::{Mutation, MutationKind};
pub use structs::{MutationEffect, TerritoryRecord};
