//! Territory-mutating requests.
//!
//! A [`Mutation`] is what a caller asks the lookup facade to commit. It is
//! shown to the hook pipeline first (under the hook name returned by
//! [`MutationKind::hook_name`]) and only reaches the authoritative store if
//! every handler allows it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cell::CellId;
use crate::hook_names;
use crate::ids::{ActorId, TerritoryId};

/// Discriminant of a [`Mutation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Claim cells for a territory.
    Claim,
    /// Release cells owned by a territory.
    Unclaim,
    /// Found a new territory.
    Create,
    /// Dissolve a territory and release all of its cells.
    Disband,
    /// Add an actor to a territory.
    Join,
    /// Remove an actor from a territory.
    Leave,
    /// Change a territory's balance.
    AdjustBalance,
}

impl MutationKind {
    /// The hook name gating this kind of mutation.
    pub const fn hook_name(self) -> &'static str {
        match self {
            Self::Claim => hook_names::TERRITORY_CLAIM,
            Self::Unclaim => hook_names::TERRITORY_UNCLAIM,
            Self::Create => hook_names::ENTITY_CREATE,
            Self::Disband => hook_names::ENTITY_DISBAND,
            Self::Join => hook_names::MEMBERSHIP_JOIN,
            Self::Leave => hook_names::MEMBERSHIP_LEAVE,
            Self::AdjustBalance => hook_names::ENTITY_BALANCE,
        }
    }
}

/// A request to change authoritative territory state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    /// Claim `cells` for `territory` on behalf of `actor`.
    Claim {
        /// Claiming territory.
        territory: TerritoryId,
        /// Acting member.
        actor: ActorId,
        /// Cells to claim.
        cells: Vec<CellId>,
    },
    /// Release `cells` held by `territory`.
    Unclaim {
        /// Owning territory.
        territory: TerritoryId,
        /// Acting member.
        actor: ActorId,
        /// Cells to release.
        cells: Vec<CellId>,
    },
    /// Found a territory named `name` led by `leader`.
    Create {
        /// Identifier for the new territory.
        territory: TerritoryId,
        /// Unique display name.
        name: String,
        /// Founding leader.
        leader: ActorId,
    },
    /// Dissolve `territory`.
    Disband {
        /// Territory to dissolve.
        territory: TerritoryId,
        /// Acting member.
        actor: ActorId,
    },
    /// Add `actor` to `territory`.
    Join {
        /// Territory being joined.
        territory: TerritoryId,
        /// Joining actor.
        actor: ActorId,
    },
    /// Remove `actor` from `territory`.
    Leave {
        /// Territory being left.
        territory: TerritoryId,
        /// Leaving actor.
        actor: ActorId,
    },
    /// Add `delta` (possibly negative) to the balance of `territory`.
    AdjustBalance {
        /// Territory whose balance changes.
        territory: TerritoryId,
        /// Signed amount to add.
        delta: Decimal,
    },
}

impl Mutation {
    /// The discriminant of this mutation.
    pub const fn kind(&self) -> MutationKind {
        match self {
            Self::Claim { .. } => MutationKind::Claim,
            Self::Unclaim { .. } => MutationKind::Unclaim,
            Self::Create { .. } => MutationKind::Create,
            Self::Disband { .. } => MutationKind::Disband,
            Self::Join { .. } => MutationKind::Join,
            Self::Leave { .. } => MutationKind::Leave,
            Self::AdjustBalance { .. } => MutationKind::AdjustBalance,
        }
    }

    /// The territory this mutation targets.
    pub const fn territory(&self) -> TerritoryId {
        match self {
            Self::Claim { territory, .. }
            | Self::Unclaim { territory, .. }
            | Self::Create { territory, .. }
            | Self::Disband { territory, .. }
            | Self::Join { territory, .. }
            | Self::Leave { territory, .. }
            | Self::AdjustBalance { territory, .. } => *territory,
        }
    }

    /// The actor performing the mutation, when there is one.
    pub const fn actor(&self) -> Option<ActorId> {
        match self {
            Self::Claim { actor, .. }
            | Self::Unclaim { actor, .. }
            | Self::Disband { actor, .. }
            | Self::Join { actor, .. }
            | Self::Leave { actor, .. } => Some(*actor),
            Self::Create { leader, .. } => Some(*leader),
            Self::AdjustBalance { .. } => None,
        }
    }

    /// The cells named directly by the mutation (empty for non-cell kinds).
    pub fn cells(&self) -> &[CellId] {
        match self {
            Self::Claim { cells, .. } | Self::Unclaim { cells, .. } => cells,
            _ => &[],
        }
    }
}
