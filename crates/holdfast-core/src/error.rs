//! Error types for the lookup facade, the store boundary and the save queue.
//!
//! Policy denial is not an error. It is reported as
//! [`MutationOutcome::Denied`](crate::MutationOutcome::Denied).

use holdfast_types::{ActorId, CellId, TerritoryId};

/// Failures reported by a [`TerritoryStore`](crate::TerritoryStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The territory does not exist.
    #[error("territory not found: {0}")]
    TerritoryNotFound(TerritoryId),

    /// A territory with this identifier already exists.
    #[error("duplicate territory id: {0}")]
    DuplicateTerritory(TerritoryId),

    /// A territory with this name already exists.
    #[error("territory name already taken: {0}")]
    DuplicateName(String),

    /// The cell is already owned by another territory.
    #[error("cell {cell} is already claimed by {owner}")]
    CellAlreadyClaimed {
        /// The contested cell.
        cell: CellId,
        /// Its current owner.
        owner: TerritoryId,
    },

    /// The cell is not owned by the territory trying to release it.
    #[error("cell {cell} is not owned by {territory}")]
    CellNotOwned {
        /// The cell.
        cell: CellId,
        /// The territory that tried to release it.
        territory: TerritoryId,
    },

    /// The actor is not a member of the territory.
    #[error("actor {actor} is not a member of {territory}")]
    NotAMember {
        /// The actor.
        actor: ActorId,
        /// The territory.
        territory: TerritoryId,
    },

    /// The actor already belongs to a territory.
    #[error("actor {actor} already belongs to {territory}")]
    AlreadyMember {
        /// The actor.
        actor: ActorId,
        /// The territory they belong to.
        territory: TerritoryId,
    },

    /// The action needs the leader (disband), or is barred to the leader (leave).
    #[error("leadership rule refused actor {actor} on {territory}")]
    LeaderOnly {
        /// The actor.
        actor: ActorId,
        /// The territory.
        territory: TerritoryId,
    },

    /// The balance change would overdraw or overflow the territory balance.
    #[error("balance change rejected for {0}")]
    InvalidBalance(TerritoryId),

    /// The store could not be reached or failed internally.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of one deferred save action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaveError {
    /// The persistence call reported a store failure.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// The action failed for another reason.
    #[error("save failed: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },

    /// The action panicked.
    #[error("save action panicked: {message}")]
    Panicked {
        /// The panic message.
        message: String,
    },
}

/// Errors returned by the lookup facade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// The authoritative store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },
}
