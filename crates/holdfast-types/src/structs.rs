//! Core records exchanged with the authoritative store.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cell::CellId;
use crate::ids::{ActorId, TerritoryId};

/// The authoritative state of one territory.
///
/// Cached by name in the entity key space of the TTL cache. Cell ownership
/// is not part of the record; it lives in the territory cache keyed by cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerritoryRecord {
    /// Unique identifier.
    pub id: TerritoryId,
    /// Unique display name (the entity key space is keyed by this name).
    pub name: String,
    /// Actor that created and leads the territory.
    pub leader: ActorId,
    /// Current members, leader included.
    pub members: BTreeSet<ActorId>,
    /// Treasury balance.
    pub balance: Decimal,
    /// Progression level.
    pub level: u32,
    /// Number of cells currently claimed.
    pub claimed_cells: u64,
    /// When the territory was created.
    pub created_at: DateTime<Utc>,
}

impl TerritoryRecord {
    /// Create a fresh level-1 territory whose only member is its leader.
    pub fn founded(id: TerritoryId, name: impl Into<String>, leader: ActorId) -> Self {
        let mut members = BTreeSet::new();
        members.insert(leader);
        Self {
            id,
            name: name.into(),
            leader,
            members,
            balance: Decimal::ZERO,
            level: 1,
            claimed_cells: 0,
            created_at: Utc::now(),
        }
    }

    /// Whether the actor is a member of this territory.
    pub fn is_member(&self, actor: ActorId) -> bool {
        self.members.contains(&actor)
    }
}

/// Everything a committed mutation touched.
///
/// Returned by the authoritative store so the lookup facade can invalidate
/// exactly the cache entries that became stale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEffect {
    /// Cells whose owner changed.
    pub cells: Vec<CellId>,
    /// Entity names whose cached record is stale.
    pub entity_names: Vec<String>,
    /// Actors whose cached membership is stale.
    pub actors: Vec<ActorId>,
    /// Territories whose cached balance is stale.
    pub territories: Vec<TerritoryId>,
}

impl MutationEffect {
    /// Whether the mutation touched nothing that could be cached.
    pub const fn is_empty(&self) -> bool {
        self.cells.is_empty()
            && self.entity_names.is_empty()
            && self.actors.is_empty()
            && self.territories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn founded_territory_has_leader_as_member() {
        let leader = ActorId::new();
        let record = TerritoryRecord::founded(TerritoryId::new(), "Keep", leader);
        assert!(record.is_member(leader));
        assert_eq!(record.members.len(), 1);
        assert_eq!(record.level, 1);
        assert_eq!(record.balance, Decimal::ZERO);
    }

    #[test]
    fn default_effect_is_empty() {
        assert!(MutationEffect::default().is_empty());
        let effect = MutationEffect {
            cells: vec![CellId::new("w", 0, 0)],
            ..MutationEffect::default()
        };
        assert!(!effect.is_empty());
    }
}
