//! Boundary to the authoritative territory store.
//!
//! The facade only ever talks to the store through [`TerritoryStore`]. The
//! store owns the truth: it validates and commits mutations and reports what
//! changed as a [`MutationEffect`] so cached copies can be dropped precisely.
//! How and where it persists is its own business; the facade only asks it to
//! [`persist`](TerritoryStore::persist) a territory from a deferred save.
//!
//! [`MemoryStore`] is the in-process reference implementation used by the
//! engine binary and the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use holdfast_types::{ActorId, CellId, Mutation, MutationEffect, TerritoryId, TerritoryRecord};
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::StoreError;

/// Authoritative source of territory state.
///
/// Calls are synchronous and may take bounded but non-zero time. The facade
/// never holds one of its own locks across a call into the store.
pub trait TerritoryStore: Send + Sync {
    /// Owner of `cell`, or `None` if unclaimed.
    fn read_owner(&self, cell: &CellId) -> Result<Option<TerritoryId>, StoreError>;

    /// Owners of several cells, in the order given.
    fn read_owners(
        &self,
        cells: &[CellId],
    ) -> Result<Vec<(CellId, Option<TerritoryId>)>, StoreError> {
        cells
            .iter()
            .map(|cell| Ok((cell.clone(), self.read_owner(cell)?)))
            .collect()
    }

    /// Territory record by display name.
    fn read_entity(&self, name: &str) -> Result<Option<TerritoryRecord>, StoreError>;

    /// Territory record by identifier.
    fn read_territory(&self, id: TerritoryId) -> Result<Option<TerritoryRecord>, StoreError>;

    /// Territory the actor belongs to.
    fn read_membership(&self, actor: ActorId) -> Result<Option<TerritoryId>, StoreError>;

    /// Treasury balance of a territory.
    fn read_balance(&self, id: TerritoryId) -> Result<Option<Decimal>, StoreError>;

    /// Validate and commit a mutation, reporting everything it touched.
    fn apply(&self, mutation: &Mutation) -> Result<MutationEffect, StoreError>;

    /// Make the current state of a territory durable. Called from the
    /// deferred save queue, never inline with a mutation.
    fn persist(&self, id: TerritoryId) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoreState {
    territories: HashMap<TerritoryId, TerritoryRecord>,
    names: HashMap<String, TerritoryId>,
    owners: HashMap<CellId, TerritoryId>,
    memberships: HashMap<ActorId, TerritoryId>,
}

impl StoreState {
    fn territory(&self, id: TerritoryId) -> Result<&TerritoryRecord, StoreError> {
        self.territories
            .get(&id)
            .ok_or(StoreError::TerritoryNotFound(id))
    }

    fn territory_mut(&mut self, id: TerritoryId) -> Result<&mut TerritoryRecord, StoreError> {
        self.territories
            .get_mut(&id)
            .ok_or(StoreError::TerritoryNotFound(id))
    }

    fn require_member(&self, id: TerritoryId, actor: ActorId) -> Result<(), StoreError> {
        if self.territory(id)?.is_member(actor) {
            Ok(())
        } else {
            Err(StoreError::NotAMember {
                actor,
                territory: id,
            })
        }
    }

    fn claim(
        &mut self,
        id: TerritoryId,
        actor: ActorId,
        cells: &[CellId],
    ) -> Result<MutationEffect, StoreError> {
        self.require_member(id, actor)?;
        // Validate every cell before touching any.
        let mut fresh: Vec<CellId> = Vec::with_capacity(cells.len());
        for cell in cells {
            match self.owners.get(cell) {
                Some(owner) if *owner == id => {}
                Some(owner) => {
                    return Err(StoreError::CellAlreadyClaimed {
                        cell: cell.clone(),
                        owner: *owner,
                    });
                }
                None if fresh.contains(cell) => {}
                None => fresh.push(cell.clone()),
            }
        }
        for cell in &fresh {
            self.owners.insert(cell.clone(), id);
        }
        let record = self.territory_mut(id)?;
        record.claimed_cells = record.claimed_cells.saturating_add(count(fresh.len()));
        Ok(MutationEffect {
            entity_names: vec![record.name.clone()],
            cells: fresh,
            ..MutationEffect::default()
        })
    }

    fn unclaim(
        &mut self,
        id: TerritoryId,
        actor: ActorId,
        cells: &[CellId],
    ) -> Result<MutationEffect, StoreError> {
        self.require_member(id, actor)?;
        let mut released: Vec<CellId> = Vec::with_capacity(cells.len());
        for cell in cells {
            if released.contains(cell) {
                continue;
            }
            if self.owners.get(cell) != Some(&id) {
                return Err(StoreError::CellNotOwned {
                    cell: cell.clone(),
                    territory: id,
                });
            }
            released.push(cell.clone());
        }
        for cell in &released {
            self.owners.remove(cell);
        }
        let record = self.territory_mut(id)?;
        record.claimed_cells = record.claimed_cells.saturating_sub(count(released.len()));
        Ok(MutationEffect {
            entity_names: vec![record.name.clone()],
            cells: released,
            ..MutationEffect::default()
        })
    }

    fn create(
        &mut self,
        id: TerritoryId,
        name: &str,
        leader: ActorId,
    ) -> Result<MutationEffect, StoreError> {
        if self.territories.contains_key(&id) {
            return Err(StoreError::DuplicateTerritory(id));
        }
        if self.names.contains_key(name) {
            return Err(StoreError::DuplicateName(name.to_owned()));
        }
        if let Some(existing) = self.memberships.get(&leader) {
            return Err(StoreError::AlreadyMember {
                actor: leader,
                territory: *existing,
            });
        }
        self.territories
            .insert(id, TerritoryRecord::founded(id, name, leader));
        self.names.insert(name.to_owned(), id);
        self.memberships.insert(leader, id);
        Ok(MutationEffect {
            entity_names: vec![name.to_owned()],
            actors: vec![leader],
            territories: vec![id],
            ..MutationEffect::default()
        })
    }

    fn disband(&mut self, id: TerritoryId, actor: ActorId) -> Result<MutationEffect, StoreError> {
        if self.territory(id)?.leader != actor {
            return Err(StoreError::LeaderOnly {
                actor,
                territory: id,
            });
        }
        let record = self
            .territories
            .remove(&id)
            .ok_or(StoreError::TerritoryNotFound(id))?;
        self.names.remove(&record.name);
        for member in &record.members {
            self.memberships.remove(member);
        }
        let mut cells: Vec<CellId> = self
            .owners
            .iter()
            .filter(|(_, owner)| **owner == id)
            .map(|(cell, _)| cell.clone())
            .collect();
        cells.sort();
        for cell in &cells {
            self.owners.remove(cell);
        }
        Ok(MutationEffect {
            cells,
            entity_names: vec![record.name],
            actors: record.members.into_iter().collect(),
            territories: vec![id],
        })
    }

    fn join(&mut self, id: TerritoryId, actor: ActorId) -> Result<MutationEffect, StoreError> {
        self.territory(id)?;
        if let Some(existing) = self.memberships.get(&actor) {
            return Err(StoreError::AlreadyMember {
                actor,
                territory: *existing,
            });
        }
        let record = self.territory_mut(id)?;
        record.members.insert(actor);
        let name = record.name.clone();
        self.memberships.insert(actor, id);
        Ok(MutationEffect {
            entity_names: vec![name],
            actors: vec![actor],
            ..MutationEffect::default()
        })
    }

    fn leave(&mut self, id: TerritoryId, actor: ActorId) -> Result<MutationEffect, StoreError> {
        self.require_member(id, actor)?;
        let record = self.territory_mut(id)?;
        if record.leader == actor {
            return Err(StoreError::LeaderOnly {
                actor,
                territory: id,
            });
        }
        record.members.remove(&actor);
        let name = record.name.clone();
        self.memberships.remove(&actor);
        Ok(MutationEffect {
            entity_names: vec![name],
            actors: vec![actor],
            ..MutationEffect::default()
        })
    }

    fn adjust_balance(
        &mut self,
        id: TerritoryId,
        delta: Decimal,
    ) -> Result<MutationEffect, StoreError> {
        let record = self.territory_mut(id)?;
        let balance = record
            .balance
            .checked_add(delta)
            .filter(|b| !b.is_sign_negative() || b.is_zero())
            .ok_or(StoreError::InvalidBalance(id))?;
        record.balance = balance;
        Ok(MutationEffect {
            entity_names: vec![record.name.clone()],
            territories: vec![id],
            ..MutationEffect::default()
        })
    }
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Thread-safe in-memory [`TerritoryStore`].
///
/// Counts reads per kind so callers can observe cache effectiveness, and
/// records every [`persist`](TerritoryStore::persist) call in order.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    available: AtomicBool,
    owner_reads: AtomicU64,
    entity_reads: AtomicU64,
    membership_reads: AtomicU64,
    balance_reads: AtomicU64,
    mutations: AtomicU64,
    persisted: Mutex<Vec<TerritoryId>>,
}

impl MemoryStore {
    /// Create an empty, reachable store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            available: AtomicBool::new(true),
            owner_reads: AtomicU64::new(0),
            entity_reads: AtomicU64::new(0),
            membership_reads: AtomicU64::new(0),
            balance_reads: AtomicU64::new(0),
            mutations: AtomicU64::new(0),
            persisted: Mutex::new(Vec::new()),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Owner lookups served (single and batched cells).
    pub fn owner_reads(&self) -> u64 {
        self.owner_reads.load(Ordering::Relaxed)
    }

    /// Entity lookups served (by name and by id).
    pub fn entity_reads(&self) -> u64 {
        self.entity_reads.load(Ordering::Relaxed)
    }

    /// Membership lookups served.
    pub fn membership_reads(&self) -> u64 {
        self.membership_reads.load(Ordering::Relaxed)
    }

    /// Balance lookups served.
    pub fn balance_reads(&self) -> u64 {
        self.balance_reads.load(Ordering::Relaxed)
    }

    /// Mutations committed.
    pub fn mutations(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    /// Territories persisted so far, in call order.
    pub fn persisted(&self) -> Vec<TerritoryId> {
        self.persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of territories that currently exist.
    pub fn territory_count(&self) -> usize {
        self.read_state().territories.len()
    }

    /// Number of cells that currently have an owner.
    pub fn claimed_cell_count(&self) -> usize {
        self.read_state().owners.len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_owned()))
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TerritoryStore for MemoryStore {
    fn read_owner(&self, cell: &CellId) -> Result<Option<TerritoryId>, StoreError> {
        self.check_available()?;
        self.owner_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.read_state().owners.get(cell).copied())
    }

    fn read_owners(
        &self,
        cells: &[CellId],
    ) -> Result<Vec<(CellId, Option<TerritoryId>)>, StoreError> {
        self.check_available()?;
        self.owner_reads
            .fetch_add(count(cells.len()), Ordering::Relaxed);
        let state = self.read_state();
        Ok(cells
            .iter()
            .map(|cell| (cell.clone(), state.owners.get(cell).copied()))
            .collect())
    }

    fn read_entity(&self, name: &str) -> Result<Option<TerritoryRecord>, StoreError> {
        self.check_available()?;
        self.entity_reads.fetch_add(1, Ordering::Relaxed);
        let state = self.read_state();
        Ok(state
            .names
            .get(name)
            .and_then(|id| state.territories.get(id))
            .cloned())
    }

    fn read_territory(&self, id: TerritoryId) -> Result<Option<TerritoryRecord>, StoreError> {
        self.check_available()?;
        self.entity_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.read_state().territories.get(&id).cloned())
    }

    fn read_membership(&self, actor: ActorId) -> Result<Option<TerritoryId>, StoreError> {
        self.check_available()?;
        self.membership_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.read_state().memberships.get(&actor).copied())
    }

    fn read_balance(&self, id: TerritoryId) -> Result<Option<Decimal>, StoreError> {
        self.check_available()?;
        self.balance_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.read_state().territories.get(&id).map(|r| r.balance))
    }

    fn apply(&self, mutation: &Mutation) -> Result<MutationEffect, StoreError> {
        self.check_available()?;
        let effect = {
            let mut state = self.write_state();
            match mutation {
                Mutation::Claim {
                    territory,
                    actor,
                    cells,
                } => state.claim(*territory, *actor, cells),
                Mutation::Unclaim {
                    territory,
                    actor,
                    cells,
                } => state.unclaim(*territory, *actor, cells),
                Mutation::Create {
                    territory,
                    name,
                    leader,
                } => state.create(*territory, name, *leader),
                Mutation::Disband { territory, actor } => state.disband(*territory, *actor),
                Mutation::Join { territory, actor } => state.join(*territory, *actor),
                Mutation::Leave { territory, actor } => state.leave(*territory, *actor),
                Mutation::AdjustBalance { territory, delta } => {
                    state.adjust_balance(*territory, *delta)
                }
            }
        }?;
        self.mutations.fetch_add(1, Ordering::Relaxed);
        debug!(
            kind = ?mutation.kind(),
            territory = %mutation.territory(),
            cells = effect.cells.len(),
            "mutation committed"
        );
        Ok(effect)
    }

    fn persist(&self, id: TerritoryId) -> Result<(), StoreError> {
        self.check_available()?;
        self.persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn founded(store: &MemoryStore, name: &str) -> (TerritoryId, ActorId) {
        let territory = TerritoryId::new();
        let leader = ActorId::new();
        store
            .apply(&Mutation::Create {
                territory,
                name: name.to_owned(),
                leader,
            })
            .unwrap();
        (territory, leader)
    }

    fn claim(territory: TerritoryId, actor: ActorId, cells: &[CellId]) -> Mutation {
        Mutation::Claim {
            territory,
            actor,
            cells: cells.to_vec(),
        }
    }

    #[test]
    fn create_registers_name_and_leader() {
        let store = MemoryStore::new();
        let (territory, leader) = founded(&store, "Ashford");

        let record = store.read_entity("Ashford").unwrap().unwrap();
        assert_eq!(record.id, territory);
        assert_eq!(store.read_membership(leader).unwrap(), Some(territory));
        assert_eq!(store.read_balance(territory).unwrap(), Some(Decimal::ZERO));
        assert_eq!(store.territory_count(), 1);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let store = MemoryStore::new();
        founded(&store, "Ashford");
        let result = store.apply(&Mutation::Create {
            territory: TerritoryId::new(),
            name: "Ashford".to_owned(),
            leader: ActorId::new(),
        });
        assert_eq!(result, Err(StoreError::DuplicateName("Ashford".to_owned())));
    }

    #[test]
    fn claim_and_unclaim_cells() {
        let store = MemoryStore::new();
        let (territory, leader) = founded(&store, "Ashford");
        let cell = CellId::new("w", 10, -3);

        let effect = store
            .apply(&claim(territory, leader, &[cell.clone()]))
            .unwrap();
        assert_eq!(effect.cells, vec![cell.clone()]);
        assert_eq!(effect.entity_names, vec!["Ashford".to_owned()]);
        assert_eq!(store.read_owner(&cell).unwrap(), Some(territory));
        assert_eq!(store.read_territory(territory).unwrap().unwrap().claimed_cells, 1);

        store
            .apply(&Mutation::Unclaim {
                territory,
                actor: leader,
                cells: vec![cell.clone()],
            })
            .unwrap();
        assert_eq!(store.read_owner(&cell).unwrap(), None);
        assert_eq!(store.claimed_cell_count(), 0);
    }

    #[test]
    fn claim_is_all_or_nothing() {
        let store = MemoryStore::new();
        let (first, first_leader) = founded(&store, "Ashford");
        let (second, second_leader) = founded(&store, "Brindle");
        let contested = CellId::new("w", 0, 0);
        let free = CellId::new("w", 1, 0);
        store
            .apply(&claim(first, first_leader, &[contested.clone()]))
            .unwrap();

        let result = store.apply(&claim(second, second_leader, &[free.clone(), contested.clone()]));
        assert_eq!(
            result,
            Err(StoreError::CellAlreadyClaimed {
                cell: contested,
                owner: first,
            })
        );
        assert_eq!(store.read_owner(&free).unwrap(), None);
    }

    #[test]
    fn reclaiming_own_cell_is_not_a_change() {
        let store = MemoryStore::new();
        let (territory, leader) = founded(&store, "Ashford");
        let cell = CellId::new("w", 2, 2);
        store.apply(&claim(territory, leader, &[cell.clone()])).unwrap();
        let effect = store.apply(&claim(territory, leader, &[cell])).unwrap();
        assert!(effect.cells.is_empty());
    }

    #[test]
    fn non_member_cannot_claim() {
        let store = MemoryStore::new();
        let (territory, _) = founded(&store, "Ashford");
        let stranger = ActorId::new();
        let result = store.apply(&claim(territory, stranger, &[CellId::new("w", 0, 0)]));
        assert!(matches!(result, Err(StoreError::NotAMember { .. })));
    }

    #[test]
    fn unclaim_of_foreign_cell_fails() {
        let store = MemoryStore::new();
        let (territory, leader) = founded(&store, "Ashford");
        let result = store.apply(&Mutation::Unclaim {
            territory,
            actor: leader,
            cells: vec![CellId::new("w", 5, 5)],
        });
        assert!(matches!(result, Err(StoreError::CellNotOwned { .. })));
    }

    #[test]
    fn membership_rules() {
        let store = MemoryStore::new();
        let (territory, leader) = founded(&store, "Ashford");
        let recruit = ActorId::new();

        store.apply(&Mutation::Join { territory, actor: recruit }).unwrap();
        assert_eq!(store.read_membership(recruit).unwrap(), Some(territory));
        assert!(matches!(
            store.apply(&Mutation::Join { territory, actor: recruit }),
            Err(StoreError::AlreadyMember { .. })
        ));
        assert!(matches!(
            store.apply(&Mutation::Leave { territory, actor: leader }),
            Err(StoreError::LeaderOnly { .. })
        ));

        store.apply(&Mutation::Leave { territory, actor: recruit }).unwrap();
        assert_eq!(store.read_membership(recruit).unwrap(), None);
        assert!(matches!(
            store.apply(&Mutation::Leave { territory, actor: recruit }),
            Err(StoreError::NotAMember { .. })
        ));
    }

    #[test]
    fn disband_releases_everything() {
        let store = MemoryStore::new();
        let (territory, leader) = founded(&store, "Ashford");
        let recruit = ActorId::new();
        store.apply(&Mutation::Join { territory, actor: recruit }).unwrap();
        let cells = [CellId::new("w", 0, 0), CellId::new("w", 0, 1)];
        store.apply(&claim(territory, leader, &cells)).unwrap();

        assert!(matches!(
            store.apply(&Mutation::Disband { territory, actor: recruit }),
            Err(StoreError::LeaderOnly { .. })
        ));

        let effect = store
            .apply(&Mutation::Disband { territory, actor: leader })
            .unwrap();
        assert_eq!(effect.cells.len(), 2);
        assert_eq!(effect.actors.len(), 2);
        assert_eq!(effect.territories, vec![territory]);
        assert_eq!(store.read_entity("Ashford").unwrap(), None);
        assert_eq!(store.read_membership(recruit).unwrap(), None);
        assert_eq!(store.claimed_cell_count(), 0);
    }

    #[test]
    fn balance_cannot_go_negative() {
        let store = MemoryStore::new();
        let (territory, _) = founded(&store, "Ashford");
        store
            .apply(&Mutation::AdjustBalance {
                territory,
                delta: Decimal::new(1050, 2),
            })
            .unwrap();
        assert_eq!(
            store.read_balance(territory).unwrap(),
            Some(Decimal::new(1050, 2))
        );

        let result = store.apply(&Mutation::AdjustBalance {
            territory,
            delta: Decimal::new(-2000, 2),
        });
        assert_eq!(result, Err(StoreError::InvalidBalance(territory)));
        assert_eq!(
            store.read_balance(territory).unwrap(),
            Some(Decimal::new(1050, 2))
        );
    }

    #[test]
    fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.read_owner(&CellId::new("w", 0, 0)),
            Err(StoreError::Unavailable(_))
        ));
        store.set_available(true);
        assert_eq!(store.read_owner(&CellId::new("w", 0, 0)).unwrap(), None);
    }

    #[test]
    fn counters_track_reads_and_persists() {
        let store = MemoryStore::new();
        let (territory, _) = founded(&store, "Ashford");
        store.read_owner(&CellId::new("w", 0, 0)).unwrap();
        store
            .read_owners(&[CellId::new("w", 0, 1), CellId::new("w", 0, 2)])
            .unwrap();
        store.persist(territory).unwrap();
        assert_eq!(store.owner_reads(), 3);
        assert_eq!(store.mutations(), 1);
        assert_eq!(store.persisted(), vec![territory]);
    }
}
