//! Recency-bounded cell-to-owner cache.
//!
//! [`TerritoryCache`] answers "who owns this cell?" without touching the
//! authoritative store. It holds at most `capacity` cells; inserting past
//! that evicts the cell that was least recently read or written. Entries
//! never expire by age. Ownership only goes stale through a mutation, and
//! every mutation path invalidates the affected cells synchronously.
//!
//! The cache caches negative answers too: a cell known to be unclaimed is
//! stored as [`OwnerLookup::Unclaimed`] so empty wilderness does not hit the
//! store on every movement.
//!
//! # Layout
//!
//! Entries live in an arena of slots. A hash index maps each cell to its
//! slot, and the slots form an intrusive doubly-linked list ordered from
//! most to least recently used. Touch, insert, and evict are all O(1).
//! Freed slots are recycled through a free list.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use holdfast_types::{CellId, TerritoryId};
use serde::Serialize;

/// Result of a [`TerritoryCache::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerLookup {
    /// The cell is cached and owned by this territory.
    Owned(TerritoryId),
    /// The cell is cached and known to be unclaimed.
    Unclaimed,
    /// The cell is not cached; consult the authoritative store.
    Unknown,
}

impl OwnerLookup {
    /// Build a cached answer from an optional owner.
    pub const fn from_owner(owner: Option<TerritoryId>) -> Self {
        match owner {
            Some(id) => Self::Owned(id),
            None => Self::Unclaimed,
        }
    }

    /// The owner, if the answer is known. `None` for both unclaimed and unknown.
    pub const fn owner(self) -> Option<TerritoryId> {
        match self {
            Self::Owned(id) => Some(id),
            Self::Unclaimed | Self::Unknown => None,
        }
    }

    /// Whether the cache had an answer.
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Counters describing a [`TerritoryCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TerritoryCacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that returned [`OwnerLookup::Unknown`].
    pub misses: u64,
    /// Entries dropped to stay within capacity.
    pub evictions: u64,
    /// Entries currently held.
    pub size: usize,
    /// Maximum entries held.
    pub capacity: usize,
}

#[derive(Debug)]
struct Slot {
    cell: CellId,
    owner: Option<TerritoryId>,
    /// Neighbor toward the most recently used end.
    prev: Option<usize>,
    /// Neighbor toward the least recently used end.
    next: Option<usize>,
}

/// The unsynchronized arena. Always accessed under the cache mutex.
#[derive(Debug)]
struct Arena {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: HashMap<CellId, usize>,
    /// Most recently used slot.
    head: Option<usize>,
    /// Least recently used slot.
    tail: Option<usize>,
    capacity: usize,
    /// Bumped by every invalidation, present or not.
    generation: u64,
}

impl Arena {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity.min(4096)),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity.min(4096)),
            head: None,
            tail: None,
            capacity,
            generation: 0,
        }
    }

    fn slot(&self, idx: usize) -> Option<&Slot> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, idx: usize) -> Option<&mut Slot> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    /// Unlink a slot from the recency list, leaving it in the arena.
    fn detach(&mut self, idx: usize) {
        let Some((prev, next)) = self.slot(idx).map(|s| (s.prev, s.next)) else {
            return;
        };
        match prev {
            Some(p) => {
                if let Some(slot) = self.slot_mut(p) {
                    slot.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(slot) = self.slot_mut(n) {
                    slot.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(slot) = self.slot_mut(idx) {
            slot.prev = None;
            slot.next = None;
        }
    }

    /// Link a detached slot in as the most recently used.
    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slot_mut(idx) {
            slot.prev = None;
            slot.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(slot) = self.slot_mut(h) {
                    slot.prev = Some(idx);
                }
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn touch(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.detach(idx);
            self.attach_front(idx);
        }
    }

    fn get(&mut self, cell: &CellId) -> Option<Option<TerritoryId>> {
        let idx = *self.index.get(cell)?;
        self.touch(idx);
        self.slot(idx).map(|slot| slot.owner)
    }

    /// Insert or refresh. Returns the evicted cell, if capacity forced one out.
    fn put(&mut self, cell: CellId, owner: Option<TerritoryId>) -> Option<CellId> {
        let existing = self.index.get(&cell).copied();
        if let Some(idx) = existing {
            if let Some(slot) = self.slot_mut(idx) {
                slot.owner = owner;
            }
            self.touch(idx);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.tail.and_then(|lru| self.release(lru))
        } else {
            None
        };

        let slot = Slot {
            cell: cell.clone(),
            owner,
            prev: None,
            next: None,
        };
        let idx = if let Some(idx) = self.free.pop() {
            if let Some(place) = self.slots.get_mut(idx) {
                *place = Some(slot);
            }
            idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len().saturating_sub(1)
        };
        self.index.insert(cell, idx);
        self.attach_front(idx);
        evicted
    }

    /// Drop a slot entirely and return its cell.
    fn release(&mut self, idx: usize) -> Option<CellId> {
        self.detach(idx);
        let slot = self.slots.get_mut(idx).and_then(Option::take)?;
        self.index.remove(&slot.cell);
        self.free.push(idx);
        Some(slot.cell)
    }

    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    fn remove(&mut self, cell: &CellId) -> bool {
        self.bump();
        let Some(idx) = self.index.get(cell).copied() else {
            return false;
        };
        self.release(idx).is_some()
    }

    fn remove_world(&mut self, world: &str) -> usize {
        self.bump();
        let doomed: Vec<usize> = self
            .index
            .iter()
            .filter(|(cell, _)| cell.in_world(world))
            .map(|(_, &idx)| idx)
            .collect();
        doomed
            .into_iter()
            .filter_map(|idx| self.release(idx))
            .count()
    }

    fn clear(&mut self) {
        self.bump();
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }
}

/// Bounded, access-ordered cache from [`CellId`] to owning territory.
///
/// Safe to share between threads. Every operation takes one short internal
/// lock; no lock is held once a method returns.
pub struct TerritoryCache {
    arena: Mutex<Arena>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TerritoryCache {
    /// Create an empty cache holding at most `capacity` cells.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            arena: Mutex::new(Arena::new(capacity)),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up the cached owner of `cell`, marking it most recently used.
    pub fn get(&self, cell: &CellId) -> OwnerLookup {
        let cached = self.lock().get(cell);
        if let Some(owner) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            OwnerLookup::from_owner(owner)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            OwnerLookup::Unknown
        }
    }

    /// Whether `cell` is cached. Does not affect recency.
    pub fn contains(&self, cell: &CellId) -> bool {
        self.lock().index.contains_key(cell)
    }

    /// Cache the owner of `cell` (`None` for unclaimed), marking it most
    /// recently used. Returns the cell evicted to make room, if any.
    pub fn put(&self, cell: CellId, owner: Option<TerritoryId>) -> Option<CellId> {
        let evicted = self.lock().put(cell, owner);
        if let Some(ref gone) = evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(cell = %gone, "territory cache evicted least recently used cell");
        }
        evicted
    }

    /// Cache a batch of owners under one lock acquisition.
    ///
    /// Later entries in the batch are more recently used than earlier ones.
    /// Returns how many cells were evicted.
    pub fn put_many<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (CellId, Option<TerritoryId>)>,
    {
        let evicted = {
            let mut arena = self.lock();
            entries
                .into_iter()
                .filter_map(|(cell, owner)| arena.put(cell, owner))
                .count()
        };
        self.evictions
            .fetch_add(u64::try_from(evicted).unwrap_or(u64::MAX), Ordering::Relaxed);
        evicted
    }

    /// Invalidation generation. Read it before querying the store and pass it
    /// to [`put_if_current`](Self::put_if_current) when caching the answer.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Cache the owner of `cell` only if no invalidation happened since
    /// `generation` was read.
    ///
    /// This keeps a store answer fetched before a concurrent mutation from
    /// being cached after that mutation invalidated the cell. Returns whether
    /// the entry was stored.
    pub fn put_if_current(&self, cell: CellId, owner: Option<TerritoryId>, generation: u64) -> bool {
        let evicted = {
            let mut arena = self.lock();
            if arena.generation != generation {
                return false;
            }
            arena.put(cell, owner)
        };
        if evicted.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Batch form of [`put_if_current`](Self::put_if_current). Stores nothing
    /// and returns `None` if the generation moved; otherwise returns how many
    /// cells were evicted.
    pub fn put_many_if_current<I>(&self, entries: I, generation: u64) -> Option<usize>
    where
        I: IntoIterator<Item = (CellId, Option<TerritoryId>)>,
    {
        let evicted = {
            let mut arena = self.lock();
            if arena.generation != generation {
                return None;
            }
            entries
                .into_iter()
                .filter_map(|(cell, owner)| arena.put(cell, owner))
                .count()
        };
        self.evictions
            .fetch_add(u64::try_from(evicted).unwrap_or(u64::MAX), Ordering::Relaxed);
        Some(evicted)
    }

    /// Drop `cell` from the cache. Removing an uncached cell is a no-op.
    ///
    /// Returns whether an entry was removed.
    pub fn remove(&self, cell: &CellId) -> bool {
        self.lock().remove(cell)
    }

    /// Drop every cached cell belonging to `world`. Returns how many were removed.
    pub fn invalidate_world(&self, world: &str) -> usize {
        self.lock().remove_world(world)
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Exact number of cached cells.
    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    /// Whether no cells are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached cells.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the hit/miss/eviction counters.
    pub fn stats(&self) -> TerritoryCacheStats {
        TerritoryCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.len(),
            capacity: self.capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl core::fmt::Debug for TerritoryCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TerritoryCache")
            .field("capacity", &self.capacity)
            .field("size", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(x: i32) -> CellId {
        CellId::new("w", x, 0)
    }

    #[test]
    fn put_then_get_returns_owner() {
        let cache = TerritoryCache::new(4);
        let owner = TerritoryId::new();
        cache.put(cell(1), Some(owner));
        assert_eq!(cache.get(&cell(1)), OwnerLookup::Owned(owner));
    }

    #[test]
    fn unclaimed_is_a_hit_not_unknown() {
        let cache = TerritoryCache::new(4);
        cache.put(cell(1), None);
        assert_eq!(cache.get(&cell(1)), OwnerLookup::Unclaimed);
        assert_eq!(cache.get(&cell(2)), OwnerLookup::Unknown);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn never_exceeds_capacity() {
        let cache = TerritoryCache::new(3);
        for x in 0..10 {
            cache.put(cell(x), None);
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 7);
    }

    #[test]
    fn evicts_least_recently_accessed_not_least_recently_inserted() {
        let cache = TerritoryCache::new(3);
        cache.put(cell(1), None);
        cache.put(cell(2), None);
        cache.put(cell(3), None);

        // Reading 1 makes 2 the least recently used.
        assert!(cache.get(&cell(1)).is_known());
        let evicted = cache.put(cell(4), None);

        assert_eq!(evicted, Some(cell(2)));
        assert!(cache.contains(&cell(1)));
        assert!(!cache.contains(&cell(2)));
        assert!(cache.contains(&cell(3)));
        assert!(cache.contains(&cell(4)));
    }

    #[test]
    fn re_put_refreshes_recency_and_owner() {
        let cache = TerritoryCache::new(2);
        let owner = TerritoryId::new();
        cache.put(cell(1), None);
        cache.put(cell(2), None);
        cache.put(cell(1), Some(owner));

        assert_eq!(cache.put(cell(3), None), Some(cell(2)));
        assert_eq!(cache.get(&cell(1)), OwnerLookup::Owned(owner));
    }

    #[test]
    fn remove_is_noop_for_absent_cell() {
        let cache = TerritoryCache::new(2);
        assert!(!cache.remove(&cell(9)));
        cache.put(cell(1), None);
        assert!(cache.remove(&cell(1)));
        assert_eq!(cache.get(&cell(1)), OwnerLookup::Unknown);
        assert!(cache.is_empty());
    }

    #[test]
    fn freed_slots_are_reused_and_list_stays_consistent() {
        let cache = TerritoryCache::new(3);
        cache.put(cell(1), None);
        cache.put(cell(2), None);
        cache.put(cell(3), None);
        cache.remove(&cell(2));
        cache.put(cell(4), None);
        cache.put(cell(5), None);

        // 1 is the oldest survivor and must be the one evicted.
        assert!(!cache.contains(&cell(1)));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.put(cell(6), None), Some(cell(3)));
    }

    #[test]
    fn invalidate_world_only_touches_that_world() {
        let cache = TerritoryCache::new(8);
        cache.put(CellId::new("w", 0, 0), None);
        cache.put(CellId::new("w", 1, 0), None);
        cache.put(CellId::new("nether", 0, 0), None);

        assert_eq!(cache.invalidate_world("w"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&CellId::new("nether", 0, 0)));
    }

    #[test]
    fn put_many_counts_evictions() {
        let cache = TerritoryCache::new(2);
        let evicted = cache.put_many((0..5).map(|x| (cell(x), None)));
        assert_eq!(evicted, 3);
        assert!(cache.contains(&cell(3)));
        assert!(cache.contains(&cell(4)));
    }

    #[test]
    fn zero_capacity_holds_one() {
        let cache = TerritoryCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put(cell(1), None);
        cache.put(cell(2), None);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&cell(2)));
    }

    #[test]
    fn stale_generation_refuses_put() {
        let cache = TerritoryCache::new(4);
        let before = cache.generation();
        // A mutation invalidates the cell while a reader is at the store.
        cache.remove(&cell(1));
        assert!(!cache.put_if_current(cell(1), Some(TerritoryId::new()), before));
        assert_eq!(cache.get(&cell(1)), OwnerLookup::Unknown);

        let now = cache.generation();
        assert!(cache.put_if_current(cell(1), None, now));
        assert_eq!(cache.put_many_if_current([(cell(2), None)], before), None);
        assert_eq!(cache.put_many_if_current([(cell(2), None)], now), Some(0));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clear_resets_everything() {
        let cache = TerritoryCache::new(2);
        cache.put(cell(1), None);
        cache.clear();
        assert!(cache.is_empty());
        cache.put(cell(2), None);
        cache.put(cell(3), None);
        assert_eq!(cache.put(cell(4), None), Some(cell(2)));
    }
}
