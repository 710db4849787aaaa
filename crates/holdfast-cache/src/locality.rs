//! Per-observer locality sets and idle-cell tracking.
//!
//! Each observer (typically a connected actor) has a [`LocalityTracker`]
//! entry holding the cells currently "nearby". A refresh recomputes the
//! whole neighborhood around the observer's cell and replaces the previous
//! set outright, so an observer that keeps moving never accumulates a trail
//! of stale cells.
//!
//! The tracker also remembers when every cell was last of interest. An idle
//! sweep drops cells that no observer is near and that nobody has touched
//! for longer than the idle limit, and hands them back to the caller for
//! world-unload decisions. Territory cache entries are left alone; that cache
//! evicts by its own recency policy.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use holdfast_types::{CellId, ObserverId};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, duration_millis};

/// Which cells around a center count as nearby.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborhoodShape {
    /// Every cell within `radius` on both axes (Chebyshev distance).
    #[default]
    Square,
    /// Every cell within `radius` steps (Manhattan distance).
    Diamond,
}

impl NeighborhoodShape {
    /// Whether the offset `(dx, dz)` lies inside a neighborhood of `radius`.
    const fn contains(self, dx: i32, dz: i32, radius: u32) -> bool {
        match self {
            Self::Square => dx.unsigned_abs() <= radius && dz.unsigned_abs() <= radius,
            Self::Diamond => dx.unsigned_abs().saturating_add(dz.unsigned_abs()) <= radius,
        }
    }
}

/// What a [`LocalityTracker::refresh`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Size of the observer's new locality set.
    pub observed: usize,
    /// Cells in the new set that were not in the observer's previous set,
    /// sorted. These are the cells worth warming in the territory cache.
    pub newly_discovered: Vec<CellId>,
}

/// Tracks which cells each observer is near and when each cell was last of
/// interest.
pub struct LocalityTracker {
    observers: RwLock<HashMap<ObserverId, HashSet<CellId>>>,
    last_access: Mutex<HashMap<CellId, u64>>,
    shape: NeighborhoodShape,
    max_radius: u32,
    clock: Arc<dyn Clock>,
}

impl LocalityTracker {
    /// Create an empty tracker. Refresh radii above `max_radius` are clamped.
    pub fn new(shape: NeighborhoodShape, max_radius: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            last_access: Mutex::new(HashMap::new()),
            shape,
            max_radius,
            clock,
        }
    }

    /// Recompute the observer's neighborhood around `center` and replace its
    /// previous locality set with it.
    pub fn refresh(&self, observer: ObserverId, center: &CellId, radius: u32) -> RefreshReport {
        let radius = radius.min(self.max_radius);
        let cells = neighborhood(center, radius, self.shape);
        let now = self.clock.now_millis();

        {
            let mut last_access = self.lock_access();
            for cell in &cells {
                last_access.insert(cell.clone(), now);
            }
        }

        let observed = cells.len();
        let previous = self.write_observers().insert(observer, cells.clone());

        let mut newly_discovered: Vec<CellId> = match previous {
            Some(prev) => cells.into_iter().filter(|c| !prev.contains(c)).collect(),
            None => cells.into_iter().collect(),
        };
        newly_discovered.sort();

        tracing::trace!(
            observer = %observer,
            center = %center,
            observed,
            new = newly_discovered.len(),
            "locality refreshed"
        );
        RefreshReport {
            observed,
            newly_discovered,
        }
    }

    /// Record that `cell` was of interest just now.
    pub fn touch(&self, cell: &CellId) {
        let now = self.clock.now_millis();
        self.lock_access().insert(cell.clone(), now);
    }

    /// Drop the observer's locality set. Returns whether it had one.
    pub fn forget(&self, observer: ObserverId) -> bool {
        self.write_observers().remove(&observer).is_some()
    }

    /// Drop all bookkeeping for cells in `world`, from every observer's set
    /// and from the access log. Returns how many tracked cells were dropped.
    pub fn forget_world(&self, world: &str) -> usize {
        for cells in self.write_observers().values_mut() {
            cells.retain(|cell| !cell.in_world(world));
        }
        let mut last_access = self.lock_access();
        let before = last_access.len();
        last_access.retain(|cell, _| !cell.in_world(world));
        before.saturating_sub(last_access.len())
    }

    /// Remove every cell that no observer is near and that has not been of
    /// interest for longer than `max_idle`. Returns the removed cells, sorted.
    pub fn idle_sweep(&self, max_idle: Duration) -> Vec<CellId> {
        let active = self.active_cells();
        let limit = duration_millis(max_idle);
        let now = self.clock.now_millis();

        let mut idle = Vec::new();
        self.lock_access().retain(|cell, &mut touched| {
            let keep = active.contains(cell) || now.saturating_sub(touched) <= limit;
            if !keep {
                idle.push(cell.clone());
            }
            keep
        });
        idle.sort();

        if !idle.is_empty() {
            tracing::debug!(removed = idle.len(), active = active.len(), "idle cells swept");
        }
        idle
    }

    /// Union of every observer's current locality set.
    pub fn active_cells(&self) -> HashSet<CellId> {
        self.read_observers()
            .values()
            .flat_map(|cells| cells.iter().cloned())
            .collect()
    }

    /// Whether any observer is currently near `cell`.
    pub fn is_active(&self, cell: &CellId) -> bool {
        self.read_observers()
            .values()
            .any(|cells| cells.contains(cell))
    }

    /// Size of one observer's locality set (zero if unknown).
    pub fn observed_count(&self, observer: ObserverId) -> usize {
        self.read_observers()
            .get(&observer)
            .map_or(0, HashSet::len)
    }

    /// Number of observers with a locality set.
    pub fn observer_count(&self) -> usize {
        self.read_observers().len()
    }

    /// Number of cells in the access log.
    pub fn tracked_cells(&self) -> usize {
        self.lock_access().len()
    }

    /// Drop every observer and every tracked cell.
    pub fn clear(&self) {
        self.write_observers().clear();
        self.lock_access().clear();
    }

    fn read_observers(&self) -> RwLockReadGuard<'_, HashMap<ObserverId, HashSet<CellId>>> {
        self.observers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_observers(&self) -> RwLockWriteGuard<'_, HashMap<ObserverId, HashSet<CellId>>> {
        self.observers.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_access(&self) -> MutexGuard<'_, HashMap<CellId, u64>> {
        self.last_access.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl core::fmt::Debug for LocalityTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalityTracker")
            .field("shape", &self.shape)
            .field("max_radius", &self.max_radius)
            .field("observers", &self.observer_count())
            .finish_non_exhaustive()
    }
}

/// Every cell within `radius` of `center` under `shape`, center included.
fn neighborhood(center: &CellId, radius: u32, shape: NeighborhoodShape) -> HashSet<CellId> {
    let r = i32::try_from(radius).unwrap_or(i32::MAX);
    let low = r.checked_neg().unwrap_or(i32::MIN);
    let mut cells = HashSet::new();
    for dx in low..=r {
        for dz in low..=r {
            if !shape.contains(dx, dz, radius) {
                continue;
            }
            if let Some(cell) = center.offset(dx, dz) {
                cells.insert(cell);
            }
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const IDLE: Duration = Duration::from_secs(300);

    fn tracker(shape: NeighborhoodShape) -> (Arc<ManualClock>, LocalityTracker) {
        let clock = Arc::new(ManualClock::new());
        let shared: Arc<dyn Clock> = clock.clone();
        (clock, LocalityTracker::new(shape, 8, shared))
    }

    #[test]
    fn square_and_diamond_sizes() {
        let center = CellId::new("w", 0, 0);
        assert_eq!(neighborhood(&center, 0, NeighborhoodShape::Square).len(), 1);
        assert_eq!(neighborhood(&center, 2, NeighborhoodShape::Square).len(), 25);
        assert_eq!(neighborhood(&center, 2, NeighborhoodShape::Diamond).len(), 13);
        assert!(!neighborhood(&center, 2, NeighborhoodShape::Diamond).contains(&CellId::new("w", 2, 2)));
    }

    #[test]
    fn neighborhood_at_grid_edge_skips_overflow() {
        let edge = CellId::new("w", i32::MAX, 0);
        assert_eq!(neighborhood(&edge, 1, NeighborhoodShape::Square).len(), 6);
    }

    #[test]
    fn radius_is_clamped() {
        let (_, tracker) = tracker(NeighborhoodShape::Square);
        let report = tracker.refresh(ObserverId::new(), &CellId::new("w", 0, 0), 1_000);
        assert_eq!(report.observed, 17 * 17);
    }

    #[test]
    fn refresh_replaces_set_wholesale() {
        let (_, tracker) = tracker(NeighborhoodShape::Square);
        let observer = ObserverId::new();

        let first = tracker.refresh(observer, &CellId::new("w", 0, 0), 1);
        assert_eq!(first.observed, 9);
        assert_eq!(first.newly_discovered.len(), 9);

        let second = tracker.refresh(observer, &CellId::new("w", 1, 0), 1);
        assert_eq!(second.observed, 9);
        assert_eq!(second.newly_discovered.len(), 3);
        assert_eq!(tracker.observed_count(observer), 9);
        assert!(!tracker.is_active(&CellId::new("w", -1, 0)));
        assert!(tracker.is_active(&CellId::new("w", 2, 0)));
    }

    #[test]
    fn idle_sweep_keeps_active_and_recent_cells() {
        let (clock, tracker) = tracker(NeighborhoodShape::Square);
        let observer = ObserverId::new();
        tracker.refresh(observer, &CellId::new("w", 0, 0), 0);
        tracker.touch(&CellId::new("w", 50, 50));

        clock.advance(IDLE + Duration::from_secs(1));
        tracker.touch(&CellId::new("w", 60, 60));

        let idle = tracker.idle_sweep(IDLE);
        assert_eq!(idle, vec![CellId::new("w", 50, 50)]);
        assert_eq!(tracker.tracked_cells(), 2);
    }

    #[test]
    fn forget_removes_observer_from_active_union() {
        let (clock, tracker) = tracker(NeighborhoodShape::Square);
        let staying = ObserverId::new();
        let leaving = ObserverId::new();
        tracker.refresh(staying, &CellId::new("w", 0, 0), 0);
        tracker.refresh(leaving, &CellId::new("w", 10, 10), 0);

        assert!(tracker.forget(leaving));
        assert!(!tracker.forget(leaving));
        clock.advance(IDLE + Duration::from_secs(1));

        let idle = tracker.idle_sweep(IDLE);
        assert_eq!(idle, vec![CellId::new("w", 10, 10)]);
        assert_eq!(tracker.active_cells().len(), 1);
        assert_eq!(tracker.observer_count(), 1);
    }

    #[test]
    fn forget_world_drops_only_that_world() {
        let (_, tracker) = tracker(NeighborhoodShape::Square);
        let observer = ObserverId::new();
        tracker.refresh(observer, &CellId::new("w", 0, 0), 1);
        tracker.touch(&CellId::new("nether", 0, 0));

        assert_eq!(tracker.forget_world("w"), 9);
        assert_eq!(tracker.observed_count(observer), 0);
        assert_eq!(tracker.tracked_cells(), 1);
    }
}
