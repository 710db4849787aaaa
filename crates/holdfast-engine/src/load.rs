//! Synthetic observer load.
//!
//! Without a game server attached, the engine can drive the lookup facade
//! with a handful of seeded random walkers. Each walker founds a territory,
//! wanders one cell at a time (refreshing its locality on every step), and
//! periodically claims the cell it stands on. Old claims are released once a
//! walker holds more than [`MAX_HELD_CELLS`], which keeps the invalidation
//! path busy as well as the read path.

use std::collections::VecDeque;

use holdfast_core::{LookupError, MutationOutcome, TerritoryLookup};
use holdfast_hooks::{HookContext, HookError, Verdict};
use holdfast_types::{ActorId, CellId, Mutation, ObserverId, TerritoryId, hook_names};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

/// Cells a walker keeps before it starts releasing the oldest claim.
pub const MAX_HELD_CELLS: usize = 8;

/// Cells within this distance of the origin cannot be claimed.
const PROTECTED_RADIUS: i32 = 2;

/// Walkers spawn at a random block within this distance of the origin.
const SPAWN_SPREAD_BLOCKS: i32 = 512;

/// Owner name of the built-in spawn protection hook.
const SPAWN_PROTECTION: &str = "spawn-protection";

#[derive(Debug)]
struct Walker {
    observer: ObserverId,
    actor: ActorId,
    territory: TerritoryId,
    position: CellId,
    held: VecDeque<CellId>,
}

/// Counters for one [`SyntheticLoad`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Ticks run.
    pub ticks: u64,
    /// Claims committed.
    pub claims: u64,
    /// Claims refused by a hook or the store.
    pub refused: u64,
    /// Claims released.
    pub releases: u64,
}

/// Seeded random walkers exercising the lookup facade.
#[derive(Debug)]
pub struct SyntheticLoad {
    walkers: Vec<Walker>,
    rng: StdRng,
    claim_every_ticks: u64,
    stats: LoadStats,
}

impl SyntheticLoad {
    /// Found one territory per walker and register the spawn protection
    /// hook.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] if founding a territory fails in the store.
    pub fn seed(
        lookup: &TerritoryLookup,
        world: &str,
        walkers: u32,
        seed: u64,
        claim_every_ticks: u64,
    ) -> Result<Self, LookupError> {
        lookup.hooks().register(
            hook_names::TERRITORY_CLAIM,
            SPAWN_PROTECTION,
            |ctx: &mut HookContext| -> Result<Verdict, HookError> {
                let protected = ctx.cells.iter().any(|cell| {
                    cell.x().saturating_abs() <= PROTECTED_RADIUS
                        && cell.z().saturating_abs() <= PROTECTED_RADIUS
                });
                if protected {
                    Ok(Verdict::deny("cell is inside spawn protection"))
                } else {
                    Ok(Verdict::Allow)
                }
            },
        );

        let mut rng = StdRng::seed_from_u64(seed);
        let mut founded = Vec::with_capacity(usize::try_from(walkers).unwrap_or_default());
        for n in 0..walkers {
            let walker = Walker {
                observer: ObserverId::new(),
                actor: ActorId::new(),
                territory: TerritoryId::new(),
                position: CellId::from_block(
                    world,
                    rng.random_range(-SPAWN_SPREAD_BLOCKS..=SPAWN_SPREAD_BLOCKS),
                    rng.random_range(-SPAWN_SPREAD_BLOCKS..=SPAWN_SPREAD_BLOCKS),
                ),
                held: VecDeque::new(),
            };
            lookup.apply_mutation(&Mutation::Create {
                territory: walker.territory,
                name: format!("walker-{n}"),
                leader: walker.actor,
            })?;
            lookup.refresh_observer(walker.observer, &walker.position);
            founded.push(walker);
        }
        info!(walkers, world, seed, "synthetic load seeded");

        Ok(Self {
            walkers: founded,
            rng,
            claim_every_ticks,
            stats: LoadStats::default(),
        })
    }

    /// Move every walker one step and, on claim ticks, let one of them claim
    /// its cell.
    pub fn tick(&mut self, lookup: &TerritoryLookup) {
        self.stats.ticks = self.stats.ticks.saturating_add(1);
        for walker in &mut self.walkers {
            let dx = self.rng.random_range(-1..=1);
            let dz = self.rng.random_range(-1..=1);
            if let Some(next) = walker.position.offset(dx, dz) {
                walker.position = next;
            }
            lookup.refresh_observer(walker.observer, &walker.position);
        }

        let claim_tick = self.claim_every_ticks > 0
            && self.stats.ticks.checked_rem(self.claim_every_ticks) == Some(0);
        if !claim_tick || self.walkers.is_empty() {
            return;
        }
        let pick = self.rng.random_range(0..self.walkers.len());
        if let Some(walker) = self.walkers.get_mut(pick) {
            Self::claim_here(walker, lookup, &mut self.stats);
        }
    }

    /// Release every held cell and drop every walker's locality set.
    pub fn stop(&mut self, lookup: &TerritoryLookup) {
        for walker in &mut self.walkers {
            while let Some(cell) = walker.held.pop_front() {
                Self::release(walker, cell, lookup, &mut self.stats);
            }
            lookup.forget_observer(walker.observer);
        }
        info!(
            ticks = self.stats.ticks,
            claims = self.stats.claims,
            refused = self.stats.refused,
            releases = self.stats.releases,
            "synthetic load stopped"
        );
    }

    /// Counters so far.
    pub const fn stats(&self) -> LoadStats {
        self.stats
    }

    fn claim_here(walker: &mut Walker, lookup: &TerritoryLookup, stats: &mut LoadStats) {
        let cell = walker.position.clone();
        if walker.held.contains(&cell) {
            return;
        }
        let mutation = Mutation::Claim {
            territory: walker.territory,
            actor: walker.actor,
            cells: vec![cell.clone()],
        };
        match lookup.apply_mutation(&mutation) {
            Ok(MutationOutcome::Applied { .. }) => {
                stats.claims = stats.claims.saturating_add(1);
                walker.held.push_back(cell);
            }
            Ok(MutationOutcome::Denied { reason, .. }) => {
                stats.refused = stats.refused.saturating_add(1);
                debug!(cell = %cell, reason = %reason, "synthetic claim denied");
            }
            Err(err) => {
                stats.refused = stats.refused.saturating_add(1);
                debug!(cell = %cell, error = %err, "synthetic claim rejected");
            }
        }
        if walker.held.len() > MAX_HELD_CELLS {
            if let Some(oldest) = walker.held.pop_front() {
                Self::release(walker, oldest, lookup, stats);
            }
        }
    }

    fn release(walker: &Walker, cell: CellId, lookup: &TerritoryLookup, stats: &mut LoadStats) {
        let mutation = Mutation::Unclaim {
            territory: walker.territory,
            actor: walker.actor,
            cells: vec![cell],
        };
        match lookup.apply_mutation(&mutation) {
            Ok(outcome) if outcome.is_applied() => {
                stats.releases = stats.releases.saturating_add(1);
            }
            Ok(outcome) => {
                debug!(reason = ?outcome.denial_reason(), "synthetic release denied");
            }
            Err(err) => {
                debug!(error = %err, "synthetic release rejected");
            }
        }
    }
}
