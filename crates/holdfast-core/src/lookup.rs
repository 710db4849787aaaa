//! The territory lookup facade.
//!
//! [`TerritoryLookup`] is the single integration point for everything that
//! reads or changes territory state. Reads go cache-first and fall back to
//! the [`TerritoryStore`] on a miss, caching the answer (including "nobody
//! owns this cell"). Mutations go through the hook pipeline, then the store,
//! then synchronous invalidation of every cached copy they made stale, and
//! only then onto the deferred save queue.
//!
//! # Ordering
//!
//! A read issued after [`apply_mutation`](TerritoryLookup::apply_mutation)
//! returns observes the mutation. Invalidation happens before the call
//! returns, and cache fills are tagged with the invalidation generation read
//! before the store query, so an answer fetched before a concurrent mutation
//! is discarded instead of being cached over the invalidation.
//!
//! No lock owned by the facade is held across a call into the store or into
//! a hook handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use holdfast_cache::{
    Clock, KeySpace, KeySpaces, LocalityTracker, MonotonicClock, OwnerLookup, RefreshReport,
    TerritoryCache, TerritoryCacheStats, TtlCacheStats,
};
use holdfast_hooks::{HookContext, HookDecision, HookPipeline, HookStats};
use holdfast_types::{
    ActorId, CellId, Mutation, MutationEffect, ObserverId, TerritoryId, TerritoryRecord,
    hook_names,
};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::HoldfastConfig;
use crate::error::{LookupError, SaveError};
use crate::save_queue::{DrainReport, SaveQueue, SaveQueueStats};
use crate::store::TerritoryStore;

/// Result of [`TerritoryLookup::apply_mutation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The store committed the mutation and a save was queued.
    Applied {
        /// What the mutation touched.
        effect: MutationEffect,
        /// Sequence number of the queued save.
        save_sequence: u64,
    },
    /// A hook handler refused the mutation. Nothing changed.
    Denied {
        /// Why it was refused.
        reason: String,
        /// Every handler's vote.
        decision: HookDecision,
    },
}

impl MutationOutcome {
    /// Whether the mutation was committed.
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// The denial reason, or `None` if the mutation was applied.
    pub fn denial_reason(&self) -> Option<&str> {
        match self {
            Self::Applied { .. } => None,
            Self::Denied { reason, .. } => Some(reason),
        }
    }
}

/// Aggregate statistics across the facade and its components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LookupStats {
    /// Territory cache counters.
    pub territory: TerritoryCacheStats,
    /// Entity key space counters.
    pub entities: TtlCacheStats,
    /// Membership key space counters.
    pub memberships: TtlCacheStats,
    /// Balance key space counters.
    pub balances: TtlCacheStats,
    /// Hook pipeline counters.
    pub hooks: HookStats,
    /// Save queue counters.
    pub saves: SaveQueueStats,
    /// Observers with a locality set.
    pub observers: usize,
    /// Cells with a recorded access time.
    pub tracked_cells: usize,
    /// Mutations committed.
    pub mutations_applied: u64,
    /// Mutations refused by a hook.
    pub mutations_denied: u64,
    /// Mutations the store rejected.
    pub mutations_rejected: u64,
}

/// Cache-first read path and hook-gated write path over a [`TerritoryStore`].
pub struct TerritoryLookup {
    store: Arc<dyn TerritoryStore>,
    territories: TerritoryCache,
    key_spaces: KeySpaces,
    locality: LocalityTracker,
    hooks: Arc<HookPipeline>,
    saves: SaveQueue,
    radius: u32,
    max_idle: Duration,
    applied: AtomicU64,
    denied: AtomicU64,
    rejected: AtomicU64,
}

impl TerritoryLookup {
    /// Build the facade from configuration using the system monotonic clock.
    pub fn new(store: Arc<dyn TerritoryStore>, config: &HoldfastConfig) -> Self {
        Self::with_clock(store, config, Arc::new(MonotonicClock::new()))
    }

    /// Build the facade from configuration with an explicit clock.
    pub fn with_clock(
        store: Arc<dyn TerritoryStore>,
        config: &HoldfastConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let hooks = HookPipeline::with_default_policy(config.hooks.default_failure_policy);
        for (hook, policy) in &config.hooks.failure_policies {
            if !hook_names::ALL.contains(&hook.as_str()) {
                warn!(hook = %hook, "failure policy set for a hook the facade never invokes");
            }
            hooks.set_failure_policy(hook.clone(), *policy);
        }
        let locality = LocalityTracker::new(
            config.locality.shape,
            config.locality.max_radius,
            Arc::clone(&clock),
        );
        info!(
            territory_capacity = config.cache.territory_capacity,
            ttl_ms = config.cache.ttl_ms,
            radius = config.locality.radius,
            "territory lookup initialized"
        );
        Self {
            store,
            territories: TerritoryCache::new(config.cache.territory_capacity),
            key_spaces: KeySpaces::new(config.cache.ttl(), &clock),
            locality,
            hooks: Arc::new(hooks),
            saves: SaveQueue::new(),
            radius: config.locality.radius,
            max_idle: config.locality.max_idle(),
            applied: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Owner of `cell`, or `None` if unclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Store`] if the cell was not cached and the
    /// store query failed.
    pub fn resolve_owner(&self, cell: &CellId) -> Result<Option<TerritoryId>, LookupError> {
        self.locality.touch(cell);
        match self.territories.get(cell) {
            OwnerLookup::Owned(id) => return Ok(Some(id)),
            OwnerLookup::Unclaimed => return Ok(None),
            OwnerLookup::Unknown => {}
        }
        let generation = self.territories.generation();
        let owner = self.store.read_owner(cell)?;
        if !self
            .territories
            .put_if_current(cell.clone(), owner, generation)
        {
            debug!(cell = %cell, "owner fill raced an invalidation, not cached");
        }
        Ok(owner)
    }

    /// Territory record by display name. Absent names are not cached.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Store`] on a cache miss with a failing store.
    pub fn resolve_entity(&self, name: &str) -> Result<Option<TerritoryRecord>, LookupError> {
        let cache = self.key_spaces.entities();
        if let Some(record) = cache.get(name) {
            return Ok(Some(record));
        }
        let generation = cache.generation();
        let record = self.store.read_entity(name)?;
        if let Some(found) = &record {
            cache.put_if_current(name.to_owned(), found.clone(), generation);
        }
        Ok(record)
    }

    /// Territory the actor belongs to. Absent memberships are not cached.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Store`] on a cache miss with a failing store.
    pub fn resolve_membership(&self, actor: ActorId) -> Result<Option<TerritoryId>, LookupError> {
        let cache = self.key_spaces.memberships();
        if let Some(id) = cache.get(&actor) {
            return Ok(Some(id));
        }
        let generation = cache.generation();
        let membership = self.store.read_membership(actor)?;
        if let Some(id) = membership {
            cache.put_if_current(actor, id, generation);
        }
        Ok(membership)
    }

    /// Treasury balance of a territory. Absent territories are not cached.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Store`] on a cache miss with a failing store.
    pub fn resolve_balance(&self, id: TerritoryId) -> Result<Option<Decimal>, LookupError> {
        let cache = self.key_spaces.balances();
        if let Some(balance) = cache.get(&id) {
            return Ok(Some(balance));
        }
        let generation = cache.generation();
        let balance = self.store.read_balance(id)?;
        if let Some(amount) = balance {
            cache.put_if_current(id, amount, generation);
        }
        Ok(balance)
    }

    // -----------------------------------------------------------------------
    // Locality
    // -----------------------------------------------------------------------

    /// Re-scan the observer's neighborhood at the configured radius.
    pub fn refresh_observer(&self, observer: ObserverId, center: &CellId) -> RefreshReport {
        self.refresh_observer_within(observer, center, self.radius)
    }

    /// Re-scan the observer's neighborhood at `radius` (clamped to the
    /// configured maximum) and warm the territory cache for the cells it
    /// newly discovered, in one batched store read.
    ///
    /// A failed warm-up is logged and leaves those cells to be fetched on
    /// demand.
    pub fn refresh_observer_within(
        &self,
        observer: ObserverId,
        center: &CellId,
        radius: u32,
    ) -> RefreshReport {
        let report = self.locality.refresh(observer, center, radius);
        let cold: Vec<CellId> = report
            .newly_discovered
            .iter()
            .filter(|cell| !self.territories.contains(cell))
            .cloned()
            .collect();
        if cold.is_empty() {
            return report;
        }

        let generation = self.territories.generation();
        match self.store.read_owners(&cold) {
            Ok(owners) => {
                match self.territories.put_many_if_current(owners, generation) {
                    Some(evicted) => {
                        debug!(observer = %observer, warmed = cold.len(), evicted, "territory cache warmed");
                    }
                    None => {
                        debug!(observer = %observer, "warm-up raced an invalidation, discarded");
                    }
                }
            }
            Err(err) => {
                warn!(observer = %observer, error = %err, "territory cache warm-up failed");
            }
        }
        report
    }

    /// Drop the observer's locality set (call on disconnect). Returns whether
    /// it had one.
    pub fn forget_observer(&self, observer: ObserverId) -> bool {
        self.locality.forget(observer)
    }

    /// Cells no observer is near and nobody touched within the configured
    /// idle limit. They are dropped from locality bookkeeping and returned so
    /// the caller can decide what to unload.
    pub fn idle_sweep(&self) -> Vec<CellId> {
        self.locality.idle_sweep(self.max_idle)
    }

    /// Forget every cached owner and locality entry in `world`. Returns how
    /// many territory cache entries were dropped.
    pub fn unload_world(&self, world: &str) -> usize {
        let cached = self.territories.invalidate_world(world);
        let tracked = self.locality.forget_world(world);
        info!(world, cached, tracked, "world unloaded");
        cached
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Gate, commit, invalidate and queue a save for `mutation`, starting
    /// from a context holding only the mutation's own fields.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Store`] if the store rejects or fails the
    /// mutation. A hook denial is not an error; it is
    /// [`MutationOutcome::Denied`].
    pub fn apply_mutation(&self, mutation: &Mutation) -> Result<MutationOutcome, LookupError> {
        self.apply_mutation_with(mutation, HookContext::for_mutation(mutation))
    }

    /// Like [`apply_mutation`](Self::apply_mutation), with caller-supplied
    /// extension data already in `ctx`. The typed fields and any veto in
    /// `ctx` are replaced from the mutation and the targeted territory's
    /// current record; only extension entries survive.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Store`] if reading the targeted territory or
    /// committing the mutation fails.
    pub fn apply_mutation_with(
        &self,
        mutation: &Mutation,
        mut ctx: HookContext,
    ) -> Result<MutationOutcome, LookupError> {
        let hook = mutation.kind().hook_name();
        let territory = mutation.territory();
        ctx.fill_from(mutation);
        if !matches!(mutation, Mutation::Create { .. }) {
            if let Some(record) = self.store.read_territory(territory)? {
                ctx.attach_record(record);
            }
        }

        let decision = self.hooks.evaluate(hook, &mut ctx);
        if !decision.allowed {
            self.denied.fetch_add(1, Ordering::Relaxed);
            let reason = decision
                .denial_reason()
                .unwrap_or_else(|| format!("{hook} denied"));
            info!(hook, territory = %territory, reason = %reason, "mutation denied");
            return Ok(MutationOutcome::Denied { reason, decision });
        }

        let effect = match self.store.apply(mutation) {
            Ok(effect) => effect,
            Err(err) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(hook, territory = %territory, error = %err, "mutation rejected by store");
                return Err(err.into());
            }
        };

        // Invalidate before queueing the save: readers must never see data
        // older than the committed mutation.
        self.invalidate(&effect);

        let store = Arc::clone(&self.store);
        let save_sequence = self.saves.enqueue(format!("{hook} {territory}"), move || {
            store.persist(territory).map_err(SaveError::from)
        });
        self.applied.fetch_add(1, Ordering::Relaxed);
        debug!(hook, territory = %territory, save_sequence, "mutation applied");

        Ok(MutationOutcome::Applied {
            effect,
            save_sequence,
        })
    }

    /// Drop every cached entry the effect names.
    fn invalidate(&self, effect: &MutationEffect) {
        if effect.is_empty() {
            return;
        }
        for cell in &effect.cells {
            self.territories.remove(cell);
        }
        for name in &effect.entity_names {
            self.key_spaces.entities().invalidate(name.as_str());
        }
        for actor in &effect.actors {
            self.key_spaces.memberships().invalidate(actor);
        }
        for territory in &effect.territories {
            self.key_spaces.balances().invalidate(territory);
        }
        debug!(
            cells = effect.cells.len(),
            entities = effect.entity_names.len(),
            actors = effect.actors.len(),
            territories = effect.territories.len(),
            "caches invalidated"
        );
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Run every queued save. Single-flight; see [`SaveQueue::drain`].
    pub fn drain_saves(&self) -> DrainReport {
        self.saves.drain()
    }

    /// Purge expired entries from every key space. Returns how many were
    /// removed.
    pub fn sweep_expired(&self) -> usize {
        let purged = self.key_spaces.purge_expired();
        if purged > 0 {
            debug!(purged, "expired cache entries purged");
        }
        purged
    }

    /// Snapshot of every counter.
    pub fn stats(&self) -> LookupStats {
        LookupStats {
            territory: self.territories.stats(),
            entities: self.key_spaces.stats(KeySpace::Entities),
            memberships: self.key_spaces.stats(KeySpace::Memberships),
            balances: self.key_spaces.stats(KeySpace::Balances),
            hooks: self.hooks.stats(),
            saves: self.saves.stats(),
            observers: self.locality.observer_count(),
            tracked_cells: self.locality.tracked_cells(),
            mutations_applied: self.applied.load(Ordering::Relaxed),
            mutations_denied: self.denied.load(Ordering::Relaxed),
            mutations_rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Flush pending saves, then release every cached entry, every locality
    /// set and every hook handler. Returns the final drain report.
    pub fn shutdown(&self) -> DrainReport {
        let report = self.saves.drain();
        self.territories.clear();
        self.key_spaces.clear();
        self.locality.clear();
        self.hooks.shutdown();
        info!(
            executed = report.executed,
            failed = report.failed,
            "territory lookup shut down"
        );
        report
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The hook pipeline extensions register on.
    pub const fn hooks(&self) -> &Arc<HookPipeline> {
        &self.hooks
    }

    /// The deferred save queue.
    pub const fn saves(&self) -> &SaveQueue {
        &self.saves
    }

    /// The territory cache.
    pub const fn territory_cache(&self) -> &TerritoryCache {
        &self.territories
    }

    /// The TTL key spaces.
    pub const fn key_spaces(&self) -> &KeySpaces {
        &self.key_spaces
    }

    /// The locality tracker.
    pub const fn locality(&self) -> &LocalityTracker {
        &self.locality
    }

    /// The authoritative store.
    pub const fn store(&self) -> &Arc<dyn TerritoryStore> {
        &self.store
    }
}

impl core::fmt::Debug for TerritoryLookup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TerritoryLookup")
            .field("territories", &self.territories)
            .field("hooks", &self.hooks)
            .field("saves", &self.saves)
            .finish_non_exhaustive()
    }
}
