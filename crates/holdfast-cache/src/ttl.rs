//! Sliding-expiry caches over independent key spaces.
//!
//! A [`TtlCache`] keeps each entry for as long as it keeps being read: every
//! hit re-stamps the entry, and an entry idle for longer than the TTL is
//! treated as absent. Expiry is lazy. The read that discovers an expired
//! entry purges it, and [`TtlCache::purge_expired`] lets a periodic sweep
//! bound memory between reads.
//!
//! [`KeySpaces`] bundles the three spaces the lookup facade needs (entity
//! records by name, membership by actor, balance by territory) behind one
//! TTL. The spaces share nothing else: invalidating or clearing one never
//! touches another.
//!
//! # Concurrency
//!
//! Entries are built completely and then inserted under the write lock, so a
//! reader never sees a half-initialized entry. Hits only take the read lock;
//! the timestamp is an atomic that is moved forward in place.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use holdfast_types::{ActorId, TerritoryId, TerritoryRecord};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::clock::{Clock, duration_millis};

/// One cached value and the last time it was written or read.
struct Entry<V> {
    value: V,
    touched_at: AtomicU64,
}

/// Counters describing a [`TtlCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TtlCacheStats {
    /// Reads that returned a live entry.
    pub hits: u64,
    /// Reads that found nothing or an expired entry.
    pub misses: u64,
    /// Entries removed because their TTL lapsed.
    pub expirations: u64,
    /// Entries currently held (expired-but-unpurged entries included).
    pub size: usize,
}

/// A concurrent cache with sliding per-entry expiry.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    /// Bumped under the write lock by every invalidation and clear.
    generation: AtomicU64,
    ttl_millis: u64,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    /// Create an empty cache whose entries expire after `ttl` without access.
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            ttl_millis: duration_millis(ttl),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Store `value` under `key`, replacing any previous entry and stamping
    /// it with the current time.
    pub fn put(&self, key: K, value: V) {
        let entry = Entry {
            value,
            touched_at: AtomicU64::new(self.clock.now_millis()),
        };
        self.write().insert(key, entry);
    }

    /// Invalidation generation. Read it before querying the backing store and
    /// pass it to [`put_if_current`](Self::put_if_current).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store `value` only if no invalidation happened since `generation` was
    /// read. Returns whether the entry was stored.
    pub fn put_if_current(&self, key: K, value: V, generation: u64) -> bool {
        let entry = Entry {
            value,
            touched_at: AtomicU64::new(self.clock.now_millis()),
        };
        let mut entries = self.write();
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        entries.insert(key, entry);
        true
    }

    /// Read the value under `key` if it has not expired.
    ///
    /// A hit extends the entry's lifetime. An expired entry is removed and
    /// reported as absent.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now_millis();
        {
            let entries = self.read();
            match entries.get(key) {
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(entry) if !self.is_expired(entry, now) => {
                    entry.touched_at.fetch_max(now, Ordering::AcqRel);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
            }
        }

        // Expired under the read lock. Re-check under the write lock: a
        // concurrent put may have replaced the entry in between.
        let mut entries = self.write();
        match entries.get(key) {
            Some(entry) if !self.is_expired(entry, now) => {
                entry.touched_at.fetch_max(now, Ordering::AcqRel);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Remove `key` unconditionally. Removing an absent key is a no-op.
    ///
    /// Returns whether an entry was removed.
    pub fn invalidate<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut entries = self.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.remove(key).is_some()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut entries = self.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    /// Remove every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        let removed = before.saturating_sub(entries.len());
        self.expirations
            .fetch_add(u64::try_from(removed).unwrap_or(u64::MAX), Ordering::Relaxed);
        removed
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// The configured time-to-live.
    pub const fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_millis)
    }

    /// Snapshot of the hit/miss/expiry counters.
    pub fn stats(&self) -> TtlCacheStats {
        TtlCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size: self.len(),
        }
    }

    fn is_expired(&self, entry: &Entry<V>, now: u64) -> bool {
        now.saturating_sub(entry.touched_at.load(Ordering::Acquire)) > self.ttl_millis
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> core::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TtlCache")
            .field("ttl_millis", &self.ttl_millis)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Names of the logical key spaces held by [`KeySpaces`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySpace {
    /// Territory records keyed by territory name.
    Entities,
    /// Territory membership keyed by actor.
    Memberships,
    /// Territory balance keyed by territory.
    Balances,
}

/// The three isolated key spaces fronting entity lookups.
#[derive(Debug)]
pub struct KeySpaces {
    entities: TtlCache<String, TerritoryRecord>,
    memberships: TtlCache<ActorId, TerritoryId>,
    balances: TtlCache<TerritoryId, Decimal>,
}

impl KeySpaces {
    /// Create empty key spaces sharing one `ttl`.
    pub fn new(ttl: Duration, clock: &Arc<dyn Clock>) -> Self {
        Self {
            entities: TtlCache::new(ttl, Arc::clone(clock)),
            memberships: TtlCache::new(ttl, Arc::clone(clock)),
            balances: TtlCache::new(ttl, Arc::clone(clock)),
        }
    }

    /// Territory records keyed by name.
    pub const fn entities(&self) -> &TtlCache<String, TerritoryRecord> {
        &self.entities
    }

    /// Territory membership keyed by actor.
    pub const fn memberships(&self) -> &TtlCache<ActorId, TerritoryId> {
        &self.memberships
    }

    /// Territory balances keyed by territory.
    pub const fn balances(&self) -> &TtlCache<TerritoryId, Decimal> {
        &self.balances
    }

    /// Remove every entry from one space, leaving the others intact.
    pub fn clear_space(&self, space: KeySpace) {
        match space {
            KeySpace::Entities => self.entities.clear(),
            KeySpace::Memberships => self.memberships.clear(),
            KeySpace::Balances => self.balances.clear(),
        }
    }

    /// Remove every entry from every space.
    pub fn clear(&self) {
        self.entities.clear();
        self.memberships.clear();
        self.balances.clear();
    }

    /// Number of entries held by one space.
    pub fn len(&self, space: KeySpace) -> usize {
        match space {
            KeySpace::Entities => self.entities.len(),
            KeySpace::Memberships => self.memberships.len(),
            KeySpace::Balances => self.balances.len(),
        }
    }

    /// Sweep expired entries from every space, returning the total removed.
    pub fn purge_expired(&self) -> usize {
        self.entities
            .purge_expired()
            .saturating_add(self.memberships.purge_expired())
            .saturating_add(self.balances.purge_expired())
    }

    /// Counters for one space.
    pub fn stats(&self, space: KeySpace) -> TtlCacheStats {
        match space {
            KeySpace::Entities => self.entities.stats(),
            KeySpace::Memberships => self.memberships.stats(),
            KeySpace::Balances => self.balances.stats(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::thread;

    use super::*;
    use crate::clock::ManualClock;

    const TTL: Duration = Duration::from_secs(60);

    fn cache() -> (Arc<ManualClock>, TtlCache<String, u32>) {
        let clock = Arc::new(ManualClock::new());
        let shared: Arc<dyn Clock> = clock.clone();
        (clock, TtlCache::new(TTL, shared))
    }

    #[test]
    fn put_then_get_returns_value() {
        let (_, cache) = cache();
        cache.put("alpha".to_owned(), 7);
        assert_eq!(cache.get("alpha"), Some(7));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn missing_key_is_a_miss() {
        let (_, cache) = cache();
        assert_eq!(cache.get("nobody"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn entry_at_exact_ttl_is_still_live() {
        let (clock, cache) = cache();
        cache.put("alpha".to_owned(), 1);
        clock.advance(TTL);
        assert_eq!(cache.get("alpha"), Some(1));
    }

    #[test]
    fn expired_entry_is_absent_and_purged_on_read() {
        let (clock, cache) = cache();
        cache.put("alpha".to_owned(), 1);
        clock.advance(TTL + Duration::from_millis(1));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("alpha"), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn reads_slide_the_expiry_window() {
        let (clock, cache) = cache();
        cache.put("hot".to_owned(), 1);
        cache.put("cold".to_owned(), 2);

        for _ in 0..5 {
            clock.advance(Duration::from_secs(40));
            assert_eq!(cache.get("hot"), Some(1));
        }

        assert_eq!(cache.get("cold"), None);
        assert_eq!(cache.get("hot"), Some(1));
    }

    #[test]
    fn put_refreshes_timestamp() {
        let (clock, cache) = cache();
        cache.put("alpha".to_owned(), 1);
        clock.advance(Duration::from_secs(50));
        cache.put("alpha".to_owned(), 2);
        clock.advance(Duration::from_secs(50));
        assert_eq!(cache.get("alpha"), Some(2));
    }

    #[test]
    fn invalidate_absent_key_is_noop() {
        let (_, cache) = cache();
        assert!(!cache.invalidate("ghost"));
        cache.put("alpha".to_owned(), 1);
        assert!(cache.invalidate("alpha"));
        assert_eq!(cache.get("alpha"), None);
    }

    #[test]
    fn put_if_current_rejects_after_invalidation() {
        let (_, cache) = cache();
        let before = cache.generation();
        cache.invalidate("alpha");
        assert!(!cache.put_if_current("alpha".to_owned(), 1, before));
        assert_eq!(cache.get("alpha"), None);
        assert!(cache.put_if_current("alpha".to_owned(), 2, cache.generation()));
        assert_eq!(cache.get("alpha"), Some(2));
    }

    #[test]
    fn purge_expired_removes_only_stale_entries() {
        let (clock, cache) = cache();
        cache.put("old".to_owned(), 1);
        clock.advance(Duration::from_secs(45));
        cache.put("new".to_owned(), 2);
        clock.advance(Duration::from_secs(30));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("new"), Some(2));
    }

    #[test]
    fn clear_empties_cache() {
        let (_, cache) = cache();
        cache.put("a".to_owned(), 1);
        cache.put("b".to_owned(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_puts_gets_and_invalidations_stay_consistent() {
        const THREADS: u32 = 4;
        const PER_THREAD: u32 = 250;

        let (_, cache) = cache();
        thread::scope(|scope| {
            for t in 0..THREADS {
                let cache = &cache;
                scope.spawn(move || {
                    for n in 0..PER_THREAD {
                        let key = format!("{t}-{n}");
                        cache.put(key.clone(), n);
                        assert_eq!(cache.get(key.as_str()), Some(n));

                        cache.put("shared".to_owned(), n);
                        let _ = cache.get("shared");
                        if n.checked_rem(10) == Some(0) {
                            cache.invalidate("shared");
                        }
                    }
                });
            }
        });

        let stats = cache.stats();
        assert!(stats.hits >= u64::from(THREADS.checked_mul(PER_THREAD).unwrap()));
        assert_eq!(stats.expirations, 0);

        cache.invalidate("shared");
        let own = usize::try_from(THREADS.checked_mul(PER_THREAD).unwrap()).unwrap();
        assert_eq!(cache.len(), own);
        for t in 0..THREADS {
            for n in 0..PER_THREAD {
                assert_eq!(cache.get(format!("{t}-{n}").as_str()), Some(n));
            }
        }
    }

    #[test]
    fn key_spaces_are_isolated() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let spaces = KeySpaces::new(TTL, &clock);
        let territory = TerritoryId::new();
        let actor = ActorId::new();
        let record = TerritoryRecord::founded(territory, "Keep", actor);

        spaces.entities().put("Keep".to_owned(), record.clone());
        spaces.memberships().put(actor, territory);
        spaces.balances().put(territory, Decimal::new(1050, 2));

        spaces.clear_space(KeySpace::Memberships);
        assert_eq!(spaces.len(KeySpace::Memberships), 0);
        assert_eq!(spaces.entities().get("Keep"), Some(record));
        assert_eq!(spaces.balances().get(&territory), Some(Decimal::new(1050, 2)));

        spaces.balances().invalidate(&territory);
        assert_eq!(spaces.len(KeySpace::Entities), 1);
        assert_eq!(spaces.len(KeySpace::Balances), 0);
    }

    #[test]
    fn key_spaces_share_one_ttl() {
        let manual = Arc::new(ManualClock::new());
        let clock: Arc<dyn Clock> = manual.clone();
        let spaces = KeySpaces::new(TTL, &clock);
        let territory = TerritoryId::new();
        let actor = ActorId::new();

        spaces.memberships().put(actor, territory);
        spaces.balances().put(territory, Decimal::ONE);
        manual.advance(TTL + Duration::from_secs(1));

        assert_eq!(spaces.purge_expired(), 2);
        assert_eq!(spaces.stats(KeySpace::Balances).expirations, 1);
    }
}
