//! Periodic driver.
//!
//! The lookup facade has no timers of its own. The driver owns them: it
//! drains the deferred save queue, sweeps idle cells out of the locality
//! tracker, purges expired key-space entries and (optionally) steps the
//! synthetic load, each on its own interval, until the shutdown future
//! resolves.
//!
//! Save drains run on the blocking pool because save actions may do real
//! I/O. The queue is single-flight, so a drain that overlaps a slow
//! previous one is skipped rather than stacked.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use holdfast_core::{DrainReport, HoldfastConfig, TerritoryLookup};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::load::{LoadStats, SyntheticLoad};

/// Interval lengths used by a [`Driver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverIntervals {
    /// Save queue drain cadence.
    pub drain: Duration,
    /// Locality idle sweep cadence.
    pub idle_sweep: Duration,
    /// Key-space TTL sweep cadence.
    pub ttl_sweep: Duration,
    /// Synthetic load step cadence.
    pub load_tick: Duration,
}

impl DriverIntervals {
    /// Intervals from configuration. Zero-length intervals become 1 ms.
    pub fn from_config(config: &HoldfastConfig) -> Self {
        let millis = |ms: u64| Duration::from_millis(ms.max(1));
        Self {
            drain: millis(config.saves.drain_interval_ms),
            idle_sweep: millis(config.locality.sweep_interval_ms),
            ttl_sweep: millis(config.cache.sweep_interval_ms),
            load_tick: millis(config.driver.tick_interval_ms),
        }
    }
}

/// What a [`Driver::run`] did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverReport {
    /// Drains that ran.
    pub drains: u64,
    /// Drains skipped because another was in progress.
    pub skipped_drains: u64,
    /// Saves executed across all drains.
    pub saves_executed: u64,
    /// Saves that failed across all drains.
    pub saves_failed: u64,
    /// Idle sweeps run.
    pub idle_sweeps: u64,
    /// Cells reported idle across all sweeps.
    pub idle_cells: u64,
    /// TTL sweeps run.
    pub ttl_sweeps: u64,
    /// Synthetic load steps run.
    pub load_ticks: u64,
    /// Final counters of the synthetic load, when one ran.
    pub load: Option<LoadStats>,
}

impl DriverReport {
    fn record_drain(&mut self, report: DrainReport) {
        if report.skipped {
            self.skipped_drains = self.skipped_drains.saturating_add(1);
            return;
        }
        self.drains = self.drains.saturating_add(1);
        self.saves_executed = self
            .saves_executed
            .saturating_add(u64::try_from(report.executed).unwrap_or(u64::MAX));
        self.saves_failed = self
            .saves_failed
            .saturating_add(u64::try_from(report.failed).unwrap_or(u64::MAX));
    }
}

/// Runs the facade's periodic maintenance.
#[derive(Debug)]
pub struct Driver {
    lookup: Arc<TerritoryLookup>,
    intervals: DriverIntervals,
    load: Option<SyntheticLoad>,
}

impl Driver {
    /// Create a driver with no synthetic load.
    pub const fn new(lookup: Arc<TerritoryLookup>, intervals: DriverIntervals) -> Self {
        Self {
            lookup,
            intervals,
            load: None,
        }
    }

    /// Step `load` on every load tick.
    pub fn with_load(mut self, load: SyntheticLoad) -> Self {
        self.load = Some(load);
        self
    }

    /// Run every timer until `shutdown` resolves. The synthetic load, if
    /// any, is stopped before returning; the facade itself is left for the
    /// caller to shut down.
    pub async fn run<F>(mut self, shutdown: F) -> DriverReport
    where
        F: Future<Output = ()>,
    {
        let mut drain = interval(self.intervals.drain);
        let mut idle_sweep = interval(self.intervals.idle_sweep);
        let mut ttl_sweep = interval(self.intervals.ttl_sweep);
        let mut load_tick = interval(self.intervals.load_tick);
        for timer in [&mut drain, &mut idle_sweep, &mut ttl_sweep, &mut load_tick] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
        let has_load = self.load.is_some();

        info!(
            drain_ms = self.intervals.drain.as_millis(),
            idle_sweep_ms = self.intervals.idle_sweep.as_millis(),
            ttl_sweep_ms = self.intervals.ttl_sweep.as_millis(),
            synthetic_load = has_load,
            "driver started"
        );

        let mut report = DriverReport::default();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("driver received shutdown");
                    break;
                }
                _ = drain.tick() => {
                    let lookup = Arc::clone(&self.lookup);
                    match tokio::task::spawn_blocking(move || lookup.drain_saves()).await {
                        Ok(drained) => report.record_drain(drained),
                        Err(err) => warn!(error = %err, "save drain task failed"),
                    }
                }
                _ = idle_sweep.tick() => {
                    let idle = self.lookup.idle_sweep();
                    report.idle_sweeps = report.idle_sweeps.saturating_add(1);
                    report.idle_cells = report
                        .idle_cells
                        .saturating_add(u64::try_from(idle.len()).unwrap_or(u64::MAX));
                    if !idle.is_empty() {
                        debug!(idle = idle.len(), "cells eligible for unload");
                    }
                }
                _ = ttl_sweep.tick() => {
                    self.lookup.sweep_expired();
                    report.ttl_sweeps = report.ttl_sweeps.saturating_add(1);
                }
                _ = load_tick.tick(), if has_load => {
                    if let Some(load) = self.load.as_mut() {
                        load.tick(&self.lookup);
                        report.load_ticks = report.load_ticks.saturating_add(1);
                    }
                }
            }
        }

        if let Some(load) = self.load.as_mut() {
            load.stop(&self.lookup);
            report.load = Some(load.stats());
        }
        report
    }
}
