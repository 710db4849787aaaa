//! FIFO queue of deferred persistence actions.
//!
//! Mutations commit to the authoritative store synchronously, but making them
//! durable is deferred: the facade enqueues a closure here and a periodic
//! driver (or an explicit "save now") calls [`SaveQueue::drain`].
//!
//! Draining is single-flight. A `drain()` that starts while another is
//! running returns a skipped report immediately instead of blocking or
//! running actions twice. Each action runs with no queue lock held, and a
//! failing or panicking action is logged and dropped without stopping the
//! rest of the batch. Failed actions are not retried.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::SaveError;

/// A zero-argument persistence action, owned by the queue until it runs.
pub type SaveAction = Box<dyn FnOnce() -> Result<(), SaveError> + Send>;

/// One queued action.
pub struct PendingSave {
    /// Position in enqueue order, starting at 1.
    pub sequence: u64,
    /// Short description used in logs.
    pub label: String,
    /// When the action was queued.
    pub enqueued_at: DateTime<Utc>,
    /// The action itself.
    pub action: SaveAction,
}

impl core::fmt::Debug for PendingSave {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PendingSave")
            .field("sequence", &self.sequence)
            .field("label", &self.label)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

/// Result of one [`SaveQueue::drain`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Actions that completed successfully.
    pub executed: usize,
    /// Actions that returned an error or panicked.
    pub failed: usize,
    /// Whether the drain did nothing because another drain was running.
    pub skipped: bool,
}

impl DrainReport {
    /// Total actions taken off the queue by this drain.
    pub const fn processed(&self) -> usize {
        self.executed.saturating_add(self.failed)
    }
}

/// Counters describing a [`SaveQueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveQueueStats {
    /// Actions currently waiting.
    pub backlog: usize,
    /// Actions ever enqueued.
    pub enqueued: u64,
    /// Actions that completed successfully.
    pub executed: u64,
    /// Actions that failed and were dropped.
    pub failed: u64,
    /// Drains that ran (skipped drains excluded).
    pub drains: u64,
}

struct QueueState {
    pending: VecDeque<PendingSave>,
    next_sequence: u64,
}

/// Ordered backlog of deferred saves with a single-flight drain.
pub struct SaveQueue {
    state: Mutex<QueueState>,
    draining: AtomicBool,
    enqueued: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
    drains: AtomicU64,
}

/// Clears the draining flag on every exit path, panics included.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SaveQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                next_sequence: 1,
            }),
            draining: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            drains: AtomicU64::new(0),
        }
    }

    /// Append an action. Returns its sequence number.
    pub fn enqueue<F>(&self, label: impl Into<String>, action: F) -> u64
    where
        F: FnOnce() -> Result<(), SaveError> + Send + 'static,
    {
        let label = label.into();
        let sequence = {
            let mut state = self.lock();
            let sequence = state.next_sequence;
            state.next_sequence = state.next_sequence.saturating_add(1);
            state.pending.push_back(PendingSave {
                sequence,
                label,
                enqueued_at: Utc::now(),
                action: Box::new(action),
            });
            sequence
        };
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        sequence
    }

    /// Run every action queued when the drain started, in enqueue order.
    ///
    /// Actions enqueued while the drain runs are left for the next drain.
    /// Returns immediately with `skipped = true` if another drain holds the
    /// flag.
    pub fn drain(&self) -> DrainReport {
        if self
            .draining
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("drain already in progress, skipping");
            return DrainReport {
                skipped: true,
                ..DrainReport::default()
            };
        }
        let _guard = DrainGuard(&self.draining);

        let batch = self.lock().pending.len();
        let mut report = DrainReport::default();
        for _ in 0..batch {
            // Pop one at a time so the lock is never held while an action runs.
            let Some(save) = self.lock().pending.pop_front() else {
                break;
            };
            match run_action(save.action) {
                Ok(()) => {
                    report.executed = report.executed.saturating_add(1);
                    self.executed.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    report.failed = report.failed.saturating_add(1);
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        sequence = save.sequence,
                        label = %save.label,
                        error = %err,
                        "save action failed, dropping"
                    );
                }
            }
        }

        self.drains.fetch_add(1, Ordering::Relaxed);
        if report.processed() > 0 {
            info!(
                executed = report.executed,
                failed = report.failed,
                backlog = self.len(),
                "save queue drained"
            );
        }
        report
    }

    /// Discard the backlog without running it. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut state = self.lock();
            let dropped = state.pending.len();
            state.pending.clear();
            dropped
        };
        if dropped > 0 {
            warn!(dropped, "save queue cleared with pending actions");
        }
        dropped
    }

    /// Current backlog.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Whether a drain is running right now.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Snapshot of the queue counters.
    pub fn stats(&self) -> SaveQueueStats {
        SaveQueueStats {
            backlog: self.len(),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            drains: self.drains.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SaveQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for SaveQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SaveQueue")
            .field("backlog", &self.len())
            .field("draining", &self.is_draining())
            .finish_non_exhaustive()
    }
}

/// Run one action, turning a panic into [`SaveError::Panicked`].
fn run_action(action: SaveAction) -> Result<(), SaveError> {
    match catch_unwind(AssertUnwindSafe(action)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            Err(SaveError::Panicked { message })
        }
    }
}
