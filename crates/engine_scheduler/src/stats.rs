//! Scheduler counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// A snapshot of scheduler activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Fibers accepted by `submit`.
    pub submitted: u64,
    /// Total `resume` calls made by the scheduler (scheduler turns).
    pub resumes: u64,
    /// Fibers that finished with `Completed`.
    pub completed: u64,
    /// Fibers that finished with `Failed` (including aborts).
    pub failed: u64,
    /// Fibers submitted but not yet finished.
    pub live: u64,
    /// Fibers currently parked on a suspension point.
    pub suspended: u64,
    /// Fibers waiting in the ready queue.
    pub queued: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) submitted: AtomicU64,
    pub(crate) resumes: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) suspended: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn drop_one(counter: &AtomicU64) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, live: u64, queued: u64) -> SchedulerStats {
        SchedulerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            resumes: self.resumes.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            live,
            suspended: self.suspended.load(Ordering::Relaxed),
            queued,
        }
    }
}
