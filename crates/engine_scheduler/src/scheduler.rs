//! The fiber scheduler.
//!
//! Fibers enter through [`Scheduler::submit`] and live in exactly one place
//! at a time:
//!
//! 1. the ready queue (a FIFO multi-producer/multi-consumer channel),
//! 2. a worker's stack while it is being resumed,
//! 3. the suspension table, keyed by the [`AwaitToken`] they wait on.
//!
//! After each turn the worker inspects the fiber's state: finished fibers
//! are dropped (their handle already holds the result), yielded fibers go
//! to the tail of the queue, suspended fibers are parked. A parked fiber
//! only moves again through [`Scheduler::notify_ready`].

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, error, info, trace, warn};

use engine_fiber::sync::lock;
use engine_fiber::{
    AwaitToken, ExecutionContext, Fiber, FiberContext, FiberError, FiberHandle, FiberState,
    ResumeValue, SuspensionPoint,
};

use crate::completion::Completion;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::stats::{Counters, SchedulerStats};
use crate::suspended::{Slot, SlotKind};
use crate::worker::WorkerPool;

/// A fiber waiting in the ready queue, with the value to resume it with.
pub(crate) struct Runnable {
    pub(crate) context: ExecutionContext,
    pub(crate) value: Option<ResumeValue>,
}

/// State shared by the scheduler handle, its workers and its completions.
pub(crate) struct Shared {
    ready_tx: Sender<Runnable>,
    pub(crate) ready_rx: Receiver<Runnable>,
    suspended: DashMap<AwaitToken, Slot>,
    closed: AtomicBool,
    /// Read-held while a fiber is queued or parked, write-held while
    /// shutdown closes. A fiber is never placed after the final drain.
    gate: RwLock<()>,
    counters: Counters,
    live: Mutex<u64>,
    idle: Condvar,
}

impl Shared {
    fn new() -> Self {
        let (ready_tx, ready_rx) = crossbeam_channel::unbounded();
        Self {
            ready_tx,
            ready_rx,
            suspended: DashMap::new(),
            closed: AtomicBool::new(false),
            gate: RwLock::new(()),
            counters: Counters::default(),
            live: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn enqueue(&self, runnable: Runnable) {
        let gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            drop(gate);
            self.cancel(runnable.context);
            return;
        }
        // Both channel ends live in `Shared`, so the send cannot fail while
        // `self` exists.
        let sent = self.ready_tx.send(runnable);
        drop(gate);
        if let Err(err) = sent {
            error!(fiber = %err.0.context.id(), "ready queue disconnected, dropping fiber");
            self.retire();
        }
    }

    /// Drop a fiber that arrived after shutdown; its handle sees `Cancelled`.
    fn cancel(&self, context: ExecutionContext) {
        trace!(fiber = %context.id(), "scheduler closed, cancelling fiber");
        drop(context);
        self.retire();
    }

    /// Forget a token whose suspension point was dropped unawaited.
    fn forget(&self, token: AwaitToken) {
        let removed = self
            .suspended
            .remove_if(&token, |_, slot| slot.kind() != SlotKind::Parked);
        if removed.is_some() {
            trace!(%token, "suspension point dropped unawaited, token retired");
        }
    }

    /// One fiber finished (or was dropped); wake `wait_idle` when none remain.
    fn retire(&self) {
        let mut live = lock(&self.live);
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.idle.notify_all();
        }
    }

    /// Resume one fiber and route it by the state it comes back in.
    pub(crate) fn run_one(&self, runnable: Runnable) {
        let Runnable { mut context, value } = runnable;
        Counters::bump(&self.counters.resumes);

        match context.resume(value) {
            Ok(FiberState::Completed) => {
                trace!(fiber = %context.id(), "fiber completed");
                Counters::bump(&self.counters.completed);
                self.retire();
            }
            Ok(FiberState::Failed) => {
                debug!(fiber = %context.id(), label = context.label(), "fiber failed");
                Counters::bump(&self.counters.failed);
                self.retire();
            }
            Ok(FiberState::Ready) => self.enqueue(Runnable {
                context,
                value: None,
            }),
            Ok(FiberState::Suspended) => self.park(context),
            Ok(state @ (FiberState::Created | FiberState::Running)) => {
                error!(fiber = %context.id(), %state, "fiber returned from resume in an impossible state");
                context.abort(FiberError::InvalidFiberResume {
                    fiber: context.id(),
                    state,
                });
                Counters::bump(&self.counters.failed);
                self.retire();
            }
            Err(err) => {
                error!(fiber = %context.id(), %err, "scheduler resumed a fiber that cannot run");
                Counters::bump(&self.counters.failed);
                self.retire();
            }
        }
    }

    /// Move a fiber that just suspended into the suspension table, or
    /// straight back to the queue if its completion already arrived.
    fn park(&self, mut context: ExecutionContext) {
        let Some(token) = context.awaiting() else {
            self.enqueue(Runnable {
                context,
                value: None,
            });
            return;
        };

        let gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            drop(gate);
            self.cancel(context);
            return;
        }
        let early = match self.suspended.entry(token) {
            Entry::Vacant(_) => None,
            Entry::Occupied(mut entry) => match entry.get().kind() {
                SlotKind::Issued => {
                    entry.insert(Slot::Parked(context));
                    Counters::bump(&self.counters.suspended);
                    trace!(%token, "fiber parked");
                    return;
                }
                SlotKind::Completed => entry.remove().into_value(),
                SlotKind::Parked => None,
            },
        };
        drop(gate);

        match early {
            Some(value) => {
                trace!(fiber = %context.id(), %token, "completion arrived before park, re-queueing");
                self.enqueue(Runnable {
                    context,
                    value: Some(value),
                });
            }
            None => {
                warn!(fiber = %context.id(), %token, "fiber suspended on a token this scheduler did not issue");
                context.abort(FiberError::UnknownAwaitToken(token));
                Counters::bump(&self.counters.failed);
                self.retire();
            }
        }
    }

    pub(crate) fn issue(&self, token: AwaitToken) {
        self.suspended.insert(token, Slot::Issued);
    }

    pub(crate) fn notify_ready(&self, token: AwaitToken, value: ResumeValue) -> Result<(), FiberError> {
        if self.is_closed() {
            return Err(FiberError::SchedulerClosed);
        }

        let parked = match self.suspended.entry(token) {
            Entry::Vacant(_) => return Err(FiberError::UnknownAwaitToken(token)),
            Entry::Occupied(mut entry) => match entry.get().kind() {
                SlotKind::Issued => {
                    entry.insert(Slot::Completed(value));
                    trace!(%token, "completion stashed until fiber parks");
                    return Ok(());
                }
                SlotKind::Completed => return Err(FiberError::UnknownAwaitToken(token)),
                SlotKind::Parked => entry.remove().into_context(),
            },
        };

        let Some(context) = parked else {
            return Err(FiberError::UnknownAwaitToken(token));
        };
        Counters::drop_one(&self.counters.suspended);
        trace!(fiber = %context.id(), %token, "fiber ready");
        self.enqueue(Runnable {
            context,
            value: Some(value),
        });
        Ok(())
    }
}

/// Cooperative fiber scheduler over a fixed worker pool.
///
/// Cloning is cheap and every clone drives the same queue; fibers commonly
/// capture a clone so they can issue their own suspension points.
///
/// Dropping the last handle stops the workers but does not cancel fibers.
/// A parked fiber that holds a clone keeps the scheduler state alive, and
/// its handle resolves only once its completion fires. Call
/// [`shutdown`](Self::shutdown) to cancel everything still queued or
/// parked.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
    pool: Arc<Mutex<Option<WorkerPool>>>,
    config: Arc<SchedulerConfig>,
}

impl Scheduler {
    /// Start a scheduler and its worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Spawn`] if a worker thread cannot be
    /// started. Workers that did start are stopped again.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let shared = Arc::new(Shared::new());
        let pool = WorkerPool::spawn(&shared, &config)?;

        info!(
            workers = config.worker_count,
            thread_name = %config.thread_name,
            "scheduler started"
        );

        Ok(Self {
            shared,
            pool: Arc::new(Mutex::new(Some(pool))),
            config: Arc::new(config),
        })
    }

    /// The configuration this scheduler was started with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// `true` once [`Scheduler::shutdown`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Enqueue a `Created` or `Ready` fiber and return its result handle.
    ///
    /// Thread-safe; may be called from workers, fibers or external threads.
    ///
    /// # Errors
    ///
    /// [`FiberError::SchedulerClosed`] after shutdown,
    /// [`FiberError::InvalidFiberResume`] if the fiber is not runnable.
    pub fn submit<T>(&self, fiber: Fiber<T>) -> Result<FiberHandle<T>, FiberError> {
        if self.is_closed() {
            return Err(FiberError::SchedulerClosed);
        }
        let state = fiber.state();
        if !matches!(state, FiberState::Created | FiberState::Ready) {
            return Err(FiberError::InvalidFiberResume {
                fiber: fiber.id(),
                state,
            });
        }

        let (context, handle) = fiber.into_parts();
        trace!(fiber = %context.id(), label = context.label(), "fiber submitted");
        Counters::bump(&self.shared.counters.submitted);
        *lock(&self.shared.live) += 1;
        self.shared.enqueue(Runnable {
            context,
            value: None,
        });
        Ok(handle)
    }

    /// Wrap `entry` in a fiber and submit it.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::submit`].
    pub fn run_as_fiber<T, F, Fut>(&self, entry: F) -> Result<FiberHandle<T>, FiberError>
    where
        T: Send + 'static,
        F: FnOnce(FiberContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FiberError>> + Send + 'static,
    {
        self.submit(Fiber::new(entry))
    }

    /// Issue a suspension point and the completion that resumes it.
    ///
    /// The fiber awaits the point with
    /// [`FiberContext::suspend`](engine_fiber::FiberContext::suspend); the
    /// completion goes to whatever finishes the awaited operation. A point
    /// dropped without being awaited retires its token; completing it
    /// afterwards reports [`FiberError::UnknownAwaitToken`].
    pub fn suspension<V: Send + Sync + 'static>(
        &self,
        label: impl Into<Cow<'static, str>>,
    ) -> (SuspensionPoint<V>, Completion<V>) {
        let shared = Arc::downgrade(&self.shared);
        let point = SuspensionPoint::new(label).on_release(move |token| {
            if let Some(shared) = shared.upgrade() {
                shared.forget(token);
            }
        });
        self.shared.issue(point.token());
        trace!(token = %point.token(), label = point.label(), "suspension issued");
        let completion = Completion::new(self.shared.clone(), point.token());
        (point, completion)
    }

    /// Resume the fiber waiting on `token` with `value`.
    ///
    /// Safe to call from any thread. The fiber is moved to the ready queue;
    /// it does not run on the calling thread.
    ///
    /// # Errors
    ///
    /// [`FiberError::UnknownAwaitToken`] if nothing is waiting on `token`
    /// (never issued, or already completed);
    /// [`FiberError::SchedulerClosed`] after shutdown.
    pub fn notify_ready(&self, token: AwaitToken, value: ResumeValue) -> Result<(), FiberError> {
        self.shared.notify_ready(token, value)
    }

    /// Run up to `max_turns` ready fibers on the calling thread.
    ///
    /// Returns the number of turns taken. Stops early when the queue is
    /// empty. Intended for schedulers built with
    /// [`SchedulerConfig::inline`], where it gives strict FIFO order.
    pub fn run_pending(&self, max_turns: usize) -> usize {
        let mut turns = 0;
        while turns < max_turns {
            let Ok(runnable) = self.shared.ready_rx.try_recv() else {
                break;
            };
            self.shared.run_one(runnable);
            turns += 1;
        }
        turns
    }

    /// Block until no live fibers remain or `timeout` elapses.
    ///
    /// Returns `true` if the scheduler went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut live = lock(&self.shared.live);
        while *live > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .idle
                .wait_timeout(live, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            live = guard;
        }
        true
    }

    /// A snapshot of the scheduler's counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let live = *lock(&self.shared.live);
        let queued = self.shared.ready_rx.len() as u64;
        self.shared.counters.snapshot(live, queued)
    }

    /// Stop the workers and cancel every fiber that has not finished.
    ///
    /// Workers finish the turn they are in, then exit. Fibers still queued
    /// or parked are dropped; their handles observe
    /// [`FiberError::Cancelled`]. Idempotent.
    pub fn shutdown(&self) {
        let was_closed = {
            let _gate = self.shared.gate.write().unwrap_or_else(PoisonError::into_inner);
            self.shared.closed.swap(true, Ordering::AcqRel)
        };
        if was_closed {
            return;
        }

        let pool = lock(&self.pool).take();
        if let Some(pool) = pool {
            pool.finish();
        }

        let mut cancelled = 0usize;
        while let Ok(runnable) = self.shared.ready_rx.try_recv() {
            drop(runnable);
            self.shared.retire();
            cancelled += 1;
        }

        let tokens: Vec<AwaitToken> = self.shared.suspended.iter().map(|e| *e.key()).collect();
        for token in tokens {
            let Some((_, slot)) = self.shared.suspended.remove(&token) else {
                continue;
            };
            if let Some(context) = slot.into_context() {
                drop(context);
                Counters::drop_one(&self.shared.counters.suspended);
                self.shared.retire();
                cancelled += 1;
            }
        }

        info!(cancelled, "scheduler shut down");
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}
