//! # engine_scheduler
//!
//! Runs many [`Fiber`](engine_fiber::Fiber)s cooperatively on a fixed pool
//! of worker threads. No worker ever blocks on a suspension point: a fiber
//! that suspends is parked in the suspension table and only re-enters the
//! ready queue when someone calls [`Scheduler::notify_ready`] (usually via a
//! [`Completion`]) for the token it is waiting on.
//!
//! - [`SchedulerConfig`]: worker count and thread naming.
//! - [`Scheduler`]: submit, notify, pump, wait, shut down.
//! - [`Completion`]: the callback half of a suspension point, safe to move
//!   into I/O or GPU driver callbacks on any thread.
//! - [`SchedulerStats`]: counters for tests and diagnostics.
//!
//! ## Usage
//!
//! ```rust
//! use engine_scheduler::{Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default().with_workers(2)).unwrap();
//! let (point, completion) = scheduler.suspension::<u32>("answer available");
//!
//! let handle = scheduler
//!     .run_as_fiber(move |cx| async move {
//!         let answer = cx.suspend(point).await?;
//!         Ok(answer * 2)
//!     })
//!     .unwrap();
//!
//! // Typically called from an I/O callback on another thread.
//! completion.complete(21).unwrap();
//! assert_eq!(handle.join().unwrap(), 42);
//! scheduler.shutdown();
//! ```

pub mod completion;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod stats;

mod suspended;
mod worker;

pub use completion::Completion;
pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use scheduler::Scheduler;
pub use stats::SchedulerStats;
