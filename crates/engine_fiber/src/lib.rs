//! # engine_fiber
//!
//! The unit of cooperative work for the engine task core.
//!
//! A fiber is a suspendable computation with its own preserved locals and a
//! result slot. It runs only when someone calls `resume` on it, and it gives
//! control back either by finishing or by parking at a [`SuspensionPoint`].
//!
//! This crate provides:
//!
//! - [`ExecutionContext`]: the type-erased execution context (state tag,
//!   parked computation, mailbox). Schedulers move these around.
//! - [`Fiber`]: a typed wrapper that pairs a context with a result slot.
//! - [`FiberHandle`]: the observer side of a fiber's result.
//! - [`FiberContext`]: what the entry computation receives; the only way to
//!   suspend or yield.
//! - [`SuspensionPoint`] / [`AwaitToken`]: a named awaited condition and its
//!   resumption type.
//! - [`FiberError`]: every way a fiber or its caller can go wrong.
//!
//! ## Usage
//!
//! ```rust
//! use engine_fiber::{Fiber, FiberState, SuspensionPoint};
//!
//! let point = SuspensionPoint::<u32>::new("value available");
//! let token = point.token();
//!
//! let mut fiber = Fiber::new(move |cx| async move {
//!     let base = 10;
//!     let delivered = cx.suspend(point).await?;
//!     Ok(base + delivered)
//! });
//!
//! assert_eq!(fiber.resume(None).unwrap(), FiberState::Suspended);
//! assert_eq!(fiber.awaiting(), Some(token));
//! assert_eq!(fiber.resume(Some(Box::new(5u32))).unwrap(), FiberState::Completed);
//! assert_eq!(fiber.take_result().unwrap(), 15);
//! ```

pub mod context;
pub mod error;
pub mod fiber;
pub mod suspend;

pub mod sync;

pub use context::{ExecutionContext, FiberId, FiberState};
pub use error::FiberError;
pub use fiber::{Fiber, FiberHandle};
pub use suspend::{Abandoned, AwaitToken, FiberContext, ResumeValue, Suspend, SuspensionPoint, YieldNow};
