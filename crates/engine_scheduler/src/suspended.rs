//! Entries of the suspension table.
//!
//! A token moves through at most two entries before it is removed:
//!
//! ```text
//! Issued ──fiber parks──▶ Parked ──notify_ready──▶ (removed, fiber re-queued)
//!    └────notify_ready──▶ Completed ──fiber parks──▶ (removed, fiber re-queued)
//! ```
//!
//! The `Completed` path covers callbacks that fire before the fiber has
//! finished its current turn.

use engine_fiber::{ExecutionContext, ResumeValue};

pub(crate) enum Slot {
    /// Token handed out, fiber not parked yet, no completion yet.
    Issued,
    /// Completion arrived before the fiber parked.
    Completed(ResumeValue),
    /// Fiber parked, waiting for the completion.
    Parked(ExecutionContext),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotKind {
    Issued,
    Completed,
    Parked,
}

impl Slot {
    pub(crate) fn kind(&self) -> SlotKind {
        match self {
            Self::Issued => SlotKind::Issued,
            Self::Completed(_) => SlotKind::Completed,
            Self::Parked(_) => SlotKind::Parked,
        }
    }

    pub(crate) fn into_value(self) -> Option<ResumeValue> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn into_context(self) -> Option<ExecutionContext> {
        match self {
            Self::Parked(context) => Some(context),
            _ => None,
        }
    }
}
