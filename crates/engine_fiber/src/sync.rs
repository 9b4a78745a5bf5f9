//! Poison-tolerant locking shared by the engine crates.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
///
/// Fiber panics are caught and turned into `Failed` states, so a poisoned
/// lock only means a previous holder unwound; the data is still consistent.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
