//! Small shared helpers.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a callback panicked while holding it.
///
/// All state guarded this way is replaced wholesale on each transition, so a
/// poisoned value is still internally consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
