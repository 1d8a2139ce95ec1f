//! Process-level helpers.

use std::sync::{Mutex, MutexGuard};

pub mod bootstrap;

/// Lock a std mutex, recovering the guard if a holder panicked.
///
/// Every mutex in this crate guards plain data whose invariants hold between
/// statements, so a poisoned lock is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
