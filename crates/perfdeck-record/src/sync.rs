use std::sync::Mutex;
use std::sync::MutexGuard;

use tracing::warn;

/// Locks a mutex, recovering the guard if a panicking holder poisoned it.
/// Controller state stays usable after a task panic; the warning is the
/// only trace of it.
pub(crate) fn mutex_lock_or_recover<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!("recovering from poisoned mutex");
        poisoned.into_inner()
    })
}
