use std::sync::{Mutex, MutexGuard, PoisonError};

/// Poison-immune mutex lock: a panicking caller callback must not wedge
/// the queue's bookkeeping for every other request.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
