//! Connection lock serializing every native call on a connection.
//!
//! The lock is re-entrant: a thread that already holds it (for example a
//! cursor reading column metadata during a fill) can take it again. Each
//! [`ConnectionGuard`] unlocks on drop, so lock and unlock are always
//! strictly paired.

use std::ptr;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// Mutual-exclusion gate around a connection's native handle.
#[derive(Debug, Default)]
pub struct ConnectionLock {
    mutex: ReentrantMutex<()>,
}

/// Guard holding the connection lock for its lifetime.
///
/// Also serves as proof of holding the lock for the `*_locked` accessors on
/// [`Query`](crate::Query).
#[must_use = "the connection is unlocked as soon as the guard is dropped"]
pub struct ConnectionGuard<'a> {
    lock: &'a ConnectionLock,
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl ConnectionLock {
    /// Creates an unlocked connection lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock, blocking the calling thread until it is held.
    pub fn lock(&self) -> ConnectionGuard<'_> {
        ConnectionGuard {
            lock: self,
            _guard: self.mutex.lock(),
        }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<ConnectionGuard<'_>> {
        self.mutex.try_lock().map(|guard| ConnectionGuard {
            lock: self,
            _guard: guard,
        })
    }

    /// Returns `true` if some thread currently holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.mutex.is_locked()
    }
}

impl ConnectionGuard<'_> {
    /// Returns `true` if this guard holds `lock`.
    #[must_use]
    pub fn holds(&self, lock: &ConnectionLock) -> bool {
        ptr::eq(self.lock, lock)
    }
}

impl std::fmt::Debug for ConnectionGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard").finish_non_exhaustive()
    }
}
