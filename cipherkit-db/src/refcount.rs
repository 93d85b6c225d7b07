//! Reference-counted ownership of native resources.
//!
//! A [`RefCounted`] starts with one reference held by its owner. Every
//! operation that touches the resource takes a scoped [`ReferenceGuard`]
//! for its duration, so a concurrent [`close`](RefCounted::close) from
//! another owner cannot tear the resource down mid-operation. The resource
//! is dropped exactly once, when the last reference goes away.

use parking_lot::Mutex;

use crate::error::{DbError, DbResult};

#[derive(Debug)]
struct Counter {
    references: usize,
    closed: bool,
}

/// A resource shared by several holders and torn down by the last one.
pub struct RefCounted<T> {
    label: &'static str,
    counter: Mutex<Counter>,
    resource: Mutex<Option<T>>,
}

impl<T> RefCounted<T> {
    /// Wraps `resource` with a single (owner) reference.
    pub fn new(label: &'static str, resource: T) -> Self {
        Self {
            label,
            counter: Mutex::new(Counter {
                references: 1,
                closed: false,
            }),
            resource: Mutex::new(Some(resource)),
        }
    }

    /// Takes an additional reference.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the handle was closed or all
    /// references were already released.
    pub fn acquire(&self) -> DbResult<ReferenceGuard<'_, T>> {
        let mut counter = self.counter.lock();
        if counter.closed || counter.references == 0 {
            return Err(DbError::illegal_state(format!(
                "attempt to re-open an already-closed {}",
                self.label
            )));
        }
        counter.references += 1;
        Ok(ReferenceGuard { owner: self })
    }

    /// Releases the owner reference. Idempotent: only the first call
    /// releases anything. Teardown happens now if no operation is in flight,
    /// otherwise when the last guard drops.
    pub fn close(&self) {
        {
            let mut counter = self.counter.lock();
            if counter.closed {
                return;
            }
            counter.closed = true;
        }
        self.release();
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.counter.lock().closed
    }

    /// Current number of references, including the owner's.
    pub fn reference_count(&self) -> usize {
        self.counter.lock().references
    }

    fn release(&self) {
        let last = {
            let mut counter = self.counter.lock();
            counter.references = counter.references.saturating_sub(1);
            counter.references == 0
        };
        if last {
            let resource = self.resource.lock().take();
            if resource.is_some() {
                tracing::trace!(label = self.label, "all references released");
            }
            drop(resource);
        }
    }
}

impl<T> std::fmt::Debug for RefCounted<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counter = self.counter.lock();
        f.debug_struct("RefCounted")
            .field("label", &self.label)
            .field("references", &counter.references)
            .field("closed", &counter.closed)
            .finish()
    }
}

/// A scoped reference. Released when dropped, on every exit path.
#[must_use = "the reference is released as soon as the guard is dropped"]
pub struct ReferenceGuard<'a, T> {
    owner: &'a RefCounted<T>,
}

impl<T> ReferenceGuard<'_, T> {
    /// Runs `f` with exclusive access to the resource.
    ///
    /// Do not call `with` on the same handle from inside `f`: access is
    /// exclusive and not re-entrant.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the resource is gone, which
    /// cannot happen while this guard is alive unless the counter was
    /// corrupted.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> DbResult<R> {
        let mut resource = self.owner.resource.lock();
        resource.as_mut().map(f).ok_or_else(|| {
            DbError::illegal_state(format!("{} already torn down", self.owner.label))
        })
    }
}

impl<T> Drop for ReferenceGuard<'_, T> {
    fn drop(&mut self) {
        self.owner.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::error::ErrorKind;

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tracked() -> (RefCounted<Tracked>, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        (RefCounted::new("resource", Tracked(Arc::clone(&drops))), drops)
    }

    #[test]
    fn test_close_without_holders_tears_down_once() {
        let (handle, drops) = tracked();
        assert_eq!(handle.reference_count(), 1);
        handle.close();
        handle.close();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(handle.reference_count(), 0);
    }

    #[test]
    fn test_close_waits_for_last_holder() {
        let (handle, drops) = tracked();
        let guard = handle.acquire().expect("acquire");
        handle.close();
        assert_eq!(drops.load(Ordering::SeqCst), 0, "still held");
        assert!(guard.with(|_| ()).is_ok());
        drop(guard);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_acquire_after_close_is_illegal_state() {
        let (handle, _drops) = tracked();
        handle.close();
        let err = handle.acquire().err().expect("closed");
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn test_nested_acquire_counts_each_guard() {
        let (handle, drops) = tracked();
        {
            let outer = handle.acquire().expect("outer");
            let inner = handle.acquire().expect("inner");
            assert_eq!(handle.reference_count(), 3);
            drop(inner);
            assert_eq!(handle.reference_count(), 2);
            drop(outer);
        }
        assert_eq!(handle.reference_count(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_holders_release_exactly_once() {
        let (handle, drops) = tracked();
        let handle = Arc::new(handle);
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handle = Arc::clone(&handle);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if let Ok(guard) = handle.acquire() {
                            guard.with(|_| ()).expect("resource alive while held");
                        }
                    }
                })
            })
            .collect();
        handle.close();
        for t in threads {
            t.join().expect("thread join");
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
