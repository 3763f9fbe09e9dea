//! Staleness Guard
//!
//! Holds the subscriber's current session token. Every asynchronous boundary
//! (transport open, frame, error, close, timer fire) captures the token it was
//! started under and runs its effects through [`StalenessGuard::run_if_current`],
//! which discards the work if the token has since been superseded.
//!
//! The guard is a re-entrant lock: effects run while it is held, so `stop`
//! (which also takes it) cannot interleave with an in-flight delivery, while a
//! subscriber callback may still unsubscribe from inside itself.

use std::cell::Cell;

use parking_lot::ReentrantMutex;

use super::SessionToken;

/// Per-subscriber current-token gate.
#[derive(Debug, Default)]
pub struct StalenessGuard {
    current: ReentrantMutex<Cell<u64>>,
}

impl StalenessGuard {
    /// Create a guard with no session issued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token, invalidating every earlier one.
    pub fn issue(&self) -> SessionToken {
        let current = self.current.lock();
        let next = current.get() + 1;
        current.set(next);
        SessionToken::new(next)
    }

    /// Invalidate the current token without issuing a new session.
    pub fn invalidate(&self) {
        let current = self.current.lock();
        current.set(current.get() + 1);
    }

    /// Check whether `token` is still current.
    #[must_use]
    pub fn is_current(&self, token: SessionToken) -> bool {
        self.current.lock().get() == token.value()
    }

    /// Run `f` while holding the guard, only if `token` is current.
    ///
    /// Returns `None` without running `f` when the token is stale.
    pub fn run_if_current<R>(&self, token: SessionToken, f: impl FnOnce() -> R) -> Option<R> {
        let current = self.current.lock();
        if current.get() != token.value() {
            tracing::trace!(token = %token, current = current.get(), "Discarding stale event");
            return None;
        }
        Some(f())
    }

    /// Run `f` while holding the guard unconditionally.
    pub fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _current = self.current.lock();
        f()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn issued_tokens_increase() {
        let guard = StalenessGuard::new();
        let a = guard.issue();
        let b = guard.issue();
        assert!(b > a);
        assert!(!guard.is_current(a));
        assert!(guard.is_current(b));
    }

    #[test]
    fn invalidate_makes_current_stale() {
        let guard = StalenessGuard::new();
        let token = guard.issue();
        guard.invalidate();
        assert!(!guard.is_current(token));
        assert!(guard.issue() > token);
    }

    #[test]
    fn run_if_current_skips_stale_work() {
        let guard = StalenessGuard::new();
        let old = guard.issue();
        let new = guard.issue();

        assert_eq!(guard.run_if_current(old, || 1), None);
        assert_eq!(guard.run_if_current(new, || 2), Some(2));
    }

    #[test]
    fn reentrant_invalidate_inside_critical_section() {
        let guard = StalenessGuard::new();
        let token = guard.issue();

        let ran = guard.run_if_current(token, || {
            guard.invalidate();
            guard.is_current(token)
        });

        assert_eq!(ran, Some(false));
        assert_eq!(guard.run_if_current(token, || ()), None);
    }

    #[test]
    fn invalidate_waits_for_in_flight_work() {
        let guard = Arc::new(StalenessGuard::new());
        let token = guard.issue();
        let finished = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();

        let worker = {
            let guard = Arc::clone(&guard);
            let finished = Arc::clone(&finished);
            std::thread::spawn(move || {
                guard.run_if_current(token, || {
                    entered_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(50));
                    finished.store(true, Ordering::SeqCst);
                });
            })
        };

        entered_rx.recv().unwrap();
        guard.invalidate();
        // Invalidation could only proceed once the in-flight work released the guard.
        assert!(finished.load(Ordering::SeqCst));

        worker.join().unwrap();
    }
}
