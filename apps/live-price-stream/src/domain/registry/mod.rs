//! Subscription Registry
//!
//! A keyed table of cleanup handles for every timer, interval and stream a
//! session owns. All teardown in the crate goes through this table, which is
//! what guarantees that each resource is released exactly once.
//!
//! # Guarantees
//!
//! - Registering an id that already exists releases the previous entry first.
//! - `unregister` on an unknown id is a no-op, so double-unregister is safe.
//! - Releases run outside the internal lock; a release may call back into
//!   the registry.
//! - A panicking release is caught and logged, never propagated.
//! - Dropping the registry releases every remaining entry.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Types
// =============================================================================

/// Kind of resource held by a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// One-shot timer (reconnect delay, trailing flush).
    Timer,
    /// Periodic timer (heartbeat).
    Interval,
    /// Live transport stream.
    Stream,
    /// Arbitrary cleanup action.
    Cleanup,
}

impl ResourceKind {
    /// Label used in ids, logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Interval => "interval",
            Self::Stream => "stream",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Zero-argument cleanup action, run at most once.
pub struct Release(Option<Box<dyn FnOnce() + Send>>);

impl Release {
    /// Wrap an arbitrary cleanup closure.
    #[must_use]
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// Release by cancelling a task's cancellation token.
    #[must_use]
    pub fn cancel(token: CancellationToken) -> Self {
        Self::new(move || token.cancel())
    }

    /// Release that does nothing.
    #[must_use]
    pub const fn noop() -> Self {
        Self(None)
    }

    /// Run the release, catching and logging a panic.
    fn run(mut self, id: &str) {
        let Some(f) = self.0.take() else {
            return;
        };

        if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(id, reason = %reason, "Release failed");
        }
    }
}

impl fmt::Debug for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Release")
            .field(&if self.0.is_some() { "pending" } else { "noop" })
            .finish()
    }
}

/// A resource to install in the registry.
#[derive(Debug)]
pub struct Registration {
    id: String,
    kind: ResourceKind,
    release: Release,
    symbol: Option<String>,
    owner: Option<String>,
}

impl Registration {
    /// Create a registration with no owning symbol or owner.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ResourceKind, release: Release) -> Self {
        Self {
            id: id.into(),
            kind,
            release,
            symbol: None,
            owner: None,
        }
    }

    /// Tag the registration with its owning symbol.
    #[must_use]
    pub fn for_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// Tag the registration with its owning subscriber.
    #[must_use]
    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Read-only view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    /// Registration id.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Owning symbol, if any.
    pub symbol: Option<String>,
    /// Owning subscriber, if any.
    pub owner: Option<String>,
    /// Time since registration.
    pub age: Duration,
}

impl RegistrationInfo {
    /// Age in whole milliseconds.
    #[must_use]
    pub fn age_ms(&self) -> u64 {
        u64::try_from(self.age.as_millis()).unwrap_or(u64::MAX)
    }
}

struct Entry {
    kind: ResourceKind,
    symbol: Option<String>,
    owner: Option<String>,
    created_at: Instant,
    release: Release,
}

// =============================================================================
// Registry
// =============================================================================

/// Thread-safe table of cleanup handles.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use live_price_stream::domain::registry::{
///     Registration, Release, ResourceKind, SubscriptionRegistry,
/// };
///
/// let registry = SubscriptionRegistry::new();
/// let released = Arc::new(AtomicU32::new(0));
///
/// let counter = Arc::clone(&released);
/// registry.register(
///     Registration::new("heartbeat", ResourceKind::Interval, Release::new(move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     }))
///     .for_symbol("AAPL"),
/// );
///
/// registry.unregister("heartbeat");
/// registry.unregister("heartbeat");
/// assert_eq!(released.load(Ordering::SeqCst), 1);
/// assert!(registry.is_empty());
/// ```
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Install a registration, releasing any previous entry with the same id.
    pub fn register(&self, registration: Registration) {
        let Registration {
            id,
            kind,
            release,
            symbol,
            owner,
        } = registration;

        let entry = Entry {
            kind,
            symbol,
            owner,
            created_at: Instant::now(),
            release,
        };

        let previous = self.entries.lock().remove(&id);
        if let Some(previous) = previous {
            tracing::debug!(id = %id, kind = %previous.kind, "Replacing registration");
            previous.release.run(&id);
        }

        // A concurrent register may have raced in while the old release ran.
        let raced = self.entries.lock().insert(id.clone(), entry);
        if let Some(raced) = raced {
            raced.release.run(&id);
        }
    }

    /// Release and remove an entry. No-op if absent.
    pub fn unregister(&self, id: &str) {
        let removed = self.entries.lock().remove(id);

        if let Some(entry) = removed {
            entry.release.run(id);
        }
    }

    /// Release every entry owned by `symbol`.
    pub fn clear_for_symbol(&self, symbol: &str) {
        self.release_matching(|entry| entry.symbol.as_deref() == Some(symbol));
    }

    /// Release every entry owned by `owner`.
    pub fn clear_for_owner(&self, owner: &str) {
        self.release_matching(|entry| entry.owner.as_deref() == Some(owner));
    }

    /// Release everything.
    pub fn clear_all(&self) {
        self.release_matching(|_| true);
    }

    /// Check whether an id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Diagnostic view of all entries, sorted by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RegistrationInfo> {
        let mut infos: Vec<_> = self
            .entries
            .lock()
            .iter()
            .map(|(id, entry)| RegistrationInfo {
                id: id.clone(),
                kind: entry.kind,
                symbol: entry.symbol.clone(),
                owner: entry.owner.clone(),
                age: entry.created_at.elapsed(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    fn release_matching(&self, predicate: impl Fn(&Entry) -> bool) {
        let removed: Vec<(String, Entry)> = {
            let mut entries = self.entries.lock();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| predicate(entry))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        for (id, entry) in removed {
            entry.release.run(&id);
        }
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        let remaining = std::mem::take(self.entries.get_mut());
        if !remaining.is_empty() {
            tracing::debug!(count = remaining.len(), "Releasing remaining registrations");
        }
        for (id, entry) in remaining {
            entry.release.run(&id);
        }
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn counting_release(counter: &Arc<AtomicU32>) -> Release {
        let counter = Arc::clone(counter);
        Release::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn unregister_runs_release_once() {
        let registry = SubscriptionRegistry::new();
        let released = Arc::new(AtomicU32::new(0));

        registry.register(Registration::new(
            "a",
            ResourceKind::Timer,
            counting_release(&released),
        ));
        registry.unregister("a");
        registry.unregister("a");

        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_unknown_id_is_noop() {
        let registry = SubscriptionRegistry::new();
        registry.unregister("missing");
        assert!(registry.is_empty());
    }

    #[test]
    fn register_same_id_releases_previous() {
        let registry = SubscriptionRegistry::new();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        registry.register(Registration::new(
            "ws",
            ResourceKind::Stream,
            counting_release(&first),
        ));
        registry.register(Registration::new(
            "ws",
            ResourceKind::Stream,
            counting_release(&second),
        ));

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn replaced_release_runs_before_new_entry_is_installed() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let weak = Arc::downgrade(&registry);

        registry.register(Registration::new(
            "x",
            ResourceKind::Cleanup,
            Release::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.unregister("x");
                }
            }),
        ));
        registry.register(Registration::new("x", ResourceKind::Timer, Release::noop()));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].kind, ResourceKind::Timer);
    }

    #[test]
    fn clear_for_symbol_only_touches_that_symbol() {
        let registry = SubscriptionRegistry::new();
        let aapl = Arc::new(AtomicU32::new(0));
        let msft = Arc::new(AtomicU32::new(0));

        registry.register(
            Registration::new("aapl-ws", ResourceKind::Stream, counting_release(&aapl))
                .for_symbol("AAPL"),
        );
        registry.register(
            Registration::new("aapl-hb", ResourceKind::Interval, counting_release(&aapl))
                .for_symbol("AAPL"),
        );
        registry.register(
            Registration::new("msft-ws", ResourceKind::Stream, counting_release(&msft))
                .for_symbol("MSFT"),
        );

        registry.clear_for_symbol("AAPL");

        assert_eq!(aapl.load(Ordering::SeqCst), 2);
        assert_eq!(msft.load(Ordering::SeqCst), 0);
        assert!(registry.contains("msft-ws"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clear_for_owner_preserves_other_owners() {
        let registry = SubscriptionRegistry::new();

        registry.register(
            Registration::new("one", ResourceKind::Stream, Release::noop())
                .for_symbol("AAPL")
                .owned_by("cell-1"),
        );
        registry.register(
            Registration::new("two", ResourceKind::Stream, Release::noop())
                .for_symbol("AAPL")
                .owned_by("cell-2"),
        );

        registry.clear_for_owner("cell-1");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].owner.as_deref(), Some("cell-2"));
    }

    #[test]
    fn clear_all_releases_everything() {
        let registry = SubscriptionRegistry::new();
        let released = Arc::new(AtomicU32::new(0));

        for i in 0..5 {
            registry.register(Registration::new(
                format!("id-{i}"),
                ResourceKind::Cleanup,
                counting_release(&released),
            ));
        }

        registry.clear_all();
        registry.clear_all();

        assert_eq!(released.load(Ordering::SeqCst), 5);
        assert!(registry.is_empty());
    }

    #[test]
    fn panicking_release_is_contained() {
        let registry = SubscriptionRegistry::new();
        let released = Arc::new(AtomicU32::new(0));

        registry.register(Registration::new(
            "bad",
            ResourceKind::Cleanup,
            Release::new(|| panic!("boom")),
        ));
        registry.register(Registration::new(
            "good",
            ResourceKind::Cleanup,
            counting_release(&released),
        ));

        registry.clear_all();

        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn release_may_reenter_registry() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let inner = Arc::clone(&registry);

        registry.register(Registration::new(
            "child",
            ResourceKind::Timer,
            Release::noop(),
        ));
        registry.register(Registration::new(
            "parent",
            ResourceKind::Cleanup,
            Release::new(move || inner.unregister("child")),
        ));

        registry.unregister("parent");

        assert!(registry.is_empty());
    }

    #[test]
    fn cancel_release_cancels_token() {
        let registry = SubscriptionRegistry::new();
        let token = CancellationToken::new();

        registry.register(Registration::new(
            "stream",
            ResourceKind::Stream,
            Release::cancel(token.clone()),
        ));
        assert!(!token.is_cancelled());

        registry.unregister("stream");
        assert!(token.is_cancelled());
    }

    #[test]
    fn drop_releases_remaining_entries() {
        let released = Arc::new(AtomicU32::new(0));
        {
            let registry = SubscriptionRegistry::new();
            registry.register(Registration::new(
                "a",
                ResourceKind::Timer,
                counting_release(&released),
            ));
            registry.register(Registration::new(
                "b",
                ResourceKind::Interval,
                counting_release(&released),
            ));
        }
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn snapshot_reports_entries_without_side_effects() {
        let registry = SubscriptionRegistry::new();
        let released = Arc::new(AtomicU32::new(0));

        registry.register(
            Registration::new("b", ResourceKind::Interval, counting_release(&released))
                .for_symbol("MSFT"),
        );
        registry.register(
            Registration::new("a", ResourceKind::Stream, counting_release(&released))
                .for_symbol("AAPL")
                .owned_by("cell-1"),
        );

        let snapshot = registry.snapshot();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "a");
        assert_eq!(snapshot[0].kind, ResourceKind::Stream);
        assert_eq!(snapshot[0].symbol.as_deref(), Some("AAPL"));
        assert_eq!(snapshot[1].id, "b");
        assert!(snapshot[1].owner.is_none());
        assert!(snapshot[0].age_ms() < 1_000);
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn thread_safety_concurrent_registrations() {
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        let released = Arc::new(AtomicU32::new(0));
        let mut handles = vec![];

        for i in 0..10 {
            let r = Arc::clone(&registry);
            let c = Arc::clone(&released);
            handles.push(thread::spawn(move || {
                r.register(
                    Registration::new(format!("id-{i}"), ResourceKind::Timer, counting_release(&c))
                        .owned_by(format!("owner-{}", i % 2)),
                );
                r.register(Registration::new(
                    "shared",
                    ResourceKind::Timer,
                    counting_release(&c),
                ));
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // Nine of the ten "shared" registrations were replaced.
        assert_eq!(released.load(Ordering::SeqCst), 9);
        assert_eq!(registry.len(), 11);

        registry.clear_for_owner("owner-0");
        registry.clear_for_owner("owner-1");
        registry.clear_all();

        assert_eq!(released.load(Ordering::SeqCst), 20);
    }
}
