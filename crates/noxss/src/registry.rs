//! Allow-once registry of pre-approved resource URLs.
//!
//! When an approved page is relayed through the proxy, the resources it
//! embeds from other origins are recorded here. The next request for each
//! such URL passes without prompting, and the entry is consumed by that
//! request.
//!
//! # Properties
//!
//! - **No duplicates**: [`PendingApprovals::add`] is a no-op for a URL that
//!   is already pending.
//! - **At most once**: [`PendingApprovals::try_consume`] checks and removes
//!   under a single lock, so two concurrent requests for the same URL can
//!   never both succeed.
//! - **Exact match**: URLs are compared as raw strings. No normalization
//!   (trailing slash, default port, case) is applied.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Concurrency-safe, single-use set of URLs.
///
/// Insertion order is preserved so diagnostic listings are deterministic.
#[derive(Debug, Default)]
pub struct PendingApprovals {
    entries: Mutex<Vec<String>>,
}

impl PendingApprovals {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `url` if it is not already pending.
    ///
    /// Returns `true` if the URL was inserted, `false` if it was already
    /// present.
    pub fn add(&self, url: &str) -> bool {
        let mut entries = self.lock();
        if entries.iter().any(|e| e == url) {
            return false;
        }
        entries.push(url.to_string());
        true
    }

    /// Remove `url` if it is pending.
    ///
    /// Returns `true` if an entry was removed. Presence check and removal
    /// happen under the same lock.
    pub fn try_consume(&self, url: &str) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|e| e == url) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether `url` is currently pending.
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.lock().iter().any(|e| e == url)
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no entries are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the pending entries in insertion order.
    ///
    /// The copy is detached from the registry; concurrent consumers may
    /// remove entries after it is taken.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().clone()
    }

    // push and remove are the only mutations, so a poisoned guard still
    // holds a consistent Vec.
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_add_then_consume() {
        let registry = PendingApprovals::new();
        assert!(registry.add("http://cdn.test/i.png"));
        assert!(registry.contains("http://cdn.test/i.png"));

        assert!(registry.try_consume("http://cdn.test/i.png"));
        assert!(!registry.contains("http://cdn.test/i.png"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_consume_missing_returns_false() {
        let registry = PendingApprovals::new();
        assert!(!registry.try_consume("http://cdn.test/i.png"));
    }

    #[test]
    fn test_double_add_single_consume_leaves_nothing() {
        let registry = PendingApprovals::new();
        assert!(registry.add("http://cdn.test/a.js"));
        assert!(!registry.add("http://cdn.test/a.js"));
        assert_eq!(registry.len(), 1);

        assert!(registry.try_consume("http://cdn.test/a.js"));
        assert!(!registry.try_consume("http://cdn.test/a.js"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_idempotent_add_keeps_existing_entry() {
        let registry = PendingApprovals::new();
        registry.add("http://a.test/1");
        registry.add("http://a.test/2");
        registry.add("http://a.test/1");

        assert_eq!(
            registry.snapshot(),
            vec!["http://a.test/1".to_string(), "http://a.test/2".to_string()]
        );
    }

    #[test]
    fn test_exact_string_match_only() {
        let registry = PendingApprovals::new();
        registry.add("http://cdn.test/lib.js");

        assert!(!registry.try_consume("http://cdn.test/lib.js/"));
        assert!(!registry.try_consume("http://CDN.test/lib.js"));
        assert!(!registry.try_consume("http://cdn.test:80/lib.js"));
        assert!(registry.contains("http://cdn.test/lib.js"));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry = PendingApprovals::new();
        registry.add("http://a.test/x");
        let snapshot = registry.snapshot();
        registry.try_consume("http://a.test/x");

        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_consume_single_winner() {
        const WORKERS: usize = 16;
        let registry = Arc::new(PendingApprovals::new());
        registry.add("http://cdn.test/race.png");
        let barrier = Arc::new(Barrier::new(WORKERS));

        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.try_consume("http://cdn.test/race.png")
                })
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|consumed| *consumed)
            .count();
        assert_eq!(successes, 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_add_no_duplicates() {
        const WORKERS: usize = 16;
        let registry = Arc::new(PendingApprovals::new());
        let barrier = Arc::new(Barrier::new(WORKERS));

        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.add("http://cdn.test/dup.css")
                })
            })
            .collect();

        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|added| *added)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(registry.len(), 1);
    }
}
