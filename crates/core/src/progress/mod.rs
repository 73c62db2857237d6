//! Registry of named progress meters.
//!
//! Long-running operations (archive downloads, item batches, remote output
//! retrieval) register a meter under a key, update it from whichever worker
//! is doing the work, and remove it when done. The registry is shared by
//! cloning the tracker; every clone sees the same entries.
//!
//! # Example
//!
//! ```
//! use scanpress_core::ProgressTracker;
//!
//! let tracker = ProgressTracker::new();
//! let meter = tracker.start("book123", 100);
//! meter.update(40);
//! tracker.update("book123", 60);
//! assert_eq!(tracker.get("book123").unwrap().consumed, 100);
//! tracker.finish("book123");
//! assert!(!tracker.is_active("book123"));
//! ```

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Progress of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressMeter {
    /// Expected total units (0 when unknown).
    pub total: u64,
    /// Units consumed so far.
    pub consumed: u64,
}

impl ProgressMeter {
    /// Fraction completed in `[0, 1]`, or `None` when the total is unknown.
    pub fn fraction(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some((self.consumed as f64 / self.total as f64).min(1.0))
    }
}

/// Thread-safe registry of progress meters.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    entries: Arc<Mutex<HashMap<String, ProgressMeter>>>,
}

impl ProgressTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProgressMeter>> {
        // A panicking updater cannot leave a meter half-written.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a meter, replacing any previous one under the same key.
    pub fn start(&self, key: impl Into<String>, total: u64) -> ProgressHandle {
        let key = key.into();
        debug!("Progress started: {} ({} units)", key, total);
        self.lock().insert(key.clone(), ProgressMeter { total, consumed: 0 });

        ProgressHandle {
            key,
            tracker: self.clone(),
        }
    }

    /// Adds `delta` to a meter. Unknown keys are ignored.
    pub fn update(&self, key: &str, delta: u64) {
        if let Some(meter) = self.lock().get_mut(key) {
            meter.consumed = meter.consumed.saturating_add(delta);
        }
    }

    /// Removes a meter, returning its final value. Unknown keys are ignored.
    pub fn finish(&self, key: &str) -> Option<ProgressMeter> {
        let meter = self.lock().remove(key);
        if let Some(m) = meter {
            debug!("Progress finished: {} ({}/{})", key, m.consumed, m.total);
        }
        meter
    }

    /// Returns a copy of a meter.
    pub fn get(&self, key: &str) -> Option<ProgressMeter> {
        self.lock().get(key).copied()
    }

    /// Whether a meter is registered under `key`.
    pub fn is_active(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Copies all meters, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, ProgressMeter)> {
        let mut entries: Vec<_> = self
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of active meters.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no meter is active.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Handle to one registered meter.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    key: String,
    tracker: ProgressTracker,
}

impl ProgressHandle {
    /// Key of the meter.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Adds `delta` to the meter.
    pub fn update(&self, delta: u64) {
        self.tracker.update(&self.key, delta);
    }

    /// Current value of the meter, if still registered.
    pub fn meter(&self) -> Option<ProgressMeter> {
        self.tracker.get(&self.key)
    }

    /// Removes the meter.
    pub fn finish(self) -> Option<ProgressMeter> {
        self.tracker.finish(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_start_update_finish() {
        let tracker = ProgressTracker::new();
        tracker.start("a", 100);
        tracker.update("a", 40);
        tracker.update("a", 60);

        assert_eq!(
            tracker.get("a"),
            Some(ProgressMeter {
                total: 100,
                consumed: 100
            })
        );

        let last = tracker.finish("a").unwrap();
        assert_eq!(last.consumed, 100);
        assert!(!tracker.is_active("a"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_update_unknown_key_is_noop() {
        let tracker = ProgressTracker::new();
        tracker.update("missing", 10);
        assert!(tracker.get("missing").is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_finish_without_start_is_noop() {
        let tracker = ProgressTracker::new();
        tracker.start("a", 1);
        assert!(tracker.finish("b").is_none());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_handle_updates_shared_registry() {
        let tracker = ProgressTracker::new();
        let handle = tracker.start("book", 10);
        handle.update(3);
        assert_eq!(tracker.get("book").unwrap().consumed, 3);
        assert_eq!(handle.meter().unwrap().fraction(), Some(0.3));

        handle.finish();
        assert!(!tracker.is_active("book"));
    }

    #[test]
    fn test_unknown_total_has_no_fraction() {
        let meter = ProgressMeter {
            total: 0,
            consumed: 512,
        };
        assert!(meter.fraction().is_none());
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let tracker = ProgressTracker::new();
        tracker.start("b", 1);
        tracker.start("a", 2);

        let keys: Vec<_> = tracker.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_concurrent_updates() {
        let tracker = ProgressTracker::new();
        tracker.start("shared", 8000);
        tracker.start("other", 8000);

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let tracker = tracker.clone();
                thread::spawn(move || {
                    let key = if i % 2 == 0 { "shared" } else { "other" };
                    for _ in 0..1000 {
                        tracker.update(key, 1);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(tracker.get("shared").unwrap().consumed, 4000);
        assert_eq!(tracker.get("other").unwrap().consumed, 4000);
    }
}
