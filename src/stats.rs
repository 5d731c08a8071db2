//! Per-namespace and global compression statistics (C7).
//!
//! Every counter is a single-writer-per-counter relaxed atomic: many threads update disjoint
//! counters concurrently, and no cross-counter consistency is required or provided, matching
//! spec.md §4.7's "updates are single-writer-per-counter relaxed atomics".

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one namespace (or the global aggregate).
#[derive(Default)]
pub struct NamespaceStats {
    pub raw_bytes: AtomicU64,
    pub compressed_bytes: AtomicU64,
    pub reads: AtomicU64,
    pub writes: AtomicU64,

    pub compress_errors: AtomicU64,
    pub decompress_errors: AtomicU64,
    pub dict_miss_errors: AtomicU64,

    pub skipped_min_size: AtomicU64,
    pub skipped_max_size: AtomicU64,
    pub skipped_incompressible: AtomicU64,

    pub trainer_iterations: AtomicU64,
    pub trainer_errors: AtomicU64,
}

impl NamespaceStats {
    pub fn record_write(&self, raw: u64, compressed: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.raw_bytes.fetch_add(raw, Ordering::Relaxed);
        self.compressed_bytes.fetch_add(compressed, Ordering::Relaxed);
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> NamespaceStatsSnapshot {
        NamespaceStatsSnapshot {
            raw_bytes: self.raw_bytes.load(Ordering::Relaxed),
            compressed_bytes: self.compressed_bytes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            compress_errors: self.compress_errors.load(Ordering::Relaxed),
            decompress_errors: self.decompress_errors.load(Ordering::Relaxed),
            dict_miss_errors: self.dict_miss_errors.load(Ordering::Relaxed),
            skipped_min_size: self.skipped_min_size.load(Ordering::Relaxed),
            skipped_max_size: self.skipped_max_size.load(Ordering::Relaxed),
            skipped_incompressible: self.skipped_incompressible.load(Ordering::Relaxed),
            trainer_iterations: self.trainer_iterations.load(Ordering::Relaxed),
            trainer_errors: self.trainer_errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`NamespaceStats`]'s counters, cheap to hand out to callers that want
/// to read many fields without racing a live accumulator.
#[derive(Clone, Copy, Debug, Default)]
pub struct NamespaceStatsSnapshot {
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
    pub reads: u64,
    pub writes: u64,
    pub compress_errors: u64,
    pub decompress_errors: u64,
    pub dict_miss_errors: u64,
    pub skipped_min_size: u64,
    pub skipped_max_size: u64,
    pub skipped_incompressible: u64,
    pub trainer_iterations: u64,
    pub trainer_errors: u64,
}

/// Registry of per-namespace statistics plus one global aggregate.
#[derive(Default)]
pub struct StatsRegistry {
    pub global: NamespaceStats,
    per_namespace: DashMap<String, NamespaceStats>,
}

impl StatsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against both the global aggregate and the named namespace's counters, creating the
    /// namespace entry on first use.
    pub fn with_namespace(&self, namespace: &str, f: impl Fn(&NamespaceStats)) {
        f(&self.global);
        let entry = self.per_namespace.entry(namespace.to_owned()).or_default();
        f(&entry);
    }

    #[must_use]
    pub fn namespace_snapshot(&self, namespace: &str) -> Option<NamespaceStatsSnapshot> {
        self.per_namespace.get(namespace).map(|e| e.snapshot())
    }
}

// -------------------------------------------------------------------------------------------------
//
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_namespace_updates_both_global_and_named_counters() {
        let registry = StatsRegistry::new();
        registry.with_namespace("feed:", |s| s.record_write(100, 40));
        registry.with_namespace("feed:", |s| s.record_write(50, 20));

        let ns = registry.namespace_snapshot("feed:").expect("namespace must exist");
        assert_eq!(ns.writes, 2);
        assert_eq!(ns.raw_bytes, 150);
        assert_eq!(ns.compressed_bytes, 60);

        let global = registry.global.snapshot();
        assert_eq!(global.writes, 2);
        assert_eq!(global.raw_bytes, 150);
    }

    #[test]
    fn unknown_namespace_snapshot_is_none() {
        let registry = StatsRegistry::new();
        assert!(registry.namespace_snapshot("nope").is_none());
    }
}
