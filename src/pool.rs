//! Reference-counted registry of compiled `zstd` dictionaries (C3).
//!
//! Compiling a dictionary blob into encoder/decoder objects is expensive and the objects are
//! immutable once built, so many metadata records — across namespaces, and across old and new
//! routing-table generations — share one compiled instance through this pool. Reference counts
//! reflect *installations* (how many metadata records reference an entry), not per-read borrows:
//! the hot path never touches the pool's mutex.

use crate::codec::CompiledDict;
use crate::error::Error;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct Entry {
    compiled: Arc<CompiledDict>,
    refcount: usize,
}

/// The process-wide dictionary pool.
#[derive(Default)]
pub struct Pool {
    entries: Mutex<HashMap<String, Entry>>,
}

/// Identity key for a dictionary: its signature if it has one, else its blob file path.
#[must_use]
pub fn identity_key(signature: Option<&str>, dict_path: &std::path::Path) -> String {
    signature.map_or_else(|| dict_path.to_string_lossy().into_owned(), str::to_owned)
}

impl Pool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `compiled` under `key` on behalf of `installations` namespace placements (at
    /// least 1). If an entry already exists under this identity — e.g. a later scan's metadata
    /// record references the same dictionary path or signature as one already installed by an
    /// earlier, still-live table — the caller's freshly compiled handles are discarded in favor
    /// of the existing shared ones, and `installations` is added to the running count: every
    /// metadata record that references this entry, across however many table generations are
    /// simultaneously alive, will eventually call [`Pool::release`] exactly once.
    ///
    /// Returns the [`Arc<CompiledDict>`] the caller's metadata record should store — either the
    /// one just installed, or the pre-existing shared one — paired with whether this call was the
    /// entry's first installation (`true`) or reused an already-pooled identity (`false`).
    pub fn retain(
        &self,
        key: &str,
        compiled: Arc<CompiledDict>,
        installations: usize,
    ) -> (Arc<CompiledDict>, bool) {
        let installations = installations.max(1);
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.refcount += installations;
            return (Arc::clone(&entry.compiled), false);
        }
        entries.insert(key.to_owned(), Entry { compiled: Arc::clone(&compiled), refcount: installations });
        (compiled, true)
    }

    /// Decrements the reference count for `key`. Returns the remaining count, or `-1` if `key`
    /// was not found. When the count reaches zero the entry is unlinked; the compiled handles are
    /// then dropped outside the lock (by virtue of `Arc`'s last-drop semantics once `entry` goes
    /// out of scope after the lock is released).
    pub fn release(&self, key: &str) -> i64 {
        let removed_entry = {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                None => return -1,
                Some(entry) => {
                    entry.refcount = entry.refcount.saturating_sub(1);
                    if entry.refcount == 0 {
                        entries.remove(key)
                    } else {
                        return entry.refcount as i64;
                    }
                },
            }
        };
        drop(removed_entry);
        0
    }

    /// Read-only lookup of the current reference count for `key`, or `-1` if not found.
    #[must_use]
    pub fn refcount(&self, key: &str) -> i64 {
        self.entries.lock().get(key).map_or(-1, |e| e.refcount as i64)
    }

    /// Diagnostic listing of every pool entry and its reference count.
    pub fn dump(&self, writer: &mut impl std::io::Write) -> Result<(), Error> {
        let entries = self.entries.lock();
        for (key, entry) in entries.iter() {
            writeln!(writer, "{key}\trefcount={}", entry.refcount)?;
        }
        Ok(())
    }

    /// Tears down the registry, dropping every compiled dictionary exactly once.
    pub fn shutdown(&self) {
        self.entries.lock().clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

// -------------------------------------------------------------------------------------------------
//
// Tests
