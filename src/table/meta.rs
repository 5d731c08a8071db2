//! Dictionary metadata and the routing table it lives in (C5 data model).

use crate::codec::CompiledDict;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A 16-bit dictionary selector. `0` means "no dictionary"; `0xFFFF`, as a wire-format prefix,
/// means "raw, uncompressed" (see [`crate::codec`] and the engine's wire format).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct DictId(pub u16);

impl DictId {
    /// "No dictionary": compressed without a dictionary, or the absence of a selection.
    pub const NONE: DictId = DictId(0);

    /// Wire-format sentinel meaning "stored raw, no payload framing". Never a valid table id.
    pub const RAW: DictId = DictId(0xFFFF);

    #[must_use]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl std::fmt::Display for DictId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One trained dictionary's metadata, as built by a directory scan ([`crate::table::scan`]).
pub struct DictMeta {
    pub id: DictId,
    pub dict_path: PathBuf,
    pub manifest_path: PathBuf,
    pub created_unix: i64,
    /// `0` means active; anything else is the retirement timestamp.
    pub retired_unix: AtomicU64,
    pub level: i32,
    /// Namespace prefixes this dictionary serves; always at least one (`default` if unspecified).
    pub namespaces: Vec<String>,
    pub signature: Option<String>,
    pub blob_len: usize,
    /// Installed by the pool (C3) during scan; `None` only transiently while a record is being
    /// built, never in a published table.
    pub compiled: Option<Arc<CompiledDict>>,
}

impl DictMeta {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.retired_unix.load(Ordering::Acquire) == 0
    }

    #[must_use]
    pub fn retired_at(&self) -> Option<i64> {
        let v = self.retired_unix.load(Ordering::Acquire);
        if v == 0 { None } else { Some(v as i64) }
    }

    pub fn retire(&self, now_unix: i64) {
        self.retired_unix.store(now_unix.max(1) as u64, Ordering::Release);
    }

    /// The pool identity key for this record: signature if present, else the dictionary path.
    #[must_use]
    pub fn pool_key(&self) -> String {
        crate::pool::identity_key(self.signature.as_deref(), &self.dict_path)
    }
}

/// One namespace's ordered, newest-first list of active dictionaries. The head is the active
/// dictionary for lookups against this prefix.
pub struct NamespaceEntry {
    pub prefix: String,
    pub dicts: Vec<Arc<DictMeta>>,
}

impl NamespaceEntry {
    #[must_use]
    pub fn head(&self) -> Option<&Arc<DictMeta>> {
        self.dicts.first()
    }
}

const ID_SLOTS: usize = 65536;

/// An immutable, versioned snapshot: namespace entries, a flat owning array of metadata, and a
/// direct id→metadata index. Once built by [`crate::table::scan::scan`] or
/// [`crate::table::scan::clone_plus`], a table is never mutated; it is replaced wholesale.
pub struct RoutingTable {
    pub namespaces: Vec<NamespaceEntry>,
    pub all: Vec<Arc<DictMeta>>,
    by_id: Box<[Option<Arc<DictMeta>>; ID_SLOTS]>,
    pub built_unix: i64,
    pub generation: u64,
}

impl RoutingTable {
    pub(crate) fn build(
        namespaces: Vec<NamespaceEntry>,
        all: Vec<Arc<DictMeta>>,
        built_unix: i64,
        generation: u64,
    ) -> Self {
        let mut by_id: Box<[Option<Arc<DictMeta>>; ID_SLOTS]> =
            vec![None; ID_SLOTS].into_boxed_slice().try_into().unwrap_or_else(|_| {
                // Array is exactly ID_SLOTS long by construction; this branch is unreachable.
                unreachable!("id index must have exactly {ID_SLOTS} slots")
            });

        // Newest (highest created_unix, ties by higher id) wins on duplicate ids. `all` is not
        // pre-sorted globally, so every candidate is compared explicitly rather than relying on
        // insertion order.
        for meta in &all {
            let slot = &mut by_id[meta.id.0 as usize];
            let replace = match slot {
                None => true,
                Some(existing) => {
                    (meta.created_unix, meta.id.0) >= (existing.created_unix, existing.id.0)
                },
            };
            if replace {
                *slot = Some(Arc::clone(meta));
            }
        }

        Self { namespaces, all, by_id, built_unix, generation }
    }

    /// Longest-prefix match against namespace prefixes, falling back to `default`.
    #[must_use]
    pub fn pick_by_key(&self, key: &[u8]) -> Option<&Arc<DictMeta>> {
        let mut best: Option<&NamespaceEntry> = None;
        for ns in &self.namespaces {
            if ns.prefix == "default" {
                continue;
            }
            if key.starts_with(ns.prefix.as_bytes())
                && best.is_none_or(|b| ns.prefix.len() > b.prefix.len())
            {
                best = Some(ns);
            }
        }
        best.or_else(|| self.namespaces.iter().find(|ns| ns.prefix == "default"))
            .and_then(NamespaceEntry::head)
    }

    #[must_use]
    pub fn is_default_ns(&self, key: &[u8]) -> bool {
        match self.pick_by_key(key) {
            None => true,
            Some(meta) => meta.namespaces.len() == 1 && meta.namespaces[0] == "default",
        }
    }

    #[must_use]
    pub fn lookup_by_id(&self, id: DictId) -> Option<&Arc<DictMeta>> {
        self.by_id[id.0 as usize].as_ref()
    }

    #[must_use]
    pub fn has_default_dict(&self) -> bool {
        self.namespaces.iter().any(|ns| ns.prefix == "default" && !ns.dicts.is_empty())
    }

    /// Every id currently active, or retired within `quarantine_sec` of `now_unix`, and thus
    /// disallowed for reuse by a fresh id assignment.
    #[must_use]
    pub fn disallowed_ids(&self, now_unix: i64, quarantine_sec: u64) -> std::collections::HashSet<u16> {
        self.all
            .iter()
            .filter(|m| match m.retired_at() {
                None => true,
                Some(retired) => now_unix.saturating_sub(retired) < quarantine_sec as i64,
            })
            .map(|m| m.id.0)
            .collect()
    }
}

// -------------------------------------------------------------------------------------------------
//
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: u16, created: i64, namespaces: &[&str]) -> Arc<DictMeta> {
        Arc::new(DictMeta {
            id: DictId(id),
            dict_path: PathBuf::from(format!("{id}.dict")),
            manifest_path: PathBuf::from(format!("{id}.mf")),
            created_unix: created,
            retired_unix: AtomicU64::new(0),
            level: 3,
            namespaces: namespaces.iter().map(|s| (*s).to_owned()).collect(),
            signature: None,
            blob_len: 128,
            compiled: None,
        })
    }

    #[test]
    fn lookup_by_id_resolves_after_build() {
        let m = meta(7, 100, &["feed:"]);
        let table = RoutingTable::build(
            vec![NamespaceEntry { prefix: "feed:".into(), dicts: vec![Arc::clone(&m)] }],
            vec![Arc::clone(&m)],
            1000,
            1,
        );
        assert!(table.lookup_by_id(DictId(7)).is_some());
        assert_eq!(table.lookup_by_id(DictId(7)).unwrap().id, DictId(7));
    }

    #[test]
    fn newest_wins_on_id_collision() {
        let older = meta(1, 100, &["default"]);
        let newer = meta(1, 200, &["default"]);
        let table = RoutingTable::build(vec![], vec![older, newer], 1000, 1);
        assert_eq!(table.lookup_by_id(DictId(1)).unwrap().created_unix, 200);
    }

    #[test]
    fn pick_by_key_prefers_longest_match_and_falls_back_to_default() {
        let user = meta(3, 100, &["user:"]);
        let default = meta(1, 50, &["default"]);
        let table = RoutingTable::build(
            vec![
                NamespaceEntry { prefix: "user:".into(), dicts: vec![Arc::clone(&user)] },
                NamespaceEntry { prefix: "default".into(), dicts: vec![Arc::clone(&default)] },
            ],
            vec![user, default],
            1000,
            1,
        );
        assert_eq!(table.pick_by_key(b"user:42").unwrap().id, DictId(3));
        assert_eq!(table.pick_by_key(b"other:x").unwrap().id, DictId(1));
        assert!(table.is_default_ns(b"other:x"));
        assert!(!table.is_default_ns(b"user:42"));
    }

    #[test]
    fn has_default_dict_reflects_presence() {
        let empty = RoutingTable::build(vec![], vec![], 0, 0);
        assert!(!empty.has_default_dict());

        let default = meta(1, 1, &["default"]);
        let table = RoutingTable::build(
            vec![NamespaceEntry { prefix: "default".into(), dicts: vec![Arc::clone(&default)] }],
            vec![default],
            1,
            1,
        );
        assert!(table.has_default_dict());
    }

    #[test]
    fn disallowed_ids_includes_active_and_quarantined() {
        let active = meta(1, 1, &["default"]);
        let retired = meta(2, 1, &["default"]);
        retired.retire(90);
        let table = RoutingTable::build(vec![], vec![active, retired], 1, 1);
        let disallowed = table.disallowed_ids(100, 60);
        assert!(disallowed.contains(&1));
        assert!(disallowed.contains(&2));

        let disallowed_short_quarantine = table.disallowed_ids(100, 5);
        assert!(disallowed_short_quarantine.contains(&1));
        assert!(!disallowed_short_quarantine.contains(&2));
    }
}
