//! Directory scan that builds a fresh [`RoutingTable`] (C5 build algorithm, spec.md §4.5).

use crate::codec::CompiledDict;
use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::table::manifest::Manifest;
use crate::table::meta::{DictId, DictMeta, NamespaceEntry, RoutingTable};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

const MANIFEST_EXT: &str = "mf";
const MAX_ID: u32 = 65535;

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

struct Candidate {
    manifest: Manifest,
    manifest_path: PathBuf,
}

fn read_manifests(dir: &Path) -> Result<Vec<Candidate>> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(dir).max_depth(1).into_iter().filter_map(std::result::Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) != Some(MANIFEST_EXT) {
            continue;
        }
        let manifest = Manifest::read(entry.path())?;
        out.push(Candidate { manifest, manifest_path: entry.path().to_path_buf() });
    }
    Ok(out)
}

/// Assigns ids to every candidate missing one, rewriting its manifest so the filesystem stays the
/// source of truth. Fails the whole scan if the id space is exhausted.
fn assign_ids(candidates: &mut [Candidate], quarantine_sec: u64) -> Result<()> {
    let now = now_unix();
    let mut taken: HashSet<u16> = HashSet::new();
    for c in candidates.iter() {
        if let Some(id) = c.manifest.id {
            let quarantined = c
                .manifest
                .retired
                .map(|r| now.saturating_sub(r.timestamp()) < quarantine_sec as i64)
                .unwrap_or(false);
            if c.manifest.retired.is_none() || quarantined {
                taken.insert(id);
            }
        }
    }

    for c in candidates.iter_mut() {
        if c.manifest.id.is_some() {
            continue;
        }
        let mut next = None;
        for candidate_id in 1..=MAX_ID as u32 {
            let candidate_id = candidate_id as u16;
            if !taken.contains(&candidate_id) {
                next = Some(candidate_id);
                break;
            }
        }
        let Some(id) = next else {
            return Err(Error::Exhausted("no free dictionary id in 1..65535".to_owned()));
        };
        taken.insert(id);
        c.manifest.set_id(id);
        c.manifest.write_atomic(&c.manifest_path)?;
    }
    Ok(())
}

fn build_meta(candidate: &Candidate) -> Result<DictMeta> {
    let id = candidate.manifest.id.ok_or_else(|| Error::invalid("manifest missing assigned id"))?;
    let blob_len = std::fs::metadata(&candidate.manifest.dict_file)?.len() as usize;
    Ok(DictMeta {
        id: DictId(id),
        dict_path: candidate.manifest.dict_file.clone(),
        manifest_path: candidate.manifest_path.clone(),
        created_unix: candidate.manifest.created.timestamp(),
        retired_unix: AtomicU64::new(candidate.manifest.retired.map_or(0, |r| r.timestamp().max(1) as u64)),
        level: candidate.manifest.level,
        namespaces: candidate.manifest.namespaces.clone(),
        signature: candidate.manifest.signature.clone(),
        blob_len,
        compiled: None,
    })
}

fn sort_key(meta: &DictMeta) -> (i64, u16) {
    (meta.created_unix, meta.id.0)
}

/// Per-dictionary installation counts from one [`scan`] call, for [`crate::engine::ReloadStatus`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ScanCounts {
    pub new: usize,
    pub reused: usize,
}

/// Builds a fresh routing table by scanning `dir` for `<uuid>.mf` manifests (and their paired
/// `<uuid>.dict` blobs), assigning ids to newcomers, applying the per-namespace retention cap, and
/// installing every referenced dictionary into `pool`.
///
/// # Errors
///
/// Fails outright (leaving the caller's current table untouched, per spec.md §7) if the directory
/// cannot be read, a manifest fails to parse, the id space is exhausted, or a dictionary blob
/// cannot be read or compiled.
pub fn scan(
    dir: &Path,
    pool: &Pool,
    max_per_ns: u32,
    quarantine_sec: u64,
    level: i32,
) -> Result<(RoutingTable, ScanCounts)> {
    let mut candidates = read_manifests(dir)?;
    if candidates.is_empty() {
        return Err(Error::ScanFailed(format!("no manifests found in {}", dir.display())));
    }

    assign_ids(&mut candidates, quarantine_sec)?;

    let mut records: Vec<(DictMeta, Candidate)> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let meta = build_meta(&candidate)?;
        records.push((meta, candidate));
    }

    // Group by namespace prefix; a record appears once per namespace it declares.
    let mut by_ns: std::collections::BTreeMap<String, Vec<usize>> = std::collections::BTreeMap::new();
    for (idx, (meta, _)) in records.iter().enumerate() {
        if meta.is_active() {
            for ns in &meta.namespaces {
                by_ns.entry(ns.clone()).or_default().push(idx);
            }
        }
    }
    for indices in by_ns.values_mut() {
        indices.sort_by(|&a, &b| sort_key(&records[b].0).cmp(&sort_key(&records[a].0)));
    }

    // Anything beyond max_per_ns in every namespace it belongs to is retired now.
    let mut keep_active: Vec<bool> = vec![true; records.len()];
    for indices in by_ns.values() {
        for &idx in indices.iter().skip(max_per_ns as usize) {
            keep_active[idx] = false;
        }
    }

    let now = now_unix();
    let mut counts = ScanCounts::default();
    let mut dict_records: Vec<Arc<DictMeta>> = Vec::with_capacity(records.len());
    for (idx, (meta, candidate)) in records.into_iter().enumerate() {
        let newly_trimmed = meta.is_active() && !keep_active[idx];
        if newly_trimmed {
            meta.retire(now);
            let mut manifest = candidate.manifest;
            manifest.set_retired(chrono::Utc::now());
            manifest.write_atomic(&candidate.manifest_path)?;
            let released = pool.release(&meta.pool_key());
            if released <= 0 {
                tracing::debug!(id = meta.id.0, "dictionary pool entry newly unreferenced after trim");
            }
        }

        let installations = if meta.is_active() { meta.namespaces.len().max(1) } else { 1 };
        let compiled = compile_or_load(&meta, level)?;
        let meta = DictMeta { compiled: Some(compiled), ..meta };
        let (meta, is_new) = pool_install(meta, pool, installations);
        if is_new {
            counts.new += 1;
        } else {
            counts.reused += 1;
        }
        dict_records.push(Arc::new(meta));
    }

    let mut namespaces = Vec::new();
    for (prefix, indices) in by_ns {
        let dicts: Vec<Arc<DictMeta>> = indices
            .into_iter()
            .filter(|&idx| keep_active[idx])
            .take(max_per_ns as usize)
            .map(|idx| Arc::clone(&dict_records[idx]))
            .collect();
        if !dicts.is_empty() {
            namespaces.push(NamespaceEntry { prefix, dicts });
        }
    }

    Ok((RoutingTable::build(namespaces, dict_records, now, 0), counts))
}

/// `level` is always the engine's configured compression level, never the manifest's own `level`
/// field: per spec.md §9, the manifest's level is informational only.
fn compile_or_load(meta: &DictMeta, level: i32) -> Result<Arc<CompiledDict>> {
    let bytes = std::fs::read(&meta.dict_path)?;
    CompiledDict::compile(&bytes, level).map(Arc::new)
}

fn pool_install(meta: DictMeta, pool: &Pool, installations: usize) -> (DictMeta, bool) {
    let key = meta.pool_key();
    let compiled = meta.compiled.clone().expect("compiled immediately above");
    let (shared, is_new) = pool.retain(&key, compiled, installations);
    (DictMeta { compiled: Some(shared), ..meta }, is_new)
}

/// Produces a new table that is a deep copy of `old` plus `new_meta` inserted, re-sorted and
/// trimmed per-namespace, with generation `old.generation + 1`.
#[must_use]
pub fn clone_plus(old: &RoutingTable, new_meta: Arc<DictMeta>, max_per_ns: u32) -> RoutingTable {
    let mut all: Vec<Arc<DictMeta>> = old.all.iter().cloned().collect();
    all.push(Arc::clone(&new_meta));

    let mut by_ns: std::collections::BTreeMap<String, Vec<Arc<DictMeta>>> = std::collections::BTreeMap::new();
    for ns in &old.namespaces {
        by_ns.entry(ns.prefix.clone()).or_default().extend(ns.dicts.iter().cloned());
    }
    for ns in &new_meta.namespaces {
        by_ns.entry(ns.clone()).or_default().push(Arc::clone(&new_meta));
    }

    let mut namespaces = Vec::new();
    for (prefix, mut dicts) in by_ns {
        dicts.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
        dicts.truncate(max_per_ns as usize);
        namespaces.push(NamespaceEntry { prefix, dicts });
    }

    RoutingTable::build(namespaces, all, now_unix(), old.generation + 1)
}

// -------------------------------------------------------------------------------------------------
//
// Tests
