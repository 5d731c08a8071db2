//! The compression engine (C7): hot-path encode/decode, the current routing-table pointer,
//! per-thread codec caches, and per-namespace statistics.

use crate::codec::ThreadCodecCache;
use crate::config::Config;
use crate::env::{Env, Role};
use crate::error::{Error, Result};
use crate::gc::Gc;
use crate::pool::Pool;
use crate::reservoir::Reservoir;
use crate::stats::StatsRegistry;
use crate::table::{self, DictId, RoutingTable};
use arc_swap::ArcSwap;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

thread_local! {
    static CODEC_CACHE: RefCell<ThreadCodecCache> = RefCell::new(ThreadCodecCache::default());
}

/// Counts from a [`Engine::reload_dictionaries`] call.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReloadStatus {
    pub loaded: usize,
    pub new: usize,
    pub reused: usize,
    pub failed: usize,
}

/// Owns the single current routing-table pointer, the dictionary pool, the efficiency tracker,
/// the GC and trainer background threads, and per-namespace statistics. Not a process-wide
/// singleton: a host constructs exactly one in production, but tests may construct several.
pub struct Engine {
    pub(crate) config: Config,
    pub(crate) table: ArcSwap<RoutingTable>,
    pub(crate) pool: Arc<Pool>,
    pub(crate) efficiency: Arc<crate::efficiency::EfficiencyTracker>,
    pub(crate) stats: StatsRegistry,
    pub(crate) gc: Gc,
    pub(crate) env: Env,
    pub(crate) reservoir: Reservoir,
    pub(crate) train_active: AtomicBool,
    role: AtomicU8,
    trainer_stop: Arc<AtomicBool>,
    trainer_handle: Mutex<Option<JoinHandle<()>>>,
}

fn role_to_u8(role: Role) -> u8 {
    match role {
        Role::Undefined => 0,
        Role::Leader => 1,
        Role::Follower => 2,
    }
}

impl Engine {
    /// Builds an engine over an empty routing table. Call [`Engine::reload_dictionaries`] to
    /// populate it from `config.compression.dict_dir`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let efficiency = Arc::new(crate::efficiency::EfficiencyTracker::new());
        efficiency.configure(
            config.training.enable_training,
            config.training.retraining_interval_s,
            config.training.min_training_size,
            config.training.ewma_alpha,
            config.training.retrain_drop,
        );
        efficiency.init(crate::efficiency::now_secs());

        let reservoir = Reservoir::new(
            config.sampling.spool_max_bytes,
            config.sampling.sample_window_duration_s,
            0xd1ce,
        );

        Self {
            table: ArcSwap::from_pointee(RoutingTable::build(vec![], vec![], 0, 0)),
            pool: Arc::new(Pool::new()),
            efficiency,
            stats: StatsRegistry::new(),
            gc: Gc::new(Duration::from_secs(config.gc.gc_cool_period_s)),
            env: Env::new(),
            reservoir,
            train_active: AtomicBool::new(false),
            role: AtomicU8::new(role_to_u8(Role::Undefined)),
            trainer_stop: Arc::new(AtomicBool::new(true)),
            trainer_handle: Mutex::new(None),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> &StatsRegistry {
        &self.stats
    }

    #[must_use]
    pub fn env(&self) -> &Env {
        &self.env
    }

    #[must_use]
    pub fn current_table(&self) -> arc_swap::Guard<Arc<RoutingTable>> {
        self.table.load()
    }

    /// The namespace bucket encode/decode stats are attributed to: the matched prefix, or
    /// `"default"` for a fallback match or no match at all.
    fn namespace_of<'a>(&self, table: &'a RoutingTable, key: &[u8]) -> &'a str {
        match table.pick_by_key(key) {
            Some(m) if !table.is_default_ns(key) => m.namespaces.first().map_or("default", String::as_str),
            _ => "default",
        }
    }

    /// Encodes `value`. Returns `(Vec::new(), DictId::RAW)` when the value is stored raw: disabled
    /// compression, an out-of-range size, or a result that didn't actually shrink the payload.
    pub fn encode(&self, key: &[u8], value: &[u8]) -> (Vec<u8>, DictId) {
        let table = self.table.load();
        let namespace = self.namespace_of(&table, key).to_owned();

        if !self.config.compression.enable_comp {
            self.stats.with_namespace(&namespace, |s| s.record_write(value.len() as u64, 0));
            return (Vec::new(), DictId::RAW);
        }
        if value.len() < self.config.compression.min_comp_size {
            self.stats.with_namespace(&namespace, |s| s.skipped_min_size.fetch_add(1, Ordering::Relaxed));
            return (Vec::new(), DictId::RAW);
        }
        if value.len() > self.config.compression.max_comp_size {
            self.stats.with_namespace(&namespace, |s| s.skipped_max_size.fetch_add(1, Ordering::Relaxed));
            return (Vec::new(), DictId::RAW);
        }

        let dict = if self.config.compression.enable_dict { table.pick_by_key(key) } else { None };
        let did = dict.map_or(DictId::NONE, |m| m.id);
        let compiled = dict.and_then(|m| m.compiled.as_deref());
        let level = self.config.compression.effective_level();

        let compressed = CODEC_CACHE.with(|cache| cache.borrow_mut().compress(value, level, compiled));
        let compressed = match compressed {
            Ok(bytes) => bytes,
            Err(_) => {
                self.stats.with_namespace(&namespace, |s| s.compress_errors.fetch_add(1, Ordering::Relaxed));
                return (Vec::new(), DictId::RAW);
            },
        };

        if compressed.len() >= value.len() {
            self.stats.with_namespace(&namespace, |s| s.skipped_incompressible.fetch_add(1, Ordering::Relaxed));
            return (Vec::new(), DictId::RAW);
        }

        self.stats.with_namespace(&namespace, |s| s.record_write(value.len() as u64, compressed.len() as u64));
        if namespace == "default" {
            self.efficiency.on_observation(value.len() as u64, compressed.len() as u64);
        }
        crate::trainer::sample(self, key, value);

        (compressed, did)
    }

    /// Decodes a compressed frame. `dict_id = DictId::RAW` is a convenience passthrough for a
    /// frame that the wire format marked as stored raw.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownDictionary`] if `dict_id` does not resolve in the current table;
    /// [`Error::CorruptFrame`] if the codec cannot decode the frame.
    pub fn decode(&self, frame: &[u8], dict_id: DictId) -> Result<Vec<u8>> {
        if dict_id == DictId::RAW {
            return Ok(frame.to_vec());
        }

        let table = self.table.load();
        let namespace;
        let compiled = if dict_id.is_none() {
            namespace = "default".to_owned();
            None
        } else {
            let Some(meta) = table.lookup_by_id(dict_id) else {
                self.stats.with_namespace("default", |s| s.dict_miss_errors.fetch_add(1, Ordering::Relaxed));
                return Err(Error::UnknownDictionary(dict_id.0));
            };
            namespace = meta.namespaces.first().cloned().unwrap_or_else(|| "default".to_owned());
            meta.compiled.as_deref()
        };

        let fallback_cap = crate::codec::content_size(frame).map_or(frame.len() * 8, |n| n as usize);
        let result = CODEC_CACHE.with(|cache| cache.borrow_mut().decompress(frame, compiled, fallback_cap));

        match result {
            Ok(bytes) => {
                self.stats.with_namespace(&namespace, crate::stats::NamespaceStats::record_read);
                Ok(bytes)
            },
            Err(e) => {
                self.stats.with_namespace(&namespace, |s| s.decompress_errors.fetch_add(1, Ordering::Relaxed));
                Err(e)
            },
        }
    }

    #[must_use]
    pub fn is_compressed(frame: &[u8]) -> bool {
        crate::codec::is_compressed(frame)
    }

    /// Publishes `new_table`: assigns its generation as `old.generation + 1`, swaps the current
    /// pointer (release), and enqueues the superseded table for GC.
    pub fn publish_table(&self, mut new_table: RoutingTable) {
        let old_generation = self.table.load().generation;
        new_table.generation = old_generation + 1;
        let old = self.table.swap(Arc::new(new_table));
        self.gc.enqueue_retired(old);
    }

    /// Rescans the dictionary directory and publishes the result.
    ///
    /// # Errors
    ///
    /// Propagates [`table::scan`]'s errors; the current table is left in place on failure.
    pub fn reload_dictionaries(&self) -> Result<ReloadStatus> {
        let (table, counts) = table::scan(
            &self.config.compression.dict_dir,
            &self.pool,
            self.config.gc.dict_retain_max,
            self.config.gc.gc_quarantine_period_s,
            self.config.compression.effective_level(),
        )?;
        let loaded = table.all.len();
        self.publish_table(table);
        // `table::scan` fails the whole scan on any error (spec.md §7's all-or-nothing contract),
        // so a successful call never leaves partial failures to count.
        Ok(ReloadStatus { loaded, new: counts.new, reused: counts.reused, failed: 0 })
    }

    /// Reacts to a role transition: a promotion to leader starts the trainer and GC; a demotion to
    /// follower stops the trainer immediately and signals (but does not wait for) the GC.
    pub fn on_role_change(self: &Arc<Self>, role: Role) {
        let previous = self.role.swap(role_to_u8(role), Ordering::AcqRel);
        if previous == role_to_u8(role) {
            return;
        }

        match role {
            Role::Leader => {
                self.gc.start(Arc::clone(&self.pool));
                self.start_trainer();
            },
            Role::Follower => {
                self.train_active.store(false, Ordering::Release);
                self.stop_trainer();
                self.gc.stop_nowait();
            },
            Role::Undefined => {},
        }
    }

    #[cfg(feature = "training")]
    fn start_trainer(self: &Arc<Self>) {
        let mut guard = self.trainer_handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.is_some() {
            return;
        }
        self.trainer_stop.store(false, Ordering::Release);
        let engine = Arc::clone(self);
        let stop = Arc::clone(&self.trainer_stop);
        *guard = Some(
            std::thread::Builder::new()
                .name("quiverdict-trainer".into())
                .spawn(move || crate::trainer::run(&engine, &stop))
                .expect("spawning the trainer thread must not fail"),
        );
    }

    #[cfg(not(feature = "training"))]
    fn start_trainer(self: &Arc<Self>) {}

    #[cfg(feature = "training")]
    fn stop_trainer(&self) {
        self.trainer_stop.store(true, Ordering::Release);
        if let Some(handle) = self.trainer_handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
            let _ = handle.join();
        }
    }

    #[cfg(not(feature = "training"))]
    fn stop_trainer(&self) {}

    /// Hook the hot path calls on every write so the trainer can gate sampling on leadership.
    #[must_use]
    pub fn is_training_active(&self) -> bool {
        self.train_active.load(Ordering::Acquire)
    }
}

// -------------------------------------------------------------------------------------------------
//
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_without_a_dictionary() {
        let engine = Engine::new(Config::default());
        let value = b"A".repeat(2000);
        let (encoded, did) = engine.encode(b"somekey", &value);
        assert_eq!(did, DictId::NONE);
        assert!(!encoded.is_empty());
        let decoded = engine.decode(&encoded, did).expect("decode");
        assert_eq!(decoded, value);
    }

    #[test]
    fn below_min_size_is_stored_raw() {
        let mut config = Config::default();
        config.compression.min_comp_size = 1000;
        let engine = Engine::new(config);
        let (encoded, did) = engine.encode(b"k", b"short");
        assert!(encoded.is_empty());
        assert_eq!(did, DictId::RAW);
    }

    #[test]
    fn decode_raw_sentinel_passes_through() {
        let engine = Engine::new(Config::default());
        let decoded = engine.decode(b"raw bytes", DictId::RAW).expect("decode");
        assert_eq!(decoded, b"raw bytes");
    }

    #[test]
    fn decode_unknown_dictionary_id_errors() {
        let engine = Engine::new(Config::default());
        let err = engine.decode(b"whatever", DictId(99)).unwrap_err();
        assert!(matches!(err, Error::UnknownDictionary(99)));
    }
}
