//! Retired-table garbage collection (C6): quiescence-based reclamation so the hot path never
//! pays for freeing a table another thread might still be reading.
//!
//! A background thread drains a non-blocking MPSC queue of retired tables, waits out a cool-down
//! per table so in-flight readers finish, then releases every metadata record from the pool and
//! drops the table.

use crate::pool::Pool;
use crate::table::RoutingTable;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct Retired {
    table: Arc<RoutingTable>,
    retired_at: Instant,
}

/// Owns the retired-table queue and the background reclaimer thread.
pub struct Gc {
    tx: Sender<Retired>,
    rx: Receiver<Retired>,
    stop: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    cool_period: Duration,
}

impl Gc {
    #[must_use]
    pub fn new(cool_period: Duration) -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx, stop: Arc::new(AtomicBool::new(false)), handle: std::sync::Mutex::new(None), cool_period }
    }

    /// Enqueues `old` for reclamation. Non-blocking and safe from any thread.
    pub fn enqueue_retired(&self, old: Arc<RoutingTable>) {
        let _ = self.tx.send(Retired { table: old, retired_at: Instant::now() });
    }

    /// Starts the background reclaimer thread, if not already running.
    pub fn start(&self, pool: Arc<Pool>) {
        let mut guard = self.handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.is_some() {
            return;
        }
        self.stop.store(false, Ordering::Release);

        let rx = self.rx.clone();
        let stop = Arc::clone(&self.stop);
        let cool_period = self.cool_period;

        let span = tracing::info_span!("gc_reclaim_loop");
        let handle = std::thread::Builder::new()
            .name("quiverdict-gc".into())
            .spawn(move || {
                let _enter = span.enter();
                let mut pending: Vec<Retired> = Vec::new();
                while !stop.load(Ordering::Acquire) {
                    while let Ok(item) = rx.try_recv() {
                        pending.push(item);
                    }
                    pending.retain(|item| {
                        if item.retired_at.elapsed() >= cool_period {
                            reclaim(&item.table, &pool);
                            false
                        } else {
                            true
                        }
                    });
                    std::thread::sleep(Duration::from_millis(100));
                }
                // Final drain: drop without waiting out the cool-down, since the process is
                // stopping background work for this engine instance.
                while let Ok(item) = rx.try_recv() {
                    pending.push(item);
                }
                for item in pending {
                    reclaim(&item.table, &pool);
                }
            })
            .expect("spawning the GC thread must not fail");
        *guard = Some(handle);
    }

    /// Signals the reclaimer to stop and joins it.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
            let _ = handle.join();
        }
    }

    /// Signals the reclaimer to stop without waiting for it to join. Used on role demotion to
    /// avoid a latency spike on the thread posting the role change.
    pub fn stop_nowait(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn reclaim(table: &RoutingTable, pool: &Pool) {
    for meta in &table.all {
        let remaining = pool.release(&meta.pool_key());
        tracing::debug!(id = meta.id.0, remaining, "reclaimed dictionary metadata");
    }
    tracing::debug!(generation = table.generation, "reclaimed routing table");
}

// -------------------------------------------------------------------------------------------------
//
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::meta::{DictId, DictMeta, NamespaceEntry};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU64;

    fn empty_table(generation: u64) -> Arc<RoutingTable> {
        Arc::new(RoutingTable::build(vec![], vec![], 0, generation))
    }

    fn table_with_one_dict(pool: &Pool) -> Arc<RoutingTable> {
        let bytes = vec![9u8; 2048];
        let compiled = Arc::new(crate::codec::CompiledDict::compile(&bytes, 3).unwrap());
        let key = "dict-a".to_owned();
        let (shared, _) = pool.retain(&key, compiled, 1);
        let meta = Arc::new(DictMeta {
            id: DictId(1),
            dict_path: PathBuf::from("dict-a"),
            manifest_path: PathBuf::from("dict-a.mf"),
            created_unix: 0,
            retired_unix: AtomicU64::new(0),
            level: 3,
            namespaces: vec!["default".to_owned()],
            signature: Some("dict-a".to_owned()),
            blob_len: bytes.len(),
            compiled: Some(shared),
        });
        Arc::new(RoutingTable::build(
            vec![NamespaceEntry { prefix: "default".into(), dicts: vec![Arc::clone(&meta)] }],
            vec![meta],
            0,
            1,
        ))
    }

    #[test]
    fn reclaims_after_cool_period_and_releases_pool_refs() {
        let pool = Arc::new(Pool::new());
        let gc = Gc::new(Duration::from_millis(50));
        let table = table_with_one_dict(&pool);
        assert_eq!(pool.refcount("dict-a"), 1);

        gc.start(Arc::clone(&pool));
        gc.enqueue_retired(table);

        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.refcount("dict-a") != -1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        gc.stop();
        assert_eq!(pool.refcount("dict-a"), -1, "pool entry must be released once reclaimed");
    }

    #[test]
    fn stop_nowait_does_not_block_caller() {
        let gc = Gc::new(Duration::from_secs(3600));
        gc.start(Arc::new(Pool::new()));
        gc.enqueue_retired(empty_table(1));
        gc.stop_nowait();
        // No join occurred; the thread will observe the stop flag on its own schedule. This test
        // only asserts that stop_nowait itself returns immediately (it would hang above otherwise
        // under the test harness's timeout if it attempted to join).
    }
}
