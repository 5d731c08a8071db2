//! Bounded FIFO worker pool (C10): back-pressured offload for batch decode/encode work and file
//! I/O, used by external collaborators. The core engine itself never enqueues onto this pool.

use crossbeam_channel::{bounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads draining a bounded job queue.
pub struct WorkerPool {
    tx: Sender<Job>,
    handles: Mutex<Option<Vec<JoinHandle<()>>>>,
    stopped: AtomicBool,
}

impl WorkerPool {
    /// Spawns `threads` workers consuming a queue with room for `queue_depth` pending jobs.
    #[must_use]
    pub fn new(threads: usize, queue_depth: usize) -> Self {
        let (tx, rx) = bounded::<Job>(queue_depth.max(1));

        let handles = (0..threads.max(1))
            .map(|idx| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(format!("quiverdict-worker-{idx}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .expect("spawning a worker thread must not fail")
            })
            .collect();

        Self { tx, handles: Mutex::new(Some(handles)), stopped: AtomicBool::new(false) }
    }

    /// Submits a job, blocking the caller when the queue is full (the pool's back-pressure).
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Exhausted`] if the pool has been shut down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> crate::error::Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(crate::error::Error::Exhausted("worker pool is shutting down".to_owned()));
        }
        self.tx
            .send(Box::new(job))
            .map_err(|_| crate::error::Error::Exhausted("worker pool is shutting down".to_owned()))
    }

    /// Signals shutdown, wakes every worker by dropping the send side, and joins them all. Safe to
    /// call more than once; later calls are no-ops.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        let handles = self.handles.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(handles) = handles {
            for handle in handles {
                let _ = handle.join();
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------
//
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn submitted_jobs_run() {
        let pool = WorkerPool::new(2, 8);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit");
        }
        std::thread::sleep(Duration::from_millis(200));
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let pool = WorkerPool::new(1, 4);
        pool.shutdown();
        assert!(pool.submit(|| {}).is_err());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pool = WorkerPool::new(1, 4);
        pool.shutdown();
        pool.shutdown();
    }
}
