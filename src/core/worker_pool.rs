//! Worker pool with dedicated OS threads.
//!
//! Tasks run their `work()` step here, off the caller thread. Jobs are plain
//! closures pushed into a bounded channel; each worker blocks on `recv` and
//! exits once the sender is dropped.
//!
//! # Design Principles
//!
//! - **No polling**: workers sleep on the channel until work arrives
//! - **Lock-free counters**: statistics are plain atomics
//! - **Clean shutdown**: dropping the sender unblocks workers naturally
//! - **Panic isolation**: a panicking job is logged and the worker keeps going

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::core::PoolError;

/// Unit of work executed by a pool thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,

    /// Currently executing jobs.
    pub active_jobs: u64,

    /// Jobs waiting in the queue.
    pub queued_jobs: u64,

    /// Total jobs finished (including panicked ones).
    pub completed_jobs: u64,

    /// Total jobs that panicked.
    pub panicked_jobs: u64,

    /// Total jobs submitted.
    pub submitted_jobs: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
struct PoolCounters {
    active_jobs: AtomicU64,
    queued_jobs: AtomicU64,
    completed_jobs: AtomicU64,
    panicked_jobs: AtomicU64,
    submitted_jobs: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            queued_jobs: self.queued_jobs.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            panicked_jobs: self.panicked_jobs.load(Ordering::Relaxed),
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
        }
    }
}

/// Fixed-size pool of named OS threads.
pub struct WorkerPool {
    worker_count: usize,

    /// Job sender. Option allows clean shutdown by dropping.
    job_tx: Mutex<Option<Sender<Job>>>,

    counters: Arc<PoolCounters>,

    shutdown: AtomicBool,

    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `config.worker_count` threads.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid and
    /// `PoolError::Internal` if a thread could not be spawned.
    pub fn new(config: &RuntimeConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (job_tx, job_rx) = bounded::<Job>(config.max_queue_depth);
        let counters = Arc::new(PoolCounters::default());

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let worker = spawn_worker(
                worker_id,
                job_rx.clone(),
                Arc::clone(&counters),
                config.thread_stack_size,
            )
            .map_err(|e| PoolError::Internal(format!("failed to spawn worker {worker_id}: {e}")))?;
            workers.push(worker);
        }

        info!(
            worker_count = config.worker_count,
            max_queue_depth = config.max_queue_depth,
            "WorkerPool initialized"
        );

        Ok(Self {
            worker_count: config.worker_count,
            job_tx: Mutex::new(Some(job_tx)),
            counters,
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(workers),
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Queue a job without blocking.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueFull` if the job queue is full
    /// - `PoolError::PoolShutdown` if the pool has been shut down
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }

        let job_tx_guard = self.job_tx.lock();
        let Some(job_tx) = job_tx_guard.as_ref() else {
            return Err(PoolError::PoolShutdown);
        };

        // Count before sending so a fast worker never decrements below zero.
        self.counters.queued_jobs.fetch_add(1, Ordering::Relaxed);
        match job_tx.try_send(job) {
            Ok(()) => {
                self.counters.submitted_jobs.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(crossbeam_channel::TrySendError::Full(_)) => {
                self.counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                warn!("Worker pool queue is full");
                Err(PoolError::QueueFull)
            }
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                self.counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                Err(PoolError::PoolShutdown)
            }
        }
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.worker_count)
    }

    /// Shut down the pool gracefully with timeout.
    ///
    /// Drops the job sender so idle workers exit, lets queued jobs finish,
    /// then joins each worker for up to 2 seconds. Workers that don't exit
    /// in time are detached.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Shutting down worker pool");

        {
            let mut job_tx = self.job_tx.lock();
            *job_tx = None;
        }

        let mut workers = self.workers.lock();
        let worker_count = workers.len();

        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = std::sync::mpsc::channel();
            let join_thread = thread::spawn(move || {
                let result = worker.join();
                let _ = tx.send(result.is_ok());
            });

            match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(true) => {
                    debug!(worker_id = idx, "Worker joined successfully");
                }
                Ok(false) => {
                    warn!(worker_id = idx, "Worker panicked");
                }
                Err(_) => {
                    warn!(worker_id = idx, "Worker did not exit within timeout - detaching");
                    continue;
                }
            }

            let _ = join_thread.join();
        }

        info!(worker_count = worker_count, "Worker pool shut down complete");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal shutdown but don't join: explicit shutdown() does that.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            let mut job_tx = self.job_tx.lock();
            *job_tx = None;
            debug!("WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

fn spawn_worker(
    worker_id: usize,
    job_rx: Receiver<Job>,
    counters: Arc<PoolCounters>,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("roaring-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id = worker_id, "Worker thread started");

            // Queued jobs still run after shutdown; recv fails only once the
            // channel is both disconnected and empty.
            while let Ok(job) = job_rx.recv() {
                counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                counters.active_jobs.fetch_add(1, Ordering::Relaxed);

                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!(worker_id = worker_id, "Job panicked");
                    counters.panicked_jobs.fetch_add(1, Ordering::Relaxed);
                }

                counters.active_jobs.fetch_sub(1, Ordering::Relaxed);
                counters.completed_jobs.fetch_add(1, Ordering::Relaxed);
            }

            debug!(worker_id = worker_id, "Worker thread exiting");
        })
}
