//! Caller-side task runtime.
//!
//! The [`Runtime`] lives on the host's single caller thread. It validates and
//! admits tasks, hands their work to the [`WorkerPool`], and runs every
//! completion on the caller thread when the host calls [`Runtime::pump`],
//! [`Runtime::run_until_idle`] or [`Runtime::shutdown`].
//!
//! # Example
//!
//! ```rust,ignore
//! use roaring_offload::config::RuntimeConfig;
//! use roaring_offload::core::Runtime;
//! use roaring_offload::ops::SerializeTask;
//!
//! let runtime = Runtime::new(RuntimeConfig::new())?;
//! let mut promise = runtime.spawn_promise(SerializeTask::new(bitmap, "croaring"));
//! runtime.run_until_idle();
//! let bytes = promise.try_take().unwrap()?;
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, trace, warn};

use super::completion::{CompletionSink, TaskPromise, TaskResult};
use super::memory::MemoryAccountant;
use super::parallel::{run_partition, Parallel, ParallelTask};
use super::shutdown::{drain, Admission, DrainOutcome, ShutdownCoordinator};
use super::task::{run_single, AsyncTask, Forceable, Lifecycle, Single, TaskCell, TaskState};
use super::worker_pool::{PoolStats, WorkerPool};
use super::{PoolError, TaskError};
use crate::config::RuntimeConfig;

/// Completion step posted by a worker for the caller thread.
type Completer = Box<dyn FnOnce(&Host) + Send + 'static>;

/// Caller-thread state consulted while completing tasks.
pub(crate) struct Host {
    admission: Arc<dyn Admission>,
    accountant: Arc<MemoryAccountant>,
    registry: RefCell<HashMap<u64, Arc<dyn Forceable>>>,
    checkpoint: RefCell<Option<Box<dyn FnMut()>>>,
    next_id: Cell<u64>,
}

impl Host {
    pub(crate) fn admission(&self) -> &dyn Admission {
        self.admission.as_ref()
    }

    pub(crate) fn accountant(&self) -> &MemoryAccountant {
        &self.accountant
    }

    /// Run the host's continuation checkpoint after a sink fired.
    pub(crate) fn checkpoint(&self) {
        if let Ok(mut hook) = self.checkpoint.try_borrow_mut() {
            if let Some(hook) = hook.as_mut() {
                hook();
            }
        }
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.registry.borrow_mut().remove(&id);
    }

    fn register(&self, id: u64, cell: Arc<dyn Forceable>) {
        self.registry.borrow_mut().insert(id, cell);
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));
        id
    }
}

/// Bridges the single caller thread and the worker pool.
///
/// Not `Send`: completions, `before` and `finally` always run on the thread
/// that owns the runtime.
pub struct Runtime {
    config: RuntimeConfig,
    host: Host,
    pool: WorkerPool,
    completions_tx: Sender<Completer>,
    completions_rx: Receiver<Completer>,
    cpus: usize,
    stopped: Cell<bool>,
    _caller_thread: PhantomData<*const ()>,
}

impl Runtime {
    /// Start a runtime with its own shutdown coordinator and the global
    /// memory accountant.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or threads cannot be spawned.
    pub fn new(config: RuntimeConfig) -> Result<Self, PoolError> {
        Self::with_parts(
            config,
            Arc::new(ShutdownCoordinator::new()),
            MemoryAccountant::global(),
        )
    }

    /// Start a runtime with an injected coordinator and accountant.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or threads cannot be spawned.
    pub fn with_parts(
        config: RuntimeConfig,
        admission: Arc<dyn Admission>,
        accountant: Arc<MemoryAccountant>,
    ) -> Result<Self, PoolError> {
        let pool = WorkerPool::new(&config)?;
        let (completions_tx, completions_rx) = unbounded();
        info!(
            worker_count = config.worker_count,
            parallelism = config.parallelism,
            "runtime started"
        );
        Ok(Self {
            host: Host {
                admission,
                accountant,
                registry: RefCell::new(HashMap::new()),
                checkpoint: RefCell::new(None),
                next_id: Cell::new(0),
            },
            pool,
            completions_tx,
            completions_rx,
            cpus: num_cpus::get().max(1),
            config,
            stopped: Cell::new(false),
            _caller_thread: PhantomData,
        })
    }

    /// The configuration this runtime was built with.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The accountant receiving flushed memory deltas.
    #[must_use]
    pub fn accountant(&self) -> &MemoryAccountant {
        self.host.accountant()
    }

    /// Admitted tasks that have not completed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.host.admission.in_flight()
    }

    /// Worker pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Install a hook run after every sink notification.
    pub fn set_checkpoint_hook(&self, hook: impl FnMut() + 'static) {
        *self.host.checkpoint.borrow_mut() = Some(Box::new(hook));
    }

    /// Start `task`, reporting to `callback`.
    pub fn spawn_callback<T, F>(&self, task: T, callback: F)
    where
        T: AsyncTask,
        F: FnOnce(TaskResult<T::Output>) + Send + 'static,
    {
        self.spawn(task, CompletionSink::callback(callback));
    }

    /// Start `task`, returning a promise for its outcome.
    pub fn spawn_promise<T: AsyncTask>(&self, task: T) -> TaskPromise<T::Output> {
        let (sink, promise) = CompletionSink::promise();
        self.spawn(task, sink);
        promise
    }

    /// Start `task` with an explicit sink.
    pub fn spawn<T: AsyncTask>(&self, task: T, sink: CompletionSink<T::Output>) {
        let Some(cell) = self.admit(Single(task), sink) else {
            return;
        };

        let job_cell = Arc::clone(&cell);
        let tx = self.completions_tx.clone();
        let submitted = self.pool.submit(Box::new(move || {
            run_single(&job_cell);
            post_completion(&tx, job_cell);
        }));

        if let Err(err) = submitted {
            warn!(task = cell.id, error = %err, "pool refused task");
            cell.ctx.set_error(err.into());
            cell.complete(&self.host);
        }
    }

    /// Start a parallel task, reporting to `callback`.
    pub fn spawn_parallel_callback<T, F>(&self, task: T, callback: F)
    where
        T: ParallelTask,
        F: FnOnce(TaskResult<T::Output>) + Send + 'static,
    {
        self.spawn_parallel(task, CompletionSink::callback(callback));
    }

    /// Start a parallel task, returning a promise for its outcome.
    pub fn spawn_parallel_promise<T: ParallelTask>(&self, task: T) -> TaskPromise<T::Output> {
        let (sink, promise) = CompletionSink::promise();
        self.spawn_parallel(task, sink);
        promise
    }

    /// Start a parallel task with an explicit sink.
    ///
    /// With one partition the items run sequentially in index order on a
    /// single pool thread.
    pub fn spawn_parallel<T: ParallelTask>(&self, task: T, sink: CompletionSink<T::Output>) {
        let Some(cell) = self.admit(Parallel::new(task), sink) else {
            return;
        };

        let partitions = cell
            .body
            .write()
            .as_mut()
            .map_or(1, |p| p.plan(self.config.parallelism, self.cpus.min(self.pool.worker_count())));
        debug!(task = cell.id, partitions, "fanning out");

        for partition in 0..partitions {
            let job_cell = Arc::clone(&cell);
            let tx = self.completions_tx.clone();
            let submitted = self.pool.submit(Box::new(move || {
                if run_partition(&job_cell, partition) {
                    post_completion(&tx, job_cell);
                }
            }));

            if let Err(err) = submitted {
                warn!(task = cell.id, partition, error = %err, "pool refused partition");
                cell.ctx.set_error(err.into());
                // Account for this and every later partition that never started.
                let mut last = false;
                if let Some(parallel) = cell.body.read().as_ref() {
                    for _ in partition..partitions {
                        last |= parallel.finish_partition();
                    }
                }
                if last {
                    cell.complete(&self.host);
                }
                return;
            }
        }
    }

    /// Validate and admit a task, or complete it as rejected.
    fn admit<W: Lifecycle>(&self, body: W, sink: CompletionSink<W::Output>) -> Option<Arc<TaskCell<W>>> {
        let id = self.host.next_id();
        let cell = Arc::new(TaskCell::new(
            id,
            body,
            sink,
            Arc::clone(&self.host.accountant),
        ));

        if let Err(err) = cell.validate() {
            debug!(task = id, error = %err, "task rejected during validation");
            cell.ctx.set_error(err);
            cell.set_state(TaskState::Rejected);
            cell.complete(&self.host);
            return None;
        }

        if !self.host.admission.try_enter() {
            warn!(task = id, "task rejected, runtime is shutting down");
            cell.ctx.set_error(TaskError::ShuttingDown);
            cell.set_state(TaskState::Rejected);
            cell.complete(&self.host);
            return None;
        }
        cell.mark_entered();

        cell.set_state(TaskState::Queued);
        self.host.register(id, Arc::clone(&cell) as Arc<dyn Forceable>);
        Some(cell)
    }

    /// Run every completion that is ready. Never blocks.
    pub fn pump(&self) -> usize {
        let mut handled = 0;
        while let Ok(completer) = self.completions_rx.try_recv() {
            completer(&self.host);
            handled += 1;
        }
        if handled > 0 {
            trace!(handled, "pumped completions");
        }
        handled
    }

    /// Block until no admitted task remains, running completions as they
    /// arrive.
    pub fn run_until_idle(&self) {
        loop {
            self.pump();
            if self.in_flight() == 0 {
                return;
            }
            match self.completions_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(completer) => completer(&self.host),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// Refuse new tasks, drain admitted ones, then stop the pool.
    ///
    /// Tasks completing from here on skip their sinks. When a drain timeout
    /// is configured, tasks still queued afterwards are force-completed and
    /// the pool is left to finish whatever is running.
    pub fn shutdown(&self) -> DrainOutcome {
        if self.stopped.replace(true) {
            return DrainOutcome::Drained;
        }
        self.host.admission.begin_shutdown();

        let mut outcome = drain(self.host.admission.as_ref(), self.config.drain_backoff(), || self.pump());
        if let DrainOutcome::TimedOut(remaining) = outcome {
            let forced = self.force_queued();
            warn!(remaining, forced, "drain timed out, forced queued tasks");
            self.pump();
            outcome = match self.in_flight() {
                0 => DrainOutcome::Drained,
                left => DrainOutcome::TimedOut(left),
            };
        }

        self.pool.shutdown();
        self.pump();
        info!(?outcome, "runtime shut down");
        outcome
    }

    fn force_queued(&self) -> usize {
        let cells: Vec<_> = self.host.registry.borrow().values().cloned().collect();
        cells.iter().filter(|cell| cell.force(&self.host)).count()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.stopped.get() {
            debug!("Runtime dropped without explicit shutdown");
            self.shutdown();
        }
    }
}

fn post_completion<W: Lifecycle>(tx: &Sender<Completer>, cell: Arc<TaskCell<W>>) {
    let completer: Completer = Box::new(move |host: &Host| cell.complete(host));
    if tx.send(completer).is_err() {
        debug!("runtime gone, dropping completion");
    }
}
