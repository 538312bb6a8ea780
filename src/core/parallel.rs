//! Fan-out tasks over index-addressable work items.
//!
//! `N` items are spread over `C = min(desired, cpus, N)` pool threads. Each
//! partition pulls indices from a shared cursor with a single
//! fetch-and-increment, so no index is handed out twice and none is `≥ N`.
//! The partition that finishes last posts the completion.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use super::completion::TaskResult;
use super::task::{record_outcome, Lifecycle, TaskCell, TaskContext};
use super::TaskError;

/// A task whose work is `len()` independent items.
///
/// `parallel_work` takes `&self` and may run concurrently for different
/// indices; store per-item results at their index rather than appending.
pub trait ParallelTask: Send + Sync + 'static {
    /// Value delivered to the completion sink on success.
    type Output: Send + 'static;

    /// Validate arguments on the caller thread.
    ///
    /// # Errors
    ///
    /// An error rejects the task before any partition runs.
    fn before(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }

    /// Number of work items. Read after `before` succeeds.
    fn len(&self) -> usize;

    /// Whether there are no work items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Preferred concurrency; `None` uses the runtime default.
    fn concurrency(&self) -> Option<usize> {
        None
    }

    /// Process item `index`. Runs on a pool thread.
    ///
    /// # Errors
    ///
    /// The first error across all partitions becomes the task's outcome and
    /// stops partitions from taking further items.
    fn parallel_work(&self, index: usize, ctx: &TaskContext) -> Result<(), TaskError>;

    /// Cleanup on the caller thread.
    fn finally(&mut self) {}

    /// Produce the success value.
    ///
    /// # Errors
    ///
    /// Implementations may fail when a slot was left empty.
    fn output(self) -> TaskResult<Self::Output>;
}

/// Shared cursor handing out indices `0..len`.
#[derive(Debug)]
pub struct PartitionCursor {
    next_index: AtomicUsize,
    len: usize,
}

impl PartitionCursor {
    /// Cursor over `len` items.
    #[must_use]
    pub const fn new(len: usize) -> Self {
        Self {
            next_index: AtomicUsize::new(0),
            len,
        }
    }

    /// Claim the next index, or `None` once all are handed out.
    ///
    /// The load short-circuits exhausted cursors so each thread increments
    /// past `len` at most once and the counter cannot wrap.
    pub fn next_index(&self) -> Option<usize> {
        if self.next_index.load(Ordering::Relaxed) >= self.len {
            return None;
        }
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        (index < self.len).then_some(index)
    }

    /// Total item count.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the cursor covers no items.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A parallel task plus its fan-out bookkeeping.
pub(crate) struct Parallel<T> {
    pub(crate) task: T,
    cursor: PartitionCursor,
    pending: AtomicUsize,
}

impl<T: ParallelTask> Parallel<T> {
    pub(crate) const fn new(task: T) -> Self {
        Self {
            task,
            cursor: PartitionCursor::new(0),
            pending: AtomicUsize::new(0),
        }
    }

    /// Fix the item count and partition count once `before` has run.
    /// Returns the number of partitions to start.
    pub(crate) fn plan(&mut self, default_concurrency: usize, cpus: usize) -> usize {
        let len = self.task.len();
        let desired = self.task.concurrency().unwrap_or(default_concurrency);
        let partitions = partition_count(desired, cpus, len);
        self.cursor = PartitionCursor::new(len);
        self.pending = AtomicUsize::new(partitions);
        partitions
    }

    /// Mark one partition finished. Returns `true` for the last one.
    pub(crate) fn finish_partition(&self) -> bool {
        self.pending.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

impl<T: ParallelTask> Lifecycle for Parallel<T> {
    type Output = T::Output;

    fn before(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        self.task.before(ctx)
    }

    fn finally(&mut self) {
        self.task.finally();
    }

    fn output(self) -> TaskResult<Self::Output> {
        self.task.output()
    }
}

/// `min(desired, cpus, len)`, never below one so a single partition still
/// runs (and completes) an empty task.
#[must_use]
pub fn partition_count(desired: usize, cpus: usize, len: usize) -> usize {
    desired.min(cpus).min(len).max(1)
}

/// One partition's loop. Returns `true` when this was the last partition
/// and the caller must post the completion.
pub(crate) fn run_partition<T: ParallelTask>(cell: &TaskCell<Parallel<T>>, partition: usize) -> bool {
    let body = cell.body.read();
    let Some(parallel) = body.as_ref() else {
        return false;
    };

    if cell.begin_running() {
        let mut processed = 0usize;
        while !cell.ctx.should_stop() {
            let Some(index) = parallel.cursor.next_index() else {
                break;
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                parallel.task.parallel_work(index, &cell.ctx)
            }));
            record_outcome(&cell.ctx, outcome);
            processed += 1;
        }
        trace!(task = cell.id, partition, processed, "partition finished");
    } else {
        trace!(task = cell.id, partition, "task forced before partition ran");
    }

    parallel.finish_partition()
}
