//! Single-worker asynchronous tasks.
//!
//! A task moves through `Created → Validating → (Rejected | Queued) →
//! Running → Completing → Done`. `before` and `finally` run on the caller
//! thread, `work` on a pool thread, and the completion sink fires exactly
//! once no matter which path reaches `Completing` first.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use super::completion::{Completion, CompletionSink, TaskResult};
use super::memory::{MemoryAccountant, MemoryCharge, PendingMemoryDelta};
use super::runtime::Host;
use super::TaskError;

/// An operation split into caller-thread setup, pool-thread work and
/// caller-thread cleanup.
pub trait AsyncTask: Send + Sync + 'static {
    /// Value delivered to the completion sink on success.
    type Output: Send + 'static;

    /// Validate arguments and capture inputs. Runs on the caller thread.
    ///
    /// # Errors
    ///
    /// An error rejects the task; `work` never runs.
    fn before(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }

    /// The expensive part. Runs on a pool thread.
    ///
    /// # Errors
    ///
    /// The error becomes the task's outcome unless an earlier one was recorded.
    fn work(&mut self, ctx: &TaskContext) -> Result<(), TaskError>;

    /// Release anything captured in `before`. Runs on the caller thread,
    /// also for rejected tasks.
    fn finally(&mut self) {}

    /// Produce the success value. Only called when no error was recorded.
    ///
    /// # Errors
    ///
    /// Implementations may still fail here, e.g. when `work` left no result.
    fn output(self) -> TaskResult<Self::Output>;
}

/// Lifecycle states of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Constructed, nothing committed.
    Created = 0,
    /// `before` is running.
    Validating = 1,
    /// Refused before reaching the pool.
    Rejected = 2,
    /// Handed to the pool.
    Queued = 3,
    /// `work` is executing.
    Running = 4,
    /// Cleanup and notification in progress.
    Completing = 5,
    /// Sink notified (or skipped); the task is gone.
    Done = 6,
}

impl TaskState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Validating,
            2 => Self::Rejected,
            3 => Self::Queued,
            4 => Self::Running,
            5 => Self::Completing,
            _ => Self::Done,
        }
    }
}

/// Per-task state shared between the caller thread and the workers.
#[derive(Debug)]
pub struct TaskContext {
    memory: PendingMemoryDelta,
    accountant: Arc<MemoryAccountant>,
    error: OnceLock<TaskError>,
    forced: AtomicBool,
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new(Arc::new(MemoryAccountant::new()))
    }
}

impl TaskContext {
    pub(crate) fn new(accountant: Arc<MemoryAccountant>) -> Self {
        Self {
            memory: PendingMemoryDelta::default(),
            accountant,
            error: OnceLock::new(),
            forced: AtomicBool::new(false),
        }
    }

    /// Memory delta flushed to the accountant when the task completes.
    pub const fn memory(&self) -> &PendingMemoryDelta {
        &self.memory
    }

    /// Attribute `bytes` to a value this task hands back to the caller.
    ///
    /// The allocation joins the pending delta; the returned charge must
    /// travel with the value and releases the bytes when dropped.
    #[must_use = "the bytes are released as soon as the charge is dropped"]
    pub fn charge(&self, bytes: usize) -> MemoryCharge {
        self.memory.allocated(bytes);
        MemoryCharge::new(Arc::clone(&self.accountant), bytes)
    }

    /// Record `err` unless an error is already present. Returns whether it
    /// was kept.
    pub fn set_error(&self, err: TaskError) -> bool {
        let kept = self.error.set(err).is_ok();
        if !kept {
            trace!("discarding error, task already failed");
        }
        kept
    }

    /// The first recorded error.
    pub fn error(&self) -> Option<&TaskError> {
        self.error.get()
    }

    /// Whether an error has been recorded.
    pub fn has_error(&self) -> bool {
        self.error.get().is_some()
    }

    /// Whether the task was completed by shutdown before it could run.
    pub fn is_forced(&self) -> bool {
        self.forced.load(Ordering::Acquire)
    }

    /// Workers stop taking new items once this returns `true`.
    pub fn should_stop(&self) -> bool {
        self.has_error() || self.is_forced()
    }
}

/// Caller-thread hooks shared by single and parallel tasks.
pub(crate) trait Lifecycle: Send + Sync + 'static {
    type Output: Send + 'static;

    fn before(&mut self, ctx: &TaskContext) -> Result<(), TaskError>;
    fn finally(&mut self);
    fn output(self) -> TaskResult<Self::Output>;
}

/// Wrapper binding an [`AsyncTask`] to the lifecycle.
pub(crate) struct Single<T>(pub(crate) T);

impl<T: AsyncTask> Lifecycle for Single<T> {
    type Output = T::Output;

    fn before(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        self.0.before(ctx)
    }

    fn finally(&mut self) {
        self.0.finally();
    }

    fn output(self) -> TaskResult<Self::Output> {
        self.0.output()
    }
}

/// Implemented by every task cell so shutdown can force-complete it.
pub(crate) trait Forceable {
    /// Complete the task without running it if no worker picked it up yet.
    fn force(&self, host: &Host) -> bool;
}

/// The runtime-owned home of a task until it completes.
pub(crate) struct TaskCell<W: Lifecycle> {
    pub(crate) id: u64,
    state: AtomicU8,
    entered: AtomicBool,
    pub(crate) body: RwLock<Option<W>>,
    pub(crate) ctx: TaskContext,
    completion: Completion<W::Output>,
}

impl<W: Lifecycle> TaskCell<W> {
    pub(crate) fn new(
        id: u64,
        body: W,
        sink: CompletionSink<W::Output>,
        accountant: Arc<MemoryAccountant>,
    ) -> Self {
        Self {
            id,
            state: AtomicU8::new(TaskState::Created as u8),
            entered: AtomicBool::new(false),
            body: RwLock::new(Some(body)),
            ctx: TaskContext::new(accountant),
            completion: Completion::new(sink),
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        trace!(task = self.id, ?state, "task state");
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn mark_entered(&self) {
        self.entered.store(true, Ordering::Release);
    }

    /// Run `before` on the caller thread.
    pub(crate) fn validate(&self) -> Result<(), TaskError> {
        self.set_state(TaskState::Validating);
        let mut body = self.body.write();
        match body.as_mut() {
            Some(body) => body.before(&self.ctx),
            None => Err(TaskError::Internal("task body missing".into())),
        }
    }

    /// Move from `Queued` to `Running`. Fails once the task was forced.
    ///
    /// Parallel partitions call this too; every partition after the first
    /// finds the task already running.
    pub(crate) fn begin_running(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match TaskState::from_u8(raw) {
                    TaskState::Queued | TaskState::Running => Some(TaskState::Running as u8),
                    _ => None,
                }
            })
            .is_ok()
    }

    /// Completing: flush memory, `finally`, pick the outcome, notify.
    ///
    /// Runs on the caller thread. Any call after the first is a no-op.
    pub(crate) fn complete(&self, host: &Host) {
        if !self.completion.claim() {
            trace!(task = self.id, "completion already claimed");
            return;
        }
        self.set_state(TaskState::Completing);

        self.ctx.memory.flush_into(host.accountant());

        let body = self.body.write().take();
        let result = match body {
            Some(mut body) => {
                body.finally();
                match self.ctx.error() {
                    Some(err) => Err(err.clone()),
                    None => body.output(),
                }
            }
            None => Err(self
                .ctx
                .error()
                .cloned()
                .unwrap_or_else(|| TaskError::Internal("task body missing".into()))),
        };

        let entered = self.entered.swap(false, Ordering::AcqRel);
        if entered && host.admission().is_shutting_down() {
            debug!(task = self.id, "shutting down, dropping completion");
            self.completion.discard();
        } else {
            if let Err(err) = &result {
                debug!(task = self.id, error = %err, "task failed");
            }
            self.completion.deliver(result);
            host.checkpoint();
        }

        if entered {
            host.admission().leave();
        }
        host.unregister(self.id);
        self.set_state(TaskState::Done);
    }
}

impl<W: Lifecycle> Forceable for TaskCell<W> {
    fn force(&self, host: &Host) -> bool {
        let won = self
            .state
            .compare_exchange(
                TaskState::Queued as u8,
                TaskState::Completing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            warn!(task = self.id, "force-completing queued task");
            self.ctx.forced.store(true, Ordering::Release);
            self.ctx.set_error(TaskError::ShuttingDown);
            self.complete(host);
        }
        won
    }
}

/// Run `work` for a single task on the current (pool) thread.
pub(crate) fn run_single<T: AsyncTask>(cell: &TaskCell<Single<T>>) {
    if !cell.begin_running() {
        trace!(task = cell.id, "task forced before it ran");
        return;
    }
    let mut body = cell.body.write();
    if let Some(Single(task)) = body.as_mut() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.work(&cell.ctx)));
        record_outcome(&cell.ctx, outcome);
    }
}

/// Fold a possibly-panicked `work` result into the error slot.
pub(crate) fn record_outcome(
    ctx: &TaskContext,
    outcome: std::thread::Result<Result<(), TaskError>>,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            ctx.set_error(err);
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            tracing::error!(panic = %msg, "task work panicked");
            ctx.set_error(TaskError::Internal(format!("worker panicked: {msg}")));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
