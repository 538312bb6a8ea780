//! Completion sinks and the exactly-once completion guard.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::TaskError;

/// Outcome delivered to a completion sink.
pub type TaskResult<T> = Result<T, TaskError>;

/// Boxed completion callback.
pub type Callback<T> = Box<dyn FnOnce(TaskResult<T>) + Send + 'static>;

/// Where a task reports its outcome. Exactly one channel per task.
pub enum CompletionSink<T> {
    /// Invoke a callback with the outcome.
    Callback(Callback<T>),
    /// Settle the promise paired with this sender.
    Promise(oneshot::Sender<TaskResult<T>>),
}

impl<T> CompletionSink<T> {
    /// Wrap a closure as a callback sink.
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(TaskResult<T>) + Send + 'static,
    {
        Self::Callback(Box::new(f))
    }

    /// Create a promise sink and the future it settles.
    #[must_use]
    pub fn promise() -> (Self, TaskPromise<T>) {
        let (tx, rx) = oneshot::channel();
        (Self::Promise(tx), TaskPromise { rx, taken: false })
    }

    fn settle(self, result: TaskResult<T>) {
        match self {
            Self::Callback(callback) => callback(result),
            Self::Promise(tx) => {
                if tx.send(result).is_err() {
                    debug!("promise dropped before the task completed");
                }
            }
        }
    }
}

impl<T> fmt::Debug for CompletionSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("CompletionSink::Callback"),
            Self::Promise(_) => f.write_str("CompletionSink::Promise"),
        }
    }
}

/// A sink guarded so that it fires at most once across threads.
///
/// Completion is split into [`Completion::claim`] and
/// [`Completion::deliver`] so the runtime can run cleanup between winning
/// the race and notifying the sink.
pub struct Completion<T> {
    fired: AtomicBool,
    sink: Mutex<Option<CompletionSink<T>>>,
}

impl<T> Completion<T> {
    /// Guard `sink`.
    pub fn new(sink: CompletionSink<T>) -> Self {
        Self {
            fired: AtomicBool::new(false),
            sink: Mutex::new(Some(sink)),
        }
    }

    /// Whether some caller has already claimed completion.
    pub fn is_completed(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Try to become the single completer. Only one caller ever wins.
    pub fn claim(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Notify the sink. Only the winner of [`Completion::claim`] calls this.
    pub fn deliver(&self, result: TaskResult<T>) {
        debug_assert!(self.is_completed(), "deliver before claim");
        let sink = self.sink.lock().take();
        if let Some(sink) = sink {
            sink.settle(result);
        }
    }

    /// Drop the sink without notifying it.
    pub fn discard(&self) {
        drop(self.sink.lock().take());
    }

    /// Claim and deliver in one step. Returns whether this call fired.
    pub fn complete(&self, result: TaskResult<T>) -> bool {
        if !self.claim() {
            return false;
        }
        self.deliver(result);
        true
    }
}

/// Future settled by a task's promise sink.
///
/// Resolves to [`TaskError::ShuttingDown`] when the runtime dropped the task
/// during shutdown without notifying it.
#[derive(Debug)]
pub struct TaskPromise<T> {
    rx: oneshot::Receiver<TaskResult<T>>,
    taken: bool,
}

impl<T> TaskPromise<T> {
    /// Take the outcome if the task has already settled.
    ///
    /// Returns `None` while pending and again once the outcome was taken.
    pub fn try_take(&mut self) -> Option<TaskResult<T>> {
        if self.taken {
            return None;
        }
        let outcome = match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(TaskError::ShuttingDown)),
        };
        self.taken = outcome.is_some();
        outcome
    }
}

impl<T> Future for TaskPromise<T> {
    type Output = TaskResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::ShuttingDown)))
    }
}
