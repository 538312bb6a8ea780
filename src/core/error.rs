//! Error types for task execution and bitmap codecs.

use std::fmt;
use std::io;
use std::path::Path;

use thiserror::Error;

/// Errors produced by tasks, codecs and the runtime.
///
/// Values are immutable once recorded: a task keeps the first error it sees
/// and discards the rest, so the type is `Clone` to let the same value reach
/// the completion sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Bad arguments detected before any work was queued.
    #[error("invalid argument: {0}")]
    Argument(String),
    /// A native buffer could not be allocated.
    #[error("failed to allocate {bytes} bytes")]
    Allocation {
        /// Requested size.
        bytes: usize,
    },
    /// The input bytes do not describe a valid bitmap.
    #[error("{0}")]
    Corrupted(&'static str),
    /// A buffer does not meet the alignment the format needs.
    #[error("buffer must be aligned to {required} bytes")]
    Alignment {
        /// Required alignment in bytes.
        required: usize,
    },
    /// A caller-supplied output buffer is shorter than the encoding.
    #[error("buffer too small: need {required} bytes, got {available}")]
    BufferTooSmall {
        /// Exact encoded size.
        required: usize,
        /// Length of the supplied buffer.
        available: usize,
    },
    /// An operating system call failed.
    #[error("{syscall} failed for '{path}': os error {errno}")]
    System {
        /// Raw OS error number (0 when the platform reported none).
        errno: i32,
        /// Name of the failing call.
        syscall: &'static str,
        /// Path the call operated on.
        path: String,
    },
    /// The runtime no longer admits new tasks.
    #[error("addon is shutting down")]
    ShuttingDown,
    /// The bitmap is frozen by an in-flight task and cannot be mutated.
    #[error("bitmap is frozen by a pending asynchronous operation")]
    Frozen,
    /// The worker pool refused the job.
    #[error("worker pool error: {0}")]
    Pool(String),
    /// Invariant violation or a panicking worker.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskError {
    /// Capture an I/O error together with the failing call and path.
    pub fn system(err: &io::Error, syscall: &'static str, path: &Path) -> Self {
        Self::System {
            errno: err.raw_os_error().unwrap_or(0),
            syscall,
            path: path.display().to_string(),
        }
    }

    /// Shorthand for argument errors.
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }
}

impl From<PoolError> for TaskError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::PoolShutdown => Self::ShuttingDown,
            other => Self::Pool(other.to_string()),
        }
    }
}

/// Errors that can occur when using a `WorkerPool`.
#[derive(Debug)]
pub enum PoolError {
    /// The job queue is full; no more jobs can be accepted.
    QueueFull,

    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (thread spawn failure, channel closed, etc.).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "job queue is full"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
