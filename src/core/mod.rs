//! Asynchronous task execution: runtime, tasks, completion and accounting.

pub mod completion;
pub mod error;
pub mod memory;
pub mod parallel;
pub mod runtime;
pub mod shutdown;
pub mod task;
pub mod worker_pool;

pub use completion::{Callback, Completion, CompletionSink, TaskPromise, TaskResult};
pub use error::{AppResult, PoolError, TaskError};
pub use memory::{MemoryAccountant, MemoryCharge, PendingMemoryDelta};
pub use parallel::{partition_count, ParallelTask, PartitionCursor};
pub use runtime::Runtime;
pub use shutdown::{drain, Admission, DrainBackoff, DrainOutcome, ShutdownCoordinator};
pub use task::{AsyncTask, TaskContext, TaskState};
pub use worker_pool::{Job, PoolStats, WorkerPool};
