//! External memory accounting.
//!
//! Bytes allocated by the bitmap engine and codec buffers live outside the
//! host's own heap. Workers never touch the shared total directly: they add
//! to a per-task [`PendingMemoryDelta`], and the runtime flushes it into the
//! [`MemoryAccountant`] once, from the caller thread, when the task completes.
//! Every byte counted that way is owned by a [`MemoryCharge`] travelling with
//! the value handed to the caller; dropping the value gives the bytes back.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::trace;

/// Process-wide counter of bytes attributed to native allocations.
#[derive(Debug, Default)]
pub struct MemoryAccountant {
    total: AtomicI64,
}

impl MemoryAccountant {
    /// Create a fresh accountant starting at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            total: AtomicI64::new(0),
        }
    }

    /// The accountant shared by every runtime that was not given its own.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<MemoryAccountant>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Apply a signed delta and return the new total.
    pub fn adjust(&self, delta: i64) -> i64 {
        if delta == 0 {
            return self.current();
        }
        let total = self.total.fetch_add(delta, Ordering::AcqRel) + delta;
        trace!(delta, total, "external memory adjusted");
        total
    }

    /// Current attributed byte count.
    #[must_use]
    pub fn current(&self) -> i64 {
        self.total.load(Ordering::Acquire)
    }
}

/// Signed byte count accumulated by worker threads for a single task.
#[derive(Debug, Default)]
pub struct PendingMemoryDelta {
    bytes: AtomicI64,
}

impl PendingMemoryDelta {
    /// Record an allocation of `bytes`.
    pub fn allocated(&self, bytes: usize) {
        self.bytes
            .fetch_add(i64::try_from(bytes).unwrap_or(i64::MAX), Ordering::Relaxed);
    }

    /// Record a release of `bytes`.
    pub fn released(&self, bytes: usize) {
        self.bytes
            .fetch_sub(i64::try_from(bytes).unwrap_or(i64::MAX), Ordering::Relaxed);
    }

    /// Pending delta without resetting it.
    #[must_use]
    pub fn peek(&self) -> i64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Move the pending delta into `accountant`, leaving zero behind.
    ///
    /// Calling this twice applies nothing the second time.
    pub fn flush_into(&self, accountant: &MemoryAccountant) -> i64 {
        let delta = self.bytes.swap(0, Ordering::AcqRel);
        accountant.adjust(delta);
        delta
    }
}

/// Bytes a caller-held value keeps attributed to an accountant.
///
/// Created through [`TaskContext::charge`](super::TaskContext::charge), which
/// also records the allocation in the task's pending delta. Dropping the
/// charge subtracts the same amount again.
pub struct MemoryCharge {
    accountant: Arc<MemoryAccountant>,
    bytes: usize,
}

impl MemoryCharge {
    pub(crate) fn new(accountant: Arc<MemoryAccountant>, bytes: usize) -> Self {
        Self { accountant, bytes }
    }

    /// Attributed byte count.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for MemoryCharge {
    fn drop(&mut self) {
        self.accountant
            .adjust(-i64::try_from(self.bytes).unwrap_or(i64::MAX));
    }
}

impl fmt::Debug for MemoryCharge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCharge").field("bytes", &self.bytes).finish()
    }
}
