//! Shutdown coordination for in-flight tasks.
//!
//! Every task registers with an [`Admission`] implementation before it is
//! queued and leaves once it has completed. When shutdown begins the
//! coordinator refuses new tasks and the runtime drains the ones already
//! admitted.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Admission control consulted by the runtime for every task.
///
/// The runtime holds this behind an `Arc<dyn Admission>` so tests can inject
/// a coordinator with scripted answers.
pub trait Admission: Send + Sync {
    /// Register a new in-flight task. Returns `false` once shutdown started.
    fn try_enter(&self) -> bool;
    /// Unregister a task admitted by [`Admission::try_enter`].
    fn leave(&self);
    /// Whether shutdown has begun.
    fn is_shutting_down(&self) -> bool;
    /// Number of admitted tasks that have not left yet.
    fn in_flight(&self) -> usize;
    /// Flip into the shutting-down state. Idempotent.
    fn begin_shutdown(&self);
}

/// Backoff schedule used while draining.
#[derive(Debug, Clone, Copy)]
pub struct DrainBackoff {
    /// First sleep after an idle iteration.
    pub initial: Duration,
    /// Upper bound for the doubling sleep.
    pub max: Duration,
    /// Give up after this long; `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for DrainBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_micros(50),
            max: Duration::from_millis(4),
            timeout: None,
        }
    }
}

/// Result of a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The in-flight counter reached zero.
    Drained,
    /// The timeout elapsed with this many tasks still admitted.
    TimedOut(usize),
}

/// Reference count of in-flight tasks plus a shutting-down flag.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    in_flight: AtomicUsize,
    shutting_down: AtomicBool,
}

impl ShutdownCoordinator {
    /// Create a coordinator accepting tasks.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }
}

impl Admission for ShutdownCoordinator {
    fn try_enter(&self) -> bool {
        if self.shutting_down.load(Ordering::Acquire) {
            return false;
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        // A drain may have observed zero between the flag check and the
        // increment; back out so it never misses this task.
        if self.shutting_down.load(Ordering::Acquire) {
            self.leave();
            return false;
        }
        true
    }

    fn leave(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "leave without matching try_enter");
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            info!(in_flight = self.in_flight(), "shutdown started");
        }
    }
}

/// Block until `admission` reports no in-flight tasks.
///
/// `pump` runs between checks so completions queued for the calling thread
/// are processed while waiting; it returns how many it handled. The sleep
/// doubles on idle iterations from `backoff.initial` up to `backoff.max` and
/// resets whenever `pump` makes progress.
pub fn drain(
    admission: &dyn Admission,
    backoff: DrainBackoff,
    mut pump: impl FnMut() -> usize,
) -> DrainOutcome {
    let started = Instant::now();
    let mut delay = backoff.initial;
    loop {
        let handled = pump();
        let remaining = admission.in_flight();
        if remaining == 0 {
            debug!(elapsed = ?started.elapsed(), "drain complete");
            return DrainOutcome::Drained;
        }
        if let Some(timeout) = backoff.timeout {
            if started.elapsed() >= timeout {
                warn!(remaining, "drain timed out");
                return DrainOutcome::TimedOut(remaining);
            }
        }
        if handled > 0 {
            delay = backoff.initial;
            continue;
        }
        thread::sleep(delay);
        delay = (delay * 2).min(backoff.max);
    }
}
