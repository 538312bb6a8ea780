//! Integration tests for the task runtime
//!
//! These tests cover:
//! - Exactly-once completion for callbacks and promises
//! - Rejection during validation and after shutdown
//! - Errors and panics inside `work`
//! - Parallel fan-out bookkeeping
//! - Shutdown draining and forced completion, including races with workers
//! - Memory accounting and the checkpoint hook

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use roaring_offload::config::RuntimeConfig;
use roaring_offload::core::{
    AsyncTask, DrainOutcome, MemoryAccountant, ParallelTask, Runtime, ShutdownCoordinator,
    TaskContext, TaskError, TaskResult,
};

// ============================================================================
// HELPERS
// ============================================================================

fn runtime(workers: usize) -> Runtime {
    Runtime::new(RuntimeConfig::new().with_worker_count(workers).with_parallelism(workers)).unwrap()
}

#[derive(Default)]
struct Flags {
    before: AtomicBool,
    worked: AtomicBool,
    finally: AtomicBool,
}

/// Doubles its input; optionally fails at a chosen step.
struct Double {
    input: u32,
    result: Option<u32>,
    fail_before: bool,
    fail_work: bool,
    panic_work: bool,
    flags: Arc<Flags>,
}

impl Double {
    fn new(input: u32) -> (Self, Arc<Flags>) {
        let flags = Arc::new(Flags::default());
        (
            Self {
                input,
                result: None,
                fail_before: false,
                fail_work: false,
                panic_work: false,
                flags: Arc::clone(&flags),
            },
            flags,
        )
    }
}

impl AsyncTask for Double {
    type Output = u32;

    fn before(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        self.flags.before.store(true, Ordering::SeqCst);
        if self.fail_before {
            return Err(TaskError::argument("bad input"));
        }
        Ok(())
    }

    fn work(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        self.flags.worked.store(true, Ordering::SeqCst);
        assert!(!self.panic_work, "boom");
        if self.fail_work {
            return Err(TaskError::Corrupted("work failed"));
        }
        self.result = Some(self.input * 2);
        Ok(())
    }

    fn finally(&mut self) {
        self.flags.finally.store(true, Ordering::SeqCst);
    }

    fn output(self) -> TaskResult<u32> {
        self.result.ok_or_else(|| TaskError::Internal("no result".into()))
    }
}

/// Blocks in `work` until released.
struct Gate {
    started: mpsc::Sender<()>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Gate {
    fn new() -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        (
            Self {
                started: started_tx,
                release: Mutex::new(release_rx),
            },
            started_rx,
            release_tx,
        )
    }
}

impl AsyncTask for Gate {
    type Output = ();

    fn work(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        let _ = self.started.send(());
        let _ = self.release.lock().recv_timeout(Duration::from_secs(5));
        Ok(())
    }

    fn output(self) -> TaskResult<()> {
        Ok(())
    }
}

fn counting_callback<T: Send + 'static>(
    calls: &Arc<AtomicUsize>,
    seen: &Arc<Mutex<Vec<TaskResult<T>>>>,
) -> impl FnOnce(TaskResult<T>) + Send + 'static {
    let calls = Arc::clone(calls);
    let seen = Arc::clone(seen);
    move |result| {
        calls.fetch_add(1, Ordering::SeqCst);
        seen.lock().push(result);
    }
}

// ============================================================================
// SINGLE TASKS
// ============================================================================

#[test]
fn test_callback_fires_exactly_once() {
    let rt = runtime(2);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    for i in 0..50 {
        let (task, _) = Double::new(i);
        rt.spawn_callback(task, counting_callback(&calls, &seen));
    }
    rt.run_until_idle();

    assert_eq!(calls.load(Ordering::SeqCst), 50);
    let mut values: Vec<u32> = seen.lock().iter().map(|r| *r.as_ref().unwrap()).collect();
    values.sort_unstable();
    assert_eq!(values, (0..50).map(|i| i * 2).collect::<Vec<_>>());
    assert_eq!(rt.in_flight(), 0);
    assert_eq!(rt.shutdown(), DrainOutcome::Drained);
}

#[test]
fn test_promise_resolves_after_pump() {
    let rt = runtime(1);
    let (task, flags) = Double::new(21);
    let mut promise = rt.spawn_promise(task);

    rt.run_until_idle();
    assert_eq!(promise.try_take(), Some(Ok(42)));
    assert!(flags.before.load(Ordering::SeqCst));
    assert!(flags.worked.load(Ordering::SeqCst));
    assert!(flags.finally.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_promise_is_awaitable() {
    let rt = runtime(2);
    let (task, _) = Double::new(5);
    let promise = rt.spawn_promise(task);
    rt.run_until_idle();
    assert_eq!(promise.await, Ok(10));
}

#[test]
fn test_before_error_rejects_without_work() {
    let rt = runtime(1);
    let (mut task, flags) = Double::new(1);
    task.fail_before = true;

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    rt.spawn_callback(task, counting_callback(&calls, &seen));

    // Rejection completes synchronously.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(seen.lock()[0], Err(TaskError::Argument(_))));
    assert!(!flags.worked.load(Ordering::SeqCst));
    assert!(flags.finally.load(Ordering::SeqCst));
    assert_eq!(rt.in_flight(), 0);
}

#[test]
fn test_work_error_is_delivered() {
    let rt = runtime(1);
    let (mut task, flags) = Double::new(1);
    task.fail_work = true;
    let mut promise = rt.spawn_promise(task);
    rt.run_until_idle();

    assert_eq!(promise.try_take(), Some(Err(TaskError::Corrupted("work failed"))));
    assert!(flags.finally.load(Ordering::SeqCst));
}

#[test]
fn test_work_panic_becomes_internal_error() {
    let rt = runtime(1);
    let (mut task, _) = Double::new(1);
    task.panic_work = true;
    let mut promise = rt.spawn_promise(task);
    rt.run_until_idle();

    assert_eq!(
        promise.try_take(),
        Some(Err(TaskError::Internal("worker panicked: boom".into())))
    );

    // The pool survives the panic.
    let (task, _) = Double::new(4);
    let mut promise = rt.spawn_promise(task);
    rt.run_until_idle();
    assert_eq!(promise.try_take(), Some(Ok(8)));
}

#[test]
fn test_checkpoint_runs_after_each_notification() {
    let rt = runtime(2);
    let checkpoints = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&checkpoints);
    rt.set_checkpoint_hook(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for i in 0..5 {
        let (task, _) = Double::new(i);
        rt.spawn_callback(task, |_| {});
    }
    rt.run_until_idle();
    assert_eq!(checkpoints.load(Ordering::SeqCst), 5);
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_tasks_after_shutdown_are_rejected() {
    let rt = runtime(1);
    assert_eq!(rt.shutdown(), DrainOutcome::Drained);

    let (task, flags) = Double::new(3);
    let mut promise = rt.spawn_promise(task);
    assert_eq!(promise.try_take(), Some(Err(TaskError::ShuttingDown)));
    assert!(!flags.worked.load(Ordering::SeqCst));
    assert!(flags.finally.load(Ordering::SeqCst));
}

#[test]
fn test_shutdown_drains_and_skips_sinks() {
    let rt = runtime(1);
    let (gate, started, release) = Gate::new();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    rt.spawn_callback(gate, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    started.recv_timeout(Duration::from_secs(5)).unwrap();

    let unlock = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        let _ = release.send(());
    });
    assert_eq!(rt.shutdown(), DrainOutcome::Drained);
    unlock.join().unwrap();

    assert_eq!(rt.in_flight(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_drain_timeout_forces_queued_tasks() {
    let rt = Runtime::new(
        RuntimeConfig::new()
            .with_worker_count(1)
            .with_drain_timeout(Some(Duration::from_millis(20))),
    )
    .unwrap();

    let (gate, started, release) = Gate::new();
    rt.spawn_callback(gate, |_| {});
    started.recv_timeout(Duration::from_secs(5)).unwrap();

    let mut queued = Vec::new();
    for i in 0..3 {
        let (task, flags) = Double::new(i);
        queued.push((rt.spawn_promise(task), flags));
    }

    let unlock = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        let _ = release.send(());
    });
    assert_eq!(rt.shutdown(), DrainOutcome::TimedOut(1));
    unlock.join().unwrap();

    for (mut promise, flags) in queued {
        assert_eq!(promise.try_take(), Some(Err(TaskError::ShuttingDown)));
        assert!(!flags.worked.load(Ordering::SeqCst));
        assert!(flags.finally.load(Ordering::SeqCst));
    }
    assert_eq!(rt.in_flight(), 0);
}

/// Sleeps for a chosen delay inside `work`, counting every hook call.
struct Sleepy {
    input: u32,
    delay: Duration,
    result: Option<u32>,
    work_calls: Arc<AtomicUsize>,
    finally_calls: Arc<AtomicUsize>,
}

impl Sleepy {
    fn new(input: u32, delay: Duration) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let work_calls = Arc::new(AtomicUsize::new(0));
        let finally_calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                input,
                delay,
                result: None,
                work_calls: Arc::clone(&work_calls),
                finally_calls: Arc::clone(&finally_calls),
            },
            work_calls,
            finally_calls,
        )
    }
}

impl AsyncTask for Sleepy {
    type Output = u32;

    fn work(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        self.work_calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.result = Some(self.input + 1);
        Ok(())
    }

    fn finally(&mut self) {
        self.finally_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn output(self) -> TaskResult<u32> {
        self.result.ok_or_else(|| TaskError::Internal("no result".into()))
    }
}

#[test]
fn test_worker_completion_racing_forced_completion() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for round in 0..25 {
        let timeout = Duration::from_millis(rng.random_range(1..=3));
        let rt = Runtime::new(
            RuntimeConfig::new()
                .with_worker_count(2)
                .with_drain_timeout(Some(timeout)),
        )
        .unwrap();

        let mut promises = Vec::new();
        let mut callbacks = Vec::new();
        for i in 0..16 {
            let delay = Duration::from_micros(rng.random_range(0..1_500));
            let (task, work_calls, finally_calls) = Sleepy::new(i, delay);
            if i % 2 == 0 {
                promises.push((i, rt.spawn_promise(task), work_calls, finally_calls));
            } else {
                let calls = Arc::new(AtomicUsize::new(0));
                let counter = Arc::clone(&calls);
                rt.spawn_callback(task, move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
                callbacks.push((calls, work_calls, finally_calls));
            }
        }

        // Let some tasks finish on the pool before shutdown starts.
        std::thread::sleep(Duration::from_micros(rng.random_range(0..2_000)));
        rt.pump();
        rt.shutdown();
        assert_eq!(rt.in_flight(), 0, "round {round}");

        for (i, mut promise, work_calls, finally_calls) in promises {
            let outcome = promise.try_take();
            match outcome {
                Some(Ok(value)) => assert_eq!(value, i + 1),
                Some(Err(TaskError::ShuttingDown)) => {}
                other => panic!("round {round}: unexpected outcome {other:?}"),
            }
            assert_eq!(promise.try_take(), None, "round {round}");
            assert!(work_calls.load(Ordering::SeqCst) <= 1, "round {round}");
            assert_eq!(finally_calls.load(Ordering::SeqCst), 1, "round {round}");
        }
        for (calls, work_calls, finally_calls) in callbacks {
            assert!(calls.load(Ordering::SeqCst) <= 1, "round {round}");
            assert!(work_calls.load(Ordering::SeqCst) <= 1, "round {round}");
            assert_eq!(finally_calls.load(Ordering::SeqCst), 1, "round {round}");
        }
    }
}

#[test]
fn test_injected_coordinator_sees_shutdown() {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let rt = Runtime::with_parts(
        RuntimeConfig::new().with_worker_count(1),
        coordinator.clone(),
        Arc::new(MemoryAccountant::new()),
    )
    .unwrap();
    rt.shutdown();
    assert!(roaring_offload::core::Admission::is_shutting_down(coordinator.as_ref()));
}

// ============================================================================
// PARALLEL TASKS
// ============================================================================

/// Squares every index; counts visits per index.
struct Squares {
    visits: Vec<AtomicUsize>,
    slots: Vec<Mutex<Option<u64>>>,
    fail_at: Option<usize>,
    concurrency: Option<usize>,
}

impl Squares {
    fn new(len: usize) -> Self {
        Self {
            visits: (0..len).map(|_| AtomicUsize::new(0)).collect(),
            slots: (0..len).map(|_| Mutex::new(None)).collect(),
            fail_at: None,
            concurrency: None,
        }
    }
}

impl ParallelTask for Squares {
    type Output = (Vec<u64>, Vec<usize>);

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn concurrency(&self) -> Option<usize> {
        self.concurrency
    }

    fn parallel_work(&self, index: usize, _ctx: &TaskContext) -> Result<(), TaskError> {
        self.visits[index].fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(index) {
            return Err(TaskError::Corrupted("bad item"));
        }
        *self.slots[index].lock() = Some((index as u64) * (index as u64));
        Ok(())
    }

    fn output(self) -> TaskResult<Self::Output> {
        let values = self
            .slots
            .into_iter()
            .map(|slot| slot.into_inner().ok_or(TaskError::Internal("empty slot".into())))
            .collect::<Result<_, _>>()?;
        let visits = self.visits.into_iter().map(AtomicUsize::into_inner).collect();
        Ok((values, visits))
    }
}

#[test]
fn test_parallel_visits_each_index_once() {
    let rt = runtime(4);
    let mut promise = rt.spawn_parallel_promise(Squares::new(5_000));
    rt.run_until_idle();

    let (values, visits) = promise.try_take().unwrap().unwrap();
    assert!(visits.iter().all(|&v| v == 1));
    for (i, value) in values.iter().enumerate() {
        assert_eq!(*value, (i as u64) * (i as u64));
    }
}

#[test]
fn test_parallel_single_partition_is_sequential() {
    let rt = runtime(4);
    let mut task = Squares::new(100);
    task.concurrency = Some(1);
    let mut promise = rt.spawn_parallel_promise(task);
    rt.run_until_idle();
    assert!(promise.try_take().unwrap().is_ok());
}

#[test]
fn test_parallel_empty_task_completes() {
    let rt = runtime(2);
    let mut promise = rt.spawn_parallel_promise(Squares::new(0));
    rt.run_until_idle();
    assert_eq!(promise.try_take(), Some(Ok((Vec::new(), Vec::new()))));
}

#[test]
fn test_parallel_error_fires_once() {
    let rt = runtime(4);
    let mut task = Squares::new(1_000);
    task.fail_at = Some(10);

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    rt.spawn_parallel_callback(task, counting_callback(&calls, &seen));
    rt.run_until_idle();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(seen.lock()[0], Err(TaskError::Corrupted("bad item")));
}

// ============================================================================
// MEMORY ACCOUNTING
// ============================================================================

struct Allocates(usize);

impl AsyncTask for Allocates {
    type Output = ();

    fn work(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        ctx.memory().allocated(self.0);
        Ok(())
    }

    fn output(self) -> TaskResult<()> {
        Ok(())
    }
}

#[test]
fn test_memory_delta_flushed_on_completion() {
    let accountant = Arc::new(MemoryAccountant::new());
    let rt = Runtime::with_parts(
        RuntimeConfig::new().with_worker_count(2),
        Arc::new(ShutdownCoordinator::new()),
        Arc::clone(&accountant),
    )
    .unwrap();

    rt.spawn_callback(Allocates(1_000), |_| {});
    rt.spawn_callback(Allocates(24), |_| {});
    rt.run_until_idle();
    assert_eq!(accountant.current(), 1_024);
    assert_eq!(rt.accountant().current(), 1_024);
}
