//! Tests for memory accounting and the shutdown coordinator

use std::sync::Arc;
use std::time::Duration;

use roaring_offload::core::{
    drain, Admission, DrainBackoff, DrainOutcome, MemoryAccountant, PendingMemoryDelta,
    ShutdownCoordinator,
};

#[test]
fn test_global_accountant_is_shared() {
    let a = MemoryAccountant::global();
    let b = MemoryAccountant::global();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn test_negative_delta_reduces_total() {
    let accountant = MemoryAccountant::new();
    accountant.adjust(1_000);
    let pending = PendingMemoryDelta::default();
    pending.released(400);
    assert_eq!(pending.peek(), -400);
    pending.flush_into(&accountant);
    assert_eq!(accountant.current(), 600);
}

#[test]
fn test_coordinator_refuses_after_shutdown() {
    let coordinator = ShutdownCoordinator::new();
    assert!(coordinator.try_enter());
    coordinator.begin_shutdown();
    assert!(!coordinator.try_enter());
    assert_eq!(coordinator.in_flight(), 1);
    coordinator.leave();
    assert_eq!(coordinator.in_flight(), 0);
}

#[test]
fn test_drain_pumps_until_idle() {
    let coordinator = ShutdownCoordinator::new();
    for _ in 0..3 {
        assert!(coordinator.try_enter());
    }
    coordinator.begin_shutdown();

    let outcome = drain(&coordinator, DrainBackoff::default(), || {
        if coordinator.in_flight() > 0 {
            coordinator.leave();
            1
        } else {
            0
        }
    });
    assert_eq!(outcome, DrainOutcome::Drained);
}

#[test]
fn test_drain_times_out() {
    let coordinator = ShutdownCoordinator::new();
    assert!(coordinator.try_enter());
    coordinator.begin_shutdown();

    let backoff = DrainBackoff {
        timeout: Some(Duration::from_millis(10)),
        ..DrainBackoff::default()
    };
    assert_eq!(drain(&coordinator, backoff, || 0), DrainOutcome::TimedOut(1));
}
