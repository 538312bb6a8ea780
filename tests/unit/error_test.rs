//! Tests for error types

use std::io;
use std::path::Path;

use roaring_offload::core::{PoolError, TaskError};

#[test]
fn test_shutting_down_message() {
    assert_eq!(TaskError::ShuttingDown.to_string(), "addon is shutting down");
}

#[test]
fn test_corrupted_message_is_verbatim() {
    let err = TaskError::Corrupted("corrupted data, wrong cardinality header");
    assert_eq!(err.to_string(), "corrupted data, wrong cardinality header");
}

#[test]
fn test_buffer_too_small_message() {
    let err = TaskError::BufferTooSmall {
        required: 17,
        available: 8,
    };
    assert_eq!(err.to_string(), "buffer too small: need 17 bytes, got 8");
}

#[test]
fn test_system_error_without_os_code() {
    let io_err = io::Error::new(io::ErrorKind::Other, "synthetic");
    let err = TaskError::system(&io_err, "write", Path::new("out.bin"));
    assert!(matches!(err, TaskError::System { errno: 0, syscall: "write", .. }));
}

#[test]
fn test_pool_errors_convert() {
    assert_eq!(TaskError::from(PoolError::PoolShutdown), TaskError::ShuttingDown);
    assert!(matches!(TaskError::from(PoolError::QueueFull), TaskError::Pool(_)));
}

#[test]
fn test_pool_error_display() {
    assert_eq!(format!("{}", PoolError::QueueFull), "job queue is full");
    assert_eq!(
        format!("{}", PoolError::InvalidConfig("worker_count".into())),
        "invalid configuration: worker_count"
    );
}
