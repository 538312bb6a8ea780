//! # Roaring Offload
//!
//! Roaring bitmap serialization with the expensive parts moved off the
//! caller thread.
//!
//! The crate has two halves:
//!
//! - **Task framework** ([`core`]): a single caller thread owns a
//!   [`Runtime`](core::Runtime) that validates tasks, hands their work to a
//!   fixed pool of OS threads, and runs every completion back on the caller
//!   thread exactly once. Parallel tasks fan items out over several pool
//!   threads through a shared cursor. A shutdown coordinator refuses new work
//!   and drains in-flight tasks; a memory accountant collects the external
//!   memory each task allocated.
//! - **Codec** ([`codec`]): four binary encodings (`croaring`, `portable`,
//!   `unsafe_frozen_croaring`, `unsafe_frozen_portable`), memory-mapped file
//!   loading, raw `u32` arrays and text renderings.
//!
//! [`ops`] joins them: serialize, deserialize, file and text operations as
//! tasks. Bitmaps are shared through [`SharedBitmap`](bitmap::SharedBitmap),
//! which refuses mutation while an operation holds it frozen.
//!
//! ```rust,ignore
//! use roaring_offload::bitmap::SharedBitmap;
//! use roaring_offload::config::RuntimeConfig;
//! use roaring_offload::core::Runtime;
//! use roaring_offload::ops::{DeserializeTask, SerializeTask};
//!
//! let runtime = Runtime::new(RuntimeConfig::new())?;
//! let bitmap = SharedBitmap::of(&[1, 3, 5]);
//!
//! let mut encoded = runtime.spawn_promise(SerializeTask::new(bitmap.clone(), "croaring"));
//! runtime.run_until_idle();
//! let bytes = encoded.try_take().unwrap()?;
//!
//! runtime.spawn_callback(DeserializeTask::new(bytes.to_vec(), "croaring"), |decoded| {
//!     assert_eq!(decoded.unwrap().to_vec(), vec![1, 3, 5]);
//! });
//! runtime.shutdown();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Shared bitmap handles and the freeze marker.
pub mod bitmap;
/// Encodings, frozen views, files and text.
pub mod codec;
/// Runtime configuration.
pub mod config;
/// Task execution, completion, shutdown and memory accounting.
pub mod core;
/// Bitmap operations as asynchronous tasks.
pub mod ops;
/// Shared utilities.
pub mod util;
