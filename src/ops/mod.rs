//! Bitmap operations offloaded to the worker pool.
//!
//! Each type here is an [`AsyncTask`](crate::core::AsyncTask) or
//! [`ParallelTask`](crate::core::ParallelTask); start them through
//! [`Runtime`](crate::core::Runtime).
//!
//! Every buffer or bitmap an operation allocates for the caller carries a
//! [`MemoryCharge`](crate::core::MemoryCharge): the bytes count against the
//! runtime's accountant until the caller drops the value.

pub mod build;
pub mod deserialize;
pub mod serialize;

pub use build::{FromArrayTask, ToTextTask};
pub use deserialize::{DeserializeFileTask, DeserializeParallelTask, DeserializeTask};
pub use serialize::{SerializeFileTask, SerializeTask};

use crate::bitmap::SharedBitmap;
use crate::core::TaskContext;

/// Attribute a freshly decoded or built bitmap to the task's accountant.
fn charge_bitmap(bitmap: &SharedBitmap, ctx: &TaskContext) {
    bitmap.attach_charge(ctx.charge(bitmap.footprint()));
}
