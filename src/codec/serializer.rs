//! Bitmap serialization.
//!
//! Sizes are always computed before anything is written: a caller buffer is
//! checked for length and alignment up front, and fresh buffers are
//! allocated at exactly the computed size.

use croaring::{Bitmap, Frozen, Portable};
use tracing::trace;

use super::buffer::{is_aligned, AlignedBuffer};
use super::format::{SerializationFormat, ARRAY_CARDINALITY_LIMIT, ARRAY_UINT32, CONTAINER};
use crate::core::TaskError;

/// Which payload the `croaring` format will carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CroaringPlan {
    /// Tag `ARRAY_UINT32`, cardinality, then the values.
    Array {
        /// Number of values written.
        cardinality: u32,
    },
    /// Tag `CONTAINER`, then the portable encoding.
    Container {
        /// Length of the portable encoding.
        portable_size: usize,
    },
}

impl CroaringPlan {
    /// Total encoded length including the tag byte.
    #[must_use]
    pub const fn encoded_len(self) -> usize {
        match self {
            Self::Array { cardinality } => 1 + 4 + cardinality as usize * 4,
            Self::Container { portable_size } => 1 + portable_size,
        }
    }
}

/// Pick the smaller payload; ties and very large sets use the container form.
#[must_use]
pub fn plan_croaring(bitmap: &Bitmap) -> CroaringPlan {
    let cardinality = bitmap.cardinality();
    let portable_size = bitmap.get_serialized_size_in_bytes::<Portable>();
    if cardinality < ARRAY_CARDINALITY_LIMIT {
        let array_size = cardinality * 4 + 4;
        if array_size < portable_size as u64 {
            // Below the limit, so it fits in 24 bits.
            return CroaringPlan::Array {
                cardinality: cardinality as u32,
            };
        }
    }
    CroaringPlan::Container { portable_size }
}

/// Exact number of bytes [`serialize`] produces for `format`.
#[must_use]
pub fn serialized_size(bitmap: &Bitmap, format: SerializationFormat) -> usize {
    match format {
        SerializationFormat::Croaring => plan_croaring(bitmap).encoded_len(),
        SerializationFormat::Portable | SerializationFormat::UnsafeFrozenPortable => {
            bitmap.get_serialized_size_in_bytes::<Portable>()
        }
        SerializationFormat::UnsafeFrozenNative => bitmap.get_serialized_size_in_bytes::<Frozen>(),
    }
}

/// Serialize into a freshly allocated, exactly sized buffer.
///
/// # Errors
///
/// `TaskError::Allocation` when the buffer cannot be reserved.
pub fn serialize(bitmap: &Bitmap, format: SerializationFormat) -> Result<AlignedBuffer, TaskError> {
    let size = serialized_size(bitmap, format);
    let mut buffer = AlignedBuffer::zeroed(size, format.alignment())?;
    let written = write_encoding(bitmap, format, &mut buffer)?;
    buffer.truncate(written);
    trace!(format = %format, bytes = written, "bitmap serialized");
    Ok(buffer)
}

/// Serialize into caller memory. Nothing is written unless the whole
/// encoding fits and `dest` meets the format's alignment.
///
/// Returns the number of bytes written at the start of `dest`.
///
/// # Errors
///
/// `TaskError::BufferTooSmall` or `TaskError::Alignment`.
pub fn serialize_into(
    bitmap: &Bitmap,
    format: SerializationFormat,
    dest: &mut [u8],
) -> Result<usize, TaskError> {
    let required = serialized_size(bitmap, format);
    if dest.len() < required {
        return Err(TaskError::BufferTooSmall {
            required,
            available: dest.len(),
        });
    }
    if !is_aligned(dest, format.alignment()) {
        return Err(TaskError::Alignment {
            required: format.alignment(),
        });
    }
    write_encoding(bitmap, format, &mut dest[..required])
}

/// Raw little-endian values with no header.
#[must_use]
pub fn serialize_uint32_array(bitmap: &Bitmap) -> Vec<u8> {
    let mut out = Vec::with_capacity(bitmap.cardinality() as usize * 4);
    for value in bitmap.iter() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Single write pass into `dest`, already sized and aligned.
fn write_encoding(
    bitmap: &Bitmap,
    format: SerializationFormat,
    dest: &mut [u8],
) -> Result<usize, TaskError> {
    match format {
        SerializationFormat::Croaring => match plan_croaring(bitmap) {
            CroaringPlan::Array { cardinality } => {
                dest[0] = ARRAY_UINT32;
                dest[1..5].copy_from_slice(&cardinality.to_le_bytes());
                for (slot, value) in dest[5..].chunks_exact_mut(4).zip(bitmap.iter()) {
                    slot.copy_from_slice(&value.to_le_bytes());
                }
                Ok(1 + 4 + cardinality as usize * 4)
            }
            CroaringPlan::Container { .. } => {
                dest[0] = CONTAINER;
                copy_encoded(bitmap, false, &mut dest[1..]).map(|n| n + 1)
            }
        },
        SerializationFormat::Portable | SerializationFormat::UnsafeFrozenPortable => {
            copy_encoded(bitmap, false, dest)
        }
        SerializationFormat::UnsafeFrozenNative => copy_encoded(bitmap, true, dest),
    }
}

/// Encode through the engine and copy the result into `dest`.
///
/// The engine pads the frozen form inside `scratch` so the returned slice
/// starts aligned; only that slice is copied.
fn copy_encoded(bitmap: &Bitmap, frozen: bool, dest: &mut [u8]) -> Result<usize, TaskError> {
    let mut scratch = Vec::new();
    let encoded = if frozen {
        bitmap.serialize_into_vec::<Frozen>(&mut scratch)
    } else {
        bitmap.serialize_into_vec::<Portable>(&mut scratch)
    };
    let available = dest.len();
    let target = dest.get_mut(..encoded.len()).ok_or(TaskError::BufferTooSmall {
        required: encoded.len(),
        available,
    })?;
    target.copy_from_slice(encoded);
    Ok(encoded.len())
}
