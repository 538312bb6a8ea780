//! In-memory bitmap deserialization.
//!
//! Empty input is an empty bitmap in every format. Frozen formats are
//! copied into a runtime-owned aligned buffer before the view is built; see
//! [`deserialize_unsafe_aliased`](super::frozen::deserialize_unsafe_aliased)
//! for the zero-copy path.

use croaring::{Bitmap, Portable};
use tracing::trace;

use super::format::{SerializationFormat, ARRAY_UINT32, CONTAINER};
use super::frozen::FrozenBitmap;
use crate::bitmap::SharedBitmap;
use crate::core::TaskError;

/// Decode `bytes` into a new handle.
///
/// # Errors
///
/// `TaskError::Corrupted` for malformed input, `Alignment` only from the
/// aliasing path, `Allocation` when the frozen copy cannot be made.
pub fn deserialize(bytes: &[u8], format: SerializationFormat) -> Result<SharedBitmap, TaskError> {
    if bytes.is_empty() {
        return Ok(SharedBitmap::new());
    }
    let handle = match format {
        SerializationFormat::Portable => SharedBitmap::from(deserialize_portable(bytes)?),
        SerializationFormat::Croaring => SharedBitmap::from(deserialize_croaring(bytes)?),
        SerializationFormat::UnsafeFrozenNative | SerializationFormat::UnsafeFrozenPortable => {
            SharedBitmap::from(FrozenBitmap::copy_from(bytes, format)?)
        }
    };
    trace!(format = %format, bytes = bytes.len(), "bitmap deserialized");
    Ok(handle)
}

/// Decode into an owned bitmap, materializing frozen views.
///
/// # Errors
///
/// As for [`deserialize`].
pub fn deserialize_owned(bytes: &[u8], format: SerializationFormat) -> Result<Bitmap, TaskError> {
    if bytes.is_empty() {
        return Ok(Bitmap::new());
    }
    match format {
        SerializationFormat::Portable => deserialize_portable(bytes),
        SerializationFormat::Croaring => deserialize_croaring(bytes),
        SerializationFormat::UnsafeFrozenNative | SerializationFormat::UnsafeFrozenPortable => {
            Ok(FrozenBitmap::copy_from(bytes, format)?.to_bitmap())
        }
    }
}

fn deserialize_portable(bytes: &[u8]) -> Result<Bitmap, TaskError> {
    Bitmap::try_deserialize::<Portable>(bytes).ok_or(TaskError::Corrupted("invalid portable data"))
}

fn deserialize_croaring(bytes: &[u8]) -> Result<Bitmap, TaskError> {
    match bytes[0] {
        ARRAY_UINT32 => {
            let header = bytes
                .get(1..5)
                .ok_or(TaskError::Corrupted("corrupted data, wrong cardinality header"))?;
            let cardinality = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected = (cardinality as u64)
                .checked_mul(4)
                .and_then(|payload| payload.checked_add(5));
            if expected != Some(bytes.len() as u64) {
                return Err(TaskError::Corrupted("corrupted data, wrong cardinality header"));
            }
            decode_values(&bytes[5..], cardinality)
        }
        CONTAINER => deserialize_portable(&bytes[1..]),
        _ => Err(TaskError::Corrupted("invalid header byte")),
    }
}

/// Raw little-endian values with no header.
///
/// # Errors
///
/// `TaskError::Corrupted` when the length is not a multiple of four.
pub fn deserialize_uint32_array(bytes: &[u8]) -> Result<Bitmap, TaskError> {
    if bytes.len() % 4 != 0 {
        return Err(TaskError::Corrupted("uint32 array length is not a multiple of 4"));
    }
    let count = u32::try_from(bytes.len() / 4)
        .map_err(|_| TaskError::Corrupted("uint32 array too large"))?;
    decode_values(bytes, count)
}

fn decode_values(payload: &[u8], count: u32) -> Result<Bitmap, TaskError> {
    let mut values = Vec::new();
    values
        .try_reserve_exact(count as usize)
        .map_err(|_| TaskError::Allocation {
            bytes: payload.len(),
        })?;
    values.extend(
        payload
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
    );
    let mut bitmap = Bitmap::new();
    bitmap.add_many(&values);
    Ok(bitmap)
}
