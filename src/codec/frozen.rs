//! Frozen bitmap views.
//!
//! A frozen view points straight into the bytes it was built from. Two
//! owners are possible:
//!
//! - [`FrozenBitmap`] owns an aligned copy of the input, so the view lives
//!   exactly as long as its bytes. Every safe entry point uses this.
//! - [`UnsafeAliasedView`] borrows the caller's bytes for `'a`. No copy is
//!   made; the borrow checker keeps the bytes alive and immutable.

#![allow(unsafe_code)]

use std::fmt;
use std::ops::Deref;

use croaring::{Bitmap, BitmapView, Frozen, Portable};

use super::buffer::{is_aligned, AlignedBuffer};
use super::format::{SerializationFormat, FROZEN_ALIGNMENT};
use crate::core::TaskError;

/// Low 15 bits of the trailing header word of the native frozen layout.
const FROZEN_COOKIE: u32 = 13766;

/// Container typecodes in the native frozen layout.
const BITSET_CONTAINER: u8 = 1;
const ARRAY_CONTAINER: u8 = 2;
const RUN_CONTAINER: u8 = 3;

/// A bitset container always spans 2^16 bits.
const BITSET_CONTAINER_BYTES: usize = 8192;

/// Per-container trailer: 2-byte key, 2-byte count, 1-byte typecode.
const CONTAINER_TRAILER_BYTES: usize = 5;

/// Check what can be checked before handing frozen bytes to the engine.
///
/// The engine asserts on input it cannot map, so everything it would refuse
/// has to be refused here first.
pub(crate) fn check_frozen_input(bytes: &[u8], format: SerializationFormat) -> Result<(), TaskError> {
    match format {
        SerializationFormat::UnsafeFrozenNative => {
            if !is_aligned(bytes, FROZEN_ALIGNMENT) {
                return Err(TaskError::Alignment {
                    required: FROZEN_ALIGNMENT,
                });
            }
            check_native_layout(bytes)
        }
        SerializationFormat::UnsafeFrozenPortable => {
            if Bitmap::try_deserialize::<Portable>(bytes).is_none() {
                return Err(TaskError::Corrupted("invalid portable data"));
            }
            Ok(())
        }
        other => Err(TaskError::argument(format!("{other} is not a frozen format"))),
    }
}

/// Validate the native frozen trailer against the total length.
///
/// Layout, back to front: a header word (`containers << 15 | cookie`), then
/// one typecode byte, one count and one key per container, preceded by the
/// bitset, run and array zones. The zones must add up to the exact length.
fn check_native_layout(bytes: &[u8]) -> Result<(), TaskError> {
    let Some(header_at) = bytes.len().checked_sub(4) else {
        return Err(TaskError::Corrupted("frozen data too short"));
    };
    let header = read_u32(bytes, header_at);
    if header & 0x7FFF != FROZEN_COOKIE {
        return Err(TaskError::Corrupted("invalid frozen header"));
    }

    let containers = (header >> 15) as usize;
    let trailer = containers * CONTAINER_TRAILER_BYTES;
    let Some(keys_at) = header_at.checked_sub(trailer) else {
        return Err(TaskError::Corrupted("invalid frozen header"));
    };
    let counts_at = keys_at + containers * 2;
    let typecodes_at = counts_at + containers * 2;

    let mut zones = 0usize;
    for i in 0..containers {
        let count = usize::from(read_u16(bytes, counts_at + i * 2));
        zones += match bytes[typecodes_at + i] {
            BITSET_CONTAINER => BITSET_CONTAINER_BYTES,
            RUN_CONTAINER => count * 4,
            ARRAY_CONTAINER => (count + 1) * 2,
            _ => return Err(TaskError::Corrupted("invalid frozen header")),
        };
    }
    if zones != keys_at {
        return Err(TaskError::Corrupted("invalid frozen header"));
    }
    Ok(())
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_ne_bytes([bytes[at], bytes[at + 1]])
}

/// Build a view over `bytes` after the input checks passed.
///
/// # Safety
///
/// `bytes` must stay alive and unmodified for `'a`, which the signature
/// enforces, and must hold an encoding the engine accepts without
/// validation.
unsafe fn view_unchecked(bytes: &[u8], format: SerializationFormat) -> BitmapView<'_> {
    match format {
        SerializationFormat::UnsafeFrozenNative => BitmapView::deserialize::<Frozen>(bytes),
        _ => BitmapView::deserialize::<Portable>(bytes),
    }
}

/// A frozen view over a runtime-owned, aligned copy of its bytes.
pub struct FrozenBitmap {
    // Declared before `bytes` so it is dropped first.
    view: BitmapView<'static>,
    bytes: AlignedBuffer,
    format: SerializationFormat,
}

// SAFETY: the view only reads `bytes`, which nothing mutates while the
// struct exists; the engine performs no interior mutation on read paths.
unsafe impl Send for FrozenBitmap {}
// SAFETY: see above; shared access is read-only.
unsafe impl Sync for FrozenBitmap {}

impl FrozenBitmap {
    /// Copy `bytes` into an aligned buffer and build a view over the copy.
    ///
    /// # Errors
    ///
    /// `TaskError::Corrupted` when the input is rejected, `Allocation` when
    /// the copy cannot be made.
    pub fn copy_from(bytes: &[u8], format: SerializationFormat) -> Result<Self, TaskError> {
        let copy = AlignedBuffer::copy_from(bytes, FROZEN_ALIGNMENT)?;
        Self::from_buffer(copy, format)
    }

    /// Take ownership of `bytes` and build a view over them.
    ///
    /// # Errors
    ///
    /// As for [`FrozenBitmap::copy_from`]; `Alignment` if the buffer is
    /// misaligned for the native layout.
    pub fn from_buffer(bytes: AlignedBuffer, format: SerializationFormat) -> Result<Self, TaskError> {
        check_frozen_input(&bytes, format)?;

        // SAFETY: the slice points into `bytes`' heap allocation, which never
        // moves or changes while `bytes` is owned by the returned struct, and
        // the view is dropped before it.
        let view = unsafe {
            let data: &'static [u8] = std::slice::from_raw_parts(bytes.as_ptr(), bytes.len());
            view_unchecked(data, format)
        };
        Ok(Self { view, bytes, format })
    }

    /// Format the view was built from.
    #[must_use]
    pub const fn format(&self) -> SerializationFormat {
        self.format
    }

    /// Size of the owned copy, for memory accounting.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.bytes.allocated_bytes()
    }

    /// Materialize an owned, mutable bitmap.
    #[must_use]
    pub fn to_bitmap(&self) -> Bitmap {
        self.view.to_bitmap()
    }
}

impl Deref for FrozenBitmap {
    type Target = Bitmap;

    fn deref(&self) -> &Bitmap {
        &self.view
    }
}

impl fmt::Debug for FrozenBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrozenBitmap")
            .field("format", &self.format)
            .field("bytes", &self.bytes.len())
            .field("cardinality", &self.view.cardinality())
            .finish()
    }
}

/// A zero-copy view aliasing caller-owned bytes.
///
/// Only [`deserialize_unsafe_aliased`] builds one. The lifetime keeps the
/// caller's buffer borrowed, and so immutable, for as long as the view lives.
pub struct UnsafeAliasedView<'a> {
    view: BitmapView<'a>,
    format: SerializationFormat,
}

impl UnsafeAliasedView<'_> {
    /// Format the view was built from.
    #[must_use]
    pub const fn format(&self) -> SerializationFormat {
        self.format
    }

    /// Copy the aliased contents into an owned bitmap.
    #[must_use]
    pub fn to_bitmap(&self) -> Bitmap {
        self.view.to_bitmap()
    }
}

impl Deref for UnsafeAliasedView<'_> {
    type Target = Bitmap;

    fn deref(&self) -> &Bitmap {
        &self.view
    }
}

impl fmt::Debug for UnsafeAliasedView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsafeAliasedView")
            .field("format", &self.format)
            .field("cardinality", &self.view.cardinality())
            .finish()
    }
}

/// Build a frozen view directly over `bytes` without copying.
///
/// Empty input yields `Ok(None)`: there is nothing to alias, and callers
/// fall back to an empty bitmap.
///
/// # Errors
///
/// `Alignment` when native frozen bytes are not 32-byte aligned, `Corrupted`
/// when the layout does not add up, `Argument` for non-frozen formats.
///
/// # Safety
///
/// Only the layout is checked for the native form, not the values inside
/// the containers. `bytes` must hold an encoding in `format` produced by this
/// crate's serializer or an equivalent writer.
pub unsafe fn deserialize_unsafe_aliased(
    bytes: &[u8],
    format: SerializationFormat,
) -> Result<Option<UnsafeAliasedView<'_>>, TaskError> {
    if !format.is_frozen() {
        return Err(TaskError::argument(format!("{format} is not a frozen format")));
    }
    if bytes.is_empty() {
        return Ok(None);
    }
    check_frozen_input(bytes, format)?;
    let view = view_unchecked(bytes, format);
    Ok(Some(UnsafeAliasedView { view, format }))
}
