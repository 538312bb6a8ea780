//! Owning byte buffers with a guaranteed start alignment.
//!
//! The frozen formats need their bytes to start on a 32-byte boundary. An
//! [`AlignedBuffer`] over-allocates a `Vec<u8>` and exposes the aligned
//! window inside it; the vector is never resized afterwards, so the window
//! stays put for the buffer's whole life and is freed on drop.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::core::{MemoryCharge, TaskError};

/// A byte buffer whose first byte sits on an `alignment` boundary.
pub struct AlignedBuffer {
    storage: Vec<u8>,
    offset: usize,
    len: usize,
    alignment: usize,
    charge: Option<MemoryCharge>,
}

impl AlignedBuffer {
    /// Allocate `len` zeroed bytes aligned to `alignment`.
    ///
    /// # Errors
    ///
    /// `TaskError::Argument` if `alignment` is not a power of two and
    /// `TaskError::Allocation` if the memory cannot be reserved.
    pub fn zeroed(len: usize, alignment: usize) -> Result<Self, TaskError> {
        if !alignment.is_power_of_two() {
            return Err(TaskError::argument(format!(
                "alignment {alignment} is not a power of two"
            )));
        }
        let total = len
            .checked_add(alignment - 1)
            .ok_or(TaskError::Allocation { bytes: usize::MAX })?;

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(total)
            .map_err(|_| TaskError::Allocation { bytes: total })?;
        storage.resize(total, 0);

        let offset = padding_for(storage.as_ptr() as usize, alignment);
        Ok(Self {
            storage,
            offset,
            len,
            alignment,
            charge: None,
        })
    }

    /// Copy `bytes` into a fresh buffer aligned to `alignment`.
    ///
    /// # Errors
    ///
    /// See [`AlignedBuffer::zeroed`].
    pub fn copy_from(bytes: &[u8], alignment: usize) -> Result<Self, TaskError> {
        let mut buffer = Self::zeroed(bytes.len(), alignment)?;
        buffer.copy_from_slice(bytes);
        Ok(buffer)
    }

    /// Wrap an existing vector without copying. Alignment is whatever the
    /// allocator returned, reported as 1.
    #[must_use]
    pub fn from_vec(storage: Vec<u8>) -> Self {
        let len = storage.len();
        Self {
            storage,
            offset: 0,
            len,
            alignment: 1,
            charge: None,
        }
    }

    /// Tie `charge` to this buffer; it is released when the buffer drops.
    #[must_use]
    pub fn with_charge(mut self, charge: MemoryCharge) -> Self {
        self.charge = Some(charge);
        self
    }

    /// Bytes this buffer keeps attributed to a memory accountant.
    #[must_use]
    pub fn charged_bytes(&self) -> usize {
        self.charge.as_ref().map_or(0, MemoryCharge::bytes)
    }

    /// Guaranteed alignment of the first byte.
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Bytes held by the underlying allocation, for memory accounting.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.storage.capacity()
    }

    /// Shorten the visible window to `len` bytes. Longer values are ignored.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    /// Copy the visible bytes into a plain vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_ref().to_vec()
    }
}

/// Bytes to skip from `addr` to reach the next multiple of `alignment`.
const fn padding_for(addr: usize, alignment: usize) -> usize {
    (alignment - addr % alignment) % alignment
}

/// Whether `bytes` starts on an `alignment` boundary.
#[must_use]
pub fn is_aligned(bytes: &[u8], alignment: usize) -> bool {
    alignment <= 1 || (bytes.as_ptr() as usize) % alignment == 0
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.storage[self.offset..self.offset + self.len]
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.offset..self.offset + self.len]
    }
}

impl AsRef<[u8]> for AlignedBuffer {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl PartialEq for AlignedBuffer {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl Eq for AlignedBuffer {}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("alignment", &self.alignment)
            .finish_non_exhaustive()
    }
}

impl From<Vec<u8>> for AlignedBuffer {
    fn from(storage: Vec<u8>) -> Self {
        Self::from_vec(storage)
    }
}
