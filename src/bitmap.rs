//! Shared bitmap handle with a freeze marker.
//!
//! Asynchronous operations read a [`SharedBitmap`] from pool threads while
//! the caller keeps its own clone. Before such a task is queued it takes a
//! [`FreezeGuard`]; as long as any guard is alive every mutating method
//! fails with [`TaskError::Frozen`], so the worker sees a consistent
//! snapshot without copying the bitmap.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use croaring::{Bitmap, Portable};
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};

use crate::codec::FrozenBitmap;
use crate::core::{MemoryCharge, TaskError};

/// Physical representation behind a handle.
pub enum BitmapRepr {
    /// A regular, mutable bitmap.
    Owned(Bitmap),
    /// A read-only view over runtime-owned frozen bytes.
    Frozen(FrozenBitmap),
}

impl BitmapRepr {
    /// Read access regardless of representation.
    #[must_use]
    pub fn bitmap(&self) -> &Bitmap {
        match self {
            Self::Owned(bitmap) => bitmap,
            Self::Frozen(view) => view,
        }
    }
}

struct Inner {
    repr: RwLock<BitmapRepr>,
    freezes: AtomicUsize,
    charge: Mutex<Option<MemoryCharge>>,
}

/// Cheaply cloneable handle to one bitmap.
#[derive(Clone)]
pub struct SharedBitmap {
    inner: Arc<Inner>,
}

impl SharedBitmap {
    /// An empty bitmap.
    #[must_use]
    pub fn new() -> Self {
        Self::from_repr(BitmapRepr::Owned(Bitmap::new()))
    }

    /// An empty bitmap with room for `containers` containers.
    #[must_use]
    pub fn with_container_capacity(containers: u32) -> Self {
        Self::from_repr(BitmapRepr::Owned(Bitmap::with_container_capacity(containers)))
    }

    /// A bitmap holding `values`.
    #[must_use]
    pub fn of(values: &[u32]) -> Self {
        Self::from(Bitmap::of(values))
    }

    fn from_repr(repr: BitmapRepr) -> Self {
        Self {
            inner: Arc::new(Inner {
                repr: RwLock::new(repr),
                freezes: AtomicUsize::new(0),
                charge: Mutex::new(None),
            }),
        }
    }

    /// Read access to the underlying bitmap.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, Bitmap> {
        RwLockReadGuard::map(self.inner.repr.read(), BitmapRepr::bitmap)
    }

    /// Number of values.
    #[must_use]
    pub fn cardinality(&self) -> u64 {
        self.read().cardinality()
    }

    /// Whether the bitmap holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Whether `value` is present.
    #[must_use]
    pub fn contains(&self, value: u32) -> bool {
        self.read().contains(value)
    }

    /// All values in ascending order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u32> {
        self.read().to_vec()
    }

    /// An owned copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Bitmap {
        self.read().clone()
    }

    /// Whether the handle is backed by a frozen view.
    #[must_use]
    pub fn is_view(&self) -> bool {
        matches!(*self.inner.repr.read(), BitmapRepr::Frozen(_))
    }

    /// Native bytes behind the handle: the owned copy of a frozen view, or
    /// the portable size of an owned bitmap as an estimate of its containers.
    #[must_use]
    pub fn footprint(&self) -> usize {
        match &*self.inner.repr.read() {
            BitmapRepr::Owned(bitmap) => bitmap.get_serialized_size_in_bytes::<Portable>(),
            BitmapRepr::Frozen(view) => view.allocated_bytes(),
        }
    }

    /// Keep `charge` alive until the last clone of this handle drops.
    pub fn attach_charge(&self, charge: MemoryCharge) {
        *self.inner.charge.lock() = Some(charge);
    }

    /// Bytes this handle keeps attributed to a memory accountant.
    #[must_use]
    pub fn charged_bytes(&self) -> usize {
        self.inner.charge.lock().as_ref().map_or(0, MemoryCharge::bytes)
    }

    /// Block mutation until the returned guard is dropped.
    #[must_use = "the bitmap unfreezes as soon as the guard is dropped"]
    pub fn freeze(&self) -> FreezeGuard {
        self.inner.freezes.fetch_add(1, Ordering::AcqRel);
        FreezeGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Whether an in-flight operation holds a freeze guard.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.inner.freezes.load(Ordering::Acquire) > 0
    }

    /// Insert `value`. Returns whether it was newly added.
    ///
    /// # Errors
    ///
    /// `TaskError::Frozen` while a freeze guard is alive.
    pub fn add(&self, value: u32) -> Result<bool, TaskError> {
        self.mutate(|bitmap| bitmap.add_checked(value))
    }

    /// Insert every value in `values`.
    ///
    /// # Errors
    ///
    /// `TaskError::Frozen` while a freeze guard is alive.
    pub fn add_many(&self, values: &[u32]) -> Result<(), TaskError> {
        self.mutate(|bitmap| bitmap.add_many(values))
    }

    /// Remove `value`.
    ///
    /// # Errors
    ///
    /// `TaskError::Frozen` while a freeze guard is alive.
    pub fn remove(&self, value: u32) -> Result<(), TaskError> {
        self.mutate(|bitmap| bitmap.remove(value))
    }

    /// Remove every value.
    ///
    /// # Errors
    ///
    /// `TaskError::Frozen` while a freeze guard is alive.
    pub fn clear(&self) -> Result<(), TaskError> {
        self.mutate(Bitmap::clear)
    }

    /// Apply `f` to an owned bitmap, converting a frozen view first.
    fn mutate<R>(&self, f: impl FnOnce(&mut Bitmap) -> R) -> Result<R, TaskError> {
        if self.is_frozen() {
            return Err(TaskError::Frozen);
        }
        let mut repr = self.inner.repr.write();
        if let BitmapRepr::Frozen(view) = &*repr {
            *repr = BitmapRepr::Owned(view.to_bitmap());
        }
        match &mut *repr {
            BitmapRepr::Owned(bitmap) => Ok(f(bitmap)),
            BitmapRepr::Frozen(_) => Err(TaskError::Internal("frozen view not materialized".into())),
        }
    }
}

impl Default for SharedBitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Bitmap> for SharedBitmap {
    fn from(bitmap: Bitmap) -> Self {
        Self::from_repr(BitmapRepr::Owned(bitmap))
    }
}

impl From<FrozenBitmap> for SharedBitmap {
    fn from(view: FrozenBitmap) -> Self {
        Self::from_repr(BitmapRepr::Frozen(view))
    }
}

impl PartialEq for SharedBitmap {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || *self.read() == *other.read()
    }
}

impl fmt::Debug for SharedBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBitmap")
            .field("cardinality", &self.cardinality())
            .field("view", &self.is_view())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

/// Keeps a [`SharedBitmap`] immutable while alive.
pub struct FreezeGuard {
    inner: Arc<Inner>,
}

impl Drop for FreezeGuard {
    fn drop(&mut self) {
        self.inner.freezes.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for FreezeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FreezeGuard")
    }
}
