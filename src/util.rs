//! Shared internal helpers.

use core::cell::UnsafeCell;

/// Interior-mutable storage for state owned by a single execution context at a
/// time, in place of a `static mut`. The scope keeps two of these: the
/// registry (mutated only during the registration window, read-only once
/// sealed) and the receiver state (touched only by the serial task).
///
/// `Sync` is sound because every access goes through the two accessors below,
/// whose contracts restrict who may call them when.
pub(crate) struct ContextCell<T>(UnsafeCell<T>);

// SAFETY: see the accessor contracts; the cell itself adds no synchronization.
unsafe impl<T: Send> Sync for ContextCell<T> {}

impl<T> ContextCell<T> {
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Shared read access.
    ///
    /// # Safety
    /// No exclusive access (`with_mut`) may run concurrently with the returned
    /// reference. For the registry this holds once registration is sealed; the
    /// receiver state is never read this way.
    pub unsafe fn get_ref(&self) -> &T {
        &*self.0.get()
    }

    /// Exclusive access for the owning context.
    ///
    /// # Safety
    /// The caller must be the cell's single owning execution context, and the
    /// closure must not re-enter this cell.
    pub unsafe fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut *self.0.get())
    }
}
