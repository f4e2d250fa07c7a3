//! Safe one-shot global initialization.
//!
//! `static mut` alternatives for the kernel's boot-once singletons. A value
//! is installed exactly once during `kernel_early_main` and read for the
//! rest of the kernel's lifetime; the cell is never torn down.

#[cfg(feature = "alloc")]
extern crate alloc;

use core::sync::atomic::{AtomicPtr, Ordering};

/// A cell that can be written exactly once.
///
/// Works like `std::sync::OnceLock` but in `no_std`: the value is boxed and
/// leaked into the cell, so `get()` can hand out `&'static` references.
pub struct OnceLock<T> {
    inner: AtomicPtr<T>,
}

impl<T> Default for OnceLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OnceLock<T> {
    /// Create a new empty cell.
    pub const fn new() -> Self {
        Self {
            inner: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Get the value if initialized.
    pub fn get(&self) -> Option<&'static T> {
        let ptr = self.inner.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: A non-null pointer was produced by `set()` from
            // `Box::into_raw`, so it points at a live, fully initialized T.
            // The Acquire load synchronizes with the Release CAS in `set()`,
            // and the allocation is never freed, which justifies 'static.
            Some(unsafe { &*ptr })
        }
    }

    /// Initialize the cell.
    ///
    /// Returns `Err(value)` if the cell was already initialized.
    pub fn set(&self, value: T) -> Result<(), T> {
        let ptr = alloc::boxed::Box::into_raw(alloc::boxed::Box::new(value));

        match self.inner.compare_exchange(
            core::ptr::null_mut(),
            ptr,
            Ordering::Release,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(_) => {
                // SAFETY: The CAS failed, so `ptr` was never published and we
                // still own the allocation created above.
                let value = unsafe { *alloc::boxed::Box::from_raw(ptr) };
                Err(value)
            }
        }
    }
}

/// A `OnceLock` wrapper with closure-based access, for singletons that hold
/// their own interior locking (typically `OnceLock<spin::Mutex<T>>`).
pub struct GlobalState<T> {
    cell: OnceLock<T>,
}

impl<T: 'static> Default for GlobalState<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> GlobalState<T> {
    /// Create a new uninitialized global.
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Install the value. Returns `Err(value)` on double initialization.
    pub fn init(&self, value: T) -> Result<(), T> {
        self.cell.set(value)
    }

    /// Whether `init` has run.
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Run `f` with a reference to the value, or return `None` if the
    /// global was never initialized.
    pub fn with<R, F: FnOnce(&T) -> R>(&self, f: F) -> Option<R> {
        self.cell.get().map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_lock_set_then_get() {
        let cell: OnceLock<u32> = OnceLock::new();
        assert!(cell.get().is_none());
        assert!(cell.set(7).is_ok());
        assert_eq!(cell.get(), Some(&7));
    }

    #[test]
    fn once_lock_rejects_second_set() {
        let cell: OnceLock<u32> = OnceLock::new();
        assert!(cell.set(1).is_ok());
        assert_eq!(cell.set(2), Err(2));
        assert_eq!(cell.get(), Some(&1));
    }

    #[test]
    fn global_state_with() {
        let state: GlobalState<spin::Mutex<u32>> = GlobalState::new();
        assert!(state.with(|_| ()).is_none());
        state.init(spin::Mutex::new(41)).ok();
        let value = state.with(|m| {
            let mut guard = m.lock();
            *guard += 1;
            *guard
        });
        assert_eq!(value, Some(42));
    }
}
