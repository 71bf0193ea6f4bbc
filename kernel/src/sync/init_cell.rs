use alloc::boxed::Box;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

/// A cell that can be initialized only once. This is useful because we can
/// share it between multiple threads without having to use a mutex, and since
/// the value can only be written once, we don't need a mutable reference to
/// write to it, so we can store this value as e.g. a static.
///
/// `take` tears the value down again. It must only be called once nobody
/// holds a reference obtained from `get`.
#[derive(Debug)]
pub struct InitCell<T> {
    ptr: AtomicPtr<T>,
}

impl<T> InitCell<T> {
    pub const fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Stores the value. If the cell is already initialized the value is
    /// handed back untouched.
    pub fn init(&self, value: T) -> Result<(), T> {
        let new = Box::into_raw(Box::new(value));
        match self
            .ptr
            .compare_exchange(ptr::null_mut(), new, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(_) => {
                // We never published `new`, so we still own it.
                let value = unsafe { Box::from_raw(new) };
                Err(*value)
            }
        }
    }

    pub fn get(&self) -> Option<&T> {
        // This is safe because the pointer is only freed by `take`, whose
        // contract is that no borrows from `get` are alive.
        unsafe { self.ptr.load(Ordering::Acquire).as_ref() }
    }

    pub fn is_initialized(&self) -> bool {
        !self.ptr.load(Ordering::Acquire).is_null()
    }

    /// Removes the value, leaving the cell uninitialized.
    ///
    /// # Safety
    ///
    /// No reference previously returned by `get` may be used afterwards.
    pub unsafe fn take(&self) -> Option<T> {
        let ptr = self.ptr.swap(ptr::null_mut(), Ordering::AcqRel);
        if ptr.is_null() {
            None
        } else {
            Some(*Box::from_raw(ptr))
        }
    }
}

impl<T> Drop for InitCell<T> {
    fn drop(&mut self) {
        // If the pointer is set, drop the value by converting back into a Box
        // and letting that drop.
        let ptr = self.ptr.load(Ordering::Acquire);
        if !ptr.is_null() {
            drop(unsafe { Box::from_raw(ptr) });
        }
    }
}

unsafe impl<T: Send + Sync> Sync for InitCell<T> {}
unsafe impl<T: Send> Send for InitCell<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_once() {
        let cell = InitCell::new();
        assert!(cell.get().is_none());
        assert_eq!(cell.init(1), Ok(()));
        assert_eq!(cell.init(2), Err(2));
        assert_eq!(cell.get(), Some(&1));
    }

    #[test]
    fn take_resets() {
        let cell = InitCell::new();
        cell.init(String::from("vfs")).unwrap();
        assert_eq!(unsafe { cell.take() }.as_deref(), Some("vfs"));
        assert!(!cell.is_initialized());
        assert_eq!(unsafe { cell.take() }, None);
        assert_eq!(cell.init(String::from("again")), Ok(()));
    }
}
