use core::ops::{Deref, DerefMut};

use spin::mutex::{SpinMutex, SpinMutexGuard};

/// Wrapper around `spin::mutex::SpinMutex` with some added features, like
/// handling disabling and enabling interrupts.
#[derive(Debug, Default)]
pub struct SpinLock<T> {
    mutex: SpinMutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            mutex: SpinMutex::new(data),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        SpinLockGuard {
            guard: self.mutex.lock(),
            _interrupt_guard: InterruptGuard {
                needs_enabling: false,
            },
        }
    }

    /// Locks the mutex and disables interrupts while the lock is held. Restores
    /// interrupts to their previous state (enabled or disabled) once the lock
    /// is released.
    pub fn lock_disable_interrupts(&self) -> SpinLockGuard<'_, T> {
        let saved_intpt_flag = interrupts::are_enabled();

        // If interrupts are enabled, disable them for now. They will be
        // re-enabled when the guard drops.
        if saved_intpt_flag {
            interrupts::disable();
        }

        SpinLockGuard {
            guard: self.mutex.lock(),
            _interrupt_guard: InterruptGuard {
                needs_enabling: saved_intpt_flag,
            },
        }
    }

    pub fn into_inner(self) -> T {
        self.mutex.into_inner()
    }
}

/// Wrapper around `spin::mutex::SpinMutexGuard`, used with `SpinLock`.
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    guard: SpinMutexGuard<'a, T>,
    // Note: ordering is very important here! We want to restore interrupts to
    // their previous state (enabled or disabled) _after_ the spinlock guard is
    // dropped. Rust drops fields in order.
    _interrupt_guard: InterruptGuard,
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    #[allow(clippy::explicit_deref_methods)]
    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    #[allow(clippy::explicit_deref_methods)]
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

struct InterruptGuard {
    needs_enabling: bool,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.needs_enabling {
            interrupts::enable();
        }
    }
}

/// Interrupt flag control for the i686 kernel. Hosted builds (unit tests,
/// tools) have no interrupt flag to touch.
#[cfg(all(target_arch = "x86", target_os = "none"))]
mod interrupts {
    use core::arch::asm;

    const INTERRUPT_FLAG: u32 = 1 << 9;

    pub(super) fn are_enabled() -> bool {
        let eflags: u32;
        unsafe {
            asm!("pushfd", "pop {}", out(reg) eflags, options(nomem, preserves_flags));
        }
        eflags & INTERRUPT_FLAG != 0
    }

    pub(super) fn disable() {
        unsafe {
            asm!("cli", options(nomem, nostack));
        }
    }

    pub(super) fn enable() {
        unsafe {
            asm!("sti", options(nomem, nostack));
        }
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
mod interrupts {
    pub(super) fn are_enabled() -> bool {
        false
    }

    pub(super) fn disable() {}

    pub(super) fn enable() {}
}
