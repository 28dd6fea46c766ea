use crate::{RawLock, RawUnlock};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// Test-and-test-and-set bracket.
///
/// Cheapest bracket for the lock engine's state updates: no fairness, no
/// bookkeeping beyond a single flag.
pub struct RawSpin {
    held: AtomicBool,
}

impl Default for RawSpin {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSpin {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn lock(&self) {
        while self.held.swap(true, Ordering::Acquire) {
            // spin on a plain load until the holder lets go
            while self.held.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        !self.held.swap(true, Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    /// Releases the bracket.
    ///
    /// # Safety
    /// The caller must be the context that acquired it.
    ///
    /// # Panics
    /// Panics if the bracket is not held.
    #[inline]
    pub unsafe fn unlock(&self) {
        let was_held = self.held.swap(false, Ordering::Release);
        assert!(was_held, "RawSpin released while not held");
    }
}

impl RawLock for RawSpin {
    fn raw_lock(&self) {
        self.lock();
    }

    fn raw_try_lock(&self) -> bool {
        self.try_lock()
    }
}

impl RawUnlock for RawSpin {
    unsafe fn raw_unlock(&self) {
        unsafe { self.unlock() }
    }
}
