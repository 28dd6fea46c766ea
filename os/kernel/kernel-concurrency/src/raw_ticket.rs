use crate::{RawLock, RawUnlock};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU32, Ordering};

/// FIFO ticket bracket.
///
/// Contending CPUs enter the bracket in the order they drew a ticket, so a
/// lock engine driven by it never lets one CPU starve the others out of
/// the state update itself.
pub struct RawTicket {
    next: AtomicU32,
    owner: AtomicU32,
}

impl Default for RawTicket {
    fn default() -> Self {
        Self::new()
    }
}

impl RawTicket {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
            owner: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn lock(&self) {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        while self.owner.load(Ordering::Acquire) != ticket {
            spin_loop();
        }
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        let owner = self.owner.load(Ordering::Relaxed);
        self.next
            .compare_exchange(
                owner,
                owner.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Number of contexts holding or queued on the bracket.
    #[inline]
    #[must_use]
    pub fn queued(&self) -> u32 {
        let next = self.next.load(Ordering::Relaxed);
        next.wrapping_sub(self.owner.load(Ordering::Relaxed))
    }

    /// Hands the bracket to the next ticket.
    ///
    /// # Safety
    /// The caller must be the context that acquired it.
    ///
    /// # Panics
    /// Panics if no ticket is outstanding.
    #[inline]
    pub unsafe fn unlock(&self) {
        assert_ne!(self.queued(), 0, "RawTicket released while not held");
        let t = self.owner.load(Ordering::Relaxed);
        self.owner.store(t.wrapping_add(1), Ordering::Release);
    }
}

impl RawLock for RawTicket {
    fn raw_lock(&self) {
        self.lock();
    }

    fn raw_try_lock(&self) -> bool {
        self.try_lock()
    }
}

impl RawUnlock for RawTicket {
    unsafe fn raw_unlock(&self) {
        unsafe { self.unlock() }
    }
}
