//! Interrupt-masking bracket for the lock engine.
//!
//! A lock whose state is also touched from interrupt context must keep the
//! local CPU from taking an interrupt while it sits inside its atomic
//! section, or the handler spins forever on a bracket its own CPU holds.
//! [`RawIrqSpin`] masks interrupts before taking a [`RawSpin`] and restores
//! the previous interrupt state once the spin bracket is released.
//!
//! # Platform
//!
//! Uses `cli/sti` and `pushfq/pop` and therefore targets `x86_64`.
//!
//! # Safety & Privilege
//!
//! These operations must run in a context where `cli`/`sti` are legal
//! (kernel mode). Calling from user space is invalid.

use crate::{RawLock, RawSpin, RawUnlock};
use core::sync::atomic::{AtomicBool, Ordering};

/// Interrupt flag (IF), bit 9 of `RFLAGS`.
const RFLAGS_IF: u64 = 1 << 9;

#[inline]
fn cli() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
}

#[inline]
fn sti() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
}

#[inline]
fn rflags() -> u64 {
    let r: u64;
    unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(nostack, preserves_flags)) }
    r
}

/// Whether the local CPU currently accepts maskable interrupts.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    rflags() & RFLAGS_IF != 0
}

/// Spin bracket that keeps interrupts masked while held.
///
/// The interrupt state of the acquiring CPU is stashed inside the bracket
/// itself; only the holder reads or writes it.
pub struct RawIrqSpin {
    spin: RawSpin,
    restore_irq: AtomicBool,
}

impl Default for RawIrqSpin {
    fn default() -> Self {
        Self::new()
    }
}

impl RawIrqSpin {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            spin: RawSpin::new(),
            restore_irq: AtomicBool::new(false),
        }
    }
}

impl RawLock for RawIrqSpin {
    fn raw_lock(&self) {
        let enabled = interrupts_enabled();
        if enabled {
            cli();
        }
        self.spin.lock();
        self.restore_irq.store(enabled, Ordering::Relaxed);
    }

    fn raw_try_lock(&self) -> bool {
        let enabled = interrupts_enabled();
        if enabled {
            cli();
        }
        if self.spin.try_lock() {
            self.restore_irq.store(enabled, Ordering::Relaxed);
            true
        } else {
            if enabled {
                sti();
            }
            false
        }
    }
}

impl RawUnlock for RawIrqSpin {
    unsafe fn raw_unlock(&self) {
        let enabled = self.restore_irq.load(Ordering::Relaxed);
        unsafe { self.spin.unlock() };
        if enabled {
            sti();
        }
    }
}
