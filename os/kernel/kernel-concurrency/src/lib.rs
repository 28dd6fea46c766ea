//! # Kernel concurrency primitives
//!
//! Three building blocks the kernel and its drivers use to share state:
//!
//! * [`RwLockEngine`] / [`RwLock`]: a reader/writer lock whose atomic
//!   bracket, wait-node pool and park/unpark gate come from a pluggable
//!   [`RwBackend`]. Waiters are served in arrival order by group, and a
//!   reader can upgrade to the write hold without ever releasing the lock.
//! * [`RundownGuard`]: tracks in-flight users of a resource and lets
//!   teardown drain them while refusing new ones.
//! * [`RingBuffer`]: a lock-free single-producer/single-consumer byte ring
//!   with contiguous reservations and early wraparound.
//!
//! State updates are either bracketed by the backend's non-blocking atomic
//! section or done with a single-word compare-and-swap; callers are only
//! ever parked on a [`Gate`] after the state has been updated.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod gate;
#[cfg(all(feature = "irq", target_arch = "x86_64"))]
pub mod irq;
mod raw_spin;
mod raw_ticket;
pub mod ring;
pub mod rundown;
pub mod rwlock;

pub use gate::{Gate, SpinGate};
#[cfg(all(feature = "irq", target_arch = "x86_64"))]
pub use irq::RawIrqSpin;
pub use raw_spin::RawSpin;
pub use raw_ticket::RawTicket;
pub use ring::{MAX_RING_SIZE, RingBuffer, RingError, RingReader, RingState, RingWriter};
pub use rundown::{RundownError, RundownGuard, RundownRef};
#[cfg(all(feature = "irq", target_arch = "x86_64"))]
pub use rwlock::IrqSpinBackend;
pub use rwlock::{
    DEFAULT_WAIT_NODES, Holder, PoolBackend, RwBackend, RwLock, RwLockEngine, RwLockReadGuard,
    RwLockWriteGuard, SpinBackend, SpinRwLock, TicketBackend, WaitKind, WaitNode, WaitPool,
};

/// Acquiring half of a raw bracket.
pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
}

/// Releasing half of a raw bracket.
pub trait RawUnlock {
    /// # Safety
    /// Must only be called by the current holder.
    unsafe fn raw_unlock(&self);
}
