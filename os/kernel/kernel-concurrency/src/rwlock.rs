//! Backend-pluggable reader/writer lock engine.
//!
//! [`RwLockEngine`] arbitrates readers against an exclusive writer. It does
//! not spin or sleep on its own; everything environment-specific comes from
//! an [`RwBackend`]: the atomic bracket around state updates, the pool of
//! wait nodes and the gate used to park and release callers.
//!
//! # Ordering
//!
//! Contended callers are queued in arrival order and released by group:
//! either all readers at the head of the queue together, or exactly one
//! writer. Once anything is queued, newly arriving readers queue as well, so
//! a waiting writer is never overtaken by a reader that came after it.
//!
//! # Upgrades
//!
//! [`upgrade_read_to_write`](RwLockEngine::upgrade_read_to_write) turns the
//! caller's read hold into the write hold. A sole reader switches on the
//! spot. Otherwise the request goes to the head of the queue, ahead of every
//! reader and writer queued after it, and is granted the moment the other
//! readers have left; the caller's read reference is consumed only at that
//! instant, so the lock is never observably free in between.
//!
//! Two readers upgrading at the same time would wait on each other forever;
//! the second request is rejected with a panic.
//!
//! # Misuse
//!
//! Unlocking a lock that is not held in the matching mode is a fatal
//! assertion. Re-acquiring the write lock from its holder deadlocks.

mod backend;
mod guard;
mod wait_node;

pub use backend::{DEFAULT_WAIT_NODES, PoolBackend, RwBackend, SpinBackend, TicketBackend};
#[cfg(all(feature = "irq", target_arch = "x86_64"))]
pub use backend::IrqSpinBackend;
pub use guard::{RwLock, RwLockReadGuard, RwLockWriteGuard, SpinRwLock};
pub use wait_node::{WaitKind, WaitNode, WaitPool};

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ptr::NonNull;
use log::{trace, warn};
use wait_node::WaitQueue;

/// Which kind of owner currently holds a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    Nobody,
    Reader,
    Writer,
}

/// Lock state; only accessed inside the backend's bracket.
///
/// `held > 0` iff `holder != Nobody`, and a writer always has `held == 1`.
/// While `holder == Nobody` the queue is empty: releasing the lock hands it
/// straight to the next group.
struct LockState<G> {
    holder: Holder,
    held: u32,
    queue: WaitQueue<G>,
}

impl<G> LockState<G> {
    const fn new() -> Self {
        Self {
            holder: Holder::Nobody,
            held: 0,
            queue: WaitQueue::new(),
        }
    }

    fn upgrade_queued(&self) -> bool {
        self.queue
            .front()
            .is_some_and(|n| n.kind() == WaitKind::Upgrade)
    }
}

/// Outcome of one pass through the bracket on the acquire path.
enum Step<G> {
    Acquired,
    Parked(NonNull<WaitNode<G>>, WaitKind),
    NoNode,
}

/// The lock itself, without a protected value. See the module docs.
pub struct RwLockEngine<B: RwBackend> {
    backend: B,
    state: UnsafeCell<LockState<B::Gate>>,
}

// SAFETY: the state is only reached through the backend's bracket.
unsafe impl<B: RwBackend + Send> Send for RwLockEngine<B> {}
unsafe impl<B: RwBackend + Sync> Sync for RwLockEngine<B> {}

impl<B: RwBackend> RwLockEngine<B> {
    pub const fn new(backend: B) -> Self {
        Self {
            backend,
            state: UnsafeCell::new(LockState::new()),
        }
    }

    #[inline]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Runs `f` on the state inside the atomic bracket.
    #[inline]
    fn atomic<R>(&self, f: impl FnOnce(&mut LockState<B::Gate>) -> R) -> R {
        self.backend.start_atomic();
        // SAFETY: the bracket serializes every access to the state.
        let r = f(unsafe { &mut *self.state.get() });
        self.backend.end_atomic();
        r
    }

    /// Acquires a shared hold, parking while a writer holds the lock or
    /// anyone is queued.
    pub fn read_lock(&self) {
        self.acquire(WaitKind::Reader, Self::try_read_in);
    }

    /// Acquires a shared hold if that is possible without waiting.
    pub fn try_read_lock(&self) -> bool {
        self.atomic(Self::try_read_in)
    }

    /// Drops a shared hold.
    ///
    /// # Panics
    /// Panics if the lock is not read-held.
    pub fn read_unlock(&self) {
        self.atomic(|st| {
            assert!(
                st.holder == Holder::Reader && st.held > 0,
                "read_unlock without a read hold"
            );
            st.held -= 1;
            match st.held {
                0 => {
                    st.holder = Holder::Nobody;
                    self.wake_next(st);
                }
                1 if st.upgrade_queued() => {
                    // The one remaining reader is the upgrader: its read
                    // reference becomes the write hold.
                    if let Some(node) = st.queue.pop_front() {
                        st.holder = Holder::Writer;
                        self.grant(node);
                    }
                }
                _ => {}
            }
        });
    }

    /// Acquires the exclusive hold, parking while anybody holds the lock.
    pub fn write_lock(&self) {
        self.acquire(WaitKind::Writer, Self::try_write_in);
    }

    /// Acquires the exclusive hold if that is possible without waiting.
    pub fn try_write_lock(&self) -> bool {
        self.atomic(Self::try_write_in)
    }

    /// Drops the exclusive hold.
    ///
    /// # Panics
    /// Panics if the lock is not write-held.
    pub fn write_unlock(&self) {
        self.atomic(|st| {
            assert!(
                st.holder == Holder::Writer && st.held == 1,
                "write_unlock without the write hold"
            );
            st.held = 0;
            st.holder = Holder::Nobody;
            self.wake_next(st);
        });
    }

    /// Turns the caller's read hold into the write hold.
    ///
    /// # Panics
    /// Panics if the lock is not read-held, or if another upgrade is already
    /// pending.
    pub fn upgrade_read_to_write(&self) {
        self.acquire(WaitKind::Upgrade, |st| {
            assert!(
                st.holder == Holder::Reader && st.held > 0,
                "upgrade without a read hold"
            );
            if st.held == 1 {
                st.holder = Holder::Writer;
                return true;
            }
            assert!(
                !st.upgrade_queued(),
                "concurrent read-to-write upgrades would deadlock"
            );
            false
        });
    }

    #[must_use]
    pub fn holder(&self) -> Holder {
        self.atomic(|st| st.holder)
    }

    /// Active readers, 1 for a writer, 0 when free.
    #[must_use]
    pub fn held_count(&self) -> u32 {
        self.atomic(|st| st.held)
    }

    /// Callers currently parked on the lock.
    #[must_use]
    pub fn waiter_count(&self) -> u32 {
        self.atomic(|st| st.queue.waiters())
    }

    /// Tears the lock down and hands back its backend.
    ///
    /// # Panics
    /// Panics if the lock is still held or has waiters.
    pub fn destroy(mut self) -> B {
        let st = self.state.get_mut();
        assert!(
            st.holder == Holder::Nobody && st.queue.is_empty(),
            "destroying a lock that is held or contended"
        );
        self.backend
    }

    fn try_read_in(st: &mut LockState<B::Gate>) -> bool {
        // Readers only ever queue behind a writer or an upgrade, so an empty
        // queue is the "no writer ahead of us" condition.
        if st.holder != Holder::Writer && st.queue.is_empty() {
            st.holder = Holder::Reader;
            st.held += 1;
            true
        } else {
            false
        }
    }

    fn try_write_in(st: &mut LockState<B::Gate>) -> bool {
        if st.holder == Holder::Nobody && st.queue.is_empty() {
            st.holder = Holder::Writer;
            st.held = 1;
            true
        } else {
            false
        }
    }

    fn acquire(&self, kind: WaitKind, fast: impl Fn(&mut LockState<B::Gate>) -> bool) {
        let mut warned = false;
        loop {
            let step = self.atomic(|st| {
                if fast(st) {
                    return Step::Acquired;
                }
                self.enqueue(st, kind)
                    .map_or(Step::NoNode, |node| Step::Parked(node, kind))
            });

            match step {
                Step::Acquired => return,
                Step::Parked(node, kind) => {
                    trace!("rwlock: parking {kind:?} waiter");
                    self.park(node);
                    return;
                }
                Step::NoNode => {
                    if !warned {
                        warn!("rwlock: wait node pool exhausted, spinning for a {kind:?} node");
                        warned = true;
                    }
                    spin_loop();
                }
            }
        }
    }

    /// Queues the caller. Readers join a reader batch at the tail when
    /// there is one; upgrades go to the head.
    fn enqueue(
        &self,
        st: &mut LockState<B::Gate>,
        kind: WaitKind,
    ) -> Option<NonNull<WaitNode<B::Gate>>> {
        if kind == WaitKind::Reader
            && let Some(tail) = st.queue.back()
            && tail.kind() == WaitKind::Reader
        {
            tail.add_waiter();
            return Some(NonNull::from(tail));
        }

        let node = self.backend.get_wait()?;
        // SAFETY: the backend hands out valid, unshared nodes.
        let n = unsafe { node.as_ref() };
        n.arm(kind);
        self.backend.set_gate(n.gate(), false);
        if kind == WaitKind::Upgrade {
            st.queue.push_front(node);
        } else {
            st.queue.push_back(node);
        }
        Some(node)
    }

    /// Blocks on `node` until it is granted. The hold was already transferred
    /// by whoever granted it; the last waiter of the node returns it.
    fn park(&self, node: NonNull<WaitNode<B::Gate>>) {
        // SAFETY: the node stays out of the pool until its last waiter leaves.
        let n = unsafe { node.as_ref() };
        loop {
            self.backend.wait_for_gate(n.gate());
            let granted = self.atomic(|_| {
                if !n.granted() {
                    return false;
                }
                if n.remove_waiter() == 0 {
                    // SAFETY: we were the last user of the node.
                    unsafe { self.backend.put_wait(node) };
                }
                true
            });
            if granted {
                return;
            }
        }
    }

    /// Hands the free lock to the next group in the queue.
    fn wake_next(&self, st: &mut LockState<B::Gate>) {
        debug_assert_eq!(st.held, 0);
        let Some(head) = st.queue.front() else {
            return;
        };

        match head.kind() {
            WaitKind::Writer => {
                if let Some(node) = st.queue.pop_front() {
                    st.holder = Holder::Writer;
                    st.held = 1;
                    self.grant(node);
                }
            }
            WaitKind::Reader => {
                st.holder = Holder::Reader;
                while let Some(n) = st.queue.front()
                    && n.kind() == WaitKind::Reader
                {
                    st.held += n.waiting();
                    if let Some(node) = st.queue.pop_front() {
                        self.grant(node);
                    }
                }
            }
            WaitKind::Upgrade => {
                unreachable!("upgrade queued while its requester holds no read reference")
            }
        }
    }

    fn grant(&self, node: NonNull<WaitNode<B::Gate>>) {
        // SAFETY: the node was just popped from the queue and is still owned
        // by its parked waiters.
        let n = unsafe { node.as_ref() };
        n.set_granted();
        self.backend.set_gate(n.gate(), true);
    }
}
