use super::wait_node::{WaitNode, WaitPool};
use crate::{Gate, RawLock, RawSpin, RawTicket, RawUnlock, SpinGate};
use core::ptr::NonNull;

/// Wait nodes per lock for the stock backends.
pub const DEFAULT_WAIT_NODES: usize = 16;

/// Services the lock engine consumes from its environment.
///
/// * `start_atomic` / `end_atomic` bracket every mutation of the lock
///   state. The bracket may be a spin lock, an interrupt mask or a critical
///   section, but it never blocks on anything the engine itself holds and is
///   never entered recursively.
/// * `get_wait` / `put_wait` hand out and take back wait nodes. Both are
///   only called from inside the bracket.
/// * `wait_for_gate` parks the calling thread until the gate opens;
///   `set_gate` opens or resets a gate. `set_gate` is called from inside the
///   bracket and must not block; `wait_for_gate` is called outside it.
///
/// # Safety
///
/// The engine relies on the bracket for mutual exclusion over its state and
/// on every node returned by `get_wait` staying valid, and exclusively
/// assigned to the engine, until it is passed to `put_wait`.
pub unsafe trait RwBackend {
    type Gate: Gate;

    fn start_atomic(&self);

    fn end_atomic(&self);

    /// A fresh node, or `None` if the backend has none to spare right now.
    fn get_wait(&self) -> Option<NonNull<WaitNode<Self::Gate>>>;

    /// # Safety
    /// `node` must have come from [`get_wait`](Self::get_wait) on this backend
    /// and must not be used afterwards.
    unsafe fn put_wait(&self, node: NonNull<WaitNode<Self::Gate>>);

    fn wait_for_gate(&self, gate: &Self::Gate) {
        gate.wait();
    }

    fn set_gate(&self, gate: &Self::Gate, open: bool) {
        if open {
            gate.open();
        } else {
            gate.close();
        }
    }
}

/// Backend made of a raw bracket and a fixed [`WaitPool`].
pub struct PoolBackend<R, G, const N: usize> {
    bracket: R,
    pool: WaitPool<G, N>,
}

/// Spin bracket, spinning gates.
pub type SpinBackend<const N: usize = DEFAULT_WAIT_NODES> = PoolBackend<RawSpin, SpinGate, N>;

/// Ticket bracket, spinning gates.
pub type TicketBackend<const N: usize = DEFAULT_WAIT_NODES> = PoolBackend<RawTicket, SpinGate, N>;

/// Interrupt-masking spin bracket, spinning gates.
#[cfg(all(feature = "irq", target_arch = "x86_64"))]
pub type IrqSpinBackend<const N: usize = DEFAULT_WAIT_NODES> =
    PoolBackend<crate::irq::RawIrqSpin, SpinGate, N>;

// SAFETY: the pool is only touched inside the bracket; gates are shared.
unsafe impl<R: Sync, G: Sync, const N: usize> Sync for PoolBackend<R, G, N> {}
unsafe impl<R: Send, G: Send, const N: usize> Send for PoolBackend<R, G, N> {}

impl<R, G, const N: usize> PoolBackend<R, G, N> {
    pub const fn from_parts(bracket: R, pool: WaitPool<G, N>) -> Self {
        Self { bracket, pool }
    }

    #[inline]
    pub const fn bracket(&self) -> &R {
        &self.bracket
    }
}

impl<R: RawLock + RawUnlock, G, const N: usize> PoolBackend<R, G, N> {
    /// Wait nodes currently handed out. Takes the bracket, so it must not be
    /// called from inside it.
    #[must_use]
    pub fn nodes_in_use(&self) -> u32 {
        self.bracket.raw_lock();
        let n = self.pool.in_use();
        // SAFETY: taken just above.
        unsafe { self.bracket.raw_unlock() };
        n
    }
}

impl<const N: usize> PoolBackend<RawSpin, SpinGate, N> {
    #[must_use]
    pub const fn new() -> Self {
        Self::from_parts(RawSpin::new(), WaitPool::new())
    }
}

impl<const N: usize> PoolBackend<RawTicket, SpinGate, N> {
    #[must_use]
    pub const fn new() -> Self {
        Self::from_parts(RawTicket::new(), WaitPool::new())
    }
}

#[cfg(all(feature = "irq", target_arch = "x86_64"))]
impl<const N: usize> PoolBackend<crate::irq::RawIrqSpin, SpinGate, N> {
    #[must_use]
    pub const fn new() -> Self {
        Self::from_parts(crate::irq::RawIrqSpin::new(), WaitPool::new())
    }
}

impl<R: Default, G: Gate + Default, const N: usize> Default for PoolBackend<R, G, N> {
    fn default() -> Self {
        Self::from_parts(R::default(), WaitPool::default())
    }
}

unsafe impl<R, G, const N: usize> RwBackend for PoolBackend<R, G, N>
where
    R: RawLock + RawUnlock,
    G: Gate,
{
    type Gate = G;

    #[inline]
    fn start_atomic(&self) {
        self.bracket.raw_lock();
    }

    #[inline]
    fn end_atomic(&self) {
        // SAFETY: the engine pairs every end with its own start.
        unsafe { self.bracket.raw_unlock() }
    }

    #[inline]
    fn get_wait(&self) -> Option<NonNull<WaitNode<G>>> {
        self.pool.take()
    }

    #[inline]
    unsafe fn put_wait(&self, node: NonNull<WaitNode<G>>) {
        unsafe { self.pool.give_back(node) }
    }
}
