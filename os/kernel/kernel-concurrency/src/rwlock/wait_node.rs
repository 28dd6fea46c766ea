use crate::{Gate, SpinGate};
use core::cell::Cell;
use core::ptr::NonNull;

/// What a parked caller is waiting to become.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    Reader,
    Writer,
    /// A reader waiting to turn its read reference into the write hold.
    Upgrade,
}

/// Per-blocked-caller record of the lock engine's wait queue.
///
/// Reader nodes batch: a reader that arrives while a reader node sits at the
/// tail of the queue joins it instead of taking a node of its own, and the
/// whole batch is released by a single gate signal. The node goes back to
/// its pool when the last waiter sharing it has observed the grant.
///
/// All bookkeeping lives in [`Cell`]s so the engine only ever forms shared
/// references to a node; it is mutated exclusively inside the backend's
/// atomic bracket, while parked callers concurrently hold `&G` to the gate.
pub struct WaitNode<G> {
    kind: Cell<WaitKind>,
    waiting: Cell<u32>,
    granted: Cell<bool>,
    next: Cell<Option<NonNull<WaitNode<G>>>>,
    gate: G,
}

impl<G> WaitNode<G> {
    #[must_use]
    pub const fn new(gate: G) -> Self {
        Self {
            kind: Cell::new(WaitKind::Reader),
            waiting: Cell::new(0),
            granted: Cell::new(false),
            next: Cell::new(None),
            gate,
        }
    }

    #[inline]
    pub const fn gate(&self) -> &G {
        &self.gate
    }

    #[inline]
    pub fn kind(&self) -> WaitKind {
        self.kind.get()
    }

    /// Number of callers parked on this node.
    #[inline]
    pub fn waiting(&self) -> u32 {
        self.waiting.get()
    }

    /// Prepares a freshly obtained node for a single waiter of `kind`.
    pub(crate) fn arm(&self, kind: WaitKind) {
        self.kind.set(kind);
        self.waiting.set(1);
        self.granted.set(false);
        self.next.set(None);
    }

    pub(crate) fn add_waiter(&self) {
        self.waiting.set(self.waiting.get() + 1);
    }

    /// Drops one waiter; returns how many are left.
    pub(crate) fn remove_waiter(&self) -> u32 {
        let waiting = self.waiting.get();
        assert_ne!(waiting, 0, "wait node departed more often than it was joined");
        self.waiting.set(waiting - 1);
        waiting - 1
    }

    #[inline]
    pub(crate) fn granted(&self) -> bool {
        self.granted.get()
    }

    #[inline]
    pub(crate) fn set_granted(&self) {
        self.granted.set(true);
    }
}

/// Intrusive FIFO of wait nodes. Nodes are owned by the backend's pool; the
/// queue only links them.
pub(crate) struct WaitQueue<G> {
    head: Option<NonNull<WaitNode<G>>>,
    tail: Option<NonNull<WaitNode<G>>>,
}

impl<G> WaitQueue<G> {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    #[inline]
    pub(crate) const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub(crate) fn front(&self) -> Option<&WaitNode<G>> {
        // SAFETY: queued nodes stay valid until they are popped.
        self.head.map(|n| unsafe { n.as_ref() })
    }

    #[inline]
    pub(crate) fn back(&self) -> Option<&WaitNode<G>> {
        // SAFETY: queued nodes stay valid until they are popped.
        self.tail.map(|n| unsafe { n.as_ref() })
    }

    pub(crate) fn push_back(&mut self, node: NonNull<WaitNode<G>>) {
        match self.tail {
            // SAFETY: see `front`.
            Some(tail) => unsafe { tail.as_ref() }.next.set(Some(node)),
            None => self.head = Some(node),
        }
        self.tail = Some(node);
    }

    pub(crate) fn push_front(&mut self, node: NonNull<WaitNode<G>>) {
        // SAFETY: the caller hands in an armed node it obtained from the pool.
        unsafe { node.as_ref() }.next.set(self.head);
        if self.head.is_none() {
            self.tail = Some(node);
        }
        self.head = Some(node);
    }

    pub(crate) fn pop_front(&mut self) -> Option<NonNull<WaitNode<G>>> {
        let head = self.head?;
        // SAFETY: see `front`.
        let next = unsafe { head.as_ref() }.next.replace(None);
        self.head = next;
        if next.is_none() {
            self.tail = None;
        }
        Some(head)
    }

    /// Sum of all callers parked in the queue.
    pub(crate) fn waiters(&self) -> u32 {
        let mut total = 0;
        let mut cursor = self.head;
        while let Some(n) = cursor {
            // SAFETY: see `front`.
            let n = unsafe { n.as_ref() };
            total += n.waiting();
            cursor = n.next.get();
        }
        total
    }
}

/// Fixed pool of wait nodes with an occupancy bitmap.
///
/// The pool is not synchronized on its own: [`take`](Self::take) and
/// [`give_back`](Self::give_back) must only be called from inside the atomic
/// bracket of the backend that owns it.
pub struct WaitPool<G, const N: usize> {
    nodes: [WaitNode<G>; N],
    used: Cell<u64>,
}

impl<G, const N: usize> WaitPool<G, N> {
    const CAPACITY_OK: () = assert!(N > 0 && N <= 64, "wait pool holds 1..=64 nodes");

    const MASK: u64 = if N >= 64 { u64::MAX } else { (1 << N) - 1 };

    /// Builds a pool whose `i`-th node uses the gate returned by `gate(i)`.
    pub fn from_fn(mut gate: impl FnMut(usize) -> G) -> Self {
        let () = Self::CAPACITY_OK;
        Self {
            nodes: core::array::from_fn(|i| WaitNode::new(gate(i))),
            used: Cell::new(0),
        }
    }

    /// Takes a free node, or `None` when all `N` are in use.
    pub fn take(&self) -> Option<NonNull<WaitNode<G>>> {
        let used = self.used.get();
        let free = !used & Self::MASK;
        if free == 0 {
            return None;
        }
        let idx = free.trailing_zeros();
        self.used.set(used | (1 << idx));
        Some(NonNull::from(&self.nodes[idx as usize]))
    }

    /// Returns a node obtained from [`take`](Self::take).
    ///
    /// # Safety
    /// No reference derived from `node` may be used afterwards.
    ///
    /// # Panics
    /// Panics if `node` does not belong to this pool or is not in use.
    pub unsafe fn give_back(&self, node: NonNull<WaitNode<G>>) {
        let stride = size_of::<WaitNode<G>>();
        let offset = node.as_ptr().addr().wrapping_sub(self.nodes.as_ptr().addr());
        let idx = offset / stride;
        assert!(
            offset % stride == 0 && idx < N,
            "wait node returned to a foreign pool"
        );
        let bit = 1u64 << idx;
        let used = self.used.get();
        assert_ne!(used & bit, 0, "wait node returned twice");
        self.used.set(used & !bit);
    }

    /// Number of nodes currently handed out.
    #[must_use]
    pub fn in_use(&self) -> u32 {
        self.used.get().count_ones()
    }
}

impl<G: Gate + Default, const N: usize> Default for WaitPool<G, N> {
    fn default() -> Self {
        Self::from_fn(|_| G::default())
    }
}

impl<const N: usize> WaitPool<SpinGate, N> {
    #[must_use]
    pub const fn new() -> Self {
        let () = Self::CAPACITY_OK;
        Self {
            nodes: [const { WaitNode::new(SpinGate::new()) }; N],
            used: Cell::new(0),
        }
    }
}
