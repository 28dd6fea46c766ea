use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// Binary park/unpark primitive.
///
/// A gate is either closed, in which case [`wait`](Gate::wait) blocks, or
/// open, in which case every current and later waiter passes until the gate
/// is closed again. The kernel scheduler normally supplies the real thing;
/// [`SpinGate`] is the busy-waiting stand-in for contexts that cannot sleep.
///
/// Implementations must be internally synchronized: `open` and `close` are
/// called while other CPUs sit in `wait`.
pub trait Gate {
    /// Opens the gate, releasing all waiters.
    fn open(&self);

    /// Closes the gate so the next `wait` blocks.
    fn close(&self);

    /// Blocks until the gate is open.
    fn wait(&self);

    /// Snapshot of the gate state.
    fn is_open(&self) -> bool;
}

/// Busy-waiting gate.
pub struct SpinGate {
    open: AtomicBool,
}

impl Default for SpinGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinGate {
    /// Creates a closed gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
        }
    }
}

impl Gate for SpinGate {
    #[inline]
    fn open(&self) {
        // Release publishes whatever the opener wrote before signalling.
        self.open.store(true, Ordering::Release);
    }

    #[inline]
    fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
    }

    #[inline]
    fn wait(&self) {
        while !self.open.load(Ordering::Acquire) {
            spin_loop();
        }
    }

    #[inline]
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl<G: Gate + ?Sized> Gate for &G {
    fn open(&self) {
        (**self).open();
    }

    fn close(&self) {
        (**self).close();
    }

    fn wait(&self) {
        (**self).wait();
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_starts_closed_and_stays_open() {
        let g = SpinGate::new();
        assert!(!g.is_open());
        g.open();
        g.wait();
        g.wait();
        assert!(g.is_open());
        g.close();
        assert!(!g.is_open());
    }
}
