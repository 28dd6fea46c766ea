//! Rundown protection: drain in-flight users of a resource before teardown.
//!
//! Users bracket every access to the resource with [`RundownGuard::get`] and
//! [`RundownGuard::put`] (or hold a [`RundownRef`]). Teardown starts with
//! [`RundownGuard::wait`]: from then on `get` fails, and `wait` returns once
//! the last user that got in before has left.
//!
//! The whole state is one 32-bit word, updated by compare-and-swap only:
//!
//! ```text
//!  31  30                                   0
//! +---+--------------------------------------+
//! | T |            active users              |
//! +---+--------------------------------------+
//! ```
//!
//! `T` is set once and never cleared. The gate is opened exactly once, by
//! whichever transition first reaches "triggered, zero users": either the
//! `wait` that sets `T` while nobody is inside, or the `put` that drops the
//! last user after `T` was set.

use crate::Gate;
use core::sync::atomic::{AtomicU32, Ordering};
use log::{debug, trace};

const TRIGGERED: u32 = 1 << 31;
const COUNT_MASK: u32 = TRIGGERED - 1;

/// Error returned by [`RundownGuard::try_new_with`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RundownError {
    #[error("rundown gate could not be created")]
    GateCreation,
}

pub struct RundownGuard<G: Gate> {
    word: AtomicU32,
    gate: G,
}

impl<G: Gate> RundownGuard<G> {
    /// Creates an untriggered guard around `gate`, which is closed first.
    pub fn new(gate: G) -> Self {
        gate.close();
        Self {
            word: AtomicU32::new(0),
            gate,
        }
    }

    /// Creates a guard whose gate comes from a fallible constructor.
    ///
    /// # Errors
    /// [`RundownError::GateCreation`] if `create` yields no gate.
    pub fn try_new_with(create: impl FnOnce() -> Option<G>) -> Result<Self, RundownError> {
        create().map(Self::new).ok_or(RundownError::GateCreation)
    }

    /// Registers a user. Returns `false`, without touching the state, once
    /// rundown has been triggered.
    ///
    /// # Panics
    /// Panics if the user count would overflow.
    #[must_use]
    pub fn get(&self) -> bool {
        let mut cur = self.word.load(Ordering::Relaxed);
        loop {
            if cur & TRIGGERED != 0 {
                return false;
            }
            assert_ne!(cur & COUNT_MASK, COUNT_MASK, "rundown user count overflow");
            match self.word.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Like [`get`](Self::get), but hands back a token that calls
    /// [`put`](Self::put) when dropped.
    #[must_use]
    pub fn acquire(&self) -> Option<RundownRef<'_, G>> {
        self.get().then(|| RundownRef { guard: self })
    }

    /// Unregisters a user that got in through a successful `get`.
    ///
    /// # Panics
    /// Panics if there is no active user.
    pub fn put(&self) {
        let mut cur = self.word.load(Ordering::Relaxed);
        loop {
            assert_ne!(cur & COUNT_MASK, 0, "rundown put without a matching get");
            let next = cur - 1;
            match self
                .word
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    if next == TRIGGERED {
                        debug!("rundown: last user left, releasing waiters");
                        self.gate.open();
                    }
                    return;
                }
                Err(actual) => cur = actual,
            }
        }
    }

    /// Triggers rundown and blocks until every registered user has left.
    ///
    /// Safe to call from several threads at once; all of them block on the
    /// same gate and are released together.
    pub fn wait(&self) {
        let mut cur = self.word.load(Ordering::Acquire);
        while cur & TRIGGERED == 0 {
            match self.word.compare_exchange_weak(
                cur,
                cur | TRIGGERED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let active = cur & COUNT_MASK;
                    trace!("rundown: triggered with {active} active users");
                    if active == 0 {
                        self.gate.open();
                    }
                    break;
                }
                Err(actual) => cur = actual,
            }
        }
        self.gate.wait();
    }

    /// Runs rundown to completion and retires the guard, releasing its gate.
    pub fn done(self) {
        self.wait();
        debug!("rundown: guard retired");
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.word.load(Ordering::Acquire) & TRIGGERED != 0
    }

    #[must_use]
    pub fn active_count(&self) -> u32 {
        self.word.load(Ordering::Acquire) & COUNT_MASK
    }
}

/// A registered user of a [`RundownGuard`]; unregisters on drop.
#[must_use = "dropping the reference immediately ends the protected access"]
pub struct RundownRef<'a, G: Gate> {
    guard: &'a RundownGuard<G>,
}

impl<G: Gate> Drop for RundownRef<'_, G> {
    fn drop(&mut self) {
        self.guard.put();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SpinGate;

    #[test]
    fn wait_on_idle_guard_opens_gate_itself() {
        let g = RundownGuard::new(SpinGate::new());
        g.wait();
        assert!(g.is_triggered());
        assert!(!g.get());
        assert_eq!(g.active_count(), 0);
    }

    #[test]
    fn denied_get_leaves_state_untouched() {
        let g = RundownGuard::new(SpinGate::new());
        g.wait();
        let before = g.word.load(Ordering::Relaxed);
        assert!(!g.get());
        assert_eq!(g.word.load(Ordering::Relaxed), before);
    }

    #[test]
    fn ref_token_counts_and_releases() {
        let g = RundownGuard::new(SpinGate::new());
        {
            let _a = g.acquire().unwrap();
            let _b = g.acquire().unwrap();
            assert_eq!(g.active_count(), 2);
        }
        assert_eq!(g.active_count(), 0);
        g.done();
    }

    #[test]
    #[should_panic(expected = "without a matching get")]
    fn unmatched_put_is_fatal() {
        RundownGuard::new(SpinGate::new()).put();
    }

    #[test]
    fn gate_creation_failure_is_reported() {
        let r = RundownGuard::<SpinGate>::try_new_with(|| None);
        assert_eq!(r.err(), Some(RundownError::GateCreation));
    }
}
