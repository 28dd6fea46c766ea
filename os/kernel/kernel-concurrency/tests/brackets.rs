use kernel_concurrency::{RawLock, RawSpin, RawTicket, RawUnlock};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;

struct Shared<R> {
    bracket: R,
    value: UnsafeCell<usize>,
}

// Safety: `value` is only touched while `bracket` is held.
unsafe impl<R: Sync> Sync for Shared<R> {}

fn contended_increments<R: RawLock + RawUnlock + Default + Sync>() {
    let threads = 8;
    let iters = 5_000;

    let shared = Shared {
        bracket: R::default(),
        value: UnsafeCell::new(0),
    };
    let in_cs = AtomicUsize::new(0);
    let start = Barrier::new(threads);

    let (shared, in_cs, start) = (&shared, &in_cs, &start);
    thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(move || {
                start.wait();
                for _ in 0..iters {
                    shared.bracket.raw_lock();
                    assert_eq!(in_cs.fetch_add(1, Ordering::SeqCst), 0, "mutual exclusion violated");
                    unsafe { *shared.value.get() += 1 };
                    in_cs.fetch_sub(1, Ordering::SeqCst);
                    unsafe { shared.bracket.raw_unlock() };

                    thread::yield_now();
                }
            });
        }
    });

    assert_eq!(unsafe { *shared.value.get() }, threads * iters);
}

#[test]
fn raw_spin_try_lock_semantics() {
    let l = RawSpin::new();
    assert!(!l.is_locked());
    assert!(l.try_lock());
    assert!(l.is_locked());
    assert!(!l.raw_try_lock());
    unsafe { l.unlock() };
    assert!(l.raw_try_lock());
    unsafe { l.raw_unlock() };
}

#[test]
fn raw_ticket_counts_holder_and_waiters() {
    let l = RawTicket::new();
    assert_eq!(l.queued(), 0);
    l.lock();
    assert_eq!(l.queued(), 1);
    assert!(!l.try_lock());
    unsafe { l.unlock() };
    assert_eq!(l.queued(), 0);
    assert!(l.try_lock());
    unsafe { l.unlock() };
}

#[test]
#[should_panic(expected = "RawSpin released while not held")]
fn raw_spin_unlock_while_free_is_fatal() {
    unsafe { RawSpin::new().unlock() };
}

#[test]
#[should_panic(expected = "RawTicket released while not held")]
fn raw_ticket_unlock_while_free_is_fatal() {
    unsafe { RawTicket::new().unlock() };
}

#[test]
fn raw_spin_excludes_under_contention() {
    contended_increments::<RawSpin>();
}

#[test]
fn raw_ticket_excludes_under_contention() {
    contended_increments::<RawTicket>();
}
