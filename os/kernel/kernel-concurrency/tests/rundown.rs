mod common;

use common::{ParkingGate, wait_until};
use kernel_concurrency::{Gate, RundownError, RundownGuard, SpinGate};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;

#[test]
fn wait_drains_active_users_and_refuses_new_ones() {
    let guard = RundownGuard::new(ParkingGate::default());
    let released = AtomicUsize::new(0);
    let finished = AtomicUsize::new(0);

    for _ in 0..3 {
        assert!(guard.get());
    }
    assert_eq!(guard.active_count(), 3);

    thread::scope(|s| {
        for _ in 0..2 {
            s.spawn(|| {
                guard.wait();
                // Every user left before any waiter returns.
                assert_eq!(released.load(Ordering::SeqCst), 3);
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        wait_until(|| guard.is_triggered());
        assert!(!guard.get());
        assert!(guard.acquire().is_none());
        assert_eq!(guard.active_count(), 3);

        for _ in 0..3 {
            assert_eq!(finished.load(Ordering::SeqCst), 0);
            released.fetch_add(1, Ordering::SeqCst);
            guard.put();
        }
    });

    assert_eq!(finished.load(Ordering::SeqCst), 2);
    assert_eq!(guard.active_count(), 0);
    assert!(guard.is_triggered());
}

#[test]
fn no_user_gets_in_after_rundown_was_observed() {
    let guard = RundownGuard::new(SpinGate::new());
    let triggered = AtomicBool::new(false);
    let late = AtomicUsize::new(0);
    let start = Barrier::new(5);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                start.wait();
                loop {
                    let seen = triggered.load(Ordering::SeqCst);
                    match guard.acquire() {
                        Some(_user) => {
                            if seen {
                                late.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                        None => break,
                    }
                    thread::yield_now();
                }
            });
        }

        start.wait();
        thread::sleep(std::time::Duration::from_millis(5));
        // Publish before triggering so any user that saw the flag must be
        // refused.
        triggered.store(true, Ordering::SeqCst);
        guard.wait();
        assert_eq!(guard.active_count(), 0);
    });

    assert_eq!(late.load(Ordering::SeqCst), 0);
}

#[test]
fn done_returns_only_after_the_last_put() {
    let guard = RundownGuard::new(ParkingGate::default());
    let left = AtomicBool::new(false);

    assert!(guard.get());
    thread::scope(|s| {
        s.spawn(|| {
            wait_until(|| guard.is_triggered());
            left.store(true, Ordering::SeqCst);
            guard.put();
        });
        guard.wait();
        assert!(left.load(Ordering::SeqCst));
    });
    guard.done();
}

#[test]
fn fallible_gate_construction() {
    let guard = RundownGuard::try_new_with(|| Some(SpinGate::new())).unwrap();
    {
        let _a = guard.acquire().unwrap();
        let _b = guard.acquire().unwrap();
        assert_eq!(guard.active_count(), 2);
    }
    assert_eq!(guard.active_count(), 0);
    guard.done();

    let err = RundownGuard::<SpinGate>::try_new_with(|| None).err();
    assert_eq!(err, Some(RundownError::GateCreation));
}

#[test]
fn borrowed_gate_is_left_open_for_its_owner() {
    let gate = SpinGate::new();
    let guard = RundownGuard::new(&gate);

    assert!(guard.get());
    assert!(!gate.is_open());
    guard.put();
    assert!(!gate.is_open());

    guard.done();
    assert!(gate.is_open());
}
