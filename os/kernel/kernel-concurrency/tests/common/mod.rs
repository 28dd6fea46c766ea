#![allow(dead_code)]

use kernel_concurrency::Gate;
use std::sync::{Condvar, Mutex};
use std::thread;

/// Gate that really puts the waiting thread to sleep.
#[derive(Default)]
pub struct ParkingGate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate for ParkingGate {
    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn close(&self) {
        *self.open.lock().unwrap() = false;
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }

    fn is_open(&self) -> bool {
        *self.open.lock().unwrap()
    }
}

/// Yields until `cond` holds.
pub fn wait_until(cond: impl Fn() -> bool) {
    while !cond() {
        thread::yield_now();
    }
}
