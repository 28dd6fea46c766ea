use super::{RwBackend, RwLockEngine, SpinBackend};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// Data-owning reader/writer lock on top of [`RwLockEngine`].
pub struct RwLock<T, B: RwBackend> {
    engine: RwLockEngine<B>,
    cell: UnsafeCell<T>,
}

/// [`RwLock`] with the default spinning backend.
pub type SpinRwLock<T> = RwLock<T, SpinBackend>;

// Safety: readers share `&T` across threads, writers move `&mut T` between them.
unsafe impl<T: Send + Sync, B: RwBackend + Sync> Sync for RwLock<T, B> {}
unsafe impl<T: Send, B: RwBackend + Send> Send for RwLock<T, B> {}

impl<T> SpinRwLock<T> {
    pub const fn new(value: T) -> Self {
        Self::with_backend(SpinBackend::new(), value)
    }
}

impl<T, B: RwBackend> RwLock<T, B> {
    pub const fn with_backend(backend: B, value: T) -> Self {
        Self {
            engine: RwLockEngine::new(backend),
            cell: UnsafeCell::new(value),
        }
    }

    #[inline]
    pub const fn engine(&self) -> &RwLockEngine<B> {
        &self.engine
    }

    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, T, B> {
        self.engine.read_lock();
        RwLockReadGuard { lock: self }
    }

    #[inline]
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T, B>> {
        self.engine
            .try_read_lock()
            .then(|| RwLockReadGuard { lock: self })
    }

    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, T, B> {
        self.engine.write_lock();
        RwLockWriteGuard { lock: self }
    }

    #[inline]
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T, B>> {
        self.engine
            .try_write_lock()
            .then(|| RwLockWriteGuard { lock: self })
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.cell.get_mut()
    }

    /// Destroys the lock, returning the value and the backend.
    ///
    /// # Panics
    /// Panics if the lock is still held (a guard was leaked).
    pub fn into_inner(self) -> (T, B) {
        let Self { engine, cell } = self;
        let backend = engine.destroy();
        (cell.into_inner(), backend)
    }
}

pub struct RwLockReadGuard<'a, T, B: RwBackend> {
    lock: &'a RwLock<T, B>,
}

impl<'a, T, B: RwBackend> RwLockReadGuard<'a, T, B> {
    /// Trades this read hold for the write hold without ever letting go of
    /// the lock.
    ///
    /// # Panics
    /// Panics if another reader is already upgrading.
    pub fn upgrade(self) -> RwLockWriteGuard<'a, T, B> {
        let lock = self.lock;
        // The read reference is consumed by the upgrade, not released.
        core::mem::forget(self);
        lock.engine.upgrade_read_to_write();
        RwLockWriteGuard { lock }
    }
}

impl<T, B: RwBackend> Deref for RwLockReadGuard<'_, T, B> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.cell.get() }
    }
}

impl<T, B: RwBackend> Drop for RwLockReadGuard<'_, T, B> {
    fn drop(&mut self) {
        self.lock.engine.read_unlock();
    }
}

pub struct RwLockWriteGuard<'a, T, B: RwBackend> {
    lock: &'a RwLock<T, B>,
}

impl<T, B: RwBackend> Deref for RwLockWriteGuard<'_, T, B> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.cell.get() }
    }
}

impl<T, B: RwBackend> DerefMut for RwLockWriteGuard<'_, T, B> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.cell.get() }
    }
}

impl<T, B: RwBackend> Drop for RwLockWriteGuard<'_, T, B> {
    fn drop(&mut self) {
        self.lock.engine.write_unlock();
    }
}
