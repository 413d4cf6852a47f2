use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shorthand guards for RwLock. A poisoned lock is a crashed writer
/// thread; there is nothing sensible to continue with.
pub trait HandyRwLock<T> {
    fn rl(&self) -> RwLockReadGuard<'_, T>;
    fn wl(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> HandyRwLock<T> for RwLock<T> {
    fn rl(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap()
    }

    fn wl(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap()
    }
}
