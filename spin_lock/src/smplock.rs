//! SMP-supported spinlock.
//!
//! A hart acquires the lock by atomically setting a flag with a
//! read-modify-write instruction and releases it by clearing the flag.
//! While the flag is observed set, the hart spins with [`core::hint::spin_loop`].
//!
//! The lock does not touch the interrupt-enable state of the hart. Callers that
//! must not be interrupted while holding a lock mask interrupts themselves.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// An enumeration of possible errors associated while trying to acquire a lock,
/// from the [`try_lock`] method on a [`SpinLock`].
///
/// [`try_lock`]: SpinLock::try_lock
/// [`SpinLock`]: SpinLock
#[derive(Debug, PartialEq, Eq)]
pub enum TryLockError {
    /// The lock could not be acquired at this time because the operation would
    /// otherwise block.
    WouldBlock,
}

/// A mutual exclusion primitive useful for protecting shared data
///
/// This spinlock will block harts waiting for the lock to become available. The
/// spinlock can be created via a [`new`] constructor. Each spinlock has a type parameter
/// which represents the data that it is protecting. The data can only be accessed
/// through the RAII guards returned from [`lock`] and [`try_lock`], which
/// guarantees that the data is only ever accessed when the spinlock is locked.
///
/// [`new`]: Self::new
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires a spinlock, blocking the current hart until it is able to do so.
    ///
    /// Upon returning, the hart is the only hart with the lock held. An RAII
    /// guard is returned to allow scoped unlock of the lock. When the guard goes
    /// out of scope, the spinlock will be unlocked.
    ///
    /// Locking a spinlock twice from the same context deadlocks.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            if let Ok(guard) = self.try_lock() {
                return guard;
            }
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    /// Attempts to acquire this lock.
    ///
    /// If the lock could not be acquired at this time, then [`Err`] is returned.
    /// Otherwise, an RAII guard is returned. The lock will be unlocked when the
    /// guard is dropped.
    ///
    /// This function does not block.
    ///
    /// # Errors
    ///
    /// If the spinlock could not be acquired because it is already locked, then
    /// this call will return the [`WouldBlock`] error.
    ///
    /// [`WouldBlock`]: TryLockError::WouldBlock
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, TryLockError> {
        if self.locked.fetch_or(true, Ordering::Acquire) {
            Err(TryLockError::WouldBlock)
        } else {
            Ok(SpinLockGuard {
                lock: self,
                _not_send: PhantomData,
            })
        }
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// The mutable borrow statically guarantees no locks exist.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes this spinlock, returning the underlying data.
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.data.into_inner()
    }
}

impl<T: ?Sized + Default> Default for SpinLock<T> {
    /// Creates a `SpinLock<T>`, with the `Default` value for T.
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

/// An RAII implementation of a "scoped lock" of a spinlock. When this structure is
/// dropped (falls out of scope), the lock will be unlocked.
///
/// The data protected by the spinlock can be accessed through this guard via its
/// [`Deref`] and [`DerefMut`] implementations.
///
/// This structure is created by the [`lock`] and [`try_lock`] methods on
/// [`SpinLock`].
///
/// [`lock`]: SpinLock::lock
/// [`try_lock`]: SpinLock::try_lock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    lock: &'a SpinLock<T>,
    // A guard is released by the hart that acquired it.
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use crate::{SpinLock, TryLockError};
    use rand::Rng;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };
    use std::thread::scope;

    #[test]
    pub fn smoke() {
        const LENGTH: usize = 1024;
        let lock = SpinLock::new(vec![]);
        let start = Arc::new(AtomicBool::new(true));

        scope(|s| {
            for i in 0..LENGTH {
                let d = &lock;
                let start = start.clone();
                s.spawn(move || {
                    while start.load(Ordering::SeqCst) {}
                    let mut d = d.lock();
                    d.push(i);
                });
            }
            start.store(false, Ordering::SeqCst);
        });

        lock.lock().sort();
        assert_eq!(lock.into_inner(), (0..LENGTH).collect::<Vec<_>>());
    }

    #[test]
    pub fn try_lock_would_block() {
        let lock = SpinLock::new(0);
        let guard = lock.lock();
        assert!(matches!(lock.try_lock(), Err(TryLockError::WouldBlock)));
        drop(guard);
        *lock.try_lock().expect("lock is free") += 1;
        assert_eq!(lock.into_inner(), 1);
    }

    #[test]
    pub fn counter_under_contention() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 2000;
        let lock = SpinLock::new(0usize);

        scope(|s| {
            for _ in 0..THREADS {
                let lock = &lock;
                s.spawn(move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..ROUNDS {
                        let mut g = lock.lock();
                        let v = *g;
                        if rng.gen_bool(0.1) {
                            std::thread::yield_now();
                        }
                        *g = v + 1;
                    }
                });
            }
        });

        assert_eq!(lock.into_inner(), THREADS * ROUNDS);
    }
}
