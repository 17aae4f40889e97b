//! A lock that puts the caller to sleep instead of spinning when
//! contended, for critical sections that may hold across I/O (spec.md
//! §5: "long ones that may need to wait for I/O or another task").
//! Shape follows the teacher's `SleepLock<T>`; underneath it is a
//! `Spinlock<T>` holding a `bool` plus a `WaitQueue`, since the wait
//! primitives (`proc::wait`) are specified in terms of that channel
//! abstraction rather than a futex.

use core::ops::{Deref, DerefMut};

use crate::lock::Spinlock;
use crate::proc::wait::WaitQueue;

struct Inner<T> {
    locked: bool,
    data: T,
}

pub struct Sleeplock<T> {
    inner: Spinlock<Inner<T>>,
    wait: WaitQueue,
}

pub struct SleeplockGuard<'s, T> {
    lock: &'s Sleeplock<T>,
}

impl<T> Sleeplock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            inner: Spinlock::new(name, Inner {
                locked: false,
                data,
            }),
            wait: WaitQueue::new(),
        }
    }

    pub fn lock(&self) -> SleeplockGuard<'_, T> {
        loop {
            let mut inner = self.inner.lock();
            if !inner.locked {
                inner.locked = true;
                return SleeplockGuard { lock: self };
            }
            self.wait.sleep(inner);
        }
    }
}

impl<T> Drop for SleeplockGuard<'_, T> {
    fn drop(&mut self) {
        {
            let mut inner = self.lock.inner.lock();
            inner.locked = false;
        }
        self.lock.wait.wake_up();
    }
}

impl<T> Deref for SleeplockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard implies `locked` and exclusive access.
        unsafe { &(*self.lock.inner.get_mut_unchecked()).data }
    }
}

impl<T> DerefMut for SleeplockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard implies `locked` and exclusive access.
        unsafe { &mut (*self.lock.inner.get_mut_unchecked()).data }
    }
}
