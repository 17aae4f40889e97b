//! Mutual-exclusion lock that disables interrupts for its critical
//! section instead of busy-waiting for another CPU, since this kernel
//! targets a single CPU (spec.md §5: "Single CPU, single address space").
//! The name and shape follow the teacher's `Spinlock<T>`; the body is
//! `cli`/`sti` nesting rather than a compare-exchange loop, since there is
//! never a second core to wait out.

use core::cell::{Cell, UnsafeCell};
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::x86::asm;

/// How many nested `push_off` calls are outstanding, and whether
/// interrupts were enabled before the first one. Single CPU, so one
/// global counter suffices (spec.md §5).
struct IntrState {
    depth: Cell<usize>,
    was_enabled: Cell<bool>,
}

// SAFETY: accessed only with interrupts handled carefully around the
// depth counter itself; there is exactly one CPU, so there is no data
// race from a second core, only from a nested interrupt, which this
// counter is designed to track.
unsafe impl Sync for IntrState {}

static INTR_STATE: IntrState = IntrState {
    depth: Cell::new(0),
    was_enabled: Cell::new(false),
};

/// Disable interrupts, remembering the pre-existing state so a matching
/// `pop_off` can restore it once every nested critical section has
/// exited. Mirrors the teacher's `push_off`/`pop_off` pair.
pub fn push_off() {
    let enabled = asm::interrupts_enabled();
    unsafe { asm::cli() };
    if INTR_STATE.depth.get() == 0 {
        INTR_STATE.was_enabled.set(enabled);
    }
    INTR_STATE.depth.set(INTR_STATE.depth.get() + 1);
}

/// Undo one `push_off`. Once the nesting depth returns to zero,
/// interrupts are restored to whatever they were before the outermost
/// `push_off`.
pub fn pop_off() {
    let depth = INTR_STATE.depth.get();
    assert!(depth > 0, "pop_off: not holding any lock");
    INTR_STATE.depth.set(depth - 1);
    if depth == 1 && INTR_STATE.was_enabled.get() {
        unsafe { asm::sti() };
    }
}

/// A lock protecting `T`, held by disabling interrupts.
pub struct Spinlock<T> {
    name: &'static str,
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: `locked` gates all access to `data`.
unsafe impl<T: Send> Sync for Spinlock<T> {}

pub struct SpinlockGuard<'s, T> {
    lock: &'s Spinlock<T>,
}

impl<T> Spinlock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        push_off();
        assert!(!self.holding(), "Spinlock::lock: already holding {}", self.name);
        while self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        SpinlockGuard { lock: self }
    }

    /// True if the current context already holds this lock. Single CPU,
    /// so "holding" reduces to "is locked right now with interrupts off".
    pub fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) && INTR_STATE.depth.get() > 0
    }

    /// Access the inner data without acquiring the lock.
    ///
    /// # Safety
    /// Caller must already be holding the lock, or must otherwise be
    /// certain no concurrent access is possible (e.g. during single-
    /// threaded init before interrupts are enabled).
    pub unsafe fn get_mut_unchecked(&self) -> &mut T {
        &mut *self.data.get()
    }
}

impl<'s, T> SpinlockGuard<'s, T> {
    /// Release the underlying lock bit without restoring the interrupt
    /// state, and without running `Drop`. Paired with `core::mem::forget`
    /// at the call site; used only by `proc::wait::WaitQueue::sleep`,
    /// which must keep interrupts disabled across linking the waiter and
    /// calling `schedule()`, then pop them off itself once that returns
    /// (spec.md §5: "interrupts are disabled only around the minimal
    /// critical section needed to test-and-set a lock or link a
    /// waiter").
    ///
    /// # Safety
    /// Caller must `mem::forget(self)` immediately after, and must call
    /// `super::pop_off()` exactly once after the sleep completes.
    pub unsafe fn raw_unlock(&self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        pop_off();
    }
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}
