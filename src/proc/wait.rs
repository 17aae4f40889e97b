//! Wait channels (spec.md §4.6).
//!
//! A `WaitQueue` holds a single head pointer, not a list, and both
//! `sleep`/`interruptible_sleep` take the lock guarding the condition
//! being waited on and release it atomically with marking the caller
//! asleep and linking it into the channel — matching spec.md §5's
//! "interrupts are disabled only around the minimal critical section
//! needed to test-and-set a lock or link a waiter".
//!
//! `interruptible_sleep` implements the literal historical behavior
//! spec.md's Open Question #3 asks us to choose explicitly: see
//! `SPEC_FULL.md` section "Open Questions - resolved", decision 3. The
//! type is named `WaitQueue` rather than something more reassuring
//! because its wake semantics are exactly this surprising LIFO-relay-
//! then-truncate, not a FIFO queue.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::lock::{pop_off, SpinlockGuard};
use crate::proc::sched;
use crate::proc::table::{self, TaskId};
use crate::proc::task::Procstate;

const NONE: usize = usize::MAX;

pub struct WaitQueue {
    /// `NONE` when empty, else the task id of the head sleeper.
    head: AtomicUsize,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            head: AtomicUsize::new(NONE),
        }
    }

    fn head_get(&self) -> Option<TaskId> {
        match self.head.load(Ordering::SeqCst) {
            NONE => None,
            id => Some(id),
        }
    }

    fn head_set(&self, v: Option<TaskId>) {
        self.head.store(v.unwrap_or(NONE), Ordering::SeqCst);
    }

    /// Release `guard`, mark the caller UNINTERRUPTIBLE and link it as
    /// this channel's new head, then reschedule. On resumption, whoever
    /// was previously at the head (if anyone) is made RUNNABLE again —
    /// spec.md §4.6's chained relay wakeup.
    pub fn sleep<T>(&self, guard: SpinlockGuard<'_, T>) {
        let me = table::current_id();
        let prev = self.head_get();
        self.head_set(Some(me));
        table::set_state(me, Procstate::Uninterruptible);

        // SAFETY: paired with `mem::forget` below; we keep interrupts
        // disabled (the guard's nesting count) until `pop_off` after
        // `schedule()` returns.
        unsafe { guard.raw_unlock() };
        core::mem::forget(guard);

        sched::schedule();
        pop_off();

        if let Some(p) = prev {
            table::set_state(p, Procstate::Running);
        }
    }

    /// Same as `sleep`, but the caller may be woken by a deliverable
    /// signal. Returns `true` if a signal interrupted the wait (EINTR),
    /// `false` if woken normally.
    pub fn interruptible_sleep<T>(&self, guard: SpinlockGuard<'_, T>) -> bool {
        let me = table::current_id();
        let prev = self.head_get();
        self.head_set(Some(me));

        unsafe { guard.raw_unlock() };
        core::mem::forget(guard);

        let interrupted = loop {
            table::set_state(me, Procstate::Interruptible);
            sched::schedule();

            if table::has_deliverable_signal(me) {
                break true;
            }
            match self.head_get() {
                Some(h) if h != me => {
                    // A later sleeper supplanted us at the head; wake it
                    // and loop back to sleep (spec.md §4.6).
                    table::set_state(h, Procstate::Running);
                    continue;
                }
                _ => break false,
            }
        };

        pop_off();
        // Historical truncation: null the head rather than restoring
        // `prev` (SPEC_FULL.md decision 3).
        self.head_set(None);
        if let Some(p) = prev {
            table::set_state(p, Procstate::Running);
        }
        interrupted
    }

    /// Wake only the current head, then clear it (spec.md §4.6).
    pub fn wake_up(&self) {
        if let Some(t) = self.head_get() {
            table::set_state(t, Procstate::Running);
        }
        self.head_set(None);
    }

    pub fn is_empty(&self) -> bool {
        self.head_get().is_none()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
