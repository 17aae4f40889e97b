//! The scheduler (spec.md §4.6 C6). Grounded in the teacher's
//! `scheduler()`/`sched()`/`swtch` split: one idle context that every
//! task switches back into when it blocks, and a `scheduler()` loop
//! (never returns) that picks the next RUNNING task and switches into
//! it. `schedule()` is the task-side half: call it to give up the CPU
//! and it returns once the scheduler has chosen this task again.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::x86::{switch_to, Context};
use crate::lock::{pop_off, push_off};
use crate::proc::signal::Signal;
use crate::proc::table::{self, TaskId};
use crate::proc::task::Procstate;

/// The context the idle loop itself runs in. Single CPU (spec.md §5),
/// so one idle context suffices.
static mut IDLE_CONTEXT: Context = Context::new();

/// Never returns. Entered once from the boot path after the first task
/// has been created; every other task's `schedule()` call eventually
/// switches back here.
pub fn scheduler() -> ! {
    loop {
        wake_expired_alarms_and_signalled();

        let chosen = pick_next();
        match chosen {
            Some(id) => enter(id),
            None => {
                rebucket_counters();
                unsafe { crate::arch::x86::asm::sti() };
                unsafe { crate::arch::x86::asm::hlt() };
            }
        }
    }
}

/// spec.md §4.6 step 2: "select the RUNNING task with the greatest
/// positive `counter`; tie-break by higher slot index." Step 3 applies
/// only when every RUNNING task has `counter==0`, which this treats as
/// "no task to pick" so the caller can rebucket and retry.
fn pick_next() -> Option<TaskId> {
    let mut best: Option<(TaskId, i32)> = None;
    table::for_each(|id, task| {
        if task.state == Procstate::Running && task.counter > 0 {
            if best.map_or(true, |(_, c)| task.counter >= c) {
                best = Some((id, task.counter));
            }
        }
    });
    best.map(|(id, _)| id)
}

fn wake_expired_alarms_and_signalled() {
    table::for_each_mut(|_, task| {
        if let Some(deadline) = task.alarm_deadline {
            if deadline <= ticks() {
                task.signals.raise(Signal::Alrm);
                task.alarm_deadline = None;
            }
        }
        if task.state == Procstate::Interruptible && task.signals.deliverable() != 0 {
            task.state = Procstate::Running;
        }
    });
}

/// spec.md §4.6 step 3: "for every task (running or sleeping) set
/// `counter = counter/2 + priority`".
fn rebucket_counters() {
    table::for_each_mut(|_, task| {
        task.counter = task.counter / 2 + task.priority;
    });
}

/// Switch from the idle context into task `id`. Returns once that task
/// calls `schedule()` (or exits) and control comes back to the idle
/// loop.
fn enter(id: TaskId) {
    table::set_current(id);
    let new_ctx: *const Context = table::with(id, |t| &t.ctx as *const Context);
    push_off();
    // SAFETY: single CPU; `IDLE_CONTEXT` is touched only from this
    // function, and `new_ctx` belongs to the task we just marked
    // current, which no one else switches into concurrently.
    unsafe { switch_to(core::ptr::addr_of_mut!(IDLE_CONTEXT), new_ctx) };
    pop_off();
}

/// Give up the CPU: switch from the caller's context back into the
/// idle loop. Returns once the scheduler picks this task again. Callers
/// (`proc::wait`) must have already set this task's state to something
/// other than RUNNING before calling, or the scheduler will simply pick
/// it right back.
pub fn schedule() {
    let id = table::current_id();
    let old_ctx: *mut Context = table::with_mut(id, |t| &mut t.ctx as *mut Context);
    push_off();
    // SAFETY: `old_ctx` is this task's own slot, which nothing touches
    // while it is not RUNNING; `IDLE_CONTEXT` was populated by the most
    // recent `enter`.
    unsafe { switch_to(old_ctx, core::ptr::addr_of!(IDLE_CONTEXT)) };
    pop_off();
}

/// Voluntarily give up the remainder of this time slice.
pub fn r#yield() {
    table::with_current_mut(|t| t.counter = 0);
    schedule();
}

static TICKS: AtomicU64 = AtomicU64::new(0);

pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// spec.md §4.6 `do_timer`: advance the tick counter, charge the
/// interrupted task, decrement its counter, and call `schedule()` iff
/// it ran out **and** the CPU was in user mode ("kernel-level
/// preemption is suppressed").
pub fn do_timer(was_user_mode: bool) {
    TICKS.fetch_add(1, Ordering::Relaxed);
    let exhausted = table::with_current_mut(|t| {
        if was_user_mode {
            t.utime += 1;
        } else {
            t.stime += 1;
        }
        t.counter -= 1;
        t.counter <= 0
    });
    if was_user_mode && exhausted {
        schedule();
    }
}
