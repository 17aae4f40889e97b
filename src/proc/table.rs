//! The fixed task table (spec.md §3 "Task", §4.7 `fork`'s slot scan).
//!
//! Slot 0 is the idle task and never sleeps (spec.md §3 invariant).
//! Everything else here is index arithmetic protected by a single
//! `Spinlock`; the "current task" is tracked separately because reading
//! it must work even while the table lock is held by someone else
//! walking the rest of the table (spec.md §4.6 `schedule`'s scan).

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::errno::{Error, KResult};
use crate::lock::Spinlock;
use crate::param::NR_TASKS;
use crate::proc::task::{Pid, Procstate, Task};

/// A task-table slot index. Distinct from `Pid`: the slot is reused
/// across different pids over the life of the kernel, the pid is not
/// (spec.md §9 Open Question 1: "pid uniqueness is monotonic, never
/// reused within a kernel session").
pub type TaskId = usize;

pub const IDLE: TaskId = 0;

struct Table {
    tasks: [Task; NR_TASKS],
}

impl Table {
    const fn new() -> Self {
        Self {
            tasks: [Task::empty(); NR_TASKS],
        }
    }
}

static TABLE: Spinlock<Table> = Spinlock::new("task_table", Table::new());
static CURRENT: AtomicUsize = AtomicUsize::new(IDLE);
static NEXT_PID: AtomicUsize = AtomicUsize::new(1);

pub fn current_id() -> TaskId {
    CURRENT.load(Ordering::SeqCst)
}

/// Called only by the scheduler once it has committed to a slot
/// (spec.md §4.6 `schedule` step 4).
pub fn set_current(id: TaskId) {
    CURRENT.store(id, Ordering::SeqCst);
}

pub fn with<R>(id: TaskId, f: impl FnOnce(&Task) -> R) -> R {
    let table = TABLE.lock();
    f(&table.tasks[id])
}

pub fn with_mut<R>(id: TaskId, f: impl FnOnce(&mut Task) -> R) -> R {
    let mut table = TABLE.lock();
    f(&mut table.tasks[id])
}

pub fn with_current<R>(f: impl FnOnce(&Task) -> R) -> R {
    with(current_id(), f)
}

pub fn with_current_mut<R>(f: impl FnOnce(&mut Task) -> R) -> R {
    with_mut(current_id(), f)
}

/// Run `f` over every live task slot under one lock acquisition, the
/// pattern `schedule`'s scan and `exit`'s reparenting loop both need.
pub fn for_each(mut f: impl FnMut(TaskId, &Task)) {
    let table = TABLE.lock();
    for (id, task) in table.tasks.iter().enumerate() {
        if task.state != Procstate::Unused {
            f(id, task);
        }
    }
}

pub fn for_each_mut(mut f: impl FnMut(TaskId, &mut Task)) {
    let mut table = TABLE.lock();
    for (id, task) in table.tasks.iter_mut().enumerate() {
        if task.state != Procstate::Unused {
            f(id, task);
        }
    }
}

pub fn set_state(id: TaskId, state: Procstate) {
    with_mut(id, |t| t.state = state);
}

pub fn state(id: TaskId) -> Procstate {
    with(id, |t| t.state)
}

pub fn has_deliverable_signal(id: TaskId) -> bool {
    with(id, |t| t.signals.deliverable() != 0)
}

/// Allocate a free slot and a never-before-used pid by scanning forward
/// from the last pid handed out (spec.md §4.7 fork: "a rotating
/// `last_pid` scan that avoids collisions with any live pid or slot").
pub fn alloc_slot() -> KResult<(TaskId, Pid)> {
    let mut table = TABLE.lock();
    let slot = (1..NR_TASKS)
        .find(|&i| table.tasks[i].state == Procstate::Unused)
        .ok_or(Error::Again)?;

    let mut pid = NEXT_PID.load(Ordering::SeqCst) as Pid;
    loop {
        let collides = table
            .tasks
            .iter()
            .any(|t| t.state != Procstate::Unused && t.pid == pid);
        if !collides && pid != 0 {
            break;
        }
        pid = pid.wrapping_add(1);
        if pid == 0 {
            pid = 1;
        }
    }
    NEXT_PID.store(pid.wrapping_add(1) as usize, Ordering::SeqCst);
    table.tasks[slot] = Task::empty();
    table.tasks[slot].pid = pid;
    Ok((slot, pid))
}

pub fn find_by_pid(pid: Pid) -> Option<TaskId> {
    let table = TABLE.lock();
    table
        .tasks
        .iter()
        .position(|t| t.state != Procstate::Unused && t.pid == pid)
}
