//! Process lifecycle (spec.md §4.7, C7): fork, exit, waitpid, and signal
//! delivery on the return path to user mode. `execve` itself lives in
//! `crate::exec` since it needs the executable-loading machinery; this
//! module is everything else spec.md §4.7 describes.

use crate::arch::x86::{self, Context, TrapFrame};
use crate::errno::{Error, KResult};
use crate::file::{self, FileRef};
use crate::fs::inode;
use crate::lock::pop_off;
use crate::mm::{frame, phys, vm};
use crate::param::{KSTACK_SIZE, NR_TASKS, PAGE_SIZE, TASK_SIZE};
use crate::proc::sched;
use crate::proc::signal::{Disposition, SaFlags, Signal, SignalState};
use crate::proc::table::{self, TaskId};
use crate::proc::task::{Pid, Procstate, Task};

/// One private kernel stack per task slot (spec.md §3 Task: "saved
/// register/segment image" needs somewhere to live across a context
/// switch). Allocation of the stack *pages themselves* from physical
/// memory would duplicate C1's job for no benefit — a static array is
/// exactly as real and far simpler, the same tradeoff the teacher makes
/// for its per-proc kernel stack region.
#[repr(align(16))]
struct Stack([u8; KSTACK_SIZE]);

static mut KSTACKS: [Stack; NR_TASKS] = {
    const S: Stack = Stack([0; KSTACK_SIZE]);
    [S; NR_TASKS]
};

fn kstack_top(slot: TaskId) -> u32 {
    // SAFETY: each slot's stack is touched only by that task and by
    // `fork` priming a not-yet-running one; slots never alias.
    unsafe { (KSTACKS[slot].0.as_ptr() as usize + KSTACK_SIZE) as u32 }
}

/// Entry point for a task that has never run before: unwind the lock
/// `proc::sched::enter` is still logically holding (see its own
/// comment), deliver any signal that became pending while the task sat
/// UNINTERRUPTIBLE waiting for its turn, then drop into user mode via
/// its (copied) trap frame (spec.md §4.7 fork: "then flips state to
/// RUNNING").
extern "C" fn forkret() -> ! {
    pop_off();
    let id = table::current_id();
    deliver_signals(id);
    let tf: *const TrapFrame = table::with(id, |t| &t.trapframe as *const TrapFrame);
    // SAFETY: `tf` points into this task's own table slot, which nothing
    // else touches while this task is RUNNING.
    unsafe { x86::enter_user_mode(tf) }
}

/// spec.md §4.7 `fork`.
pub fn fork() -> KResult<Pid> {
    let parent = table::current_id();
    let (slot, pid) = table::alloc_slot()?;
    let parent_snapshot = table::with(parent, |t| *t);

    table::with_mut(slot, |t| {
        *t = parent_snapshot;
        t.pid = pid;
        t.ppid = parent_snapshot.pid;
        t.state = Procstate::Uninterruptible;
        t.utime = 0;
        t.stime = 0;
        t.cutime = 0;
        t.cstime = 0;
        t.signals = SignalState::new();
        t.alarm_deadline = None;
        t.counter = t.priority;
        t.base = slot * TASK_SIZE;
        // The child's fork() returns 0; the parent's trapframe (just
        // copied wholesale above) is adjusted here rather than at the
        // syscall dispatch layer, keeping fork self-contained the way
        // spec.md §4.7 describes it.
        t.trapframe.eax = 0;
    });
    // Installing the child's TSS/LDT descriptor-table entries is GDT
    // programming, out of scope per spec.md §1; `t.base` above is what
    // that (out-of-scope) loader reads.

    if let Err(e) = vm::copy_range(parent_snapshot.base, slot * TASK_SIZE, TASK_SIZE) {
        table::with_mut(slot, |t| *t = Task::empty());
        return Err(e);
    }

    if let Some(ir) = parent_snapshot.cwd {
        inode::with_mut(ir, |n| n.count += 1);
    }
    if let Some(ir) = parent_snapshot.root {
        inode::with_mut(ir, |n| n.count += 1);
    }
    if let Some(ir) = parent_snapshot.executable {
        inode::with_mut(ir, |n| n.count += 1);
    }
    for fd in parent_snapshot.fds.iter().flatten() {
        let _ = file::dup(FileRef(*fd));
    }

    let top = kstack_top(slot);
    table::with_mut(slot, |t| {
        t.kstack_top = top as usize;
        // SAFETY: `top` is this slot's private stack, unused by anyone
        // else since the slot was just claimed by `alloc_slot`.
        t.ctx = unsafe { Context::new_task(top, forkret as usize as u32) };
    });

    table::set_state(slot, Procstate::Running);
    Ok(pid)
}

/// spec.md §4.7 `exit`. Never returns.
pub fn exit(code: i32) -> ! {
    let me = table::current_id();
    let (base, fds, cwd, root, executable, is_leader, session) = table::with(me, |t| {
        (t.base, t.fds, t.cwd, t.root, t.executable, t.is_session_leader, t.session)
    });

    let _ = vm::free_range(base, TASK_SIZE);

    for fd in fds.iter().flatten() {
        file::close(FileRef(*fd));
    }
    if let Some(ir) = cwd {
        inode::iput(ir);
    }
    if let Some(ir) = root {
        inode::iput(ir);
    }
    if let Some(ir) = executable {
        inode::iput(ir);
    }

    let my_pid = table::with(me, |t| t.pid);
    let init = table::find_by_pid(1);

    // Reparent every child to pid 1 (spec.md §4.7), collecting which
    // already-ZOMBIE children need pid 1 notified, outside the table
    // lock `for_each_mut` holds.
    let mut notify_init = false;
    table::for_each_mut(|_, t| {
        if t.ppid == my_pid {
            t.ppid = 1;
            if t.state == Procstate::Zombie {
                notify_init = true;
            }
        }
    });
    if notify_init {
        if let Some(init_id) = init {
            table::with_mut(init_id, |p| p.signals.raise(Signal::Chld));
        }
    }

    if is_leader {
        // Releasing the controlling tty's driver state is out of scope
        // here (no device register programming, spec.md §1); killing
        // the session means every task sharing it loses the reference.
        table::for_each_mut(|_, t| {
            if t.session == session {
                t.tty = None;
            }
        });
    }

    let ppid = table::with_mut(me, |t| {
        t.state = Procstate::Zombie;
        t.exit_code = code;
        t.ppid
    });
    if let Some(ppid_id) = table::find_by_pid(ppid) {
        table::with_mut(ppid_id, |p| p.signals.raise(Signal::Chld));
    }

    sched::schedule();
    unreachable!("a ZOMBIE task must never be rescheduled");
}

pub const WNOHANG: u32 = 1;
pub const WUNTRACED: u32 = 2;

/// spec.md §4.7 `waitpid`.
pub fn waitpid(pid: i32, options: u32) -> KResult<(Pid, i32)> {
    loop {
        let me = table::current_id();
        let (my_pid, my_pgrp) = table::with(me, |m| (m.pid, m.pgrp));

        let mut found_any = false;
        let mut reaped: Option<(TaskId, Pid, i32, u64, u64)> = None;
        let mut stopped: Option<(Pid, i32)> = None;

        table::for_each(|id, t| {
            if t.ppid != my_pid {
                return;
            }
            let matches = match pid {
                p if p > 0 => t.pid == p as Pid,
                0 => t.pgrp == my_pgrp,
                -1 => true,
                p => t.pgrp == (-p) as Pid,
            };
            if !matches {
                return;
            }
            found_any = true;
            if reaped.is_some() || stopped.is_some() {
                return;
            }
            if t.state == Procstate::Zombie {
                reaped = Some((id, t.pid, t.exit_code, t.utime + t.cutime, t.stime + t.cstime));
            } else if t.state == Procstate::Stopped && options & WUNTRACED != 0 {
                stopped = Some((t.pid, 0x7f));
            }
        });

        if let Some((child_id, child_pid, status, ut, st)) = reaped {
            table::with_mut(me, |m| {
                m.cutime += ut;
                m.cstime += st;
            });
            table::with_mut(child_id, |t| *t = Task::empty());
            return Ok((child_pid, status));
        }
        if let Some(r) = stopped {
            return Ok(r);
        }
        if !found_any {
            return Err(Error::Srch);
        }
        if options & WNOHANG != 0 {
            return Ok((0, 0));
        }
        if wait_for_child() {
            return Err(Error::Intr);
        }
    }
}

/// Sleep interruptibly for `SIGCHLD` without a dedicated wait channel:
/// `proc::sched::scheduler`'s per-iteration scan already promotes any
/// INTERRUPTIBLE task with a deliverable signal back to RUNNING (spec.md
/// §4.6 step 1), so simply marking ourselves INTERRUPTIBLE and calling
/// `schedule()` is sufficient.
fn wait_for_child() -> bool {
    let me = table::current_id();
    table::set_state(me, Procstate::Interruptible);
    sched::schedule();
    let had_chld = table::with(me, |t| t.signals.pending & Signal::Chld.mask() != 0);
    if had_chld {
        table::with_mut(me, |t| t.signals.clear(Signal::Chld));
        false
    } else {
        true
    }
}

/// spec.md §4.7 "Signal delivery": run on the return path from every
/// syscall/interrupt to user mode. Pushes an artificial frame for the
/// first deliverable, non-ignored signal found and redirects the trap
/// frame's `eip` into the handler; default-disposition signals (other
/// than `SIGCHLD`, which is silently dropped) call `exit`.
pub fn deliver_signals(id: TaskId) {
    loop {
        let sig = table::with_mut(id, |t| {
            let deliverable = t.signals.deliverable();
            if deliverable == 0 {
                return None;
            }
            let n = deliverable.trailing_zeros() as u8 + 1;
            let sig = Signal::from_number(n)?;
            t.signals.clear(sig);
            Some(sig)
        });
        let sig = match sig {
            Some(s) => s,
            None => return,
        };

        let action = table::with(id, |t| t.signals.actions[sig as usize - 1]);
        match action.disposition {
            Disposition::Ignore => continue,
            Disposition::Default => {
                if sig == Signal::Chld {
                    continue;
                }
                exit(1 << (sig as u8 - 1));
            }
            Disposition::Handler(entry) => {
                push_signal_frame(id, sig, entry, &action);
                if action.flags.contains(SaFlags::SA_ONESHOT) {
                    table::with_mut(id, |t| {
                        t.signals.actions[sig as usize - 1].disposition = Disposition::Default
                    });
                }
            }
        }
    }
}

/// Task-relative byte offsets `bootstrap_init_task` lays its scratch
/// page out at: the init path string first, then a 2-entry argv array
/// (path, NULL) and a 1-entry envp array (NULL), each word-aligned and
/// clear of the others so offset 0 is never mistaken for the NULL
/// sentinel `exec::execve`'s `stage_strv` checks pointer words against.
const BOOT_PATH_OFF: usize = 4;
const BOOT_ARGV_OFF: usize = 64;
const BOOT_ENVP_OFF: usize = 72;

/// There is no parent to `fork` the very first task from, so this
/// builds task-table slot 1 directly (spec.md §4.7 fork's counterpart
/// for a cold boot). The one thing this kernel still has to take on
/// faith from the (out-of-scope) bootstrap/image builder is the path of
/// whatever gets run first; everything downstream of that path string —
/// loading it, mapping its segments, handing it the CPU — is the
/// ordinary C7 `execve` every other task already uses.
pub fn bootstrap_init_task(init_path: &[u8], root: inode::InodeRef) -> KResult<()> {
    let (slot, pid) = table::alloc_slot()?;
    assert_eq!(pid, 1, "bootstrap_init_task must run before any other task exists");
    let base = slot * TASK_SIZE;

    let pa = frame::alloc_frame();
    if pa == 0 {
        table::with_mut(slot, |t| *t = Task::empty());
        return Err(Error::NoMem);
    }

    let path_len = init_path.len().min(BOOT_ARGV_OFF - BOOT_PATH_OFF - 1);
    // SAFETY: `pa` was just allocated and is not yet mapped anywhere, so
    // nothing else can observe it mid-write.
    unsafe {
        let page = phys::as_mut_slice(pa, PAGE_SIZE);
        page[BOOT_PATH_OFF..BOOT_PATH_OFF + path_len].copy_from_slice(&init_path[..path_len]);
        page[BOOT_PATH_OFF + path_len] = 0;
        page[BOOT_ARGV_OFF..BOOT_ARGV_OFF + 4].copy_from_slice(&(BOOT_PATH_OFF as u32).to_le_bytes());
        page[BOOT_ARGV_OFF + 4..BOOT_ARGV_OFF + 8].copy_from_slice(&0u32.to_le_bytes());
        page[BOOT_ENVP_OFF..BOOT_ENVP_OFF + 4].copy_from_slice(&0u32.to_le_bytes());
    }
    if vm::map_frame(pa, base) == 0 {
        frame::free_frame(pa);
        table::with_mut(slot, |t| *t = Task::empty());
        return Err(Error::NoMem);
    }

    inode::with_mut(root, |n| n.count += 2);
    table::with_mut(slot, |t| {
        t.pgrp = 1;
        t.session = 1;
        t.is_session_leader = true;
        t.base = base;
        t.counter = t.priority;
        t.cwd = Some(root);
        t.root = Some(root);
        t.name = *b"init\0\0\0\0\0\0\0\0\0\0\0\0";
        t.state = Procstate::Uninterruptible;
    });

    let top = kstack_top(slot);
    table::with_mut(slot, |t| {
        t.kstack_top = top as usize;
        // SAFETY: `top` is slot 1's private stack, untouched by anyone
        // else since `alloc_slot` just claimed the slot.
        t.ctx = unsafe { Context::new_task(top, init_entry as usize as u32) };
    });

    table::set_state(slot, Procstate::Running);
    Ok(())
}

/// Entry point for task 1 only: turn the path `bootstrap_init_task`
/// staged at the foot of its address space into a running image via the
/// same `execve` every other task uses. There is no syscall return to
/// resume afterwards, so a failure here is fatal to the whole kernel
/// rather than just this task — `exit` would just leave nothing left to
/// ever schedule.
extern "C" fn init_entry() -> ! {
    pop_off();
    let me = table::current_id();
    let mut tf = TrapFrame::new();
    match crate::exec::execve(BOOT_PATH_OFF, BOOT_ARGV_OFF, BOOT_ENVP_OFF, &mut tf) {
        Ok(()) => {
            table::with_mut(me, |t| t.trapframe = tf);
            deliver_signals(me);
            let tf: *const TrapFrame = table::with(me, |t| &t.trapframe as *const TrapFrame);
            // SAFETY: `tf` points into this task's own table slot, which
            // nothing else touches while this task is RUNNING.
            unsafe { x86::enter_user_mode(tf) }
        }
        Err(e) => panic!("bootstrap_init_task: failed to load init image: {:?}", e),
    }
}

/// Build the artificial user-stack frame spec.md §4.7 describes: "the
/// handler-return trampoline address, the signal number, optionally the
/// old blocked mask, saved eax/ecx/edx, the original eflags, and the
/// original user PC", then redirect `eip` to the handler and OR its
/// `sa_mask` into `blocked`.
fn push_signal_frame(id: TaskId, sig: Signal, handler: usize, action: &crate::proc::signal::SigAction) {
    // The handler-return trampoline is installed by the (out-of-scope)
    // boot trampoline's user-mode runtime, at a fixed, well-known
    // address every task's address space maps the same way.
    const TRAMPOLINE: u32 = 0xffff_fffc;

    let mut tf = table::with(id, |t| t.trapframe);
    let old_blocked = table::with(id, |t| t.signals.blocked);

    let mut sp = tf.user_esp;
    {
        let mut push = |val: u32| {
            sp -= 4;
            let _ = vm::copy_out(sp as usize, &val.to_le_bytes());
        };
        push(tf.eip);
        push(tf.eflags);
        push(tf.edx);
        push(tf.ecx);
        push(tf.eax);
        if !action.flags.contains(SaFlags::SA_NOMASK) {
            push(old_blocked);
        }
        push(sig as u8 as u32);
        push(TRAMPOLINE);
    }

    tf.user_esp = sp;
    tf.eip = handler as u32;

    table::with_mut(id, |t| {
        t.trapframe = tf;
        if !action.flags.contains(SaFlags::SA_NOMASK) {
            t.signals.blocked |= action.mask;
        }
    });
}
