//! The task: spec.md §3's central data structure. One slot in the fixed
//! `NR_TASKS`-entry table (`proc::table`) per live task.

use crate::arch::x86::{Context, TrapFrame};
use crate::fs::inode::InodeRef;
use crate::param::NR_OPEN;
use crate::proc::signal::SignalState;

pub type Pid = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Procstate {
    /// The slot holds no live task.
    Unused,
    Running,
    Interruptible,
    Uninterruptible,
    Stopped,
    Zombie,
}

impl Default for Procstate {
    fn default() -> Self {
        Procstate::Unused
    }
}

/// Real/effective/saved credentials (spec.md §3: "credentials").
#[derive(Clone, Copy, Debug, Default)]
pub struct Credentials {
    pub ruid: u16,
    pub euid: u16,
    pub suid: u16,
    pub rgid: u16,
    pub egid: u16,
    pub sgid: u16,
}

impl Credentials {
    pub fn is_super(&self) -> bool {
        self.euid == 0
    }
}

/// A wait-channel address: any stable pointer-sized value two sleepers
/// can agree identifies the same condition. The scheduler only ever
/// compares these for equality; it never dereferences them.
pub type Channel = usize;

#[derive(Clone, Copy)]
pub struct Task {
    pub state: Procstate,
    pub pid: Pid,
    pub ppid: Pid,
    pub pgrp: Pid,
    pub session: Pid,
    pub is_session_leader: bool,
    pub tty: Option<usize>,
    pub cred: Credentials,
    pub umask: u16,

    pub cwd: Option<InodeRef>,
    pub root: Option<InodeRef>,
    pub executable: Option<InodeRef>,

    /// Index into the system file table per fd slot, or `None`.
    pub fds: [Option<usize>; NR_OPEN],
    pub close_on_exec: u32,

    pub signals: SignalState,
    pub alarm_deadline: Option<u64>,

    pub counter: i32,
    pub priority: i32,

    pub utime: u64,
    pub stime: u64,
    pub cutime: u64,
    pub cstime: u64,
    pub start_time: u64,

    pub channel: Option<Channel>,

    pub trapframe: TrapFrame,
    /// Kernel-mode callee-saved registers and stack pointer, restored by
    /// `proc::sched::schedule`'s context switch. Unused while the idle
    /// task's own context is live.
    pub ctx: Context,
    /// Physical address of the top of this task's private kernel stack
    /// (spec.md §9 Design Notes; allocation itself is out of scope, but
    /// `fork` needs somewhere to prime a fresh `Context`).
    pub kstack_top: usize,

    /// This task's linear-address window: `slot_index * TASK_SIZE`. All
    /// tasks share one page directory (spec.md §4.7: fork "invokes
    /// C2.copy_range for code and data segments, both set to the same
    /// 64 MiB base offset derived from slot index"); isolation comes from
    /// each task's code/data segment descriptors being based here, not
    /// from a per-task `cr3`.
    pub base: usize,

    pub brk: usize,
    pub start_code: usize,
    pub end_code: usize,
    pub end_data: usize,

    pub exit_code: i32,

    pub name: [u8; 16],
}

impl Task {
    pub const fn empty() -> Self {
        Self {
            state: Procstate::Unused,
            pid: 0,
            ppid: 0,
            pgrp: 0,
            session: 0,
            is_session_leader: false,
            tty: None,
            cred: Credentials {
                ruid: 0,
                euid: 0,
                suid: 0,
                rgid: 0,
                egid: 0,
                sgid: 0,
            },
            umask: 0o022,
            cwd: None,
            root: None,
            executable: None,
            fds: [None; NR_OPEN],
            close_on_exec: 0,
            signals: SignalState::new(),
            alarm_deadline: None,
            counter: 0,
            priority: 15,
            utime: 0,
            stime: 0,
            cutime: 0,
            cstime: 0,
            start_time: 0,
            channel: None,
            trapframe: TrapFrame::new(),
            ctx: Context::new(),
            kstack_top: 0,
            base: 0,
            brk: 0,
            start_code: 0,
            end_code: 0,
            end_data: 0,
            exit_code: 0,
            name: [0; 16],
        }
    }

    pub fn is_runnable(&self) -> bool {
        self.state == Procstate::Running
    }
}
