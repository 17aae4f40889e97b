//! C9: the syscall dispatch table (spec.md §4.6 overview, §6 "Syscall
//! surface"). Thin bodies over C2-C8; argument fetching is the only
//! thing this layer does for itself.
//!
//! The (out-of-scope) trap stub that lands here on `int 0x80` leaves the
//! syscall number in `eax` and up to six arguments in `ebx`, `ecx`,
//! `edx`, `esi`, `edi`, `ebp` — the same register convention the
//! teacher's RISC-V build reads out of `a0..a5`, just with x86's
//! register file standing in for it.

mod file;
mod proc;

pub use file::*;
pub use proc::*;

use crate::arch::x86::TrapFrame;
use crate::errno::{Error, KResult};
use crate::mm::vm;
use crate::param::MAXPATH;
use crate::proc::table;

/// Translate a user-supplied offset into this task's segment into the
/// flat linear address the kernel's page tables actually map (spec.md
/// §4.7: every task's isolation comes from its segment descriptors'
/// base, `task.base`, not from a private page directory).
fn user_addr(offset: u32) -> usize {
    table::with_current(|t| t.base) + offset as usize
}

fn argraw(tf: &TrapFrame, n: usize) -> u32 {
    match n {
        0 => tf.ebx,
        1 => tf.ecx,
        2 => tf.edx,
        3 => tf.esi,
        4 => tf.edi,
        5 => tf.ebp,
        _ => panic!("argraw: syscall argument index out of range"),
    }
}

fn argint(tf: &TrapFrame, n: usize) -> i32 {
    argraw(tf, n) as i32
}

fn arguint(tf: &TrapFrame, n: usize) -> u32 {
    argraw(tf, n)
}

/// Fetch the nth argument as a user address, already rebased onto this
/// task's linear window.
fn argaddr(tf: &TrapFrame, n: usize) -> usize {
    user_addr(argraw(tf, n))
}

/// Fetch the nth argument as a NUL-terminated path string.
fn argpath(tf: &TrapFrame, n: usize, buf: &mut [u8; MAXPATH]) -> KResult<usize> {
    vm::copy_in_cstr(argaddr(tf, n), buf)
}

pub const NR_SYSCALLS: usize = 64;

/// spec.md §6's selection, assigned sequential numbers (there being no
/// binary-compatible libc to match — the bootstrap/image builder and the
/// trampoline that issues `int 0x80` are both out of scope per spec.md
/// §1).
pub mod nr {
    pub const EXIT: u32 = 1;
    pub const FORK: u32 = 2;
    pub const READ: u32 = 3;
    pub const WRITE: u32 = 4;
    pub const OPEN: u32 = 5;
    pub const CLOSE: u32 = 6;
    pub const WAITPID: u32 = 7;
    pub const CREAT: u32 = 8;
    pub const LINK: u32 = 9;
    pub const UNLINK: u32 = 10;
    pub const EXECVE: u32 = 11;
    pub const CHDIR: u32 = 12;
    pub const TIME: u32 = 13;
    pub const MKNOD: u32 = 14;
    pub const CHMOD: u32 = 15;
    pub const CHOWN: u32 = 16;
    pub const LSEEK: u32 = 19;
    pub const GETPID: u32 = 20;
    pub const MOUNT: u32 = 21;
    pub const UMOUNT: u32 = 22;
    pub const SETUID: u32 = 23;
    pub const GETUID: u32 = 24;
    pub const STIME: u32 = 25;
    pub const ALARM: u32 = 27;
    pub const FSTAT: u32 = 28;
    pub const PAUSE: u32 = 29;
    pub const UTIME: u32 = 30;
    pub const ACCESS: u32 = 33;
    pub const NICE: u32 = 34;
    pub const KILL: u32 = 37;
    pub const RENAME: u32 = 38;
    pub const MKDIR: u32 = 39;
    pub const RMDIR: u32 = 40;
    pub const DUP: u32 = 41;
    pub const TIMES: u32 = 43;
    pub const BRK: u32 = 45;
    pub const SETGID: u32 = 46;
    pub const GETGID: u32 = 47;
    pub const SIGNAL: u32 = 48;
    pub const GETEUID: u32 = 49;
    pub const GETEGID: u32 = 50;
    pub const UMASK: u32 = 60;
    pub const CHROOT: u32 = 61;
    pub const IOCTL: u32 = 54;
    pub const FCNTL: u32 = 55;
    pub const SETPGID: u32 = 57;
    pub const UNAME: u32 = 59;
    pub const DUP2: u32 = 63;
    pub const GETPPID: u32 = 64;
    pub const GETPGRP: u32 = 65;
    pub const SETSID: u32 = 66;
    pub const SIGACTION: u32 = 67;
    pub const SGETMASK: u32 = 68;
    pub const SSETMASK: u32 = 69;
    pub const SETREUID: u32 = 70;
    pub const SETREGID: u32 = 71;
    pub const PIPE: u32 = 42;
}

/// Entry point from the trap handler (spec.md §4.6 data flow: "user
/// syscall -> C9 dispatch -> ..."). Writes the result into `tf.eax`
/// exactly the way the original int-0x80 ABI does, negative errno on
/// failure.
pub fn dispatch(tf: &mut TrapFrame) {
    let num = tf.eax;
    let ret = run(num, tf);
    tf.eax = match ret {
        Ok(v) => v as u32,
        Err(e) => e.to_retval() as u32,
    };
}

fn run(num: u32, tf: &mut TrapFrame) -> KResult<isize> {
    use nr::*;
    match num {
        EXIT => sys_exit(tf),
        FORK => sys_fork(tf),
        READ => sys_read(tf),
        WRITE => sys_write(tf),
        OPEN => sys_open(tf),
        CLOSE => sys_close(tf),
        WAITPID => sys_waitpid(tf),
        CREAT => sys_creat(tf),
        LINK => sys_link(tf),
        UNLINK => sys_unlink(tf),
        EXECVE => sys_execve(tf),
        CHDIR => sys_chdir(tf),
        TIME => sys_time(tf),
        MKNOD => sys_mknod(tf),
        CHMOD => sys_chmod(tf),
        CHOWN => sys_chown(tf),
        LSEEK => sys_lseek(tf),
        GETPID => sys_getpid(tf),
        MOUNT => sys_mount(tf),
        UMOUNT => sys_umount(tf),
        SETUID => sys_setuid(tf),
        GETUID => sys_getuid(tf),
        STIME => sys_stime(tf),
        ALARM => sys_alarm(tf),
        FSTAT => sys_fstat(tf),
        PAUSE => sys_pause(tf),
        UTIME => sys_utime(tf),
        ACCESS => sys_access(tf),
        NICE => sys_nice(tf),
        KILL => sys_kill(tf),
        RENAME => Err(Error::NoSys),
        MKDIR => sys_mkdir(tf),
        RMDIR => sys_rmdir(tf),
        DUP => sys_dup(tf),
        TIMES => sys_times(tf),
        BRK => sys_brk(tf),
        SETGID => sys_setgid(tf),
        GETGID => sys_getgid(tf),
        SIGNAL => sys_signal(tf),
        GETEUID => sys_geteuid(tf),
        GETEGID => sys_getegid(tf),
        UMASK => sys_umask(tf),
        CHROOT => sys_chroot(tf),
        IOCTL => sys_ioctl(tf),
        FCNTL => sys_fcntl(tf),
        SETPGID => sys_setpgid(tf),
        UNAME => sys_uname(tf),
        DUP2 => sys_dup2(tf),
        GETPPID => sys_getppid(tf),
        GETPGRP => sys_getpgrp(tf),
        SETSID => sys_setsid(tf),
        SIGACTION => sys_sigaction(tf),
        SGETMASK => sys_sgetmask(tf),
        SSETMASK => sys_ssetmask(tf),
        SETREUID => sys_setreuid(tf),
        SETREGID => sys_setregid(tf),
        PIPE => sys_pipe(tf),
        _ => Err(Error::NoSys),
    }
}
