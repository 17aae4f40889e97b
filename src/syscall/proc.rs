//! Process, credential, and signal syscalls (spec.md §4.7, §6).

use crate::arch::x86::TrapFrame;
use crate::errno::{Error, KResult};
use crate::mm::vm;
use crate::param::HZ;
use crate::proc::lifecycle;
use crate::proc::sched;
use crate::proc::signal::{Disposition, SaFlags, Signal, SigAction};
use crate::proc::table;
use crate::proc::task::Procstate;

use super::{argint, arguint, user_addr};

pub fn sys_fork(_tf: &mut TrapFrame) -> KResult<isize> {
    lifecycle::fork().map(|pid| pid as isize)
}

pub fn sys_execve(tf: &mut TrapFrame) -> KResult<isize> {
    let path = arguint(tf, 0) as usize;
    let argv = arguint(tf, 1) as usize;
    let envp = arguint(tf, 2) as usize;
    crate::exec::execve(path, argv, envp, tf)?;
    // A successful execve never "returns" in the caller's sense; the new
    // image starts at its entry point with a zeroed register file.
    Ok(0)
}

pub fn sys_exit(tf: &mut TrapFrame) -> KResult<isize> {
    let code = argint(tf, 0);
    lifecycle::exit(code);
}

pub fn sys_waitpid(tf: &mut TrapFrame) -> KResult<isize> {
    let pid = argint(tf, 0);
    let status_addr = arguint(tf, 1);
    let options = arguint(tf, 2);
    let (child_pid, status) = lifecycle::waitpid(pid, options)?;
    if status_addr != 0 {
        vm::copy_out(user_addr(status_addr), &status.to_le_bytes())?;
    }
    Ok(child_pid as isize)
}

pub fn sys_getpid(_tf: &mut TrapFrame) -> KResult<isize> {
    Ok(table::with_current(|t| t.pid) as isize)
}

pub fn sys_getppid(_tf: &mut TrapFrame) -> KResult<isize> {
    Ok(table::with_current(|t| t.ppid) as isize)
}

pub fn sys_getuid(_tf: &mut TrapFrame) -> KResult<isize> {
    Ok(table::with_current(|t| t.cred.ruid) as isize)
}

pub fn sys_geteuid(_tf: &mut TrapFrame) -> KResult<isize> {
    Ok(table::with_current(|t| t.cred.euid) as isize)
}

pub fn sys_getgid(_tf: &mut TrapFrame) -> KResult<isize> {
    Ok(table::with_current(|t| t.cred.rgid) as isize)
}

pub fn sys_getegid(_tf: &mut TrapFrame) -> KResult<isize> {
    Ok(table::with_current(|t| t.cred.egid) as isize)
}

/// Only a superuser task may set its credentials to an arbitrary id;
/// anyone may set them back to their own real/saved id (spec.md §4.7
/// "classic `setuid`/`setgid` semantics").
pub fn sys_setuid(tf: &mut TrapFrame) -> KResult<isize> {
    let uid = arguint(tf, 0) as u16;
    table::with_current_mut(|t| {
        if t.cred.is_super() {
            t.cred.ruid = uid;
            t.cred.euid = uid;
            t.cred.suid = uid;
            Ok(0)
        } else if uid == t.cred.ruid || uid == t.cred.suid {
            t.cred.euid = uid;
            Ok(0)
        } else {
            Err(Error::Perm)
        }
    })
}

pub fn sys_setgid(tf: &mut TrapFrame) -> KResult<isize> {
    let gid = arguint(tf, 0) as u16;
    table::with_current_mut(|t| {
        if t.cred.is_super() {
            t.cred.rgid = gid;
            t.cred.egid = gid;
            t.cred.sgid = gid;
            Ok(0)
        } else if gid == t.cred.rgid || gid == t.cred.sgid {
            t.cred.egid = gid;
            Ok(0)
        } else {
            Err(Error::Perm)
        }
    })
}

pub fn sys_setreuid(tf: &mut TrapFrame) -> KResult<isize> {
    let ruid = argint(tf, 0);
    let euid = argint(tf, 1);
    table::with_current_mut(|t| {
        if !t.cred.is_super() {
            if ruid >= 0 && ruid as u16 != t.cred.ruid && ruid as u16 != t.cred.euid {
                return Err(Error::Perm);
            }
            if euid >= 0 && euid as u16 != t.cred.ruid && euid as u16 != t.cred.euid {
                return Err(Error::Perm);
            }
        }
        if ruid >= 0 {
            t.cred.ruid = ruid as u16;
        }
        if euid >= 0 {
            t.cred.euid = euid as u16;
        }
        Ok(0)
    })
}

pub fn sys_setregid(tf: &mut TrapFrame) -> KResult<isize> {
    let rgid = argint(tf, 0);
    let egid = argint(tf, 1);
    table::with_current_mut(|t| {
        if !t.cred.is_super() {
            if rgid >= 0 && rgid as u16 != t.cred.rgid && rgid as u16 != t.cred.egid {
                return Err(Error::Perm);
            }
            if egid >= 0 && egid as u16 != t.cred.rgid && egid as u16 != t.cred.egid {
                return Err(Error::Perm);
            }
        }
        if rgid >= 0 {
            t.cred.rgid = rgid as u16;
        }
        if egid >= 0 {
            t.cred.egid = egid as u16;
        }
        Ok(0)
    })
}

/// spec.md §6: process groups are plain pid-valued fields, not a
/// separate table; `setpgid(0, 0)` makes the caller its own group
/// leader.
pub fn sys_setpgid(tf: &mut TrapFrame) -> KResult<isize> {
    let pid = argint(tf, 0);
    let pgid = argint(tf, 1);
    let me = table::current_id();
    let target = if pid == 0 {
        me
    } else {
        table::find_by_pid(pid as u32).ok_or(Error::Srch)?
    };
    let my_pid = table::with(me, |t| t.pid);
    let target_pid = table::with(target, |t| t.pid);
    let target_ppid = table::with(target, |t| t.ppid);
    if target != me && target_ppid != my_pid {
        return Err(Error::Srch);
    }
    table::with_mut(target, |t| {
        t.pgrp = if pgid == 0 { target_pid } else { pgid as u32 };
    });
    Ok(0)
}

pub fn sys_getpgrp(_tf: &mut TrapFrame) -> KResult<isize> {
    Ok(table::with_current(|t| t.pgrp) as isize)
}

/// spec.md §6: "a new session and process group, both equal to its own
/// pid, provided it is not already a group leader". Also detaches the
/// controlling tty.
pub fn sys_setsid(_tf: &mut TrapFrame) -> KResult<isize> {
    table::with_current_mut(|t| {
        if t.pgrp == t.pid {
            return Err(Error::Perm);
        }
        t.pgrp = t.pid;
        t.session = t.pid;
        t.is_session_leader = true;
        t.tty = None;
        Ok(t.pid as isize)
    })
}

/// spec.md §4.7 `brk`: move the break. Growth needs nothing further —
/// any page between `end_data` and the new `brk` is zero-filled on
/// first touch by `do_no_page` exactly like the rest of the heap.
/// Shrinking does not reclaim pages already mapped below the old break;
/// they stay resident until the task exits or execs.
pub fn sys_brk(tf: &mut TrapFrame) -> KResult<isize> {
    let requested = arguint(tf, 0) as usize;
    table::with_current_mut(|t| {
        if requested < t.end_data || requested > crate::param::TASK_SIZE {
            return Err(Error::NoMem);
        }
        t.brk = requested;
        Ok(t.brk as isize)
    })
}

/// spec.md §6: priority nudge in `[-20, 20]`, clamped and folded into
/// `counter`/`priority` the same way `fork` seeds them.
pub fn sys_nice(tf: &mut TrapFrame) -> KResult<isize> {
    let inc = argint(tf, 0);
    table::with_current_mut(|t| {
        let next = (t.priority - inc).clamp(1, 35);
        t.priority = next;
        Ok(0)
    })
}

/// spec.md §6 `alarm`: reschedule (or cancel, for 0) this task's
/// `SIGALRM` deadline, returning the number of seconds left on any
/// previous one.
pub fn sys_alarm(tf: &mut TrapFrame) -> KResult<isize> {
    let secs = arguint(tf, 0) as u64;
    let now = sched::ticks();
    table::with_current_mut(|t| {
        let remaining = match t.alarm_deadline {
            Some(d) if d > now => (d - now) / HZ,
            _ => 0,
        };
        t.alarm_deadline = if secs == 0 { None } else { Some(now + secs * HZ) };
        Ok(remaining as isize)
    })
}

/// spec.md §6 `pause`: sleep until any signal is deliverable, always
/// returning `EINTR`.
pub fn sys_pause(_tf: &mut TrapFrame) -> KResult<isize> {
    let me = table::current_id();
    loop {
        if table::has_deliverable_signal(me) {
            return Err(Error::Intr);
        }
        table::set_state(me, Procstate::Interruptible);
        sched::schedule();
    }
}

fn target_tasks(pid: i32, my_pid: u32, my_pgrp: u32) -> arrayvec::ArrayVec<usize, { crate::param::NR_TASKS }> {
    let mut v = arrayvec::ArrayVec::new();
    table::for_each(|id, t| {
        if t.state == Procstate::Unused {
            return;
        }
        let matches = match pid {
            p if p > 0 => t.pid == p as u32,
            0 => t.pgrp == my_pgrp,
            -1 => t.pid != my_pid,
            p => t.pgrp == (-p) as u32,
        };
        if matches {
            let _ = v.try_push(id);
        }
    });
    v
}

/// spec.md §4.7 `kill`: a sender may signal any task sharing its real or
/// effective uid, or anything if it is root.
pub fn sys_kill(tf: &mut TrapFrame) -> KResult<isize> {
    let pid = argint(tf, 0);
    let num = arguint(tf, 1);
    let sig = Signal::from_number(num as u8).ok_or(Error::Inval)?;
    let (my_pid, my_pgrp, my_ruid, my_euid, is_super) =
        table::with_current(|t| (t.pid, t.pgrp, t.cred.ruid, t.cred.euid, t.cred.is_super()));

    let mut delivered = 0;
    for id in target_tasks(pid, my_pid, my_pgrp) {
        let (target_ruid, target_suid) = table::with(id, |t| (t.cred.ruid, t.cred.suid));
        if !is_super && my_ruid != target_ruid && my_euid != target_ruid && my_euid != target_suid {
            continue;
        }
        table::with_mut(id, |t| t.signals.raise(sig));
        delivered += 1;
    }
    if delivered == 0 {
        return Err(Error::Srch);
    }
    Ok(0)
}

/// spec.md §6 legacy `signal()`: install a handler/ignore/default
/// disposition with the historical one-shot, auto-reentrant semantics,
/// returning the previous handler address (or 0/1 for default/ignore).
pub fn sys_signal(tf: &mut TrapFrame) -> KResult<isize> {
    let num = arguint(tf, 0);
    let handler = arguint(tf, 1);
    let sig = Signal::from_number(num as u8).ok_or(Error::Inval)?;
    if sig.mask() & crate::proc::signal::UNBLOCKABLE != 0 {
        return Err(Error::Inval);
    }
    table::with_current_mut(|t| {
        let idx = num as usize - 1;
        let prev = encode_disposition(t.signals.actions[idx].disposition);
        let disposition = match handler {
            0 => Disposition::Default,
            1 => Disposition::Ignore,
            addr => Disposition::Handler(user_addr(addr)),
        };
        t.signals.actions[idx] = SigAction { disposition, mask: 0, flags: SaFlags::SA_NOMASK | SaFlags::SA_ONESHOT };
        Ok(prev as isize)
    })
}

fn encode_disposition(d: Disposition) -> u32 {
    match d {
        Disposition::Default => 0,
        Disposition::Ignore => 1,
        Disposition::Handler(addr) => addr as u32,
    }
}

/// POSIX-shaped `struct sigaction`: `u32 handler; u32 mask; u32 flags;`
/// (12 bytes), the same hand-rolled fixed-offset marshaling
/// `fs::superblock`/`aout` use for other on-the-wire records.
fn decode_sigaction(bytes: &[u8; 12]) -> SigAction {
    let handler = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let mask = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let flags = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let disposition = match handler {
        0 => Disposition::Default,
        1 => Disposition::Ignore,
        addr => Disposition::Handler(user_addr(addr)),
    };
    SigAction { disposition, mask, flags: SaFlags::from_bits_truncate(flags) }
}

fn encode_sigaction(action: SigAction) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[0..4].copy_from_slice(&encode_disposition(action.disposition).to_le_bytes());
    out[4..8].copy_from_slice(&action.mask.to_le_bytes());
    out[8..12].copy_from_slice(&action.flags.bits().to_le_bytes());
    out
}

pub fn sys_sigaction(tf: &mut TrapFrame) -> KResult<isize> {
    let num = arguint(tf, 0);
    let new_addr = arguint(tf, 1);
    let old_addr = arguint(tf, 2);
    let sig = Signal::from_number(num as u8).ok_or(Error::Inval)?;
    if sig.mask() & crate::proc::signal::UNBLOCKABLE != 0 {
        return Err(Error::Inval);
    }
    let idx = num as usize - 1;

    let old = table::with_current(|t| t.signals.actions[idx]);
    if new_addr != 0 {
        let mut bytes = [0u8; 12];
        vm::copy_in(user_addr(new_addr), &mut bytes)?;
        let action = decode_sigaction(&bytes);
        table::with_current_mut(|t| t.signals.actions[idx] = action);
    }
    if old_addr != 0 {
        vm::copy_out(user_addr(old_addr), &encode_sigaction(old))?;
    }
    Ok(0)
}

pub fn sys_sgetmask(_tf: &mut TrapFrame) -> KResult<isize> {
    Ok(table::with_current(|t| t.signals.blocked) as isize)
}

pub fn sys_ssetmask(tf: &mut TrapFrame) -> KResult<isize> {
    let new_mask = arguint(tf, 0);
    table::with_current_mut(|t| {
        let old = t.signals.blocked;
        t.signals.blocked = new_mask & !crate::proc::signal::UNBLOCKABLE;
        Ok(old as isize)
    })
}

/// System wall-clock time is `proc::sched::ticks()/HZ` plus whatever
/// offset the most recent `stime` installed; there being no
/// battery-backed RTC in scope (spec.md §1), boot always starts at 0.
use core::sync::atomic::{AtomicU64, Ordering};
static TIME_OFFSET: AtomicU64 = AtomicU64::new(0);

fn wall_time() -> u64 {
    TIME_OFFSET.load(Ordering::Relaxed) + sched::ticks() / HZ
}

pub fn sys_time(tf: &mut TrapFrame) -> KResult<isize> {
    let addr = arguint(tf, 0);
    let now = wall_time();
    if addr != 0 {
        vm::copy_out(user_addr(addr), &(now as u32).to_le_bytes())?;
    }
    Ok(now as isize)
}

pub fn sys_stime(tf: &mut TrapFrame) -> KResult<isize> {
    if !table::with_current(|t| t.cred.is_super()) {
        return Err(Error::Perm);
    }
    let addr = arguint(tf, 0);
    let mut bytes = [0u8; 4];
    vm::copy_in(user_addr(addr), &mut bytes)?;
    let new_time = u32::from_le_bytes(bytes) as u64;
    TIME_OFFSET.store(new_time.saturating_sub(sched::ticks() / HZ), Ordering::Relaxed);
    Ok(0)
}

/// `struct tms { utime, stime, cutime, cstime }`, four `u32` tick
/// counts, the same shape every Unix since v7 returns.
pub fn sys_times(tf: &mut TrapFrame) -> KResult<isize> {
    let addr = arguint(tf, 0);
    let (utime, stime, cutime, cstime) = table::with_current(|t| (t.utime, t.stime, t.cutime, t.cstime));
    if addr != 0 {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&(utime as u32).to_le_bytes());
        out[4..8].copy_from_slice(&(stime as u32).to_le_bytes());
        out[8..12].copy_from_slice(&(cutime as u32).to_le_bytes());
        out[12..16].copy_from_slice(&(cstime as u32).to_le_bytes());
        vm::copy_out(user_addr(addr), &out)?;
    }
    Ok(sched::ticks() as isize)
}

const UTSNAME_FIELD: usize = 9;

/// `struct utsname`: five 9-byte fixed fields, the original (pre-POSIX)
/// layout this kernel's a.out-era userland expects (spec.md §6
/// "legacy-shaped syscalls").
pub fn sys_uname(tf: &mut TrapFrame) -> KResult<isize> {
    let addr = user_addr(arguint(tf, 0));
    let fields: [&[u8]; 5] = [b"minix", b"localhost", b"1", b"1", b"i386"];
    for (i, field) in fields.iter().enumerate() {
        let mut buf = [0u8; UTSNAME_FIELD];
        let n = field.len().min(UTSNAME_FIELD - 1);
        buf[..n].copy_from_slice(&field[..n]);
        vm::copy_out(addr + i * UTSNAME_FIELD, &buf)?;
    }
    Ok(0)
}

