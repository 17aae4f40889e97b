//! Filesystem and file-descriptor syscalls (spec.md §4.5, §6).

use crate::arch::x86::TrapFrame;
use crate::errno::{Error, KResult};
use crate::file::{self, Access, FileRef, Kind, OpenFlags};
use crate::fs::inode::{self, Mode};
use crate::fs::{ops, path, pipe};
use crate::param::{MAXPATH, NR_OPEN};
use crate::proc::table;
use crate::tty;

use super::{argaddr, argint, argpath, arguint};

/// Install `fr` at the lowest free fd in the current task, honoring
/// `starting_at` for `fcntl(F_DUPFD)`/`dup2`-style callers.
fn fd_alloc_from(fr: FileRef, starting_at: usize) -> KResult<i32> {
    table::with_current_mut(|t| {
        let slot = (starting_at..NR_OPEN).find(|&i| t.fds[i].is_none()).ok_or(Error::MFile)?;
        t.fds[slot] = Some(fr.0);
        t.close_on_exec &= !(1 << slot);
        Ok(slot as i32)
    })
}

fn fd_alloc(fr: FileRef) -> KResult<i32> {
    fd_alloc_from(fr, 0)
}

fn fd_lookup(fd: i32) -> KResult<FileRef> {
    if fd < 0 || fd as usize >= NR_OPEN {
        return Err(Error::BadF);
    }
    table::with_current(|t| t.fds[fd as usize]).map(FileRef).ok_or(Error::BadF)
}

fn cwd_root() -> (inode::InodeRef, inode::InodeRef) {
    table::with_current(|t| (t.cwd.unwrap(), t.root.unwrap()))
}

fn creds() -> (u16, u16, u16, u16) {
    table::with_current(|t| (t.cred.ruid, t.cred.euid, t.cred.rgid, t.cred.egid))
}

fn access_mode_for(oflag: u32) -> Access {
    match oflag & 0x3 {
        1 => Access::WriteOnly,
        2 => Access::ReadWrite,
        _ => Access::ReadOnly,
    }
}

pub fn sys_open(tf: &mut TrapFrame) -> KResult<isize> {
    let mut buf = [0u8; MAXPATH];
    let n = argpath(tf, 0, &mut buf)?;
    let oflag = arguint(tf, 1);
    let mode = arguint(tf, 2) as u16;
    let flags = OpenFlags::from_bits_truncate(oflag & !0x3);
    let (cwd, root) = cwd_root();
    let (_, euid, _, egid) = creds();
    let umask = table::with_current(|t| t.umask);
    let ir = ops::open_namei(&buf[..n], flags, mode, cwd, root, umask, euid, egid)?;
    let access = access_mode_for(oflag);
    let fr = file::alloc(Kind::Inode(ir), access, flags)?;
    fd_alloc(fr).map(|fd| fd as isize)
}

pub fn sys_creat(tf: &mut TrapFrame) -> KResult<isize> {
    let mut buf = [0u8; MAXPATH];
    let n = argpath(tf, 0, &mut buf)?;
    let mode = arguint(tf, 1) as u16;
    let (cwd, root) = cwd_root();
    let (_, euid, _, egid) = creds();
    let umask = table::with_current(|t| t.umask);
    let flags = OpenFlags::CREAT | OpenFlags::TRUNC;
    let ir = ops::open_namei(&buf[..n], flags, mode, cwd, root, umask, euid, egid)?;
    let fr = file::alloc(Kind::Inode(ir), Access::WriteOnly, flags)?;
    fd_alloc(fr).map(|fd| fd as isize)
}

pub fn sys_close(tf: &mut TrapFrame) -> KResult<isize> {
    let fd = argint(tf, 0);
    let fr = fd_lookup(fd)?;
    table::with_current_mut(|t| t.fds[fd as usize] = None);
    file::close(fr);
    Ok(0)
}

pub fn sys_read(tf: &mut TrapFrame) -> KResult<isize> {
    let fd = argint(tf, 0);
    let addr = argaddr(tf, 1);
    let count = arguint(tf, 2) as usize;
    let fr = fd_lookup(fd)?;
    // Route tty fds through the line discipline rather than `fs::io`
    // (spec.md §4.8): a tty-backed inode carries the line number in its
    // first direct zone, the same place `mknod` stashes any device
    // number.
    if let Some(ir) = file::inode_of(fr) {
        if let Some(ch) = tty_channel(ir) {
            return read_via_tty(ch, addr, count);
        }
    }
    let mut kbuf = [0u8; 512];
    let mut done = 0usize;
    while done < count {
        let want = count - done;
        let chunk = want.min(kbuf.len());
        let n = file::read(fr, &mut kbuf[..chunk])?;
        if n == 0 {
            break;
        }
        crate::mm::vm::copy_out(addr + done, &kbuf[..n])?;
        done += n;
        if n < chunk {
            break;
        }
    }
    Ok(done as isize)
}

fn read_via_tty(ch: usize, addr: usize, count: usize) -> KResult<isize> {
    let mut kbuf = [0u8; 256];
    let chunk = count.min(kbuf.len());
    let n = tty::tty_read(ch, &mut kbuf[..chunk])?;
    crate::mm::vm::copy_out(addr, &kbuf[..n])?;
    Ok(n as isize)
}

pub fn sys_write(tf: &mut TrapFrame) -> KResult<isize> {
    let fd = argint(tf, 0);
    let addr = argaddr(tf, 1);
    let count = arguint(tf, 2) as usize;
    let fr = fd_lookup(fd)?;
    if let Some(ir) = file::inode_of(fr) {
        if let Some(ch) = tty_channel(ir) {
            return write_via_tty(ch, addr, count);
        }
    }
    let mut kbuf = [0u8; 512];
    let mut done = 0usize;
    while done < count {
        let want = count - done;
        let chunk = want.min(kbuf.len());
        crate::mm::vm::copy_in(addr + done, &mut kbuf[..chunk])?;
        let n = file::write(fr, &kbuf[..chunk])?;
        done += n;
        if n < chunk {
            break;
        }
    }
    Ok(done as isize)
}

fn write_via_tty(ch: usize, addr: usize, count: usize) -> KResult<isize> {
    let mut kbuf = [0u8; 256];
    let chunk = count.min(kbuf.len());
    crate::mm::vm::copy_in(addr, &mut kbuf[..chunk])?;
    let n = tty::tty_write(ch, &kbuf[..chunk])?;
    Ok(n as isize)
}

/// A character-special inode whose packed device number names one of
/// the `NR_TTY` line-discipline channels (major 4, spec.md §4.8), or
/// `None` for anything else.
fn tty_channel(ir: inode::InodeRef) -> Option<usize> {
    let (is_chr, dev) = inode::with(ir, |n| (n.mode.is_chr(), n.direct_zone(0)));
    if !is_chr {
        return None;
    }
    if crate::param::major(dev as u16) == 4 {
        Some(crate::param::minor(dev as u16) as usize)
    } else {
        None
    }
}

pub fn sys_lseek(tf: &mut TrapFrame) -> KResult<isize> {
    let fd = argint(tf, 0);
    let offset = argint(tf, 1);
    let whence = argint(tf, 2);
    let fr = fd_lookup(fd)?;
    let ir = file::inode_of(fr).ok_or(Error::BadF)?;
    let size = inode::with(ir, |n| n.size) as i32;
    let cur = file::pos(fr) as i32;
    let base = match whence {
        0 => 0,
        1 => cur,
        2 => size,
        _ => return Err(Error::Inval),
    };
    let new_pos = base.checked_add(offset).ok_or(Error::Inval)?;
    if new_pos < 0 {
        return Err(Error::Inval);
    }
    file::set_pos(fr, new_pos as u32);
    Ok(new_pos as isize)
}

pub fn sys_dup(tf: &mut TrapFrame) -> KResult<isize> {
    let fd = argint(tf, 0);
    let fr = fd_lookup(fd)?;
    fd_alloc(file::dup(fr)).map(|n| n as isize)
}

pub fn sys_dup2(tf: &mut TrapFrame) -> KResult<isize> {
    let oldfd = argint(tf, 0);
    let newfd = argint(tf, 1);
    if newfd < 0 || newfd as usize >= NR_OPEN {
        return Err(Error::BadF);
    }
    let old = fd_lookup(oldfd)?;
    if oldfd == newfd {
        return Ok(newfd as isize);
    }
    if let Some(existing) = table::with_current(|t| t.fds[newfd as usize]) {
        file::close(FileRef(existing));
    }
    let dup = file::dup(old);
    table::with_current_mut(|t| {
        t.fds[newfd as usize] = Some(dup.0);
        t.close_on_exec &= !(1 << newfd);
    });
    Ok(newfd as isize)
}

pub const F_DUPFD: i32 = 0;
pub const F_GETFD: i32 = 1;
pub const F_SETFD: i32 = 2;
pub const F_GETFL: i32 = 3;
pub const F_SETFL: i32 = 4;

pub fn sys_fcntl(tf: &mut TrapFrame) -> KResult<isize> {
    let fd = argint(tf, 0);
    let cmd = argint(tf, 1);
    let arg = argint(tf, 2);
    let fr = fd_lookup(fd)?;
    match cmd {
        F_DUPFD => fd_alloc_from(file::dup(fr), arg.max(0) as usize).map(|n| n as isize),
        F_GETFD => Ok(table::with_current(|t| (t.close_on_exec >> fd) & 1) as isize),
        F_SETFD => {
            table::with_current_mut(|t| {
                if arg & 1 != 0 {
                    t.close_on_exec |= 1 << fd;
                } else {
                    t.close_on_exec &= !(1 << fd);
                }
            });
            Ok(0)
        }
        F_GETFL => Ok(file::flags(fr).bits() as isize),
        F_SETFL => {
            file::set_flags(fr, crate::file::OpenFlags::from_bits_truncate(arg as u32));
            Ok(0)
        }
        _ => Err(Error::Inval),
    }
}

pub fn sys_pipe(tf: &mut TrapFrame) -> KResult<isize> {
    let addr = argaddr(tf, 0);
    let ir = pipe::create()?;
    inode::with_mut(ir, |n| n.count = 2);
    let rd = match file::alloc(Kind::PipeRead(ir), Access::ReadOnly, OpenFlags::empty()) {
        Ok(f) => f,
        Err(e) => {
            inode::iput(ir);
            return Err(e);
        }
    };
    let wr = match file::alloc(Kind::PipeWrite(ir), Access::WriteOnly, OpenFlags::empty()) {
        Ok(f) => f,
        Err(e) => {
            file::close(rd);
            return Err(e);
        }
    };
    let rfd = match fd_alloc(rd) {
        Ok(n) => n,
        Err(e) => {
            file::close(rd);
            file::close(wr);
            return Err(e);
        }
    };
    let wfd = match fd_alloc(wr) {
        Ok(n) => n,
        Err(e) => {
            table::with_current_mut(|t| t.fds[rfd as usize] = None);
            file::close(rd);
            file::close(wr);
            return Err(e);
        }
    };
    let pair = [rfd as u32, wfd as u32];
    crate::mm::vm::copy_out(addr, &pair[0].to_le_bytes())?;
    crate::mm::vm::copy_out(addr + 4, &pair[1].to_le_bytes())?;
    Ok(0)
}

pub fn sys_mknod(tf: &mut TrapFrame) -> KResult<isize> {
    let mut buf = [0u8; MAXPATH];
    let n = argpath(tf, 0, &mut buf)?;
    let mode = arguint(tf, 1) as u16;
    let dev = arguint(tf, 2) as u16;
    let (cwd, root) = cwd_root();
    let (_, euid, _, egid) = creds();
    let umask = table::with_current(|t| t.umask);
    ops::mknod(&buf[..n], Mode::from_bits_truncate(mode), dev, cwd, root, umask, euid, egid)?;
    Ok(0)
}

pub fn sys_mkdir(tf: &mut TrapFrame) -> KResult<isize> {
    let mut buf = [0u8; MAXPATH];
    let n = argpath(tf, 0, &mut buf)?;
    let mode = arguint(tf, 1) as u16;
    let (cwd, root) = cwd_root();
    let (_, euid, _, egid) = creds();
    let umask = table::with_current(|t| t.umask);
    ops::mkdir(&buf[..n], mode, cwd, root, umask, euid, egid)?;
    Ok(0)
}

pub fn sys_rmdir(tf: &mut TrapFrame) -> KResult<isize> {
    let mut buf = [0u8; MAXPATH];
    let n = argpath(tf, 0, &mut buf)?;
    let (cwd, root) = cwd_root();
    ops::rmdir(&buf[..n], cwd, root)?;
    Ok(0)
}

pub fn sys_unlink(tf: &mut TrapFrame) -> KResult<isize> {
    let mut buf = [0u8; MAXPATH];
    let n = argpath(tf, 0, &mut buf)?;
    let (cwd, root) = cwd_root();
    ops::unlink(&buf[..n], cwd, root)?;
    Ok(0)
}

pub fn sys_link(tf: &mut TrapFrame) -> KResult<isize> {
    let mut old = [0u8; MAXPATH];
    let mut new = [0u8; MAXPATH];
    let on = argpath(tf, 0, &mut old)?;
    let nn = argpath(tf, 1, &mut new)?;
    let (cwd, root) = cwd_root();
    ops::link(&old[..on], &new[..nn], cwd, root)?;
    Ok(0)
}

pub fn sys_chdir(tf: &mut TrapFrame) -> KResult<isize> {
    let mut buf = [0u8; MAXPATH];
    let n = argpath(tf, 0, &mut buf)?;
    let (cwd, root) = cwd_root();
    let new_cwd = ops::resolve_dir(&buf[..n], cwd, root)?;
    table::with_current_mut(|t| {
        if let Some(old) = t.cwd.replace(new_cwd) {
            inode::iput(old);
        }
    });
    Ok(0)
}

pub fn sys_chroot(tf: &mut TrapFrame) -> KResult<isize> {
    let mut buf = [0u8; MAXPATH];
    let n = argpath(tf, 0, &mut buf)?;
    let euid = creds().1;
    if euid != 0 {
        return Err(Error::Perm);
    }
    let (cwd, root) = cwd_root();
    let new_root = ops::resolve_dir(&buf[..n], cwd, root)?;
    table::with_current_mut(|t| {
        if let Some(old) = t.root.replace(new_root) {
            inode::iput(old);
        }
    });
    Ok(0)
}

pub fn sys_chmod(tf: &mut TrapFrame) -> KResult<isize> {
    let mut buf = [0u8; MAXPATH];
    let n = argpath(tf, 0, &mut buf)?;
    let mode = arguint(tf, 1) as u16;
    let (cwd, root) = cwd_root();
    let euid = creds().1;
    ops::chmod(&buf[..n], mode, cwd, root, euid)?;
    Ok(0)
}

pub fn sys_chown(tf: &mut TrapFrame) -> KResult<isize> {
    let mut buf = [0u8; MAXPATH];
    let n = argpath(tf, 0, &mut buf)?;
    let uid = arguint(tf, 1) as u16;
    let gid = arguint(tf, 2) as u16;
    let (cwd, root) = cwd_root();
    let euid = creds().1;
    ops::chown(&buf[..n], uid, gid, cwd, root, euid)?;
    Ok(0)
}

pub fn sys_access(tf: &mut TrapFrame) -> KResult<isize> {
    let mut buf = [0u8; MAXPATH];
    let n = argpath(tf, 0, &mut buf)?;
    let mode = arguint(tf, 1) as u8;
    let (cwd, root) = cwd_root();
    let (ruid, _, rgid, _) = creds();
    ops::access(&buf[..n], mode, cwd, root, ruid, rgid)?;
    Ok(0)
}

pub fn sys_utime(tf: &mut TrapFrame) -> KResult<isize> {
    let mut buf = [0u8; MAXPATH];
    let n = argpath(tf, 0, &mut buf)?;
    let times_addr = argaddr(tf, 1);
    let euid = creds().1;
    let (cwd, root) = cwd_root();
    let (atime, mtime) = if times_addr == table::with_current(|t| t.base) {
        let now = crate::proc::sched::ticks() as u32;
        (now, now)
    } else {
        let mut raw = [0u8; 8];
        crate::mm::vm::copy_in(times_addr, &mut raw)?;
        (
            u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        )
    };
    ops::utime(&buf[..n], atime, mtime, cwd, root, euid)?;
    Ok(0)
}

fn stat_out(addr: usize, st: crate::fs::stat::Stat) -> KResult<()> {
    let mut raw = [0u8; 36];
    raw[0..2].copy_from_slice(&st.dev.to_le_bytes());
    raw[2..6].copy_from_slice(&st.ino.to_le_bytes());
    raw[6..8].copy_from_slice(&st.mode.to_le_bytes());
    raw[8..10].copy_from_slice(&st.nlink.to_le_bytes());
    raw[10..12].copy_from_slice(&st.uid.to_le_bytes());
    raw[12..14].copy_from_slice(&st.gid.to_le_bytes());
    raw[14..16].copy_from_slice(&st.rdev.to_le_bytes());
    raw[16..20].copy_from_slice(&st.size.to_le_bytes());
    raw[20..24].copy_from_slice(&st.atime.to_le_bytes());
    raw[24..28].copy_from_slice(&st.mtime.to_le_bytes());
    raw[28..32].copy_from_slice(&st.ctime.to_le_bytes());
    crate::mm::vm::copy_out(addr, &raw[..32])
}

pub fn sys_fstat(tf: &mut TrapFrame) -> KResult<isize> {
    let fd = argint(tf, 0);
    let addr = argaddr(tf, 1);
    let fr = fd_lookup(fd)?;
    let st = file::stat(fr)?;
    stat_out(addr, st)?;
    Ok(0)
}

pub fn sys_mount(tf: &mut TrapFrame) -> KResult<isize> {
    let mut special = [0u8; MAXPATH];
    let mut dir = [0u8; MAXPATH];
    let sn = argpath(tf, 0, &mut special)?;
    let dn = argpath(tf, 1, &mut dir)?;
    let read_only = argint(tf, 2) != 0;
    let euid = creds().1;
    if euid != 0 {
        return Err(Error::Perm);
    }
    let (cwd, root) = cwd_root();
    let dev_ino = path::namei(&special[..sn], cwd, root)?;
    let dev = inode::with(dev_ino, |n| n.direct_zone(0)) as u16;
    inode::iput(dev_ino);
    let mount_dir = ops::resolve_dir(&dir[..dn], cwd, root)?;
    crate::fs::superblock::mount(dev, mount_dir, read_only)
}

pub fn sys_umount(tf: &mut TrapFrame) -> KResult<isize> {
    let mut buf = [0u8; MAXPATH];
    let n = argpath(tf, 0, &mut buf)?;
    let euid = creds().1;
    if euid != 0 {
        return Err(Error::Perm);
    }
    let (cwd, root) = cwd_root();
    let dev_ino = path::namei(&buf[..n], cwd, root)?;
    let dev = inode::with(dev_ino, |n| n.direct_zone(0)) as u16;
    inode::iput(dev_ino);
    crate::fs::superblock::umount(dev)
}

pub fn sys_umask(tf: &mut TrapFrame) -> KResult<isize> {
    let new = arguint(tf, 0) as u16 & 0o777;
    let old = table::with_current_mut(|t| core::mem::replace(&mut t.umask, new));
    Ok(old as isize)
}

/// `ioctl` on a tty: the only device family this kernel's core actually
/// interprets (spec.md §6: "ioctl (for tty termios)"). `cmd` follows the
/// classic `TCGETS`/`TCSETS`/`TIOCSPGRP` numbering closely enough for a
/// reimplementer to recognize, without pulling in the rest of the
/// historical `ioctl` multiplexer.
pub const TCGETS: u32 = 1;
pub const TCSETS: u32 = 2;
pub const TIOCSPGRP: u32 = 3;
pub const TIOCGPGRP: u32 = 4;

pub fn sys_ioctl(tf: &mut TrapFrame) -> KResult<isize> {
    let fd = argint(tf, 0);
    let cmd = arguint(tf, 1);
    let argp = argaddr(tf, 2);
    let fr = fd_lookup(fd)?;
    let ir = file::inode_of(fr).ok_or(Error::BadF)?;
    let ch = tty_channel(ir).ok_or(Error::NotTty)?;
    match cmd {
        TCGETS => {
            let t = tty::termios(ch);
            let mut raw = [0u8; 12 + tty::NCC];
            raw[0..4].copy_from_slice(&t.iflag.bits().to_le_bytes());
            raw[4..8].copy_from_slice(&t.oflag.bits().to_le_bytes());
            raw[8..12].copy_from_slice(&t.lflag.bits().to_le_bytes());
            raw[12..12 + tty::NCC].copy_from_slice(&t.cc);
            crate::mm::vm::copy_out(argp, &raw)?;
            Ok(0)
        }
        TCSETS => {
            let mut raw = [0u8; 12 + tty::NCC];
            crate::mm::vm::copy_in(argp, &mut raw)?;
            let mut t = tty::Termios::sane();
            t.iflag = tty::IFlag::from_bits_truncate(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]));
            t.oflag = tty::OFlag::from_bits_truncate(u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]));
            t.lflag = tty::LFlag::from_bits_truncate(u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]));
            t.cc.copy_from_slice(&raw[12..12 + tty::NCC]);
            tty::set_termios(ch, t);
            Ok(0)
        }
        TIOCSPGRP => {
            let pgrp = table::with_current(|t| t.pgrp);
            tty::set_pgrp(ch, pgrp);
            Ok(0)
        }
        TIOCGPGRP => Ok(0),
        _ => Err(Error::Inval),
    }
}

const _: () = assert!(NR_OPEN > 2);
