//! Syscall-level filesystem operations layered on top of the name
//! resolution, inode cache, and directory primitives (spec.md §4.5
//! "Directory ops" and `open_namei`). Everything below `fs::path` works
//! a component at a time; this module is where a whole syscall's worth
//! of behaviour — create-on-open, link-count bookkeeping, permission
//! checks — comes together.

use crate::errno::{Error, KResult};
use crate::file::OpenFlags;
use crate::fs::inode::{self, InodeRef, Mode};
use crate::fs::{dir, path, superblock};
use crate::param::NAME_LEN;

/// Allocate a brand new on-disk inode on `dev` and load it into a fresh
/// cache slot (spec.md §4.5 `open_namei`: "allocates a new inode ...
/// initializes mode"). Shared by `open_namei`'s O_CREAT path, `mkdir`,
/// and `mknod`.
fn new_inode(dev: u16, mode: Mode, uid: u16, gid: u16) -> KResult<InodeRef> {
    let num = superblock::new_inode(dev).ok_or(Error::NoSpc)?;
    let ir = inode::iget(dev, num)?;
    inode::with_mut(ir, |n| {
        n.mode = mode;
        n.nlinks = 1;
        n.uid = uid;
        n.gid = gid;
        n.size = 0;
        n.zones = [0; crate::param::NR_DIRECT_ZONES + 2];
        n.dirty = true;
    });
    Ok(ir)
}

/// spec.md §4.5 `open_namei`. Resolves `path` to an inode, applying
/// O_CREAT/O_EXCL/O_TRUNC and the access-mode check; returns a
/// referenced inode the caller (`syscall::file::open`) must eventually
/// `iput`.
pub fn open_namei(
    path_bytes: &[u8],
    flags: OpenFlags,
    req_mode: u16,
    cwd: InodeRef,
    root: InodeRef,
    umask: u16,
    euid: u16,
    egid: u16,
) -> KResult<InodeRef> {
    let (parent, name) = path::dir_namei(path_bytes, cwd, root)?;

    if name.is_empty() {
        if flags.contains(OpenFlags::CREAT) && flags.contains(OpenFlags::EXCL) {
            inode::iput(parent);
            return Err(Error::Exist);
        }
        return check_open_access(parent, flags, euid, egid);
    }

    let existing = dir::find_entry(parent, &name)?;
    if existing.is_none() && !flags.contains(OpenFlags::CREAT) {
        inode::iput(parent);
        return Err(Error::NoEnt);
    }
    if existing.is_some() && flags.contains(OpenFlags::CREAT) && flags.contains(OpenFlags::EXCL) {
        inode::iput(parent);
        return Err(Error::Exist);
    }

    if let Some((_, inum)) = existing {
        let dev = inode::with(parent, |n| n.dev);
        inode::iput(parent);
        let ir = inode::iget(dev, inum)?;
        let ir = match check_open_access(ir, flags, euid, egid) {
            Ok(ir) => ir,
            Err(e) => return Err(e),
        };
        if flags.contains(OpenFlags::TRUNC) {
            let is_reg = inode::with(ir, |n| n.mode.is_reg());
            if is_reg {
                crate::fs::truncate::truncate(ir);
            }
        }
        return Ok(ir);
    }

    let dev = inode::with(parent, |n| n.dev);
    let mode = Mode::from_bits_truncate((req_mode & !umask & 0o7777) | Mode::IFREG.bits());
    let ir = match new_inode(dev, mode, euid, egid) {
        Ok(ir) => ir,
        Err(e) => {
            inode::iput(parent);
            return Err(e);
        }
    };
    let num = inode::with(ir, |n| n.num);
    if let Err(e) = dir::add_entry(parent, &name, num) {
        inode::with_mut(ir, |n| n.nlinks = 0);
        inode::iput(ir);
        inode::iput(parent);
        return Err(e);
    }
    inode::iput(parent);
    Ok(ir)
}

/// Opening a directory for write is EISDIR; otherwise run the
/// owner/group/other check spec.md §4.5 describes.
fn check_open_access(ir: InodeRef, flags: OpenFlags, euid: u16, egid: u16) -> KResult<InodeRef> {
    let (mode, uid, gid, is_dir) = inode::with(ir, |n| (n.mode, n.uid, n.gid, n.mode.is_dir()));
    if is_dir && flags.bits() & 0x3 != 0 {
        inode::iput(ir);
        return Err(Error::IsDir);
    }
    let want = match flags.bits() & 0x3 {
        1 => 0o2,
        2 => 0o6,
        _ => 0o4,
    };
    if !path::access_mode(mode, uid, gid, euid, egid, want) {
        inode::iput(ir);
        return Err(Error::Acces);
    }
    Ok(ir)
}

/// spec.md §4.5 `mkdir`: allocate an inode with size 32, one data
/// block, "." and ".." entries, `nlinks=2`, and bump the parent's link
/// count for the child's "..".
pub fn mkdir(path_bytes: &[u8], req_mode: u16, cwd: InodeRef, root: InodeRef, umask: u16, euid: u16, egid: u16) -> KResult<()> {
    let (parent, name) = path::dir_namei(path_bytes, cwd, root)?;
    if name.is_empty() {
        inode::iput(parent);
        return Err(Error::Exist);
    }
    if dir::find_entry(parent, &name)?.is_some() {
        inode::iput(parent);
        return Err(Error::Exist);
    }
    let (parent_mode, parent_uid, parent_gid) = inode::with(parent, |n| (n.mode, n.uid, n.gid));
    if !path::access_mode(parent_mode, parent_uid, parent_gid, euid, egid, 0o2) {
        inode::iput(parent);
        return Err(Error::Acces);
    }

    let dev = inode::with(parent, |n| n.dev);
    let mode = Mode::from_bits_truncate((req_mode & !umask & 0o7777) | Mode::IFDIR.bits());
    let child = match new_inode(dev, mode, euid, egid) {
        Ok(c) => c,
        Err(e) => {
            inode::iput(parent);
            return Err(e);
        }
    };
    let parent_num = inode::with(parent, |n| n.num);
    if let Err(e) = dir::init_dir(child, parent_num) {
        inode::with_mut(child, |n| n.nlinks = 0);
        inode::iput(child);
        inode::iput(parent);
        return Err(e);
    }
    inode::with_mut(child, |n| n.nlinks = 2);
    let child_num = inode::with(child, |n| n.num);
    if let Err(e) = dir::add_entry(parent, &name, child_num) {
        inode::with_mut(child, |n| n.nlinks = 0);
        inode::iput(child);
        inode::iput(parent);
        return Err(e);
    }
    inode::with_mut(parent, |n| {
        n.nlinks += 1;
        n.dirty = true;
    });
    inode::iput(child);
    inode::iput(parent);
    Ok(())
}

/// spec.md §4.5 `rmdir`: refuses non-empty dirs, `i_count != 1`, and
/// cross-device targets; clears the entry and decrements both link
/// counts.
pub fn rmdir(path_bytes: &[u8], cwd: InodeRef, root: InodeRef) -> KResult<()> {
    let (parent, name) = path::dir_namei(path_bytes, cwd, root)?;
    if name.is_empty() || name.as_slice() == b"." {
        inode::iput(parent);
        return Err(Error::Inval);
    }
    let found = dir::find_entry(parent, &name)?;
    let (offset, inum) = match found {
        Some(v) => v,
        None => {
            inode::iput(parent);
            return Err(Error::NoEnt);
        }
    };
    let parent_dev = inode::with(parent, |n| n.dev);
    let child = match inode::iget(parent_dev, inum) {
        Ok(c) => c,
        Err(e) => {
            inode::iput(parent);
            return Err(e);
        }
    };

    let (is_dir, count, dev) = inode::with(child, |n| (n.mode.is_dir(), n.count, n.dev));
    if !is_dir {
        inode::iput(child);
        inode::iput(parent);
        return Err(Error::NotDir);
    }
    if dev != parent_dev {
        inode::iput(child);
        inode::iput(parent);
        return Err(Error::XDev);
    }
    if count != 1 {
        inode::iput(child);
        inode::iput(parent);
        return Err(Error::Busy);
    }
    if !dir::is_empty_dir(child)? {
        inode::iput(child);
        inode::iput(parent);
        return Err(Error::NotEmpty);
    }

    dir::clear_entry(parent, offset)?;
    inode::with_mut(parent, |n| {
        n.nlinks -= 1;
        n.dirty = true;
    });
    inode::with_mut(child, |n| n.nlinks = 0);
    inode::iput(child);
    inode::iput(parent);
    Ok(())
}

/// spec.md §4.5 `link`: same-device only.
pub fn link(old_path: &[u8], new_path: &[u8], cwd: InodeRef, root: InodeRef) -> KResult<()> {
    let target = path::namei(old_path, cwd, root)?;
    if inode::with(target, |n| n.mode.is_dir()) {
        inode::iput(target);
        return Err(Error::Perm);
    }

    let (parent, name) = path::dir_namei(new_path, cwd, root)?;
    if name.is_empty() {
        inode::iput(parent);
        inode::iput(target);
        return Err(Error::Exist);
    }
    let (target_dev, target_num) = inode::with(target, |n| (n.dev, n.num));
    if inode::with(parent, |n| n.dev) != target_dev {
        inode::iput(parent);
        inode::iput(target);
        return Err(Error::XDev);
    }
    if dir::find_entry(parent, &name)?.is_some() {
        inode::iput(parent);
        inode::iput(target);
        return Err(Error::Exist);
    }
    if let Err(e) = dir::add_entry(parent, &name, target_num) {
        inode::iput(parent);
        inode::iput(target);
        return Err(e);
    }
    inode::with_mut(target, |n| {
        n.nlinks += 1;
        n.dirty = true;
    });
    inode::iput(parent);
    inode::iput(target);
    Ok(())
}

/// spec.md §4.5 `unlink`: refuses directories, decrements `nlinks`;
/// `iput` frees the storage once both the link count and reference
/// count reach zero.
pub fn unlink(path_bytes: &[u8], cwd: InodeRef, root: InodeRef) -> KResult<()> {
    let (parent, name) = path::dir_namei(path_bytes, cwd, root)?;
    if name.is_empty() {
        inode::iput(parent);
        return Err(Error::Perm);
    }
    let found = dir::find_entry(parent, &name)?;
    let (offset, inum) = match found {
        Some(v) => v,
        None => {
            inode::iput(parent);
            return Err(Error::NoEnt);
        }
    };
    let dev = inode::with(parent, |n| n.dev);
    let child = match inode::iget(dev, inum) {
        Ok(c) => c,
        Err(e) => {
            inode::iput(parent);
            return Err(e);
        }
    };
    if inode::with(child, |n| n.mode.is_dir()) {
        inode::iput(child);
        inode::iput(parent);
        return Err(Error::Perm);
    }
    dir::clear_entry(parent, offset)?;
    inode::with_mut(child, |n| {
        n.nlinks = n.nlinks.saturating_sub(1);
        n.dirty = true;
    });
    inode::iput(child);
    inode::iput(parent);
    Ok(())
}

/// spec.md §6 `mknod`: create a device special (or FIFO) entry without
/// opening it, the first direct zone slot carrying the packed device
/// number for char/block nodes.
pub fn mknod(path_bytes: &[u8], mode: Mode, dev_num: u16, cwd: InodeRef, root: InodeRef, umask: u16, euid: u16, egid: u16) -> KResult<()> {
    let (parent, name) = path::dir_namei(path_bytes, cwd, root)?;
    if name.is_empty() || dir::find_entry(parent, &name)?.is_some() {
        inode::iput(parent);
        return Err(Error::Exist);
    }
    let dev = inode::with(parent, |n| n.dev);
    let masked = Mode::from_bits_truncate((mode.bits() & !umask) | (mode.bits() & Mode::IFMT.bits()));
    let child = match new_inode(dev, masked, euid, egid) {
        Ok(c) => c,
        Err(e) => {
            inode::iput(parent);
            return Err(e);
        }
    };
    if masked.is_chr() || masked.is_blk() {
        inode::with_mut(child, |n| n.zones[0] = dev_num as u32);
    }
    let num = inode::with(child, |n| n.num);
    if let Err(e) = dir::add_entry(parent, &name, num) {
        inode::with_mut(child, |n| n.nlinks = 0);
        inode::iput(child);
        inode::iput(parent);
        return Err(e);
    }
    inode::iput(child);
    inode::iput(parent);
    Ok(())
}

/// `chmod`: only the owner or superuser may change the mode bits.
pub fn chmod(path_bytes: &[u8], mode: u16, cwd: InodeRef, root: InodeRef, euid: u16) -> KResult<()> {
    let ir = path::namei(path_bytes, cwd, root)?;
    let (uid, cur) = inode::with(ir, |n| (n.uid, n.mode));
    if euid != 0 && euid != uid {
        inode::iput(ir);
        return Err(Error::Perm);
    }
    let new_mode = Mode::from_bits_truncate((cur.bits() & Mode::IFMT.bits()) | (mode & 0o7777));
    inode::with_mut(ir, |n| {
        n.mode = new_mode;
        n.dirty = true;
    });
    inode::iput(ir);
    Ok(())
}

/// `chown`: only the superuser may change ownership.
pub fn chown(path_bytes: &[u8], uid: u16, gid: u16, cwd: InodeRef, root: InodeRef, euid: u16) -> KResult<()> {
    let ir = path::namei(path_bytes, cwd, root)?;
    if euid != 0 {
        inode::iput(ir);
        return Err(Error::Perm);
    }
    inode::with_mut(ir, |n| {
        n.uid = uid;
        n.gid = gid;
        n.dirty = true;
    });
    inode::iput(ir);
    Ok(())
}

/// `access`: resolve `path` and run the owner/group/other check against
/// the task's *real* (not effective) ids, per spec.md §9's canonicalized
/// reading of the original's `sys_access`.
pub fn access(path_bytes: &[u8], want: u8, cwd: InodeRef, root: InodeRef, ruid: u16, rgid: u16) -> KResult<()> {
    let ir = path::namei(path_bytes, cwd, root)?;
    let (mode, uid, gid) = inode::with(ir, |n| (n.mode, n.uid, n.gid));
    inode::iput(ir);
    if path::access_mode(mode, uid, gid, ruid, rgid, want) {
        Ok(())
    } else {
        Err(Error::Acces)
    }
}

/// `utime`: set access/modify times; only the owner or superuser may
/// call it with explicit times, matching the classic permission rule.
pub fn utime(path_bytes: &[u8], atime: u32, mtime: u32, cwd: InodeRef, root: InodeRef, euid: u16) -> KResult<()> {
    let ir = path::namei(path_bytes, cwd, root)?;
    let uid = inode::with(ir, |n| n.uid);
    if euid != 0 && euid != uid {
        inode::iput(ir);
        return Err(Error::Perm);
    }
    inode::with_mut(ir, |n| {
        n.atime = atime;
        n.mtime = mtime;
        n.dirty = true;
    });
    inode::iput(ir);
    Ok(())
}

/// `chdir`: resolve and install as the task's new cwd, refusing
/// non-directories.
pub fn resolve_dir(path_bytes: &[u8], cwd: InodeRef, root: InodeRef) -> KResult<InodeRef> {
    let ir = path::namei(path_bytes, cwd, root)?;
    if !inode::with(ir, |n| n.mode.is_dir()) {
        inode::iput(ir);
        return Err(Error::NotDir);
    }
    Ok(ir)
}

const _: () = assert!(NAME_LEN == 14);
