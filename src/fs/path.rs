//! Name resolution (spec.md §4.5 "Name resolution", `dir_namei`,
//! `open_namei`). Starts at `root` or the task's `cwd` depending on the
//! leading `/`, walks components via `fs::dir::find_entry`, and applies
//! the two special `..` rules: `..` at the task's pseudo-root is `.`;
//! `..` at a filesystem root crosses back into the host mount point.

use crate::errno::{Error, KResult};
use crate::fs::dir;
use crate::fs::inode::{self, InodeRef, Mode};
use crate::fs::superblock;
use crate::param::{MAXPATH, NAME_LEN};

/// Borrow the next path component from `path`, skipping separators, and
/// return it with the remaining unparsed tail.
fn next_component(path: &[u8]) -> (&[u8], &[u8]) {
    let mut i = 0;
    while i < path.len() && path[i] == b'/' {
        i += 1;
    }
    let start = i;
    while i < path.len() && path[i] != b'/' {
        i += 1;
    }
    (&path[start..i], &path[i..])
}

/// Cross a mount point: if `dir` carries the mount flag, replace it
/// with the root of whatever filesystem is mounted there (spec.md §4.5
/// iget "crossing the mount point").
fn cross_mount_down(ir: InodeRef) -> KResult<InodeRef> {
    let (mounted, dev) = inode::with(ir, |n| (n.mounted, n.dev));
    if !mounted {
        return Ok(ir);
    }
    let mounted_dev = superblock::device_mounted_at(ir).ok_or(Error::Inval)?;
    let _ = dev;
    let root = inode::iget(mounted_dev, 1)?;
    inode::iput(ir);
    Ok(root)
}

/// Step "up" out of a directory, applying both special `..` rules.
fn cross_mount_up(ir: InodeRef, task_root: InodeRef) -> KResult<InodeRef> {
    if ir == task_root {
        // Rule 1: ".." in the task's pseudo-root is ".".
        return Ok(ir);
    }
    let num = inode::with(ir, |n| n.num);
    if num == 1 {
        // Rule 2: ".." at a filesystem root crosses to the host mount
        // point inode in the parent filesystem.
        let dev = inode::with(ir, |n| n.dev);
        if let Some(host) = superblock::mount_point_of(dev) {
            inode::iput(ir);
            inode::with_mut(host, |n| n.count += 1);
            return Ok(host);
        }
    }
    Ok(ir)
}

/// Resolve `path` to its target inode, starting at `cwd` (relative) or
/// `root` (absolute), relative to the task's pseudo-root `root` for the
/// purposes of rule 1 above. Returns a referenced `InodeRef` the caller
/// must `iput`.
pub fn namei(path: &[u8], cwd: InodeRef, root: InodeRef) -> KResult<InodeRef> {
    let (parent, name) = dir_namei(path, cwd, root)?;
    if name.is_empty() {
        return Ok(parent);
    }
    let result = lookup_one(parent, &name, root);
    inode::iput(parent);
    result
}

/// Look up one component of `name` inside `dir`, handling `.`/`..` and
/// mount crossing, bumping the returned inode's reference count.
fn lookup_one(dir_ir: InodeRef, name: &[u8], task_root: InodeRef) -> KResult<InodeRef> {
    if name == b"." {
        inode::with_mut(dir_ir, |n| n.count += 1);
        return Ok(dir_ir);
    }
    if name == b".." {
        inode::with_mut(dir_ir, |n| n.count += 1);
        return cross_mount_up(dir_ir, task_root);
    }
    let (_, inum) = dir::find_entry(dir_ir, name)?.ok_or(Error::NoEnt)?;
    let dev = inode::with(dir_ir, |n| n.dev);
    let child = inode::iget(dev, inum)?;
    cross_mount_down(child)
}

/// Resolve everything but the last path component, returning the
/// (referenced) parent directory and the final component bytes (spec.md
/// §4.5 `dir_namei`). An empty final component means `path` itself named
/// the starting directory (e.g. `"/"` or `"."`).
pub fn dir_namei<'a>(
    path: &'a [u8],
    cwd: InodeRef,
    root: InodeRef,
) -> KResult<(InodeRef, arrayvec::ArrayVec<u8, NAME_LEN>)> {
    if path.len() > MAXPATH {
        return Err(Error::Inval);
    }

    let mut cur = if path.first() == Some(&b'/') {
        inode::with_mut(root, |n| n.count += 1);
        root
    } else {
        inode::with_mut(cwd, |n| n.count += 1);
        cwd
    };

    let mut rest = path;
    loop {
        let (comp, tail) = next_component(rest);
        if comp.is_empty() {
            return Ok((cur, arrayvec::ArrayVec::new()));
        }
        if tail.is_empty() || next_component(tail).0.is_empty() {
            let mut buf = arrayvec::ArrayVec::new();
            buf.try_extend_from_slice(comp).map_err(|_| Error::Inval)?;
            return Ok((cur, buf));
        }
        if !inode::with(cur, |n| n.mode.is_dir()) {
            inode::iput(cur);
            return Err(Error::NotDir);
        }
        let next = lookup_one(cur, comp, root)?;
        inode::iput(cur);
        cur = next;
        rest = tail;
    }
}

/// Owner/group/other permission check (spec.md §4.5 `open_namei`:
/// "classic owner/group/other triple selection"). `want` is an
/// `rwx`-style 3-bit mask. Canonicalizes spec.md §9 Open Question 2 as
/// the non-buggy reading: group and other never coincide (see
/// `SPEC_FULL.md`).
pub fn access_mode(mode: Mode, uid: u16, gid: u16, euid: u16, egid: u16, want: u8) -> bool {
    if euid == 0 {
        return true;
    }
    let bits = mode.bits();
    let perm = if euid == uid {
        (bits >> 6) & 0o7
    } else if egid == gid {
        (bits >> 3) & 0o7
    } else {
        bits & 0o7
    };
    (perm as u8 & want) == want
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_component_skips_leading_and_repeated_separators() {
        let (comp, tail) = next_component(b"//usr/bin");
        assert_eq!(comp, b"usr");
        assert_eq!(tail, b"/bin");
    }

    #[test]
    fn next_component_on_trailing_separator_yields_empty_tail() {
        let (comp, tail) = next_component(b"bin/");
        assert_eq!(comp, b"bin");
        assert_eq!(tail, b"/");
        let (comp, tail) = next_component(tail);
        assert_eq!(comp, b"");
        assert_eq!(tail, b"");
    }

    #[test]
    fn next_component_on_empty_path_yields_empty() {
        let (comp, tail) = next_component(b"");
        assert_eq!(comp, b"");
        assert_eq!(tail, b"");
    }

    #[test]
    fn access_mode_root_bypasses_every_check() {
        let mode = Mode::from_bits_truncate(0o000);
        assert!(access_mode(mode, 1, 1, 0, 0, 0o7));
    }

    #[test]
    fn access_mode_owner_group_other_do_not_coincide() {
        // rwx for owner, r-- for group, --- for other: uid match uses the
        // owner triple, gid match (non-owner) uses the group triple, and
        // neither matching uses the other triple (spec.md §9 Open Question
        // 2, canonicalized per SPEC_FULL.md as "group and other differ").
        let mode = Mode::from_bits_truncate(0o740);
        assert!(access_mode(mode, 1, 1, 1, 1, 0o7));
        assert!(access_mode(mode, 1, 1, 2, 1, 0o4));
        assert!(!access_mode(mode, 1, 1, 2, 1, 0o2));
        assert!(!access_mode(mode, 1, 1, 2, 2, 0o1));
    }
}
