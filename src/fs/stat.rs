//! `stat`/`fstat` (spec.md §6 syscall surface). The classic Unix
//! attribute struct, filled straight from the in-memory inode; no disk
//! access beyond what `iget` already did.

use crate::fs::inode::{self, InodeRef};

/// For character/block special files MINIX stores the device number in
/// the first direct zone slot rather than using it for data (spec.md §6
/// `mknod`).
#[derive(Clone, Copy, Debug, Default)]
pub struct Stat {
    pub dev: u16,
    pub ino: u32,
    pub mode: u16,
    pub nlink: u16,
    pub uid: u16,
    pub gid: u16,
    pub rdev: u16,
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

pub fn stat(ir: InodeRef) -> Stat {
    inode::with(ir, |n| Stat {
        dev: n.dev,
        ino: n.num,
        mode: n.mode.bits(),
        nlink: n.nlinks,
        uid: n.uid,
        gid: n.gid,
        rdev: if n.mode.is_chr() || n.mode.is_blk() {
            n.direct_zone(0) as u16
        } else {
            0
        },
        size: n.size,
        atime: n.atime,
        mtime: n.mtime,
        ctime: n.ctime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rdev_only_set_for_special_files() {
        // A regular file's first "zone" is real data, not an encoded
        // device number, and must not leak through as rdev.
        let st = Stat {
            mode: crate::fs::inode::Mode::IFREG.bits(),
            ..Default::default()
        };
        assert_eq!(st.rdev, 0);
    }
}
