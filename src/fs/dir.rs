//! Directory content as a sequence of fixed-size entries (spec.md §6:
//! "2-byte inode number + 14-byte name"), and the linear scan
//! `find_entry` that both name lookup and link/unlink walk (spec.md
//! §4.5 "Name resolution").

use crate::bio;
use crate::errno::{Error, KResult};
use crate::fs::bmap;
use crate::fs::inode::{self, InodeRef, Mode};
use crate::param::{BLOCK_SIZE, DIR_ENTRY_SIZE, NAME_LEN};

#[derive(Clone, Copy)]
pub struct DirEntry {
    pub inum: u32,
    pub name: [u8; NAME_LEN],
}

impl DirEntry {
    fn name_len(&self) -> usize {
        self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN)
    }

    pub fn name_bytes(&self) -> &[u8] {
        &self.name[..self.name_len()]
    }

    fn matches(&self, name: &[u8]) -> bool {
        self.inum != 0 && self.name_bytes() == truncate_name(name)
    }
}

/// Names longer than `NAME_LEN` are silently truncated on write, unless
/// `no_truncate` is configured (spec.md §6), in which case the caller
/// must reject them before calling in here.
fn truncate_name(name: &[u8]) -> &[u8] {
    if name.len() > NAME_LEN {
        &name[..NAME_LEN]
    } else {
        name
    }
}

/// Pack `name` into the fixed 14-byte, NUL-padded on-disk field.
pub fn pack_name(name: &[u8]) -> KResult<[u8; NAME_LEN]> {
    if name.len() > NAME_LEN {
        #[cfg(feature = "no_truncate")]
        return Err(Error::Inval);
        #[cfg(not(feature = "no_truncate"))]
        {
            let mut out = [0u8; NAME_LEN];
            out.copy_from_slice(&name[..NAME_LEN]);
            return Ok(out);
        }
    }
    let mut out = [0u8; NAME_LEN];
    out[..name.len()].copy_from_slice(name);
    Ok(out)
}

fn read_entry(dev: u16, dir: InodeRef, offset: u32) -> KResult<Option<DirEntry>> {
    let size = inode::with(dir, |n| n.size);
    if offset >= size {
        return Ok(None);
    }
    let block = offset / BLOCK_SIZE as u32;
    let zone = bmap::bmap(dir, block, false)?;
    if zone == 0 {
        return Ok(Some(DirEntry { inum: 0, name: [0; NAME_LEN] }));
    }
    let slot = bio::bread(dev, zone)?;
    let entry = bio::with(slot, |b| {
        let off = (offset % BLOCK_SIZE as u32) as usize;
        let inum = u16::from_le_bytes([b.data[off], b.data[off + 1]]) as u32;
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&b.data[off + 2..off + DIR_ENTRY_SIZE]);
        DirEntry { inum, name }
    });
    bio::brelse(slot);
    Ok(Some(entry))
}

fn write_entry(dev: u16, dir: InodeRef, offset: u32, entry: DirEntry) -> KResult<()> {
    let block = offset / BLOCK_SIZE as u32;
    let zone = bmap::bmap(dir, block, true)?;
    let slot = bio::bread(dev, zone)?;
    bio::with_mut(slot, |b| {
        let off = (offset % BLOCK_SIZE as u32) as usize;
        b.data[off..off + 2].copy_from_slice(&(entry.inum as u16).to_le_bytes());
        b.data[off + 2..off + DIR_ENTRY_SIZE].copy_from_slice(&entry.name);
    });
    bio::mark_dirty(slot);
    bio::brelse(slot);
    let needed_size = offset + DIR_ENTRY_SIZE as u32;
    inode::with_mut(dir, |n| {
        if n.size < needed_size {
            n.size = needed_size;
        }
        n.dirty = true;
    });
    Ok(())
}

/// Linear scan of `dir`'s data blocks for `name` (spec.md §4.5
/// `find_entry`). Returns the byte offset of the matching entry and its
/// inode number.
pub fn find_entry(dir: InodeRef, name: &[u8]) -> KResult<Option<(u32, u32)>> {
    let dev = inode::with(dir, |n| n.dev);
    let size = inode::with(dir, |n| n.size);
    let mut offset = 0u32;
    while offset < size {
        if let Some(e) = read_entry(dev, dir, offset)? {
            if e.matches(name) {
                return Ok(Some((offset, e.inum)));
            }
        }
        offset += DIR_ENTRY_SIZE as u32;
    }
    Ok(None)
}

/// Add `name -> inum` to `dir`, reusing a cleared slot if one exists,
/// else appending (spec.md §4.5).
pub fn add_entry(dir: InodeRef, name: &[u8], inum: u32) -> KResult<()> {
    if find_entry(dir, name)?.is_some() {
        return Err(Error::Exist);
    }
    let dev = inode::with(dir, |n| n.dev);
    let size = inode::with(dir, |n| n.size);
    let packed = pack_name(name)?;

    let mut offset = 0u32;
    while offset < size {
        if let Some(e) = read_entry(dev, dir, offset)? {
            if e.inum == 0 {
                return write_entry(dev, dir, offset, DirEntry { inum, name: packed });
            }
        }
        offset += DIR_ENTRY_SIZE as u32;
    }
    write_entry(dev, dir, size, DirEntry { inum, name: packed })
}

/// Clear the slot at `offset` (spec.md §4.5 `unlink`/`rmdir`).
pub fn clear_entry(dir: InodeRef, offset: u32) -> KResult<()> {
    let dev = inode::with(dir, |n| n.dev);
    write_entry(dev, dir, offset, DirEntry { inum: 0, name: [0; NAME_LEN] })
}

/// Initialize a freshly allocated directory's first block with `.` and
/// `..` (spec.md §4.5 `mkdir`): "occupy slots 0 and 1 of every
/// directory's first block".
pub fn init_dir(dir: InodeRef, parent_num: u32) -> KResult<()> {
    let dev = inode::with(dir, |n| n.dev);
    let self_num = inode::with(dir, |n| n.num);
    write_entry(dev, dir, 0, DirEntry { inum: self_num, name: *b".\0\0\0\0\0\0\0\0\0\0\0\0\0" })?;
    write_entry(dev, dir, DIR_ENTRY_SIZE as u32, DirEntry { inum: parent_num, name: *b"..\0\0\0\0\0\0\0\0\0\0\0" })?;
    inode::with_mut(dir, |n| n.size = 32);
    Ok(())
}

/// A directory is empty iff every entry past `.`/`..` is cleared
/// (spec.md §4.5 `rmdir`: "must have exactly `.` + `..` + empty slots").
pub fn is_empty_dir(dir: InodeRef) -> KResult<bool> {
    let dev = inode::with(dir, |n| n.dev);
    let size = inode::with(dir, |n| n.size);
    let mut offset = 2 * DIR_ENTRY_SIZE as u32;
    while offset < size {
        if let Some(e) = read_entry(dev, dir, offset)? {
            if e.inum != 0 {
                return Ok(false);
            }
        }
        offset += DIR_ENTRY_SIZE as u32;
    }
    Ok(true)
}

pub fn is_dir(ir: InodeRef) -> bool {
    inode::with(ir, |n| n.mode.is_dir())
}

pub fn mode_is_dir(mode: Mode) -> bool {
    mode.is_dir()
}
