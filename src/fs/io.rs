//! Generic regular-file read/write (spec.md §4.5 "File read/write"):
//! walk block-by-block via `bmap`, copy the intra-block overlap, update
//! the timestamps and size. Directory and device I/O go through other
//! paths (`fs::dir`, the as-yet-out-of-scope device table); this is the
//! plain-data-file case `fs::file` dispatches to.

use crate::bio;
use crate::errno::KResult;
use crate::fs::bmap;
use crate::fs::inode::{self, InodeRef};
use crate::param::BLOCK_SIZE;

/// Read up to `buf.len()` bytes starting at `pos`. Reading past EOF
/// yields fewer bytes, never an error; a hole zone reads as zeroes.
pub fn read(ir: InodeRef, pos: u32, buf: &mut [u8]) -> KResult<usize> {
    let (dev, size) = inode::with(ir, |n| (n.dev, n.size));
    let mut done = 0usize;
    let mut cur = pos;
    while done < buf.len() && cur < size {
        let block = cur / BLOCK_SIZE as u32;
        let off = (cur % BLOCK_SIZE as u32) as usize;
        let want = (BLOCK_SIZE - off).min(buf.len() - done).min((size - cur) as usize);
        let zone = bmap::bmap(ir, block, false)?;
        if zone == 0 {
            buf[done..done + want].fill(0);
        } else {
            let slot = bio::bread(dev, zone)?;
            bio::with(slot, |b| buf[done..done + want].copy_from_slice(&b.data[off..off + want]));
            bio::brelse(slot);
        }
        done += want;
        cur += want as u32;
    }
    inode::with_mut(ir, |n| n.atime = crate::proc::sched::ticks() as u32);
    Ok(done)
}

/// Write `buf` at `pos`, extending the file and allocating blocks as
/// needed (`create == true` in `bmap`). `append` forces `pos` to the
/// current size first but — per spec.md §4.5 — does not move the
/// caller's file-object cursor; that is `fs::file`'s job.
pub fn write(ir: InodeRef, pos: u32, buf: &[u8]) -> KResult<usize> {
    let dev = inode::with(ir, |n| n.dev);
    let mut done = 0usize;
    let mut cur = pos;
    while done < buf.len() {
        let block = cur / BLOCK_SIZE as u32;
        let off = (cur % BLOCK_SIZE as u32) as usize;
        let want = (BLOCK_SIZE - off).min(buf.len() - done);
        let zone = bmap::bmap(ir, block, true)?;
        let slot = bio::bread(dev, zone)?;
        bio::with_mut(slot, |b| b.data[off..off + want].copy_from_slice(&buf[done..done + want]));
        bio::mark_dirty(slot);
        bio::brelse(slot);
        done += want;
        cur += want as u32;
    }
    let now = crate::proc::sched::ticks() as u32;
    inode::with_mut(ir, |n| {
        if cur > n.size {
            n.size = cur;
        }
        n.mtime = now;
        n.ctime = now;
        n.dirty = true;
    });
    Ok(done)
}
