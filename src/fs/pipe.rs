//! Pipes (spec.md §4.5 "Pipe inode", §6 "Pipe semantics"): a one-page
//! circular buffer with a reader cursor and a writer cursor, backed by a
//! pipe inode allocated from the ordinary inode cache. Reads and writes
//! never touch disk — `mm::phys` gives direct access to the page by its
//! physical address, since both ends run in kernel context.

use crate::errno::{Error, KResult};
use crate::fs::inode::{self, InodeRef};
use crate::lock::Spinlock;
use crate::mm;
use crate::mm::phys;
use crate::param::{NR_INODE, PIPE_SIZE};
use crate::proc::signal::Signal;
use crate::proc::table;
use crate::proc::wait::WaitQueue;

const fn wait_array() -> [WaitQueue; NR_INODE] {
    const W: WaitQueue = WaitQueue::new();
    [W; NR_INODE]
}

/// Woken whenever bytes are consumed, so blocked writers can retry.
static READ_WAIT: [WaitQueue; NR_INODE] = wait_array();
/// Woken whenever bytes are produced, or the last writer goes away, so
/// blocked readers can retry.
static WRITE_WAIT: [WaitQueue; NR_INODE] = wait_array();

/// Guards the check-then-sleep race: one gate per inode slot, held across
/// reading the pipe's cursors and linking the waiter, the same way
/// `fs::inode`'s own `WAITS` are paired with the cache lock.
static GATE: [Spinlock<()>; NR_INODE] = {
    const G: Spinlock<()> = Spinlock::new("pipe_gate", ());
    [G; NR_INODE]
};

fn used(head: u32, tail: u32) -> usize {
    (head.wrapping_sub(tail) as usize) % PIPE_SIZE
}

/// Allocate a pipe: a fresh inode plus its one-page circular buffer
/// (spec.md §4.5 `get_pipe_inode`, continued).
pub fn create() -> KResult<InodeRef> {
    let ir = inode::get_pipe_inode()?;
    let pa = mm::alloc_frame();
    if pa == 0 {
        // get_pipe_inode already set count=2; iput twice to release it.
        inode::iput(ir);
        inode::iput(ir);
        return Err(Error::NoMem);
    }
    inode::with_mut(ir, |n| {
        n.size = pa;
        n.pipe_head = 0;
        n.pipe_tail = 0;
    });
    Ok(ir)
}

/// Drop the read end (spec.md §6: "ref count equals readers + writers").
/// Wakes blocked writers so they observe `pipe_readers == 0` and fail
/// with `EPIPE`/`SIGPIPE`.
pub fn close_reader(ir: InodeRef) {
    let none_left = inode::with_mut(ir, |n| {
        n.pipe_readers = n.pipe_readers.saturating_sub(1);
        n.pipe_readers == 0
    });
    if none_left {
        WRITE_WAIT[ir.0].wake_up();
    }
}

/// Drop the write end. Wakes blocked readers so they observe EOF.
pub fn close_writer(ir: InodeRef) {
    let none_left = inode::with_mut(ir, |n| {
        n.pipe_writers = n.pipe_writers.saturating_sub(1);
        n.pipe_writers == 0
    });
    if none_left {
        READ_WAIT[ir.0].wake_up();
    }
}

/// Read up to `buf.len()` bytes, blocking while the pipe is empty and at
/// least one writer remains open. Returns 0 on EOF (empty, no writers).
pub fn read(ir: InodeRef, buf: &mut [u8]) -> KResult<usize> {
    loop {
        let gate = GATE[ir.0].lock();
        let (pa, head, tail, writers) =
            inode::with(ir, |n| (n.size, n.pipe_head, n.pipe_tail, n.pipe_writers));
        let avail = used(head, tail);
        if avail > 0 {
            drop(gate);
            let n = avail.min(buf.len());
            // SAFETY: the pipe page is exclusively owned by this inode;
            // cursor updates below are serialized by `GATE`.
            let page = unsafe { phys::as_slice(pa, PIPE_SIZE) };
            for (i, slot) in buf[..n].iter_mut().enumerate() {
                *slot = page[(tail as usize + i) % PIPE_SIZE];
            }
            inode::with_mut(ir, |node| node.pipe_tail = tail.wrapping_add(n as u32));
            READ_WAIT[ir.0].wake_up();
            WRITE_WAIT[ir.0].wake_up();
            return Ok(n);
        }
        if writers == 0 {
            return Ok(0);
        }
        if READ_WAIT[ir.0].interruptible_sleep(gate) {
            return Err(Error::Intr);
        }
    }
}

/// Write all of `buf`, blocking while the pipe is full and at least one
/// reader remains open. Raises `SIGPIPE` and fails with `EPIPE` as soon
/// as the reader side is gone (spec.md §6).
pub fn write(ir: InodeRef, buf: &[u8]) -> KResult<usize> {
    let mut written = 0usize;
    while written < buf.len() {
        let gate = GATE[ir.0].lock();
        let (pa, head, tail, readers) =
            inode::with(ir, |n| (n.size, n.pipe_head, n.pipe_tail, n.pipe_readers));
        if readers == 0 {
            drop(gate);
            table::with_current_mut(|t| t.signals.raise(Signal::Pipe));
            return if written > 0 { Ok(written) } else { Err(Error::Pipe) };
        }
        let free = PIPE_SIZE - used(head, tail) - 1;
        if free == 0 {
            if WRITE_WAIT[ir.0].interruptible_sleep(gate) {
                return if written > 0 { Ok(written) } else { Err(Error::Intr) };
            }
            continue;
        }
        drop(gate);
        let n = free.min(buf.len() - written);
        // SAFETY: see `read`.
        let page = unsafe { phys::as_mut_slice(pa, PIPE_SIZE) };
        for i in 0..n {
            page[(head as usize + i) % PIPE_SIZE] = buf[written + i];
        }
        inode::with_mut(ir, |node| node.pipe_head = head.wrapping_add(n as u32));
        written += n;
        READ_WAIT[ir.0].wake_up();
        WRITE_WAIT[ir.0].wake_up();
    }
    Ok(written)
}
