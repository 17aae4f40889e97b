//! Request pool, elevator insertion, and the driver hand-off
//! (spec.md §4.4).

use crate::bio;
use crate::blk::driver::{self, NR_BLOCK_DEVICES};
use crate::errno::{Error, KResult};
use crate::lock::Spinlock;
use crate::param::NR_REQUEST;
use crate::proc::wait::WaitQueue;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Read,
    Write,
    ReadAhead,
}

impl Command {
    /// Translate a read/write-ahead command into its base command
    /// (spec.md §4.4 step 1).
    fn base(self) -> Command {
        match self {
            Command::ReadAhead => Command::Read,
            other => other,
        }
    }

    fn is_write(self) -> bool {
        matches!(self, Command::Write)
    }
}

#[derive(Clone, Copy)]
pub struct Request {
    pub dev: u16,
    pub cmd: Command,
    pub error_count: u32,
    pub start_sector: u32,
    pub sector_count: u32,
    /// Index of the buffer-cache slot (spec.md §3 Request: "associated
    /// buffer head").
    pub buf_slot: usize,
    pub next: Option<usize>,
    in_use: bool,
}

impl Request {
    const fn empty() -> Self {
        Self {
            dev: 0,
            cmd: Command::Read,
            error_count: 0,
            start_sector: 0,
            sector_count: 0,
            buf_slot: 0,
            next: None,
            in_use: false,
        }
    }
}

struct Pool {
    slots: [Request; NR_REQUEST],
    /// Head of the queue per device, as an index into `slots`.
    queue_heads: [Option<usize>; NR_BLOCK_DEVICES],
}

impl Pool {
    const fn new() -> Self {
        Self {
            slots: [Request::empty(); NR_REQUEST],
            queue_heads: [None; NR_BLOCK_DEVICES],
        }
    }
}

static POOL: Spinlock<Pool> = Spinlock::new("request_pool", Pool::new());
static POOL_WAIT: WaitQueue = WaitQueue::new();

/// READ may use the whole pool; WRITE is restricted to the lower
/// two-thirds so writers cannot starve readers (spec.md §4.4 step 3).
const WRITE_SLOT_CAP: usize = NR_REQUEST * 2 / 3;

fn device_index(dev: u16) -> usize {
    driver::device_index(dev)
}

fn try_alloc_slot(pool: &mut Pool, for_write: bool) -> Option<usize> {
    let cap = if for_write { WRITE_SLOT_CAP } else { NR_REQUEST };
    (0..cap).find(|&i| !pool.slots[i].in_use)
}

/// spec.md §4.4: translate, lock, allocate, fill, enqueue. `block` is a
/// filesystem block number; the request layer owns translating it to a
/// sector count ("start sector = block#×2", spec.md §4.4 step 4).
pub fn make_request(dev: u16, cmd: Command, buf_slot: usize, block: u32) -> KResult<()> {
    let start_sector = block * 2;
    let base_cmd = cmd.base();
    let is_ahead = matches!(cmd, Command::ReadAhead);

    if is_ahead && bio::is_locked(buf_slot) {
        return Ok(());
    }

    bio::lock_buf(buf_slot);

    if base_cmd.is_write() {
        if !bio::is_dirty(buf_slot) {
            bio::unlock_buf(buf_slot);
            return Ok(());
        }
    } else if bio::is_uptodate(buf_slot) {
        bio::unlock_buf(buf_slot);
        return Ok(());
    }

    loop {
        let mut pool = POOL.lock();
        match try_alloc_slot(&mut pool, base_cmd.is_write()) {
            Some(slot) => {
                pool.slots[slot] = Request {
                    dev,
                    cmd: base_cmd,
                    error_count: 0,
                    start_sector,
                    sector_count: 2,
                    buf_slot,
                    next: None,
                    in_use: true,
                };
                add_request(&mut pool, dev, slot);
                return Ok(());
            }
            None => {
                if is_ahead {
                    bio::unlock_buf(buf_slot);
                    return Ok(());
                }
                POOL_WAIT.sleep(pool);
            }
        }
    }
}

/// Ordering key: (READ < WRITE, device, sector). The elevator inserts a
/// request just before the first queued request it sorts after, keeping
/// head motion monotone within a sweep (spec.md §4.4 step 5).
fn ordered(a: &Request, b: &Request) -> bool {
    let ka = (a.cmd.is_write() as u8, a.dev, a.start_sector);
    let kb = (b.cmd.is_write() as u8, b.dev, b.start_sector);
    ka <= kb
}

fn add_request(pool: &mut Pool, dev: u16, slot: usize) {
    let idx = device_index(dev);
    match pool.queue_heads[idx] {
        None => {
            pool.queue_heads[idx] = Some(slot);
            driver::kick(dev);
        }
        Some(head) => {
            let mut prev = head;
            loop {
                let next = pool.slots[prev].next;
                let insert_here = match next {
                    None => true,
                    Some(n) => ordered(&pool.slots[prev], &pool.slots[slot]) && ordered(&pool.slots[slot], &pool.slots[n]),
                };
                if insert_here && ordered(&pool.slots[prev], &pool.slots[slot]) {
                    pool.slots[slot].next = next;
                    pool.slots[prev].next = Some(slot);
                    return;
                }
                match next {
                    Some(n) => prev = n,
                    None => {
                        pool.slots[prev].next = Some(slot);
                        pool.slots[slot].next = None;
                        return;
                    }
                }
            }
        }
    }
}

/// Called by a driver's interrupt handler when the head request
/// completes. Updates the buffer, frees the slot, dequeues, and re-kicks
/// the driver for the next entry (spec.md §4.4).
pub fn end_request(dev: u16, ok: bool) {
    let (buf_slot, error_count) = {
        let mut pool = POOL.lock();
        let idx = device_index(dev);
        let head = match pool.queue_heads[idx] {
            Some(h) => h,
            None => return,
        };
        let req = pool.slots[head];
        if !ok && req.error_count < driver::MAX_RETRIES {
            pool.slots[head].error_count += 1;
            driver::kick(dev);
            return;
        }
        pool.queue_heads[idx] = req.next;
        pool.slots[head].in_use = false;
        (req.buf_slot, req.error_count)
    };
    let _ = error_count;
    bio::complete(buf_slot, ok);
    POOL_WAIT.wake_up();
    driver::kick(dev);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(dev: u16, cmd: Command, sector: u32) -> Request {
        Request {
            dev,
            cmd,
            error_count: 0,
            start_sector: sector,
            sector_count: 2,
            buf_slot: 0,
            next: None,
            in_use: true,
        }
    }

    #[test]
    fn elevator_orders_reads_before_writes_same_device() {
        let r = req(1, Command::Read, 10);
        let w = req(1, Command::Write, 5);
        assert!(ordered(&r, &w));
        assert!(!ordered(&w, &r));
    }

    #[test]
    fn elevator_orders_by_sector_within_same_command() {
        let a = req(1, Command::Read, 10);
        let b = req(1, Command::Read, 20);
        assert!(ordered(&a, &b));
        assert!(!ordered(&b, &a));
    }
}
