//! In-memory inode cache (spec.md §3 "Inode (in-memory)", §4.5 "Inode
//! cache"). `NR_INODE` fixed slots, reused by reference count like the
//! teacher's buffer cache but without its Arena machinery — see
//! `DESIGN.md` for why: this kernel has no compiler-checked borrow
//! story for objects shared with interrupt handlers, so slots are
//! addressed by plain index and refcounts are managed by hand, the way
//! the original C kernel does it.

use crate::errno::{Error, KResult};
use crate::lock::Spinlock;
use crate::param::{NR_DIRECT_ZONES, NR_INODE};
use crate::proc::wait::WaitQueue;

bitflags::bitflags! {
    pub struct Mode: u16 {
        const IFMT   = 0o170000;
        const IFREG  = 0o100000;
        const IFDIR  = 0o040000;
        const IFCHR  = 0o020000;
        const IFBLK  = 0o060000;
        const IFIFO  = 0o010000;
        const ISUID  = 0o004000;
        const ISGID  = 0o002000;
        const ISVTX  = 0o001000;
        const IRWXU  = 0o000700;
        const IRWXG  = 0o000070;
        const IRWXO  = 0o000007;
    }
}

impl Mode {
    pub fn is_reg(self) -> bool {
        self.contains(Mode::IFREG)
    }
    pub fn is_dir(self) -> bool {
        self.contains(Mode::IFDIR)
    }
    pub fn is_chr(self) -> bool {
        self.contains(Mode::IFCHR)
    }
    pub fn is_blk(self) -> bool {
        self.contains(Mode::IFBLK)
    }
}

/// A live in-memory inode. `zones[0..7]` direct, `[7]` single-indirect,
/// `[8]` double-indirect (spec.md §3, §6).
#[derive(Clone, Copy)]
pub struct Inode {
    pub dev: u16,
    pub num: u32,
    pub mode: Mode,
    pub nlinks: u16,
    pub uid: u16,
    pub gid: u16,
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub zones: [u32; NR_DIRECT_ZONES + 2],

    pub count: u32,
    pub dirty: bool,
    pub locked: bool,
    pub mounted: bool,
    /// Pipe inodes repurpose `size` as the physical address of the
    /// one-page circular buffer; `pipe_head`/`pipe_tail` are cursors into
    /// it and `pipe_readers`/`pipe_writers` count open ends (spec.md §3,
    /// §4.5 "Pipe inode").
    pub pipe: bool,
    pub pipe_head: u32,
    pub pipe_tail: u32,
    pub pipe_readers: u8,
    pub pipe_writers: u8,
    in_use: bool,
}

impl Inode {
    const fn empty() -> Self {
        Self {
            dev: 0,
            num: 0,
            mode: Mode::empty(),
            nlinks: 0,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            zones: [0; NR_DIRECT_ZONES + 2],
            count: 0,
            dirty: false,
            locked: false,
            mounted: false,
            pipe: false,
            pipe_head: 0,
            pipe_tail: 0,
            pipe_readers: 0,
            pipe_writers: 0,
            in_use: false,
        }
    }

    pub fn direct_zone(&self, i: usize) -> u32 {
        self.zones[i]
    }
}

/// A handle to a live slot in the inode cache. Plain index, `Copy` so it
/// can sit inside `Task` (which must itself be `Copy`); acquiring and
/// releasing a reference is done explicitly via `iget`/`iput`, not RAII
/// (spec.md §5: shared tables are mutated under short lock windows, not
/// behind destructors that might run during an interrupt).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InodeRef(pub usize);

struct Cache {
    slots: [Inode; NR_INODE],
}

impl Cache {
    const fn new() -> Self {
        Self {
            slots: [Inode::empty(); NR_INODE],
        }
    }
}

static CACHE: Spinlock<Cache> = Spinlock::new("inode_cache", Cache::new());

const fn wait_array() -> [WaitQueue; NR_INODE] {
    const W: WaitQueue = WaitQueue::new();
    [W; NR_INODE]
}

/// One wait channel per slot rather than one shared channel, so waking
/// an inode's lock never stirs tasks waiting on an unrelated one.
static WAITS: [WaitQueue; NR_INODE] = wait_array();

/// Find or load (dev, num), bumping its reference count (spec.md §4.5
/// `iget`). Crossing a mount point is the caller's job in `fs::path`,
/// since that needs the superblock table too.
pub fn iget(dev: u16, num: u32) -> KResult<InodeRef> {
    loop {
        let mut cache = CACHE.lock();
        if let Some(i) = (0..NR_INODE).find(|&i| {
            cache.slots[i].in_use && cache.slots[i].dev == dev && cache.slots[i].num == num
        }) {
            if cache.slots[i].locked {
                WAITS[i].sleep(cache);
                continue;
            }
            cache.slots[i].count += 1;
            return Ok(InodeRef(i));
        }

        let free = (0..NR_INODE).find(|&i| !cache.slots[i].in_use && cache.slots[i].count == 0);
        let slot = match free {
            Some(i) => i,
            None => return Err(Error::NoSpc),
        };
        cache.slots[slot] = Inode::empty();
        cache.slots[slot].dev = dev;
        cache.slots[slot].num = num;
        cache.slots[slot].in_use = true;
        cache.slots[slot].count = 1;
        cache.slots[slot].locked = true;
        drop(cache);

        crate::fs::superblock::read_inode(dev, num, slot);

        let mut cache = CACHE.lock();
        cache.slots[slot].locked = false;
        WAITS[slot].wake_up();
        return Ok(InodeRef(slot));
    }
}

/// Release a reference; writes back and frees the underlying storage
/// when the link count has dropped to zero (spec.md §4.5 `iput`).
pub fn iput(ir: InodeRef) {
    loop {
        let mut cache = CACHE.lock();
        let slot = ir.0;
        if cache.slots[slot].count == 0 {
            return;
        }
        if cache.slots[slot].locked {
            WAITS[slot].sleep(cache);
            continue;
        }
        if cache.slots[slot].pipe {
            cache.slots[slot].count -= 1;
            if cache.slots[slot].count == 0 {
                let pa = cache.slots[slot].size;
                cache.slots[slot].in_use = false;
                drop(cache);
                if pa != 0 {
                    crate::mm::free_frame(pa);
                }
            }
            return;
        }
        if cache.slots[slot].count != 1 {
            cache.slots[slot].count -= 1;
            return;
        }
        if cache.slots[slot].nlinks == 0 {
            cache.slots[slot].locked = true;
            drop(cache);
            crate::fs::truncate::truncate(ir);
            let mut cache = CACHE.lock();
            cache.slots[slot].nlinks = 0;
            cache.slots[slot].dirty = false;
            cache.slots[slot].in_use = false;
            cache.slots[slot].locked = false;
            cache.slots[slot].count = 0;
            WAITS[slot].wake_up();
            return;
        }
        if cache.slots[slot].dirty {
            cache.slots[slot].locked = true;
            drop(cache);
            crate::fs::superblock::write_inode(slot);
            let mut cache = CACHE.lock();
            cache.slots[slot].locked = false;
            cache.slots[slot].count = 0;
            cache.slots[slot].in_use = false;
            WAITS[slot].wake_up();
            return;
        }
        cache.slots[slot].count = 0;
        cache.slots[slot].in_use = false;
        return;
    }
}

/// Whether any in-memory inode still references `dev` (spec.md §4.5
/// `umount`: "fails EBUSY if any in-memory inode still references the
/// device"). `exclude` lets the superblock's own cached root reference
/// (held permanently while mounted, released by `umount` itself) be
/// left out of the check.
pub fn any_in_use(dev: u16, exclude: Option<InodeRef>) -> bool {
    let cache = CACHE.lock();
    (0..NR_INODE).any(|i| {
        cache.slots[i].in_use
            && cache.slots[i].count > 0
            && cache.slots[i].dev == dev
            && exclude != Some(InodeRef(i))
    })
}

pub fn with<R>(ir: InodeRef, f: impl FnOnce(&Inode) -> R) -> R {
    let cache = CACHE.lock();
    f(&cache.slots[ir.0])
}

pub fn with_mut<R>(ir: InodeRef, f: impl FnOnce(&mut Inode) -> R) -> R {
    let mut cache = CACHE.lock();
    f(&mut cache.slots[ir.0])
}

pub fn lock(ir: InodeRef) {
    loop {
        let mut cache = CACHE.lock();
        if !cache.slots[ir.0].locked {
            cache.slots[ir.0].locked = true;
            return;
        }
        WAITS[ir.0].sleep(cache);
    }
}

pub fn unlock(ir: InodeRef) {
    let mut cache = CACHE.lock();
    cache.slots[ir.0].locked = false;
    drop(cache);
    WAITS[ir.0].wake_up();
}

/// Consume an empty slot for a new pipe inode (spec.md §4.5
/// `get_pipe_inode`); the caller (`fs::pipe`) still has to allocate the
/// circular buffer page and stash its address.
pub fn get_pipe_inode() -> KResult<InodeRef> {
    let mut cache = CACHE.lock();
    let slot = (0..NR_INODE)
        .find(|&i| !cache.slots[i].in_use && cache.slots[i].count == 0)
        .ok_or(Error::NoSpc)?;
    cache.slots[slot] = Inode::empty();
    cache.slots[slot].in_use = true;
    cache.slots[slot].pipe = true;
    cache.slots[slot].count = 2;
    cache.slots[slot].pipe_readers = 1;
    cache.slots[slot].pipe_writers = 1;
    Ok(InodeRef(slot))
}
