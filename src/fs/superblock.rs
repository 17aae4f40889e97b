//! The superblock table (spec.md §4.5, §6). MINIX v1 on-disk layout:
//! block 0 unused, block 1 the superblock, then `i_map_slots` inode-
//! bitmap blocks, then `z_map_slots` zone-bitmap blocks, then the inode
//! table (`INODES_PER_BLOCK` 32-byte records per block), then data
//! zones starting at `first_data_zone`.

use crate::bio;
use crate::errno::{Error, KResult};
use crate::fs::bitmap;
use crate::fs::inode::{self, Inode, InodeRef, Mode};
use crate::lock::Spinlock;
use crate::param::{
    BLOCK_SIZE, INODES_PER_BLOCK, INODE_SIZE, I_MAP_SLOTS, NR_DIRECT_ZONES, NR_SUPER, Z_MAP_SLOTS,
};
use crate::proc::wait::WaitQueue;

pub const MAGIC: u16 = 0x137F;

#[derive(Clone, Copy)]
pub struct Super {
    pub dev: u16,
    pub ninodes: u16,
    pub nzones: u16,
    pub imap_blocks: u16,
    pub zmap_blocks: u16,
    pub first_data_zone: u16,
    pub log_zone_size: u16,
    pub max_size: u32,
    /// Buffer-cache slot indices backing the bitmap blocks.
    pub imap_bufs: [Option<usize>; I_MAP_SLOTS],
    pub zmap_bufs: [Option<usize>; Z_MAP_SLOTS],
    pub mounted_on: Option<InodeRef>,
    pub root: Option<InodeRef>,
    pub read_only: bool,
    pub dirty: bool,
    pub locked: bool,
    in_use: bool,
}

impl Super {
    const fn empty() -> Self {
        Self {
            dev: 0,
            ninodes: 0,
            nzones: 0,
            imap_blocks: 0,
            zmap_blocks: 0,
            first_data_zone: 0,
            log_zone_size: 0,
            max_size: 0,
            imap_bufs: [None; I_MAP_SLOTS],
            zmap_bufs: [None; Z_MAP_SLOTS],
            mounted_on: None,
            root: None,
            read_only: false,
            dirty: false,
            locked: false,
            in_use: false,
        }
    }

    fn inode_block(&self, num: u32) -> u32 {
        2 + self.imap_blocks as u32 + self.zmap_blocks as u32 + (num - 1) / INODES_PER_BLOCK as u32
    }
}

struct Table {
    supers: [Super; NR_SUPER],
}

static TABLE: Spinlock<Table> = Spinlock::new(
    "super_table",
    Table {
        supers: [Super::empty(); NR_SUPER],
    },
);
static WAIT: WaitQueue = WaitQueue::new();

pub fn get_super(dev: u16) -> Option<usize> {
    loop {
        let table = TABLE.lock();
        if let Some(i) = (0..NR_SUPER).find(|&i| table.supers[i].in_use && table.supers[i].dev == dev) {
            if table.supers[i].locked {
                WAIT.sleep(table);
                continue;
            }
            return Some(i);
        }
        return None;
    }
}

/// Read block 1, validate the magic, load the bitmap blocks, and force
/// bit 0 of the first bitmap block of each map to 1 (spec.md §4.5
/// `read_super`).
pub fn read_super(dev: u16) -> KResult<usize> {
    if let Some(i) = get_super(dev) {
        return Ok(i);
    }

    let mut table = TABLE.lock();
    let slot = (0..NR_SUPER)
        .find(|&i| !table.supers[i].in_use)
        .ok_or(Error::NoSpc)?;
    table.supers[slot] = Super::empty();
    table.supers[slot].dev = dev;
    table.supers[slot].in_use = true;
    table.supers[slot].locked = true;
    drop(table);

    let sb_slot = bio::bread(dev, 1)?;
    let (ninodes, nzones, imap_blocks, zmap_blocks, first_data_zone, log_zone_size, max_size, magic) =
        bio::with(sb_slot, |b| {
            let d = &b.data;
            (
                u16::from_le_bytes([d[0], d[1]]),
                u16::from_le_bytes([d[2], d[3]]),
                u16::from_le_bytes([d[4], d[5]]),
                u16::from_le_bytes([d[6], d[7]]),
                u16::from_le_bytes([d[8], d[9]]),
                u16::from_le_bytes([d[10], d[11]]),
                u32::from_le_bytes([d[12], d[13], d[14], d[15]]),
                u16::from_le_bytes([d[18], d[19]]),
            )
        });
    bio::brelse(sb_slot);

    if magic != MAGIC {
        let mut table = TABLE.lock();
        table.supers[slot].in_use = false;
        return Err(Error::Inval);
    }

    let mut table = TABLE.lock();
    table.supers[slot].ninodes = ninodes;
    table.supers[slot].nzones = nzones;
    table.supers[slot].imap_blocks = imap_blocks;
    table.supers[slot].zmap_blocks = zmap_blocks;
    table.supers[slot].first_data_zone = first_data_zone;
    table.supers[slot].log_zone_size = log_zone_size;
    table.supers[slot].max_size = max_size;
    drop(table);

    for i in 0..(imap_blocks as usize).min(I_MAP_SLOTS) {
        let buf = bio::bread(dev, 2 + i as u32)?;
        if i == 0 {
            bio::with_mut(buf, |b| bitmap::reserve_sentinel(&mut b.data));
        }
        TABLE.lock().supers[slot].imap_bufs[i] = Some(buf);
    }
    for i in 0..(zmap_blocks as usize).min(Z_MAP_SLOTS) {
        let buf = bio::bread(dev, 2 + imap_blocks as u32 + i as u32)?;
        if i == 0 {
            bio::with_mut(buf, |b| bitmap::reserve_sentinel(&mut b.data));
        }
        TABLE.lock().supers[slot].zmap_bufs[i] = Some(buf);
    }

    let mut table = TABLE.lock();
    table.supers[slot].locked = false;
    drop(table);
    WAIT.wake_up();
    Ok(slot)
}

/// Release bitmap buffers and the slot. Refuses the root device or a
/// currently-mounted filesystem (spec.md §4.5 `put_super`).
pub fn put_super(slot: usize) -> KResult<()> {
    let mut table = TABLE.lock();
    if table.supers[slot].dev == crate::param::ROOTDEV {
        return Err(Error::Busy);
    }
    if table.supers[slot].mounted_on.is_some() {
        return Err(Error::Busy);
    }
    for b in table.supers[slot].imap_bufs.iter().flatten().copied().collect::<arrayvec::ArrayVec<usize, 8>>() {
        drop(table);
        bio::brelse(b);
        table = TABLE.lock();
    }
    for b in table.supers[slot].zmap_bufs.iter().flatten().copied().collect::<arrayvec::ArrayVec<usize, 8>>() {
        drop(table);
        bio::brelse(b);
        table = TABLE.lock();
    }
    table.supers[slot].in_use = false;
    Ok(())
}

/// Mount `dev` at directory inode `dir` (spec.md §4.5 `mount`): `dir`
/// must be an empty-count directory that is not itself a mount point.
pub fn mount(dev: u16, dir: InodeRef, read_only: bool) -> KResult<()> {
    let is_dir = inode::with(dir, |n| n.mode.is_dir() && n.count == 1 && !n.mounted);
    if !is_dir {
        return Err(Error::Busy);
    }
    let slot = read_super(dev)?;
    let root = root_inode(slot)?;
    let mut table = TABLE.lock();
    table.supers[slot].mounted_on = Some(dir);
    table.supers[slot].read_only = read_only;
    drop(table);
    let _ = root;
    inode::with_mut(dir, |n| n.mounted = true);
    Ok(())
}

/// Fails EBUSY if any in-memory inode still references the device
/// (spec.md §4.5 `umount`). On success, breaks the mount link both ways
/// — the superblock's own cached root reference and the host directory's
/// `mounted` flag — before releasing the superblock slot, so a later
/// `mount` of the same or another device onto the same directory is not
/// spuriously refused.
pub fn umount(dev: u16) -> KResult<()> {
    let slot = get_super(dev).ok_or(Error::Inval)?;
    let (root, mounted_on) = with(slot, |s| (s.root, s.mounted_on));

    if inode::any_in_use(dev, root) {
        return Err(Error::Busy);
    }

    if let Some(dir) = mounted_on {
        inode::with_mut(dir, |n| n.mounted = false);
    }
    {
        let mut table = TABLE.lock();
        table.supers[slot].mounted_on = None;
        table.supers[slot].root = None;
    }
    if let Some(r) = root {
        inode::iput(r);
    }

    put_super(slot)
}

pub fn root_inode(slot: usize) -> KResult<InodeRef> {
    let dev = TABLE.lock().supers[slot].dev;
    if let Some(r) = TABLE.lock().supers[slot].root {
        return Ok(r);
    }
    let r = inode::iget(dev, 1)?;
    TABLE.lock().supers[slot].root = Some(r);
    Ok(r)
}

pub fn with<R>(slot: usize, f: impl FnOnce(&Super) -> R) -> R {
    f(&TABLE.lock().supers[slot])
}

/// The device whose superblock is mounted on directory inode `dir`, if
/// any (spec.md §9: "cyclic references between a mount point and the
/// mounted filesystem's root ... represented by two weak cross-pointers").
pub fn device_mounted_at(dir: InodeRef) -> Option<u16> {
    let table = TABLE.lock();
    table
        .supers
        .iter()
        .find(|s| s.in_use && s.mounted_on == Some(dir))
        .map(|s| s.dev)
}

/// The host directory inode `dev`'s filesystem is mounted on, in the
/// parent filesystem (spec.md §4.5 name resolution: ".." at a
/// filesystem root).
pub fn mount_point_of(dev: u16) -> Option<InodeRef> {
    let table = TABLE.lock();
    table
        .supers
        .iter()
        .find(|s| s.in_use && s.dev == dev)
        .and_then(|s| s.mounted_on)
}

/// Read the on-disk inode record for `(dev, num)` into cache slot
/// `cache_slot` (spec.md §4.5 `read_inode`).
pub fn read_inode(dev: u16, num: u32, cache_slot: usize) {
    let sb_slot = get_super(dev).expect("read_inode: no superblock for device");
    let block = with(sb_slot, |s| s.inode_block(num));
    let buf = match bio::bread(dev, block) {
        Ok(b) => b,
        Err(_) => return,
    };
    let rec_off = ((num - 1) as usize % INODES_PER_BLOCK) * INODE_SIZE;
    bio::with(buf, |b| {
        let d = &b.data[rec_off..rec_off + INODE_SIZE];
        // MINIX v1 on-disk inode, 32 bytes: mode(2) uid(2) size(4)
        // time(4) gid(1) nlinks(1) zone[9](2 each).
        let mode = Mode::from_bits_truncate(u16::from_le_bytes([d[0], d[1]]));
        let uid = u16::from_le_bytes([d[2], d[3]]);
        let size = u32::from_le_bytes([d[4], d[5], d[6], d[7]]);
        let mtime = u32::from_le_bytes([d[8], d[9], d[10], d[11]]);
        let gid = d[12];
        let nlinks = d[13] as u16;
        let mut zones = [0u32; NR_DIRECT_ZONES + 2];
        for (i, z) in zones.iter_mut().enumerate() {
            let off = 14 + i * 2;
            *z = u16::from_le_bytes([d[off], d[off + 1]]) as u32;
        }
        crate::fs::inode::with_mut(InodeRef(cache_slot), |inode: &mut Inode| {
            inode.mode = mode;
            inode.uid = uid;
            inode.gid = gid as u16;
            inode.size = size;
            inode.mtime = mtime;
            inode.atime = mtime;
            inode.ctime = mtime;
            inode.nlinks = nlinks;
            inode.zones = zones;
        });
    });
    bio::brelse(buf);
}

/// Marshal an in-memory inode back to disk (spec.md §4.5
/// `write_inode`). Idempotent and safe to retry.
pub fn write_inode(cache_slot: usize) {
    let (dev, num) = crate::fs::inode::with(InodeRef(cache_slot), |n| (n.dev, n.num));
    let sb_slot = match get_super(dev) {
        Some(s) => s,
        None => return,
    };
    let block = with(sb_slot, |s| s.inode_block(num));
    let buf = match bio::bread(dev, block) {
        Ok(b) => b,
        Err(_) => return,
    };
    let rec_off = ((num - 1) as usize % INODES_PER_BLOCK) * INODE_SIZE;
    crate::fs::inode::with(InodeRef(cache_slot), |n| {
        bio::with_mut(buf, |b| {
            let d = &mut b.data[rec_off..rec_off + INODE_SIZE];
            d[0..2].copy_from_slice(&n.mode.bits().to_le_bytes());
            d[2..4].copy_from_slice(&n.uid.to_le_bytes());
            d[4..8].copy_from_slice(&n.size.to_le_bytes());
            d[8..12].copy_from_slice(&n.mtime.to_le_bytes());
            d[12] = n.gid as u8;
            d[13] = n.nlinks as u8;
            for (i, z) in n.zones.iter().enumerate() {
                let off = 14 + i * 2;
                d[off..off + 2].copy_from_slice(&(*z as u16).to_le_bytes());
            }
        });
    });
    bio::mark_dirty(buf);
    bio::brelse(buf);
}

/// Allocate a free zone number on `dev` (spec.md §4.5, via the zone
/// bitmap), or `None` when the filesystem is full.
pub fn new_zone(dev: u16) -> Option<u32> {
    let slot = get_super(dev)?;
    let bufs = TABLE.lock().supers[slot].zmap_bufs;
    let mut handles: arrayvec::ArrayVec<usize, Z_MAP_SLOTS> = bufs.into_iter().flatten().collect();
    let first_data_zone = with(slot, |s| s.first_data_zone as u32);
    let bit = alloc_bit_over_bufs(&mut handles)?;
    Some(first_data_zone - 1 + bit)
}

pub fn free_zone(dev: u16, zone: u32) {
    if let Some(slot) = get_super(dev) {
        let first_data_zone = with(slot, |s| s.first_data_zone as u32);
        let bufs = TABLE.lock().supers[slot].zmap_bufs;
        let mut handles: arrayvec::ArrayVec<usize, Z_MAP_SLOTS> = bufs.into_iter().flatten().collect();
        free_bit_over_bufs(&mut handles, zone + 1 - first_data_zone);
    }
}

pub fn new_inode(dev: u16) -> Option<u32> {
    let slot = get_super(dev)?;
    let bufs = TABLE.lock().supers[slot].imap_bufs;
    let mut handles: arrayvec::ArrayVec<usize, I_MAP_SLOTS> = bufs.into_iter().flatten().collect();
    alloc_bit_over_bufs(&mut handles)
}

pub fn free_inode(dev: u16, num: u32) {
    if let Some(slot) = get_super(dev) {
        let bufs = TABLE.lock().supers[slot].imap_bufs;
        let mut handles: arrayvec::ArrayVec<usize, I_MAP_SLOTS> = bufs.into_iter().flatten().collect();
        free_bit_over_bufs(&mut handles, num);
    }
}

/// `bitmap::alloc_bit` wants `&mut [&mut [u8; BLOCK_SIZE]]` borrowed
/// from several buffer-cache slots at once; the slots named in
/// `handles` are always distinct, so raw pointers back out to mutable
/// references safely.
fn alloc_bit_over_bufs(handles: &mut [usize]) -> Option<u32> {
    let mut refs: arrayvec::ArrayVec<*mut [u8; BLOCK_SIZE], 8> = arrayvec::ArrayVec::new();
    for h in handles.iter() {
        bio::with_mut(*h, |b| refs.push(&mut b.data as *mut _));
    }
    // SAFETY: each pointer comes from a distinct buffer-cache slot held
    // live by `handles`, none aliasing another.
    let mut slices: arrayvec::ArrayVec<&mut [u8; BLOCK_SIZE], 8> =
        refs.iter().map(|p| unsafe { &mut **p }).collect();
    let bit = bitmap::alloc_bit(&mut slices);
    for h in handles.iter() {
        bio::mark_dirty(*h);
    }
    bit
}

fn free_bit_over_bufs(handles: &mut [usize], bit_no: u32) {
    let mut refs: arrayvec::ArrayVec<*mut [u8; BLOCK_SIZE], 8> = arrayvec::ArrayVec::new();
    for h in handles.iter() {
        bio::with_mut(*h, |b| refs.push(&mut b.data as *mut _));
    }
    let mut slices: arrayvec::ArrayVec<&mut [u8; BLOCK_SIZE], 8> =
        refs.iter().map(|p| unsafe { &mut **p }).collect();
    bitmap::free_bit(&mut slices, bit_no);
    for h in handles.iter() {
        bio::mark_dirty(*h);
    }
}
