//! Truncate (spec.md §4.5): free direct blocks, the single-indirect's
//! 512 pointers and the block itself, then the double-indirect's
//! pointer block plus each sub-indirect plus the outer block; zero
//! size; mark dirty.

use crate::bio;
use crate::fs::inode::{self, InodeRef};
use crate::fs::superblock;
use crate::param::{NR_DIRECT_ZONES, ZONES_PER_BLOCK};

fn free_indirect_block(dev: u16, zone: u32) {
    if let Ok(slot) = bio::bread(dev, zone) {
        let entries: arrayvec::ArrayVec<u32, ZONES_PER_BLOCK> = bio::with(slot, |b| {
            (0..ZONES_PER_BLOCK)
                .map(|i| u16::from_le_bytes([b.data[i * 2], b.data[i * 2 + 1]]) as u32)
                .collect()
        });
        bio::brelse(slot);
        for z in entries {
            if z != 0 {
                superblock::free_zone(dev, z);
            }
        }
    }
    superblock::free_zone(dev, zone);
}

/// Free every block owned by `ir` and reset it to an empty file (spec.md
/// §4.5 Truncate; used by `iput` when `nlinks` reaches 0 and by
/// `O_TRUNC`).
pub fn truncate(ir: InodeRef) {
    let dev = inode::with(ir, |n| n.dev);
    let zones = inode::with(ir, |n| n.zones);

    for &z in zones.iter().take(NR_DIRECT_ZONES) {
        if z != 0 {
            superblock::free_zone(dev, z);
        }
    }

    let single = zones[NR_DIRECT_ZONES];
    if single != 0 {
        if let Ok(slot) = bio::bread(dev, single) {
            let entries: arrayvec::ArrayVec<u32, ZONES_PER_BLOCK> = bio::with(slot, |b| {
                (0..ZONES_PER_BLOCK)
                    .map(|i| u16::from_le_bytes([b.data[i * 2], b.data[i * 2 + 1]]) as u32)
                    .collect()
            });
            bio::brelse(slot);
            for z in entries {
                if z != 0 {
                    superblock::free_zone(dev, z);
                }
            }
        }
        superblock::free_zone(dev, single);
    }

    let double = zones[NR_DIRECT_ZONES + 1];
    if double != 0 {
        if let Ok(slot) = bio::bread(dev, double) {
            let outer: arrayvec::ArrayVec<u32, ZONES_PER_BLOCK> = bio::with(slot, |b| {
                (0..ZONES_PER_BLOCK)
                    .map(|i| u16::from_le_bytes([b.data[i * 2], b.data[i * 2 + 1]]) as u32)
                    .collect()
            });
            bio::brelse(slot);
            for z in outer {
                if z != 0 {
                    free_indirect_block(dev, z);
                }
            }
        }
        superblock::free_zone(dev, double);
    }

    inode::with_mut(ir, |n| {
        n.zones = [0; NR_DIRECT_ZONES + 2];
        n.size = 0;
        n.dirty = true;
    });
}
