//! C5: the MINIX-v1-compatible filesystem engine (spec.md §4.5, §6) —
//! superblocks, the inode cache, the block map, directory lookup, name
//! resolution, truncate, and pipes.

pub mod bitmap;
pub mod bmap;
pub mod dir;
pub mod inode;
pub mod io;
pub mod ops;
pub mod path;
pub mod pipe;
pub mod stat;
pub mod superblock;
pub mod truncate;

pub use inode::InodeRef;
