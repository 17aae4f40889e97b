//! Compile-time kernel limits.
//!
//! Values match the historical defaults this kernel's design is drawn from
//! (see `original_source/` in the retrieval pack); sizes spec.md left as
//! "e.g." are pinned to those defaults so the on-disk layout and behaviour
//! are reproducible.

/// Maximum number of task-table slots.
pub const NR_TASKS: usize = 64;

/// Open file descriptors per task.
pub const NR_OPEN: usize = 20;

/// System-wide open file objects.
pub const NR_FILE: usize = 64;

/// In-memory inode cache slots.
pub const NR_INODE: usize = 32;

/// Mounted-superblock table slots.
pub const NR_SUPER: usize = 8;

/// Block-request pool slots.
pub const NR_REQUEST: usize = 32;

/// Buffer-cache pool slots (1 KiB buffers).
pub const NR_BUF: usize = 64;

/// Buffer-cache hash table bucket count. Must be a power of two.
pub const NR_HASH: usize = 32;

/// Disk block size in bytes (MINIX v1).
pub const BLOCK_SIZE: usize = 1024;

/// Inode bitmap buffer slots in a superblock.
pub const I_MAP_SLOTS: usize = 8;

/// Zone bitmap buffer slots in a superblock.
pub const Z_MAP_SLOTS: usize = 8;

/// On-disk inode record size.
pub const INODE_SIZE: usize = 32;

/// Inodes packed per disk block.
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// Directory entry size (2-byte inode number + 14-byte name).
pub const DIR_ENTRY_SIZE: usize = 16;

/// Maximum (non-truncated) file name length in a directory entry.
pub const NAME_LEN: usize = 14;

/// Number of direct zone pointers in an inode.
pub const NR_DIRECT_ZONES: usize = 7;

/// Zone-pointer slots per indirect block.
pub const ZONES_PER_BLOCK: usize = BLOCK_SIZE / 2;

/// One page: the size of a pipe's circular buffer.
pub const PIPE_SIZE: usize = 4096;

/// Page size on this architecture.
pub const PAGE_SIZE: usize = 4096;

/// Bytes covered by one page-directory entry (4 MiB).
pub const PGDIR_SPAN: usize = 4 * 1024 * 1024;

/// Page-table/page-directory entries per table.
pub const PTRS_PER_TABLE: usize = 1024;

/// Physical memory below this mark is never paged (kernel low memory).
pub const LOW_MEM: usize = 0x0010_0000;

/// Size in bytes of the region the page-frame allocator manages.
pub const PAGING_MEMORY: usize = 15 * 1024 * 1024;

/// Number of frames the page-frame allocator manages.
pub const PAGING_PAGES: usize = PAGING_MEMORY / PAGE_SIZE;

/// Sentinel frame-map byte value for a permanently reserved frame.
pub const FRAME_RESERVED: u8 = 100;

/// Max size in bytes of the argv/envp staging area built during execve.
pub const EXEC_STAGING_SIZE: usize = 128 * 1024;

/// Max pages used to back the execve staging area.
pub const EXEC_STAGING_PAGES: usize = 32;

/// Cap on text+data+bss for an a.out image.
pub const MAX_EXEC_SIZE: usize = 48 * 1024 * 1024;

/// Per-task user data/stack segment span (also used as fork's copy_range unit).
pub const TASK_SIZE: usize = 64 * 1024 * 1024;

/// Max number of arguments execve will stage.
pub const MAXARG: usize = 32;

/// Max length of a path.
pub const MAXPATH: usize = 128;

/// Per-task private kernel stack size.
pub const KSTACK_SIZE: usize = 2 * PAGE_SIZE;

/// Timer interrupt frequency; `proc::sched::ticks()` advances once per
/// tick and every task's `utime`/`stime`/`cutime`/`cstime` are counted
/// in ticks, not seconds.
pub const HZ: u64 = 100;

/// Number of tty line-discipline instances.
pub const NR_TTY: usize = 4;

/// Capacity in bytes of each tty ring queue (raw/secondary/write).
pub const TTY_BUF_SIZE: usize = 1024;

/// Root device (major, minor) baked in at boot; real systems read this
/// from the boot sector (spec.md §6) but the filesystem layer only needs
/// the packed dev number once the image builder (out of scope) hands it
/// to `kernel_main`.
pub const ROOTDEV: u16 = mkdev(3, 1);

/// Pack a (major, minor) device pair the way this kernel's dev_t does:
/// major in the high byte, minor in the low byte.
pub const fn mkdev(major: u8, minor: u8) -> u16 {
    ((major as u16) << 8) | minor as u16
}

pub const fn major(dev: u16) -> u8 {
    (dev >> 8) as u8
}

pub const fn minor(dev: u16) -> u8 {
    (dev & 0xff) as u8
}
