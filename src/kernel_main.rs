//! The boot sequence: bring each subsystem up in the order its
//! dependencies require, then hand off to the scheduler. CPU bring-up,
//! the IDT/GDT, and loading the kernel image itself are out of scope
//! (spec.md §1) — by the time this runs, paging is live, one page
//! directory is installed, and a console device is already registered.
//! This is the one place that knowledge is allowed to leak in as plain
//! parameters instead of a registered capability record, because unlike
//! the block driver or the tty line, there is exactly one caller, ever.

use crate::mm::vm;
use crate::param::ROOTDEV;
use crate::proc::{lifecycle, sched};

/// Path of the first user program, staged directly into task 1's
/// address space by [`lifecycle::bootstrap_init_task`] (spec.md §1: the
/// bootstrap/image builder that actually puts this file on disk is out
/// of scope; this kernel only has to be able to `execve` it once a
/// filesystem image shows up at `ROOTDEV`).
const INIT_PATH: &[u8] = b"/bin/init";

/// Entry point the (out-of-scope) bootstrap trampoline calls once
/// paging, the physical memory map, and a console device are ready.
///
/// # Safety
/// `pgdir_pa` must be the physical address of a valid, currently active
/// page directory; `mem_start`/`mem_end` must describe physical memory
/// this kernel is free to hand out as page frames — neither holding the
/// kernel image itself nor any memory below 1 MiB (spec.md §4.1
/// `mem_init`: "frames below `LOW_MEM` ... are never handed out").
pub unsafe fn kernel_main(mem_start: u32, mem_end: u32, pgdir_pa: u32) -> ! {
    crate::kprintln!("kernel: booting");

    crate::mm::mem_init(mem_start, mem_end);
    // SAFETY: caller's contract above.
    unsafe { vm::init(pgdir_pa) };
    crate::kprintln!("kernel: page-frame allocator and paging engine up");

    let sb = fs_mount_root();
    let root = crate::fs::superblock::root_inode(sb).expect("kernel_main: read root inode");
    crate::kprintln!("kernel: root filesystem mounted");

    lifecycle::bootstrap_init_task(INIT_PATH, root).expect("kernel_main: start init task");
    crate::kprintln!("kernel: init task running, entering scheduler");

    sched::scheduler()
}

fn fs_mount_root() -> usize {
    crate::fs::superblock::read_super(ROOTDEV).expect("kernel_main: mount root filesystem")
}
