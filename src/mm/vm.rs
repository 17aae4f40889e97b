//! C2: the virtual-memory engine (spec.md §4.2). One page directory is
//! shared by the whole system; a task's isolation comes from its code
//! and data segment descriptors being based at `task.base`, not from a
//! private `cr3` (spec.md §4.7, and `proc::task::Task::base`'s doc
//! comment). `copy_range`/`free_range` operate 4 MiB at a time because
//! that is exactly the span of one page-directory entry and one task's
//! segment window (`param::TASK_SIZE` == `param::PGDIR_SPAN` × 16... no,
//! see below) — in this design `TASK_SIZE` is 16 page-directory entries.

use crate::arch::x86::asm;
use crate::arch::x86::pte::{PageTableEntry, PteFlags};
use crate::errno::{Error, KResult};
use crate::lock::Spinlock;
use crate::mm::{frame, phys};
use crate::param::{PAGE_SIZE, PGDIR_SPAN, PTRS_PER_TABLE};

/// Guards every read/modify/write of the shared page directory and its
/// tables. Short critical sections only (spec.md §5): nothing here ever
/// sleeps.
static VM_LOCK: Spinlock<()> = Spinlock::new("vm", ());

static mut PGDIR_PA: u32 = 0;

/// Install the page directory physical address the (out-of-scope) boot
/// trampoline already built and is running on. Called once before any
/// task exists.
///
/// # Safety
/// `pa` must be the physical address of a valid, currently-active page
/// directory.
pub unsafe fn init(pa: u32) {
    PGDIR_PA = pa;
}

fn pgdir_pa() -> u32 {
    // SAFETY: set once at boot by `init` before any concurrent access.
    unsafe { PGDIR_PA }
}

fn pd_index(va: usize) -> usize {
    va / PGDIR_SPAN
}

fn pt_index(va: usize) -> usize {
    (va % PGDIR_SPAN) / PAGE_SIZE
}

fn read_entry(table_pa: u32, idx: usize) -> PageTableEntry {
    // SAFETY: callers hold `VM_LOCK`; `table_pa` is a page-aligned
    // physical address of a live page table or directory.
    let bytes = unsafe { phys::as_slice(table_pa, PAGE_SIZE) };
    let off = idx * 4;
    let word = u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);
    PageTableEntry(word)
}

fn write_entry(table_pa: u32, idx: usize, pte: PageTableEntry) {
    // SAFETY: see `read_entry`; the caller holds the only reference to
    // this table for the duration of the write (`VM_LOCK`).
    let bytes = unsafe { phys::as_mut_slice(table_pa, PAGE_SIZE) };
    let off = idx * 4;
    bytes[off..off + 4].copy_from_slice(&pte.0.to_le_bytes());
}

/// Copy page-directory and page-table entries for `size` bytes starting
/// at the 4 MiB-aligned `from`/`to` linear addresses (spec.md §4.2
/// `copy_range`). `from == 0` is the first-fork special case: only the
/// first 160 entries of the low table are copied (sharing the kernel's
/// low 640 KiB without allocating new tables for the rest).
pub fn copy_range(from: usize, to: usize, size: usize) -> KResult<()> {
    assert_eq!(from % PGDIR_SPAN, 0, "copy_range: from not 4 MiB aligned");
    assert_eq!(to % PGDIR_SPAN, 0, "copy_range: to not 4 MiB aligned");

    let _guard = VM_LOCK.lock();
    let pgdir = pgdir_pa();
    let first_pd = pd_index(from);
    let count_pd = (size + PGDIR_SPAN - 1) / PGDIR_SPAN;

    for i in 0..count_pd {
        let src_pde = read_entry(pgdir, first_pd + i);
        if !src_pde.is_present() {
            continue;
        }
        let dst_table_pa = frame::alloc_frame();
        if dst_table_pa == 0 {
            return Err(Error::NoMem);
        }
        let dst_pd_idx = pd_index(to) + i;
        write_entry(
            pgdir,
            dst_pd_idx,
            PageTableEntry::new(dst_table_pa, PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER),
        );

        let entries = if from == 0 && i == 0 {
            160
        } else {
            PTRS_PER_TABLE
        };
        let src_table_pa = src_pde.frame_pa();
        for j in 0..entries {
            let mut pte = read_entry(src_table_pa, j);
            if !pte.is_present() {
                continue;
            }
            pte = pte.with_writable(false);
            write_entry(src_table_pa, j, pte);
            write_entry(dst_table_pa, j, pte);
            if frame::is_paged(pte.frame_pa()) {
                frame::incr_refcount(pte.frame_pa());
            }
        }
    }

    unsafe { asm::flush_tlb_all() };
    Ok(())
}

/// Unmap and free every present page in `[from, from+size)`, plus the
/// page-table frames themselves (spec.md §4.2 `free_range`). Refuses
/// `from == 0` (would unmap the kernel).
pub fn free_range(from: usize, size: usize) -> KResult<()> {
    assert_ne!(from, 0, "free_range: refusing to unmap the kernel");
    assert_eq!(from % PGDIR_SPAN, 0, "free_range: not 4 MiB aligned");

    let _guard = VM_LOCK.lock();
    let pgdir = pgdir_pa();
    let first_pd = pd_index(from);
    let count_pd = (size + PGDIR_SPAN - 1) / PGDIR_SPAN;

    for i in 0..count_pd {
        let pde = read_entry(pgdir, first_pd + i);
        if !pde.is_present() {
            continue;
        }
        let table_pa = pde.frame_pa();
        for j in 0..PTRS_PER_TABLE {
            let pte = read_entry(table_pa, j);
            if pte.is_present() && frame::is_paged(pte.frame_pa()) {
                frame::free_frame(pte.frame_pa());
            }
            write_entry(table_pa, j, PageTableEntry::empty());
        }
        frame::free_frame(table_pa);
        write_entry(pgdir, first_pd + i, PageTableEntry::empty());
    }

    unsafe { asm::flush_tlb_all() };
    Ok(())
}

/// Install `pa` at `va`, allocating the page table on demand (spec.md
/// §4.2 `map_frame`). Refuses frames outside the paging region or with
/// refcount != 1. Returns `pa` on success, 0 on allocation failure.
pub fn map_frame(pa: u32, va: usize) -> u32 {
    if !frame::is_paged(pa) || frame::refcount(pa) != 1 {
        return 0;
    }
    let _guard = VM_LOCK.lock();
    let pgdir = pgdir_pa();
    let pd_idx = pd_index(va);
    let mut pde = read_entry(pgdir, pd_idx);
    if !pde.is_present() {
        let table_pa = frame::alloc_frame();
        if table_pa == 0 {
            return 0;
        }
        pde = PageTableEntry::new(table_pa, PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER);
        write_entry(pgdir, pd_idx, pde);
    }
    let table_pa = pde.frame_pa();
    let pt_idx = pt_index(va);
    write_entry(
        table_pa,
        pt_idx,
        PageTableEntry::new(pa, PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER),
    );
    unsafe { asm::invlpg(va) };
    pa
}

fn pte_ptr(va: usize) -> Option<(u32, usize)> {
    let pgdir = pgdir_pa();
    let pde = read_entry(pgdir, pd_index(va));
    if !pde.is_present() {
        return None;
    }
    Some((pde.frame_pa(), pt_index(va)))
}

/// Copy-on-write core: if `old` is a high-memory frame with refcount
/// exactly 1, just flip it writable in place. Otherwise allocate a
/// fresh frame, drop `old`'s refcount, install the new frame writable
/// at `va`, and byte-copy `old` into it (spec.md §4.2 `unshare`).
fn unshare(va: usize) -> KResult<()> {
    let _guard = VM_LOCK.lock();
    let (table_pa, pt_idx) = pte_ptr(va).ok_or(Error::Inval)?;
    let pte = read_entry(table_pa, pt_idx);
    let old = pte.frame_pa();

    if frame::is_paged(old) && frame::refcount(old) == 1 {
        write_entry(table_pa, pt_idx, pte.with_writable(true));
        unsafe { asm::invlpg(va) };
        return Ok(());
    }

    let new_pa = frame::alloc_frame();
    if new_pa == 0 {
        return Err(Error::NoMem);
    }
    if frame::is_paged(old) {
        frame::free_frame(old);
    }
    write_entry(
        table_pa,
        pt_idx,
        PageTableEntry::new(new_pa, PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER),
    );
    // SAFETY: `new_pa` was just allocated and is mapped nowhere else
    // yet; `old` is read-only to every other mapping sharing it.
    unsafe {
        let src = phys::as_slice(old, PAGE_SIZE);
        let dst = phys::as_mut_slice(new_pa, PAGE_SIZE);
        dst.copy_from_slice(src);
    }
    unsafe { asm::invlpg(va) };
    Ok(())
}

/// Write-protect fault handler (spec.md §4.2 `do_wp_page`).
pub fn do_wp_page(va: usize) -> KResult<()> {
    unshare(va & !(PAGE_SIZE - 1))
}

/// Force COW eagerly before the kernel writes into user space, so a
/// syscall body never traps on its own write (spec.md §4.2
/// `write_verify`).
pub fn write_verify(va: usize) -> KResult<()> {
    let page = va & !(PAGE_SIZE - 1);
    let writable = {
        let _guard = VM_LOCK.lock();
        pte_ptr(page).map(|(t, i)| read_entry(t, i).is_writable())
    };
    match writable {
        Some(true) | None => Ok(()),
        Some(false) => unshare(page),
    }
}

/// Demand-fault handler (spec.md §4.2 `do_no_page`): zero-fill for
/// BSS/stack growth, or page in from the executable, possibly sharing a
/// frame with another task running the same text.
pub fn do_no_page(
    va: usize,
    task_base: usize,
    start_code: usize,
    end_data: usize,
    executable: Option<crate::fs::inode::InodeRef>,
    self_id: crate::proc::table::TaskId,
) -> KResult<()> {
    let page = va & !(PAGE_SIZE - 1);
    let offset = page.saturating_sub(start_code + task_base);

    let exe = match executable {
        Some(e) if offset < end_data => e,
        _ => {
            let pa = frame::alloc_frame();
            if pa == 0 {
                return Err(Error::NoMem);
            }
            if map_frame(pa, page) == 0 {
                frame::free_frame(pa);
                return Err(Error::NoMem);
            }
            return Ok(());
        }
    };

    if share_page(page, offset, exe, self_id) {
        return Ok(());
    }

    let pa = frame::alloc_frame();
    if pa == 0 {
        return Err(Error::NoMem);
    }
    let block = 1 + offset / crate::param::BLOCK_SIZE;
    for i in 0..4u32 {
        if let Ok(zone) = crate::fs::bmap::bmap(exe, block as u32 + i, false) {
            if zone != 0 {
                if let Ok(slot) = crate::bio::bread(crate::fs::inode::with(exe, |n| n.dev), zone) {
                    let dst_off = i as usize * crate::param::BLOCK_SIZE;
                    crate::bio::with(slot, |b| {
                        // SAFETY: `pa` was just allocated, mapped nowhere yet.
                        let dst = unsafe { phys::as_mut_slice(pa, PAGE_SIZE) };
                        dst[dst_off..dst_off + crate::param::BLOCK_SIZE].copy_from_slice(&b.data);
                    });
                    crate::bio::brelse(slot);
                }
            }
        }
    }
    if map_frame(pa, page) == 0 {
        frame::free_frame(pa);
        return Err(Error::NoMem);
    }
    Ok(())
}

/// Scan every other task for one sharing our executable inode at the
/// same offset, and try to map its frame instead of reading from disk
/// (spec.md §4.2 `share_page`/`try_to_share`).
fn share_page(
    va: usize,
    offset: usize,
    exe: crate::fs::inode::InodeRef,
    self_id: crate::proc::table::TaskId,
) -> bool {
    let mut shared = false;
    crate::proc::table::for_each(|id, task| {
        if shared || id == self_id {
            return;
        }
        if task.executable != Some(exe) {
            return;
        }
        let their_va = task.base + task.start_code + offset;
        if try_to_share(va, their_va) {
            shared = true;
        }
    });
    shared
}

/// Requires the other task's PTE to be present and clean; on success
/// installs the same PFN in our PTE, marks both read-only, bumps the
/// refcount (spec.md §4.2 `try_to_share`).
fn try_to_share(our_va: usize, their_va: usize) -> bool {
    let _guard = VM_LOCK.lock();
    let (their_table, their_idx) = match pte_ptr(their_va) {
        Some(t) => t,
        None => return false,
    };
    let their_pte = read_entry(their_table, their_idx);
    if !their_pte.is_present() || their_pte.is_dirty() {
        return false;
    }
    let pa = their_pte.frame_pa();

    let our_page = our_va & !(PAGE_SIZE - 1);
    let pd_idx = pd_index(our_page);
    let pgdir = pgdir_pa();
    let mut pde = read_entry(pgdir, pd_idx);
    if !pde.is_present() {
        let table_pa = frame::alloc_frame();
        if table_pa == 0 {
            return false;
        }
        pde = PageTableEntry::new(table_pa, PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER);
        write_entry(pgdir, pd_idx, pde);
    }
    let our_table = pde.frame_pa();
    let our_idx = pt_index(our_page);

    write_entry(
        their_table,
        their_idx,
        their_pte.with_writable(false),
    );
    write_entry(
        our_table,
        our_idx,
        PageTableEntry::new(pa, PteFlags::PRESENT | PteFlags::USER),
    );
    if frame::is_paged(pa) {
        frame::incr_refcount(pa);
    }
    unsafe {
        asm::invlpg(our_page);
        asm::invlpg(their_va & !(PAGE_SIZE - 1));
    }
    true
}

/// Translate a linear address to its backing physical address, or
/// `None` if unmapped. The syscall layer's only window onto user
/// memory; everything above this function works in terms of linear
/// addresses, never raw pointers into physical memory directly.
pub fn translate(va: usize) -> Option<u32> {
    let _guard = VM_LOCK.lock();
    let page = va & !(PAGE_SIZE - 1);
    let (table_pa, pt_idx) = pte_ptr(page)?;
    let pte = read_entry(table_pa, pt_idx);
    if !pte.is_present() {
        return None;
    }
    Some(pte.frame_pa() + (va - page) as u32)
}

/// Copy from kernel memory into user space at `va`, forcing COW via
/// `write_verify` one page at a time so the kernel never traps on its
/// own write (spec.md §4.2 `write_verify`'s stated purpose).
pub fn copy_out(va: usize, src: &[u8]) -> KResult<()> {
    let mut done = 0;
    while done < src.len() {
        let cur = va + done;
        write_verify(cur)?;
        let pa = translate(cur).ok_or(Error::Inval)?;
        let page_off = cur % PAGE_SIZE;
        let n = (PAGE_SIZE - page_off).min(src.len() - done);
        let base = pa - page_off as u32;
        // SAFETY: `write_verify` just ensured this page is exclusively
        // ours and writable.
        unsafe { phys::as_mut_slice(base, PAGE_SIZE)[page_off..page_off + n].copy_from_slice(&src[done..done + n]) };
        done += n;
    }
    Ok(())
}

/// Copy from user space at `va` into kernel memory.
pub fn copy_in(va: usize, dst: &mut [u8]) -> KResult<()> {
    let mut done = 0;
    while done < dst.len() {
        let cur = va + done;
        let pa = translate(cur).ok_or(Error::Inval)?;
        let page_off = cur % PAGE_SIZE;
        let n = (PAGE_SIZE - page_off).min(dst.len() - done);
        let base = pa - page_off as u32;
        // SAFETY: `pa` is a present mapping; reading it does not require
        // exclusivity.
        unsafe { dst[done..done + n].copy_from_slice(&phys::as_slice(base, PAGE_SIZE)[page_off..page_off + n]) };
        done += n;
    }
    Ok(())
}

/// Copy a NUL-terminated string from user space, up to `max` bytes
/// (exclusive of the terminator). Used for path arguments.
pub fn copy_in_cstr(va: usize, buf: &mut [u8]) -> KResult<usize> {
    for (i, slot) in buf.iter_mut().enumerate() {
        let mut byte = [0u8; 1];
        copy_in(va + i, &mut byte)?;
        if byte[0] == 0 {
            return Ok(i);
        }
        *slot = byte[0];
    }
    Err(Error::Inval)
}
