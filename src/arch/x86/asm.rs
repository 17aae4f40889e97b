//! Thin wrappers over the handful of privileged instructions the core
//! touches directly. Real register programming for devices (floppy, hard
//! disk, console, serial) lives with the (out-of-scope) drivers; this file
//! only has the instructions C2 (TLB invalidation) and C6 (interrupt
//! masking) need.

use core::arch::asm;

/// Disable maskable interrupts, returning whether they were enabled before.
///
/// # Safety
/// Must be paired with a matching `sti` (or `restore_flags`) once the
/// critical section ends; never call while already inside one without
/// saving the previous state, or nested callers will re-enable
/// interrupts too early.
#[inline]
pub unsafe fn cli() -> bool {
    let enabled = interrupts_enabled();
    asm!("cli", options(nomem, nostack, preserves_flags));
    enabled
}

/// Enable maskable interrupts.
///
/// # Safety
/// Caller must not be holding a lock that assumes interrupts stay
/// disabled for the remainder of its critical section.
#[inline]
pub unsafe fn sti() {
    asm!("sti", options(nomem, nostack, preserves_flags));
}

/// Read `eflags` and report whether the interrupt-enable flag is set.
#[inline]
pub fn interrupts_enabled() -> bool {
    let flags: u32;
    unsafe {
        asm!("pushfd; pop {0}", out(reg) flags, options(nomem, preserves_flags));
    }
    flags & 0x200 != 0
}

/// Invalidate a single TLB entry for `va` (the `invlpg` instruction).
///
/// # Safety
/// `va` must be a valid virtual address; this only affects translation
/// caching, never memory contents, but calling it with a stale mapping
/// still present will cause a fault to be missed until the next switch.
#[inline]
pub unsafe fn invlpg(va: usize) {
    asm!("invlpg [{0}]", in(reg) va, options(nostack, preserves_flags));
}

/// Flush the entire TLB by reloading `cr3`.
///
/// # Safety
/// `cr3` must already hold a valid page-directory physical address.
#[inline]
pub unsafe fn flush_tlb_all() {
    let cr3: u32;
    asm!("mov {0}, cr3", out(reg) cr3, options(nomem, preserves_flags));
    asm!("mov cr3, {0}", in(reg) cr3, options(nostack, preserves_flags));
}

/// Halt the CPU until the next interrupt.
///
/// # Safety
/// Only meaningful as the idle task's body; any other caller risks never
/// returning if no interrupt source is armed.
#[inline]
pub unsafe fn hlt() {
    asm!("hlt", options(nomem, nostack, preserves_flags));
}

/// Read `cr2`, the faulting linear address the CPU latches on a page
/// fault (trap.rs's only use for it).
#[inline]
pub fn read_cr2() -> usize {
    let va: u32;
    unsafe {
        asm!("mov {0}, cr2", out(reg) va, options(nomem, nostack, preserves_flags));
    }
    va as usize
}
