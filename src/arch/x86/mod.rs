//! 32-bit segmented x86 target support.
//!
//! Only what the core (C1-C9) needs to drive: interrupt-enable control,
//! the page-table entry bit layout, the saved register/segment image, and
//! memory-layout constants. GDT/IDT construction, the boot trampoline, and
//! device register programming are out of scope per spec.md §1 and are
//! represented here only as the interfaces the core calls through.

pub mod asm;
pub mod context;
pub mod memlayout;
pub mod pte;
pub mod trapframe;

pub use context::{switch_to, Context};
pub use pte::PageTableEntry;
pub use trapframe::TrapFrame;

extern "C" {
    /// Restore segment and general registers from `*tf` and `iret` into
    /// user mode. Part of the boot trampoline (spec.md §1 Out of scope:
    /// "the trampoline that enters user mode"); `proc::lifecycle` calls
    /// through this at the end of every syscall/interrupt return path
    /// and as a freshly forked task's very first entry point.
    pub fn enter_user_mode(tf: *const TrapFrame) -> !;
}
