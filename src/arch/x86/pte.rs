//! Page-directory/page-table entry layout for 32-bit non-PAE paging:
//! two levels, 4 KiB pages, 1024 entries per level, 4 MiB covered by one
//! page-directory entry (spec.md GLOSSARY).

use crate::param::PAGE_SIZE;

bitflags::bitflags! {
    pub struct PteFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        /// Set by the CPU on any write through this mapping. Cleared
        /// explicitly where `mm::vm` needs to observe a fresh write (the
        /// "present and clean" test in `try_to_share`, spec.md §4.2).
        const DIRTY    = 1 << 6;
    }
}

/// A single page-directory or page-table entry.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(pub u32);

impl PageTableEntry {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn new(frame_pa: u32, flags: PteFlags) -> Self {
        Self((frame_pa & !(PAGE_SIZE as u32 - 1)) | flags.bits())
    }

    pub fn is_present(self) -> bool {
        self.0 & PteFlags::PRESENT.bits() != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & PteFlags::WRITABLE.bits() != 0
    }

    pub fn is_dirty(self) -> bool {
        self.0 & PteFlags::DIRTY.bits() != 0
    }

    pub fn frame_pa(self) -> u32 {
        self.0 & !(PAGE_SIZE as u32 - 1)
    }

    pub fn with_writable(self, writable: bool) -> Self {
        if writable {
            Self(self.0 | PteFlags::WRITABLE.bits())
        } else {
            Self(self.0 & !PteFlags::WRITABLE.bits())
        }
    }

    pub fn set_frame_pa(&mut self, pa: u32) {
        self.0 = (self.0 & (PAGE_SIZE as u32 - 1)) | (pa & !(PAGE_SIZE as u32 - 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_frame_and_flags() {
        let pte = PageTableEntry::new(0x0040_3000, PteFlags::PRESENT | PteFlags::USER);
        assert_eq!(pte.frame_pa(), 0x0040_3000);
        assert!(pte.is_present());
        assert!(!pte.is_writable());
        let writable = pte.with_writable(true);
        assert!(writable.is_writable());
        assert_eq!(writable.frame_pa(), 0x0040_3000);
    }
}
