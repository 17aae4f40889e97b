//! C1: the page-frame allocator (spec.md §4.1).
//!
//! A byte-per-frame map covers the paged region above `LOW_MEM`. The byte
//! is a reference count: 0 = free, N>=1 = N live PTEs point here, and the
//! sentinel `FRAME_RESERVED` (100) marks a frame mem_init declared
//! permanently out of service. The count is exactly what COW depends on
//! (spec.md §3, Page frame invariants).

use crate::arch::x86::memlayout::PAGING_START;
use crate::lock::Spinlock;
use crate::mm::phys;
use crate::param::{FRAME_RESERVED, PAGE_SIZE, PAGING_PAGES};

pub struct FrameAllocator {
    refs: [u8; PAGING_PAGES],
}

impl FrameAllocator {
    pub const fn new() -> Self {
        Self {
            refs: [FRAME_RESERVED; PAGING_PAGES],
        }
    }

    fn index(&self, pa: u32) -> Option<usize> {
        let pa = pa as usize;
        if pa < PAGING_START {
            return None;
        }
        let idx = (pa - PAGING_START) / PAGE_SIZE;
        if idx >= PAGING_PAGES {
            None
        } else {
            Some(idx)
        }
    }

    fn addr(&self, idx: usize) -> u32 {
        (PAGING_START + idx * PAGE_SIZE) as u32
    }

    /// Mark every frame reserved, then free the frames in `[start, end)`.
    /// Called once at boot with the memory map the (out-of-scope)
    /// bootstrap code discovered.
    pub fn mem_init(&mut self, start: u32, end: u32) {
        for b in self.refs.iter_mut() {
            *b = FRAME_RESERVED;
        }
        let mut pa = start;
        while pa < end {
            if let Some(idx) = self.index(pa) {
                self.refs[idx] = 0;
            }
            pa += PAGE_SIZE as u32;
        }
    }

    /// Scan backward from the top of the paged region for a free frame,
    /// mark it used (refcount 1) without zero-filling it (the caller
    /// zero-fills after dropping the allocator's lock). Returns 0 on
    /// exhaustion (spec.md §4.1).
    fn claim(&mut self) -> u32 {
        for idx in (0..PAGING_PAGES).rev() {
            if self.refs[idx] == 0 {
                self.refs[idx] = 1;
                return self.addr(idx);
            }
        }
        0
    }

    /// Decrement `pa`'s refcount. Panics if `pa` lies outside the paging
    /// region or the frame is already free (spec.md §4.1: "fails
    /// loudly").
    pub fn free(&mut self, pa: u32) {
        let idx = self.index(pa).expect("free_frame: address outside paging region");
        assert!(self.refs[idx] != 0, "free_frame: already free");
        assert!(
            self.refs[idx] != FRAME_RESERVED,
            "free_frame: freeing a reserved frame"
        );
        self.refs[idx] -= 1;
    }

    /// Bump `pa`'s refcount (used when a PTE copy shares an existing
    /// frame).
    pub fn incr_refcount(&mut self, pa: u32) {
        let idx = self
            .index(pa)
            .expect("incr_refcount: address outside paging region");
        assert!(self.refs[idx] != FRAME_RESERVED);
        self.refs[idx] += 1;
    }

    pub fn refcount(&self, pa: u32) -> u8 {
        let idx = self.index(pa).expect("refcount: address outside paging region");
        self.refs[idx]
    }

    pub fn is_paged(&self, pa: u32) -> bool {
        self.index(pa).is_some()
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

static FRAME_ALLOCATOR: Spinlock<FrameAllocator> = Spinlock::new("frame_map", FrameAllocator::new());

pub fn mem_init(start: u32, end: u32) {
    FRAME_ALLOCATOR.lock().mem_init(start, end);
}

pub fn alloc_frame() -> u32 {
    let pa = FRAME_ALLOCATOR.lock().claim();
    if pa != 0 {
        // SAFETY: we just claimed this frame exclusively.
        unsafe { phys::zero_page(pa) };
    }
    pa
}

pub fn free_frame(pa: u32) {
    FRAME_ALLOCATOR.lock().free(pa);
}

pub fn incr_refcount(pa: u32) {
    FRAME_ALLOCATOR.lock().incr_refcount(pa);
}

pub fn refcount(pa: u32) -> u8 {
    FRAME_ALLOCATOR.lock().refcount(pa)
}

pub fn is_paged(pa: u32) -> bool {
    FRAME_ALLOCATOR.lock().is_paged(pa)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_round_trips() {
        let mut fa = FrameAllocator::new();
        fa.mem_init(PAGING_START as u32, (PAGING_START + 4 * PAGE_SIZE) as u32);
        let a = fa.claim();
        assert_ne!(a, 0);
        assert_eq!(fa.refcount(a), 1);
        fa.incr_refcount(a);
        assert_eq!(fa.refcount(a), 2);
        fa.free(a);
        assert_eq!(fa.refcount(a), 1);
        fa.free(a);
        assert_eq!(fa.refcount(a), 0);
    }

    #[test]
    fn exhaustion_returns_zero() {
        let mut fa = FrameAllocator::new();
        fa.mem_init(PAGING_START as u32, (PAGING_START + PAGE_SIZE) as u32);
        let a = fa.claim();
        assert_ne!(a, 0);
        assert_eq!(fa.claim(), 0);
        fa.free(a);
    }

    #[test]
    fn scan_prefers_highest_free_frame() {
        let mut fa = FrameAllocator::new();
        fa.mem_init(PAGING_START as u32, (PAGING_START + 3 * PAGE_SIZE) as u32);
        let top = fa.claim();
        assert_eq!(top, (PAGING_START + 2 * PAGE_SIZE) as u32);
    }
}
