//! A window onto physical memory.
//!
//! This kernel keeps the whole paged region identity-mapped while running
//! in kernel mode (the out-of-scope boot trampoline installs that mapping
//! before jumping to `kernel_main`), so a physical address can be read or
//! written directly through a raw pointer. Every caller above this module
//! goes through `as_slice`/`as_mut_slice` rather than building raw
//! pointers itself, so the one assumption lives in one place.
//!
//! Under `#[cfg(test)]` there is no identity mapping (tests run as a plain
//! host process), so this backs the same interface with an in-process
//! byte array instead of real physical memory.

#[cfg(not(test))]
mod backing {
    use crate::param::PAGE_SIZE;

    /// # Safety
    /// `pa` must be a physical address inside the identity-mapped region
    /// and `len` bytes starting there must not alias a `&mut` borrow
    /// obtained elsewhere (the caller is responsible for the lock that
    /// makes that true — e.g. holding the frame's only owning reference,
    /// or the buffer's lock).
    pub unsafe fn as_slice<'a>(pa: u32, len: usize) -> &'a [u8] {
        core::slice::from_raw_parts(pa as usize as *const u8, len)
    }

    /// # Safety
    /// See `as_slice`; additionally the caller must be the only holder of
    /// a reference to this range for the lifetime `'a`.
    pub unsafe fn as_mut_slice<'a>(pa: u32, len: usize) -> &'a mut [u8] {
        core::slice::from_raw_parts_mut(pa as usize as *mut u8, len)
    }

    /// # Safety
    /// `pa` must be a page-aligned physical address the caller owns
    /// exclusively.
    pub unsafe fn zero_page(pa: u32) {
        as_mut_slice(pa, PAGE_SIZE).fill(0);
    }
}

#[cfg(test)]
mod backing {
    extern crate std;

    use std::sync::Mutex;
    use std::vec;
    use std::vec::Vec;

    use crate::arch::x86::memlayout::PAGING_END;

    /// A flat byte array standing in for physical memory, big enough to
    /// cover every address the test suite's `mem_init` ranges use.
    static MOCK_MEM: Mutex<Option<Vec<u8>>> = Mutex::new(None);

    fn with_mem<R>(f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = MOCK_MEM.lock().unwrap();
        let mem = guard.get_or_insert_with(|| vec![0u8; PAGING_END]);
        f(mem.as_mut_slice())
    }

    /// # Safety
    /// Same contract as the real implementation, minus the physical-
    /// memory assumption (tests never run concurrently against
    /// overlapping ranges without going through the crate's own locks).
    pub unsafe fn as_slice<'a>(pa: u32, len: usize) -> &'a [u8] {
        as_mut_slice(pa, len)
    }

    pub unsafe fn as_mut_slice<'a>(pa: u32, len: usize) -> &'a mut [u8] {
        with_mem(|mem| {
            let start = pa as usize;
            let slice = &mut mem[start..start + len];
            // Extend the borrow past `with_mem`'s closure: the mutex
            // keeps the backing allocation alive and stable for the
            // process lifetime once created, and tests are single-
            // threaded per `FrameAllocator` instance.
            core::slice::from_raw_parts_mut(slice.as_mut_ptr(), slice.len())
        })
    }

    pub unsafe fn zero_page(pa: u32) {
        as_mut_slice(pa, crate::param::PAGE_SIZE).fill(0);
    }
}

pub use backing::{as_mut_slice, as_slice, zero_page};

/// Copy one page from `src` to `dst` (used by COW's `unshare`).
///
/// # Safety
/// Both addresses must be page-aligned, owned exclusively by the caller
/// for the duration of the call, and non-overlapping.
pub unsafe fn copy_page(dst: u32, src: u32) {
    let from = as_slice(src, crate::param::PAGE_SIZE);
    let to = as_mut_slice(dst, crate::param::PAGE_SIZE);
    to.copy_from_slice(from);
}
