//! Virtual memory: the page-frame allocator (C1) and the paging engine
//! (C2) — page-table copying, the write-protect/COW fault path, page
//! sharing, and demand loading.

pub mod frame;
pub mod phys;
pub mod vm;

pub use frame::{alloc_frame, free_frame, mem_init};
