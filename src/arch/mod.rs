//! Hardware-facing layer. `spec.md` §1 scopes CPU bring-up, descriptor-table
//! loading, and device register programming out of the core; this module
//! keeps only the interfaces the core (C1-C9) calls through, the way the
//! teacher's `arch/` splits platform code away from kernel logic.

pub mod x86;

pub use x86 as target;
