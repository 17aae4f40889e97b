//! A small preemptive multi-tasking kernel core for a 32-bit segmented
//! x86 machine, in the shape of Linux 0.11 / MINIX 1: page-frame
//! allocation and copy-on-write paging (C1/C2), a buffer cache and
//! elevator-scheduled block request layer (C3/C4), a MINIX-compatible
//! filesystem engine (C5), a cooperative scheduler with wait queues and
//! signal delivery (C6/C7), a tty line discipline (C8), and syscall
//! dispatch (C9).

#![no_std]
//
// # Tries to deny all lints (`rustc -W help`).
#![deny(absolute_paths_not_starting_with_crate)]
#![deny(anonymous_parameters)]
#![deny(box_pointers)]
#![deny(deprecated_in_future)]
#![deny(elided_lifetimes_in_paths)]
#![deny(explicit_outlives_requirements)]
#![deny(keyword_idents)]
#![deny(macro_use_extern_crate)]
#![deny(missing_debug_implementations)]
#![deny(non_ascii_idents)]
#![deny(pointer_structural_match)]
#![deny(rust_2018_idioms)]
#![deny(trivial_numeric_casts)]
#![deny(unaligned_references)]
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(unused_extern_crates)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]
#![deny(variant_size_differences)]
//
// # TODO: deny them one day.
//
// #![deny(single_use_lifetimes)]
// #![deny(unreachable_pub)]
// #![deny(missing_docs)]
#![allow(dead_code)] // the task table / request queue / wait-queue APIs outgrow any one caller's current use
#![feature(naked_functions)]

#[macro_use]
pub mod console;

pub mod aout;
pub mod arch;
pub mod bio;
pub mod blk;
pub mod errno;
pub mod exec;
pub mod file;
pub mod fs;
pub mod kernel_main;
pub mod lock;
pub mod mm;
pub mod panic;
pub mod param;
pub mod proc;
pub mod syscall;
pub mod trap;
pub mod tty;
