//! Locking primitives.
//!
//! `spec.md` §5 draws a sharp line between two kinds of critical section:
//! short ones protected by disabling interrupts around a test-and-set
//! (`Spinlock`, this module), and long ones that may need to wait for I/O
//! or another task, which put the caller to sleep instead of spinning
//! (`proc::sleeplock::Sleeplock`, which needs the scheduler and therefore
//! lives in `proc`).

mod spinlock;

pub use spinlock::{pop_off, push_off, Spinlock, SpinlockGuard};
