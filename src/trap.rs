//! C9's other half: the trap dispatcher. `spec.md` §1 puts IDT
//! construction and the interrupt/syscall entry stubs out of scope (they
//! build the `TrapFrame` on the kernel stack and `iret` back out); this
//! module is what those out-of-scope stubs call into once the frame is
//! ready, and it is where §4.6's data flow note ("user syscall -> C9
//! dispatch") and §4.2's fault handlers (`do_wp_page`/`do_no_page`)
//! actually get wired to hardware.

use crate::arch::x86::asm;
use crate::arch::x86::TrapFrame;
use crate::errno::Error;
use crate::mm::vm;
use crate::proc::sched;
use crate::proc::signal::Signal;
use crate::proc::table;
use crate::syscall;

/// CPU exception vector for a page fault.
pub const PAGE_FAULT: u32 = 14;

/// Vector the (out-of-scope) PIC remap assigns the periodic timer
/// (spec.md §4.6: `do_timer` runs "once per clock tick").
pub const TIMER: u32 = 32;

/// The `int 0x80` software-interrupt vector user code issues a syscall
/// through.
pub const SYSCALL: u32 = 0x80;

/// Page-fault error-code bits (spec.md GLOSSARY, Intel SDM vol 3 §4.7).
const ERR_PRESENT: u32 = 1 << 0;
const ERR_WRITE: u32 = 1 << 1;

fn in_user_mode(tf: &TrapFrame) -> bool {
    tf.cs & 0x3 != 0
}

/// Entry point the (out-of-scope) interrupt/syscall stubs call once
/// they've pushed `*tf` onto the current kernel stack. Never called
/// reentrantly for the same frame: the stub re-disables interrupts
/// around the call exactly like the teacher's `usertrap`/`kerneltrap`
/// split, except this kernel has only one trap path since segment bases
/// (not a separate page directory) provide isolation.
///
/// # Safety
/// `tf` must be the frame the entry stub just built for the trap
/// currently being handled, and must still be live (not yet `iret`ed)
/// when this returns.
pub unsafe fn trap_handler(tf: &mut TrapFrame) {
    let was_user = in_user_mode(tf);

    match tf.trap_no {
        SYSCALL => syscall::dispatch(tf),
        TIMER => sched::do_timer(was_user),
        PAGE_FAULT => handle_page_fault(tf, was_user),
        _ => handle_unknown(tf, was_user),
    }

    if was_user {
        let me = table::current_id();
        crate::proc::lifecycle::deliver_signals(me);
    }
}

fn handle_page_fault(tf: &TrapFrame, was_user: bool) {
    let va = asm::read_cr2();
    let present = tf.err_code & ERR_PRESENT != 0;
    let is_write = tf.err_code & ERR_WRITE != 0;

    let result = if !present {
        let me = table::current_id();
        let (base, start_code, end_data, executable) =
            table::with(me, |t| (t.base, t.start_code, t.end_data, t.executable));
        vm::do_no_page(va, base, start_code, end_data, executable, me)
    } else if is_write {
        vm::do_wp_page(va)
    } else {
        Err(Error::Acces)
    };

    if result.is_err() {
        if was_user {
            table::with_current_mut(|t| t.signals.raise(Signal::Segv));
        } else {
            panic!("page fault in kernel mode at {:#x} (err={:#x})", va, tf.err_code);
        }
    }
}

/// Any vector this dispatcher has no handler for. A user task gets
/// `SIGILL`; a fault while already in the kernel is an invariant
/// violation (spec.md §7: "internal invariants ... panic").
fn handle_unknown(tf: &TrapFrame, was_user: bool) {
    if was_user {
        table::with_current_mut(|t| t.signals.raise(Signal::Ill));
    } else {
        panic!("unhandled trap {} in kernel mode (err={:#x})", tf.trap_no, tf.err_code);
    }
}
