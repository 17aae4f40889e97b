//! TTY line discipline (spec.md §4.8, C8). Each tty owns three ring
//! queues — raw input fresh from the (out-of-scope) device interrupt
//! handler, cooked secondary input the reader actually consumes, and
//! pending output — plus a termios. The driver's own register
//! programming is out of scope per spec.md §1; this module represents
//! it as a capability record (spec.md §9 redesign note: "a vtable-like
//! per-device descriptor"), a single write callback each tty is
//! registered with.

use crate::errno::{Error, KResult};
use crate::lock::Spinlock;
use crate::param::{NR_TTY, TTY_BUF_SIZE};
use crate::proc::sched;
use crate::proc::signal::Signal;
use crate::proc::table;
use crate::proc::task::Pid;
use crate::proc::wait::WaitQueue;

bitflags::bitflags! {
    pub struct IFlag: u32 {
        const ICRNL  = 1 << 0;
        const INLCR  = 1 << 1;
        const IGNCR  = 1 << 2;
        const IUCLC  = 1 << 3;
        const IXON   = 1 << 4;
        const IXOFF  = 1 << 5;
    }
}

bitflags::bitflags! {
    pub struct OFlag: u32 {
        const OPOST  = 1 << 0;
        const ONLCR  = 1 << 1;
        const OCRNL  = 1 << 2;
        const ONLRET = 1 << 3;
        const OLCUC  = 1 << 4;
    }
}

bitflags::bitflags! {
    pub struct LFlag: u32 {
        const ISIG    = 1 << 0;
        const ICANON  = 1 << 1;
        const ECHO    = 1 << 2;
        const ECHOE   = 1 << 3;
        const ECHOK   = 1 << 4;
        const ECHOCTL = 1 << 5;
    }
}

pub const NCC: usize = 8;
pub const VINTR: usize = 0;
pub const VQUIT: usize = 1;
pub const VERASE: usize = 2;
pub const VKILL: usize = 3;
pub const VEOF: usize = 4;
pub const VEOL: usize = 5;
pub const VMIN: usize = 6;
pub const VTIME: usize = 7;

#[derive(Clone, Copy)]
pub struct Termios {
    pub iflag: IFlag,
    pub oflag: OFlag,
    pub lflag: LFlag,
    pub cc: [u8; NCC],
}

impl Termios {
    const fn empty() -> Self {
        Self {
            iflag: IFlag::empty(),
            oflag: OFlag::empty(),
            lflag: LFlag::empty(),
            cc: [0u8; NCC],
        }
    }

    /// The defaults a freshly opened tty starts with.
    pub fn sane() -> Self {
        let mut cc = [0u8; NCC];
        cc[VINTR] = 3; // ^C
        cc[VQUIT] = 28; // ^\
        cc[VERASE] = 127; // DEL
        cc[VKILL] = 21; // ^U
        cc[VEOF] = 4; // ^D
        cc[VEOL] = 0;
        cc[VMIN] = 1;
        cc[VTIME] = 0;
        Self {
            iflag: IFlag::ICRNL | IFlag::IXON,
            oflag: OFlag::OPOST | OFlag::ONLCR,
            lflag: LFlag::ISIG | LFlag::ICANON | LFlag::ECHO | LFlag::ECHOE | LFlag::ECHOK,
            cc,
        }
    }
}

/// A fixed-capacity byte ring. `lines` counts complete lines (NL/EOF)
/// queued in `secondary`, so `tty_read` knows when canonical input is
/// ready without rescanning the buffer (spec.md §4.8).
struct Ring {
    buf: [u8; TTY_BUF_SIZE],
    head: usize,
    tail: usize,
    count: usize,
    lines: usize,
}

impl Ring {
    const fn new() -> Self {
        Self { buf: [0; TTY_BUF_SIZE], head: 0, tail: 0, count: 0, lines: 0 }
    }

    fn is_full(&self) -> bool {
        self.count == TTY_BUF_SIZE
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn push(&mut self, b: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.buf[self.head] = b;
        self.head = (self.head + 1) % TTY_BUF_SIZE;
        self.count += 1;
        true
    }

    fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let b = self.buf[self.tail];
        self.tail = (self.tail + 1) % TTY_BUF_SIZE;
        self.count -= 1;
        Some(b)
    }

    /// Drop the most recently pushed byte (ERASE/KILL).
    fn pop_back(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        self.head = (self.head + TTY_BUF_SIZE - 1) % TTY_BUF_SIZE;
        self.count -= 1;
        Some(self.buf[self.head])
    }
}

struct Tty {
    raw: Ring,
    secondary: Ring,
    write: Ring,
    termios: Termios,
    pgrp: Pid,
    driver_write: Option<fn(&[u8])>,
    in_use: bool,
}

impl Tty {
    const fn empty() -> Self {
        Self {
            raw: Ring::new(),
            secondary: Ring::new(),
            write: Ring::new(),
            termios: Termios::empty(),
            pgrp: 0,
            driver_write: None,
            in_use: false,
        }
    }
}

static TABLE: Spinlock<[Tty; NR_TTY]> = Spinlock::new("tty_table", {
    const T: Tty = Tty::empty();
    [T; NR_TTY]
});

const fn wait_array() -> [WaitQueue; NR_TTY] {
    const W: WaitQueue = WaitQueue::new();
    [W; NR_TTY]
}

static READ_WAIT: [WaitQueue; NR_TTY] = wait_array();
static WRITE_WAIT: [WaitQueue; NR_TTY] = wait_array();

pub fn register(ch: usize, driver_write: fn(&[u8])) {
    let mut table = TABLE.lock();
    table[ch] = Tty::empty();
    table[ch].in_use = true;
    table[ch].termios = Termios::sane();
    table[ch].driver_write = Some(driver_write);
}

fn control_matches(termios: &Termios, idx: usize, byte: u8) -> bool {
    termios.cc[idx] != 0 && termios.cc[idx] == byte
}

/// Echo one input byte, translating control characters to `^X` when
/// `ECHOCTL` is set (spec.md §4.8).
fn echo(ch: usize, byte: u8) {
    let (echo_on, echoctl, writer) = {
        let table = TABLE.lock();
        (
            table[ch].termios.lflag.contains(LFlag::ECHO),
            table[ch].termios.lflag.contains(LFlag::ECHOCTL),
            table[ch].driver_write,
        )
    };
    if !echo_on {
        return;
    }
    if byte < 0x20 && byte != b'\n' && byte != b'\t' && echoctl {
        enqueue_write(ch, &[b'^', byte + 0x40]);
    } else {
        enqueue_write(ch, &[byte]);
    }
    if let Some(w) = writer {
        drain_write_queue(ch, w);
    }
}

fn enqueue_write(ch: usize, bytes: &[u8]) {
    let mut table = TABLE.lock();
    for &b in bytes {
        let _ = table[ch].write.push(b);
    }
}

fn drain_write_queue(ch: usize, driver_write: fn(&[u8])) {
    let mut staging = [0u8; TTY_BUF_SIZE];
    let n = {
        let mut table = TABLE.lock();
        let mut n = 0;
        while let Some(b) = table[ch].write.pop() {
            staging[n] = b;
            n += 1;
        }
        n
    };
    if n > 0 {
        driver_write(&staging[..n]);
    }
    WRITE_WAIT[ch].wake_up();
}

/// Post `SIGINT`/`SIGQUIT` to every task sharing this tty's process
/// group (spec.md §4.8: "When ISIG is set").
fn signal_pgrp(pgrp: Pid, sig: Signal) {
    table::for_each_mut(|_, t| {
        if t.pgrp == pgrp {
            t.signals.raise(sig);
        }
    });
}

/// Receive one raw byte from the (out-of-scope) device interrupt
/// handler, then immediately cook it (spec.md §4.8 `copy_to_cooked`).
/// Drives keyboard/serial input; the only public entry point into the
/// raw side of this module.
pub fn receive_char(ch: usize, byte: u8) {
    {
        let mut table = TABLE.lock();
        let _ = table[ch].raw.push(byte);
    }
    copy_to_cooked(ch);
}

/// Drain `raw` into `secondary`, applying iflag/lflag transforms
/// (spec.md §4.8). Echoes as it goes.
pub fn copy_to_cooked(ch: usize) {
    loop {
        let byte = {
            let mut table = TABLE.lock();
            table[ch].raw.pop()
        };
        let mut byte = match byte {
            Some(b) => b,
            None => return,
        };

        let (iflag, lflag, pgrp) = {
            let table = TABLE.lock();
            (table[ch].termios.iflag, table[ch].termios.lflag, table[ch].pgrp)
        };

        if byte == b'\r' {
            if iflag.contains(IFlag::ICRNL) {
                byte = b'\n';
            }
        } else if byte == b'\n' && iflag.contains(IFlag::INLCR) {
            byte = b'\r';
        }

        if lflag.contains(LFlag::ISIG) {
            let termios = { TABLE.lock()[ch].termios };
            if control_matches(&termios, VINTR, byte) {
                signal_pgrp(pgrp, Signal::Int);
                continue;
            }
            if control_matches(&termios, VQUIT, byte) {
                signal_pgrp(pgrp, Signal::Quit);
                continue;
            }
        }

        if lflag.contains(LFlag::ICANON) {
            let termios = { TABLE.lock()[ch].termios };
            if control_matches(&termios, VERASE, byte) {
                let erased = {
                    let mut table = TABLE.lock();
                    table[ch].secondary.pop_back()
                };
                if let Some(e) = erased {
                    // backspace-space-backspace, plus one more for a
                    // control char's two-column `^X` echo.
                    enqueue_write(ch, b"\x08 \x08");
                    if e < 0x20 {
                        enqueue_write(ch, b"\x08 \x08");
                    }
                    if let Some(w) = { TABLE.lock()[ch].driver_write } {
                        drain_write_queue(ch, w);
                    }
                }
                continue;
            }
            if control_matches(&termios, VKILL, byte) {
                let mut table = TABLE.lock();
                while let Some(b) = table[ch].secondary.pop_back() {
                    if b == b'\n' || control_matches(&table[ch].termios, VEOF, b) {
                        let _ = table[ch].secondary.push(b);
                        break;
                    }
                }
                continue;
            }
        }

        let is_line_end = byte == b'\n' || control_matches(&{ TABLE.lock()[ch].termios }, VEOF, byte);
        {
            let mut table = TABLE.lock();
            if table[ch].secondary.push(byte) && is_line_end {
                table[ch].secondary.lines += 1;
            }
        }
        echo(ch, byte);
        if is_line_end || !lflag.contains(LFlag::ICANON) {
            READ_WAIT[ch].wake_up();
        }
    }
}

/// spec.md §4.8 `tty_read`. Canonical mode blocks until a full line (or
/// EOF) is queued; raw mode honours VMIN/VTIME via the task's alarm.
pub fn tty_read(ch: usize, buf: &mut [u8]) -> KResult<usize> {
    let canonical = { TABLE.lock()[ch].termios.lflag.contains(LFlag::ICANON) };
    if canonical {
        loop {
            let ready = { TABLE.lock()[ch].secondary.lines > 0 };
            if ready {
                let mut table = TABLE.lock();
                let mut n = 0;
                while n < buf.len() {
                    match table[ch].secondary.pop() {
                        Some(b) => {
                            let is_eol = b == b'\n' || control_matches(&table[ch].termios, VEOF, b);
                            buf[n] = b;
                            n += 1;
                            if is_eol {
                                table[ch].secondary.lines -= 1;
                                break;
                            }
                        }
                        None => break,
                    }
                }
                return Ok(n);
            }
            if interruptible_wait(&READ_WAIT[ch]) {
                return Err(Error::Intr);
            }
        }
    }

    let (min, time) = {
        let t = &TABLE.lock()[ch].termios;
        (t.cc[VMIN] as usize, t.cc[VTIME] as u64)
    };
    let me = table::current_id();
    if time > 0 {
        table::with_mut(me, |t| t.alarm_deadline = Some(sched::ticks() + time * 100));
    }
    let mut n = 0;
    while n < buf.len().min(min.max(1)) {
        let byte = {
            let mut table = TABLE.lock();
            table[ch].raw.pop()
        };
        match byte {
            Some(b) => {
                buf[n] = b;
                n += 1;
            }
            None => {
                if table::has_deliverable_signal(me) && n == 0 {
                    return Err(Error::Intr);
                }
                if n >= min {
                    break;
                }
                if interruptible_wait(&READ_WAIT[ch]) {
                    return if n > 0 { Ok(n) } else { Err(Error::Intr) };
                }
            }
        }
    }
    Ok(n)
}

/// spec.md §4.8 `tty_write`: OPOST translation, with a per-write
/// `cr_flag` so `\n` becomes `\r\n` exactly once even across a write
/// that is split into several enqueue passes because the queue fills.
pub fn tty_write(ch: usize, buf: &[u8]) -> KResult<usize> {
    let oflag = { TABLE.lock()[ch].termios.oflag };
    let mut written = 0;
    let mut cr_flag = false;
    while written < buf.len() {
        let b = buf[written];
        let full = { TABLE.lock()[ch].write.is_full() };
        if full {
            if interruptible_wait(&WRITE_WAIT[ch]) {
                return if written > 0 { Ok(written) } else { Err(Error::Intr) };
            }
            continue;
        }

        if oflag.contains(OFlag::OPOST) {
            let out = translate_output(b, oflag, &mut cr_flag);
            enqueue_write(ch, &out);
        } else {
            enqueue_write(ch, &[b]);
        }
        written += 1;

        if let Some(w) = { TABLE.lock()[ch].driver_write } {
            drain_write_queue(ch, w);
        }
        if written < buf.len() {
            sched::r#yield();
        }
    }
    Ok(written)
}

fn translate_output(b: u8, oflag: OFlag, cr_flag: &mut bool) -> arrayvec::ArrayVec<u8, 2> {
    let mut out = arrayvec::ArrayVec::new();
    let mut b = if oflag.contains(OFlag::OLCUC) { b.to_ascii_uppercase() } else { b };
    if b == b'\r' && oflag.contains(OFlag::OCRNL) {
        b = b'\n';
    }
    if b == b'\n' {
        if oflag.contains(OFlag::ONLCR) && !*cr_flag {
            let _ = out.try_push(b'\r');
            *cr_flag = true;
        } else if oflag.contains(OFlag::ONLRET) {
            let _ = out.try_push(b'\r');
        }
    } else {
        *cr_flag = false;
    }
    let _ = out.try_push(b);
    out
}

fn interruptible_wait(q: &WaitQueue) -> bool {
    static GATE: Spinlock<()> = Spinlock::new("tty_gate", ());
    let guard = GATE.lock();
    q.interruptible_sleep(guard)
}

pub fn set_pgrp(ch: usize, pgrp: Pid) {
    TABLE.lock()[ch].pgrp = pgrp;
}

pub fn termios(ch: usize) -> Termios {
    TABLE.lock()[ch].termios
}

pub fn set_termios(ch: usize, t: Termios) {
    TABLE.lock()[ch].termios = t;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onlcr_inserts_cr_once_per_newline_across_split_writes() {
        let oflag = OFlag::OPOST | OFlag::ONLCR;
        let mut cr_flag = false;
        // First half of a write ending mid-translation: the `\n` itself.
        let out = translate_output(b'\n', oflag, &mut cr_flag);
        assert_eq!(&out[..], b"\r\n");
        assert!(cr_flag);
        // A second enqueue pass for the same logical newline must not
        // double the `\r` (the `cr_flag` carries across passes).
        let out2 = translate_output(b'\n', oflag, &mut cr_flag);
        assert_eq!(&out2[..], b"\r\n");
        // A following ordinary byte resets cr_flag.
        let out3 = translate_output(b'a', oflag, &mut cr_flag);
        assert_eq!(&out3[..], b"a");
        assert!(!cr_flag);
    }

    #[test]
    fn ocrnl_maps_cr_to_nl_before_onlcr_reexpansion() {
        let oflag = OFlag::OPOST | OFlag::OCRNL | OFlag::ONLCR;
        let mut cr_flag = false;
        let out = translate_output(b'\r', oflag, &mut cr_flag);
        assert_eq!(&out[..], b"\r\n");
    }

    #[test]
    fn onlret_emits_cr_without_onlcr() {
        let oflag = OFlag::OPOST | OFlag::ONLRET;
        let mut cr_flag = false;
        let out = translate_output(b'\n', oflag, &mut cr_flag);
        assert_eq!(&out[..], b"\r\n");
    }

    #[test]
    fn olcuc_uppercases_before_newline_handling() {
        let oflag = OFlag::OPOST | OFlag::OLCUC;
        let mut cr_flag = false;
        let out = translate_output(b'a', oflag, &mut cr_flag);
        assert_eq!(&out[..], b"A");
    }

    #[test]
    fn control_matches_requires_nonzero_cc_slot() {
        let mut termios = Termios::sane();
        assert!(control_matches(&termios, VINTR, 3));
        termios.cc[VINTR] = 0;
        assert!(!control_matches(&termios, VINTR, 0));
    }

    #[test]
    fn ring_erase_and_kill_semantics() {
        let mut ring = Ring::new();
        for b in b"abc" {
            assert!(ring.push(*b));
        }
        assert_eq!(ring.pop_back(), Some(b'c'));
        assert_eq!(ring.pop_back(), Some(b'b'));
        assert_eq!(ring.pop(), Some(b'a'));
        assert_eq!(ring.pop(), None);
    }
}
