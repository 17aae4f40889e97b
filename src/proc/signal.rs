//! The classic Unix signal set (spec.md §6) and per-task disposition
//! table. Delivery itself (building the artificial user-stack frame) is
//! in `proc::lifecycle::deliver_signals`, since it needs the trap frame
//! and the task table together.

/// Signal numbers 1..=32 (spec.md §6). `UNUSED` is a historical filler
/// slot, kept so the numbering matches the classic set exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Signal {
    Hup = 1,
    Int = 2,
    Quit = 3,
    Ill = 4,
    Trap = 5,
    Abrt = 6,
    Unused = 7,
    Fpe = 8,
    Kill = 9,
    Usr1 = 10,
    Segv = 11,
    Usr2 = 12,
    Pipe = 13,
    Alrm = 14,
    Term = 15,
    Stkflt = 16,
    Chld = 17,
    Cont = 18,
    Stop = 19,
    Tstp = 20,
    Ttin = 21,
    Ttou = 22,
}

pub const NSIG: usize = 32;

impl Signal {
    pub const fn mask(self) -> u32 {
        1 << (self as u8 - 1)
    }

    pub fn from_number(n: u8) -> Option<Self> {
        use Signal::*;
        Some(match n {
            1 => Hup,
            2 => Int,
            3 => Quit,
            4 => Ill,
            5 => Trap,
            6 => Abrt,
            7 => Unused,
            8 => Fpe,
            9 => Kill,
            10 => Usr1,
            11 => Segv,
            12 => Usr2,
            13 => Pipe,
            14 => Alrm,
            15 => Term,
            16 => Stkflt,
            17 => Chld,
            18 => Cont,
            19 => Stop,
            20 => Tstp,
            21 => Ttin,
            22 => Ttou,
            _ => return None,
        })
    }
}

/// `SIGKILL` and `SIGSTOP` can never be blocked or caught (spec.md §6).
pub const UNBLOCKABLE: u32 = Signal::Kill.mask() | Signal::Stop.mask();

bitflags::bitflags! {
    pub struct SaFlags: u32 {
        /// Reentrant: don't add the handler's own signal to `blocked`
        /// while it runs.
        const SA_NOMASK = 1 << 0;
        /// Reset disposition to default once the handler has been
        /// invoked (spec.md §4.7).
        const SA_ONESHOT = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
    Handler(usize),
}

impl Default for Disposition {
    fn default() -> Self {
        Disposition::Default
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SigAction {
    pub disposition: Disposition,
    pub mask: u32,
    pub flags: SaFlags,
}

impl Default for SaFlags {
    fn default() -> Self {
        SaFlags::empty()
    }
}

/// Per-task signal state: the 32-bit pending and blocked bitmaps, and the
/// table of one `SigAction` per signal (spec.md §3: "per-signal
/// disposition table").
#[derive(Clone, Copy)]
pub struct SignalState {
    pub pending: u32,
    pub blocked: u32,
    pub actions: [SigAction; NSIG],
}

impl SignalState {
    pub const fn new() -> Self {
        Self {
            pending: 0,
            blocked: 0,
            actions: [SigAction {
                disposition: Disposition::Default,
                mask: 0,
                flags: SaFlags::empty(),
            }; NSIG],
        }
    }

    pub fn raise(&mut self, sig: Signal) {
        self.pending |= sig.mask();
    }

    pub fn clear(&mut self, sig: Signal) {
        self.pending &= !sig.mask();
    }

    /// Signals that are pending and not blocked, except that `SIGKILL`
    /// and `SIGSTOP` are always deliverable (spec.md §4.6, §6).
    pub fn deliverable(&self) -> u32 {
        self.pending & (!self.blocked | UNBLOCKABLE)
    }

    /// Reset on `execve` (spec.md §4.7: "zero every signal handler").
    pub fn reset_handlers_on_exec(&mut self) {
        for action in self.actions.iter_mut() {
            if action.disposition != Disposition::Ignore {
                action.disposition = Disposition::Default;
            }
        }
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_and_stop_bypass_blocked_mask() {
        let mut s = SignalState::new();
        s.blocked = 0xffff_ffff;
        s.raise(Signal::Kill);
        s.raise(Signal::Int);
        let d = s.deliverable();
        assert_ne!(d & Signal::Kill.mask(), 0);
        assert_eq!(d & Signal::Int.mask(), 0);
    }
}
