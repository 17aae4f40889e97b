//! Console output. Device register programming (VGA text buffer, UART)
//! is out of scope (spec.md §1), so this module is only the capability
//! record every other out-of-scope-driver module in this tree uses
//! (`blk::driver::BlockDriver`, `tty`'s `driver_write`): a single
//! `putc` entry point the boot sequence registers, and a `Printer` that
//! formats onto it with `core::fmt::Write`.

use core::fmt::{self, Write};

use crate::lock::Spinlock;

/// The out-of-scope hardware collaborator: write one byte to whatever
/// backs the console (serial port, VGA text buffer, ...).
pub trait ConsoleDevice: Send + Sync {
    fn putc(&self, byte: u8);
}

struct NullConsole;

impl ConsoleDevice for NullConsole {
    fn putc(&self, _byte: u8) {}
}

static NULL_CONSOLE: NullConsole = NullConsole;
static DEVICE: Spinlock<&'static dyn ConsoleDevice> = Spinlock::new("console_device", &NULL_CONSOLE);

/// Install the console driver. Called once at boot, before the first
/// `kprintln!` (spec.md §0: ambient logging goes through this path
/// before anything else is up).
pub fn register(device: &'static dyn ConsoleDevice) {
    *DEVICE.lock() = device;
}

fn putc(byte: u8) {
    DEVICE.lock().putc(byte);
}

/// Formats onto the registered console device one byte at a time. No
/// buffering: a panic mid-format still gets whatever prefix it managed
/// onto the wire.
pub struct Printer;

impl Write for Printer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            putc(b);
        }
        Ok(())
    }
}

/// Serializes the format-and-write sequence across concurrent callers
/// so interleaved `kprintln!`s don't interlace their bytes.
pub fn with_printer(f: impl FnOnce(&mut Printer)) {
    static PRINT_LOCK: Spinlock<()> = Spinlock::new("console_print", ());
    let _guard = PRINT_LOCK.lock();
    f(&mut Printer)
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        $crate::console::with_printer(|p| { let _ = write!(p, $($arg)*); });
    }};
}

#[macro_export]
macro_rules! kprintln {
    () => { $crate::kprint!("\n") };
    ($($arg:tt)*) => {{
        $crate::kprint!($($arg)*);
        $crate::kprint!("\n");
    }};
}
