//! The driver side of C4: the non-reentrant `request_fn` loop and the
//! explicit state machine spec.md §9 Design Notes recommend in place of
//! the original's function-pointer-swapping "current driver" trick.
//!
//! Actual register programming is out of scope (spec.md §1: "device
//! register programming" is an external collaborator); `BlockDriver` is
//! the interface the core calls through, and a real driver module would
//! implement it and register itself with `register`.

use crate::param::NR_REQUEST;

pub const NR_BLOCK_DEVICES: usize = 4;
pub const MAX_RETRIES: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Seeking,
    Reading,
    Writing,
    Recalibrate,
    Reset,
    Error,
}

/// The out-of-scope hardware collaborator: program the device for the
/// current head-of-queue request and arm its completion interrupt.
/// `kick` calls this once the request layer has decided the driver is
/// idle and there is work to do.
pub trait BlockDriver: Send + Sync {
    /// Begin (or continue, after a recalibrate/reset) servicing the
    /// request at the head of this device's queue.
    fn start(&self, dev: u16);

    fn state(&self) -> DriverState;
    fn set_state(&self, state: DriverState);
}

struct NullDriver;

impl BlockDriver for NullDriver {
    fn start(&self, _dev: u16) {}
    fn state(&self) -> DriverState {
        DriverState::Idle
    }
    fn set_state(&self, _state: DriverState) {}
}

static NULL_DRIVER: NullDriver = NullDriver;
static mut DRIVERS: [&'static dyn BlockDriver; NR_BLOCK_DEVICES] =
    [&NULL_DRIVER, &NULL_DRIVER, &NULL_DRIVER, &NULL_DRIVER];

/// Map a packed (major, minor) device number onto a request-queue slot.
/// Queues are per major device, not per minor, matching spec.md §4.4
/// "one request queue per block device".
pub fn device_index(dev: u16) -> usize {
    (crate::param::major(dev) as usize) % NR_BLOCK_DEVICES
}

/// Register the driver responsible for a given major device. Called
/// once at boot by the (out-of-scope) device bring-up sequence.
///
/// # Safety
/// Must only be called before interrupts are enabled; `DRIVERS` is not
/// otherwise synchronized since the table is effectively read-only
/// after boot.
pub unsafe fn register(major: u8, driver: &'static dyn BlockDriver) {
    let idx = device_index(crate::param::mkdev(major, 0));
    DRIVERS[idx] = driver;
}

fn driver_for(dev: u16) -> &'static dyn BlockDriver {
    // SAFETY: read-only after boot (see `register`).
    unsafe { DRIVERS[device_index(dev)] }
}

/// If the named device's driver is idle and has work queued, start it.
/// Called by `request::add_request` when a queue goes from empty to
/// non-empty, and by `request::end_request` after finishing the head
/// request (spec.md §4.4: "re-enters `request_fn` for the next entry").
pub fn kick(dev: u16) {
    let driver = driver_for(dev);
    if driver.state() == DriverState::Idle {
        driver.set_state(DriverState::Seeking);
        driver.start(dev);
    }
}

const _: () = assert!(NR_REQUEST > 0);
