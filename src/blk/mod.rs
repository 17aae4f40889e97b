//! C4: the block request layer. One request queue per device, elevator-
//! sorted, feeding a driver's `request_fn` (spec.md §4.4).

pub mod driver;
pub mod request;

pub use driver::{BlockDriver, DriverState};
pub use request::{make_request, Command, Request};
