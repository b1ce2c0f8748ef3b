//! Utility re-exports and helper macros for motion-watch.
//!
//! - `controllers`: motion supervision, drive settings guard, PCA9685 drive
//!   base and the command-driven `SystemController`
//! - `math`: differential-drive kinematics
//! - `sim`: simulated rotary actuator for host runs and tests
//! - `timing`: monotonic clocks and the shared poll-until primitive
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod controllers;
pub mod math;
pub mod sim;
pub mod timing;

pub use controllers::SystemController;
pub use embassy_time::{Delay, Duration, Instant};
pub use math::kinematics::DifferentialKinematics as dk;

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
