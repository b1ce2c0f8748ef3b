//! Supervision of timed actuator motions and drive-base settings on no-std
//! embedded platforms.
//!
//! For a runnable host simulation, see the `mw-app/mock-mcu` binary.
#![no_std]

pub mod utils;
