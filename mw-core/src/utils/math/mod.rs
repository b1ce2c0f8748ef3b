//! Math utilities for motion-watch.
//!
//! This module provides kinematics calculations for two-wheel differential drive bases.

pub mod kinematics;
