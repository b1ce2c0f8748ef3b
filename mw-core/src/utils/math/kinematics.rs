//! Kinematics utilities for two-wheel differential drive bases.
//!
//! The `DifferentialKinematics` struct maps a body motion (forward speed and
//! turn rate) to left/right wheel surface speeds and inverts wheel
//! measurements back to body motion.
//!
//! Positive turn rates turn clockwise seen from above, so the left wheel runs
//! faster than the right one.
//!
//! # Example
//! ```rust
//! use mw_core::utils::math::kinematics::DifferentialKinematics;
//! let kin = DifferentialKinematics::new(56.0, 112.0);
//! let [left, right] = kin.compute_wheel_velocities(200.0, 90.0);
//! assert!(left > right);
//! ```
//!
use core::f32::consts::PI;

/// Represents the geometry of a two-wheel differential drive base.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferentialKinematics {
    /// Wheel diameter (mm)
    wheel_diameter: f32,
    /// Distance between the wheel contact points (mm)
    axle_track: f32,
}

impl DifferentialKinematics {
    /// Instantiate with a given wheel diameter and axle track.
    pub fn new(
        wheel_diameter: f32,
        axle_track: f32,
    ) -> Self {
        Self {
            wheel_diameter,
            axle_track,
        }
    }

    /// Compute left/right wheel surface speeds (mm/s).
    ///
    /// `speed` is the forward speed of the base center (mm/s) and `turn_rate`
    /// its rotation rate (deg/s).
    pub fn compute_wheel_velocities(
        &self,
        speed: f32,
        turn_rate: f32,
    ) -> [f32; 2] {
        let omega = turn_rate * (PI / 180.0);
        let half_track = self.axle_track / 2.0;
        [
            clamp_small(speed + omega * half_track, 1e-6),
            clamp_small(speed - omega * half_track, 1e-6),
        ]
    }

    /// Recover body motion from measured wheel surface speeds.
    ///
    /// # Returns
    ///
    /// `(speed, turn_rate)` in mm/s and deg/s.
    pub fn compute_body_velocity(
        &self,
        wheel_velocity: [f32; 2],
    ) -> (f32, f32) {
        let [left, right] = wheel_velocity;
        let speed = (left + right) / 2.0;
        let omega = (left - right) / self.axle_track;
        (speed, omega * (180.0 / PI))
    }

    /// Convert a wheel surface speed (mm/s) to a wheel rotation rate (deg/s).
    pub fn wheel_rate(
        &self,
        surface_speed: f32,
    ) -> f32 {
        let radius = self.wheel_diameter / 2.0;
        (surface_speed / radius) * (180.0 / PI)
    }
}

fn clamp_small(
    v: f32,
    eps: f32,
) -> f32 {
    if libm::fabsf(v) < eps {
        0.0
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(
        a: f32,
        b: f32,
    ) -> bool {
        libm::fabsf(a - b) < 1e-3
    }

    #[test]
    fn test_straight_line_wheels_match() {
        let kin = DifferentialKinematics::new(56.0, 112.0);
        let [l, r] = kin.compute_wheel_velocities(300.0, 0.0);
        assert_eq!(l, 300.0);
        assert_eq!(r, 300.0);
    }

    #[test]
    fn test_compute_wheel_velocities_zero() {
        let kin = DifferentialKinematics::new(56.0, 112.0);
        assert_eq!(kin.compute_wheel_velocities(0.0, 0.0), [0.0, 0.0]);
    }

    #[test]
    fn test_spin_in_place() {
        let kin = DifferentialKinematics::new(56.0, 112.0);
        let [l, r] = kin.compute_wheel_velocities(0.0, 180.0);
        // half a turn per second moves each wheel along half the track circle
        assert!(close(l, PI * 56.0));
        assert!(close(r, -PI * 56.0));
    }

    #[test]
    fn test_round_trip_body_velocity() {
        let kin = DifferentialKinematics::new(56.0, 112.0);
        let wheels = kin.compute_wheel_velocities(250.0, -35.0);
        let (speed, turn) = kin.compute_body_velocity(wheels);
        assert!(close(speed, 250.0));
        assert!(close(turn, -35.0));
    }

    #[test]
    fn test_wheel_rate() {
        let kin = DifferentialKinematics::new(56.0, 112.0);
        // one circumference per second is one revolution
        assert!(close(kin.wheel_rate(PI * 56.0), 360.0));
    }
}
