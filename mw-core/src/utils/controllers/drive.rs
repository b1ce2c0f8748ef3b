//! Drive-base settings guard.
//!
//! `DriveGuard` sits in front of a `DriveBase` configuration entry point. It
//! enforces a minimum straight speed when asked to, downgrades violations to
//! an `Advisory` otherwise, and gives the base a fixed settle delay after
//! every write.

use core::fmt;

use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};

/// Lowest straight speed accepted in strict mode (mm/s).
pub const MIN_STRAIGHT_SPEED: f32 = 200.0;
/// Pause after applying settings, before further commands (ms).
pub const SETTLE_DELAY_MS: u32 = 50;

/// Speed and acceleration limits of a drive base.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveSettings {
    /// mm/s
    pub straight_speed: f32,
    /// mm/s²
    pub straight_acceleration: f32,
    /// deg/s
    pub turn_rate: f32,
    /// deg/s²
    pub turn_acceleration: f32,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            straight_speed: 400.0,
            straight_acceleration: 800.0,
            turn_rate: 180.0,
            turn_acceleration: 720.0,
        }
    }
}

/// Capabilities of a two-wheel differential drive base.
pub trait DriveBase {
    type Error: fmt::Debug;

    /// Drive at `speed` (mm/s) while turning at `turn_rate` (deg/s).
    fn drive(
        &mut self,
        speed: f32,
        turn_rate: f32,
    ) -> Result<(), Self::Error>;

    fn stop(&mut self) -> Result<(), Self::Error>;

    fn settings(&self) -> DriveSettings;

    fn set_settings(
        &mut self,
        settings: DriveSettings,
    );
}

/// Partial settings update. Fields left out keep their current value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettingsRequest {
    #[serde(default)]
    pub straight_speed: Option<f32>,
    #[serde(default)]
    pub straight_acceleration: Option<f32>,
    #[serde(default)]
    pub turn_rate: Option<f32>,
    #[serde(default)]
    pub turn_acceleration: Option<f32>,
    #[serde(default = "enforce_by_default")]
    pub enforce_minimum: bool,
}

fn enforce_by_default() -> bool {
    true
}

impl Default for SettingsRequest {
    fn default() -> Self {
        Self {
            straight_speed: None,
            straight_acceleration: None,
            turn_rate: None,
            turn_acceleration: None,
            enforce_minimum: true,
        }
    }
}

impl SettingsRequest {
    /// True when nothing is to be written.
    pub fn is_read(&self) -> bool {
        self.straight_speed.is_none()
            && self.straight_acceleration.is_none()
            && self.turn_rate.is_none()
            && self.turn_acceleration.is_none()
    }

    /// Overlay the requested values on `current`.
    pub fn merge(
        &self,
        current: DriveSettings,
    ) -> DriveSettings {
        DriveSettings {
            straight_speed: self.straight_speed.unwrap_or(current.straight_speed),
            straight_acceleration: self
                .straight_acceleration
                .unwrap_or(current.straight_acceleration),
            turn_rate: self.turn_rate.unwrap_or(current.turn_rate),
            turn_acceleration: self.turn_acceleration.unwrap_or(current.turn_acceleration),
        }
    }
}

/// Settings rejected before anything was applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ConfigError {
    SpeedTooLow { requested: f32, minimum: f32 },
}

impl fmt::Display for ConfigError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ConfigError::SpeedTooLow { requested, minimum } => {
                write!(f, "straight speed {requested} is under the minimum of {minimum}")
            }
        }
    }
}

impl core::error::Error for ConfigError {}

/// Non-fatal notice attached to settings applied without the minimum check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Advisory {
    /// The supplied straight speed is under the minimum and was applied anyway.
    SpeedBelowMinimum { accepted: f32 },
    /// The minimum was not checked; a speed under it would be accepted.
    MinimumNotEnforced,
}

impl fmt::Display for Advisory {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Advisory::SpeedBelowMinimum { accepted } => write!(
                f,
                "accepted straight speed {accepted} under {MIN_STRAIGHT_SPEED}"
            ),
            Advisory::MinimumNotEnforced => write!(
                f,
                "settings may take a speed under {MIN_STRAIGHT_SPEED}; enforce the minimum to reject it"
            ),
        }
    }
}

/// What `apply_settings` did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SettingsReport {
    /// Nothing requested; the current settings, untouched.
    Current(DriveSettings),
    Applied {
        settings: DriveSettings,
        advisory: Option<Advisory>,
    },
}

/// Validating front end for a drive base.
pub struct DriveGuard<B, D> {
    base: B,
    delay: D,
}

impl<B, D> DriveGuard<B, D>
where
    B: DriveBase,
    D: DelayNs,
{
    pub fn new(
        base: B,
        delay: D,
    ) -> Self {
        Self { base, delay }
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut B {
        &mut self.base
    }

    pub fn into_parts(self) -> (B, D) {
        (self.base, self.delay)
    }

    /// Read or update the drive settings.
    ///
    /// An empty request reads. Otherwise the merged settings are written,
    /// unless `enforce_minimum` is set and the straight speed is under
    /// `MIN_STRAIGHT_SPEED`, and the call blocks for `SETTLE_DELAY_MS`.
    pub fn apply_settings(
        &mut self,
        request: &SettingsRequest,
    ) -> Result<SettingsReport, ConfigError> {
        let current = self.base.settings();
        if request.is_read() {
            return Ok(SettingsReport::Current(current));
        }

        let settings = request.merge(current);
        let below = settings.straight_speed < MIN_STRAIGHT_SPEED;

        let advisory = if request.enforce_minimum {
            if below {
                tracing::error!(
                    requested = settings.straight_speed,
                    "rejecting drive settings"
                );
                return Err(ConfigError::SpeedTooLow {
                    requested: settings.straight_speed,
                    minimum: MIN_STRAIGHT_SPEED,
                });
            }
            None
        } else {
            let advisory = match request.straight_speed {
                Some(speed) if speed < MIN_STRAIGHT_SPEED => {
                    Advisory::SpeedBelowMinimum { accepted: speed }
                }
                _ => Advisory::MinimumNotEnforced,
            };
            tracing::warn!("{}", advisory);
            Some(advisory)
        };

        self.base.set_settings(settings);
        tracing::info!(?settings, "drive settings applied");
        self.delay.delay_ms(SETTLE_DELAY_MS);

        Ok(SettingsReport::Applied { settings, advisory })
    }

    pub fn drive(
        &mut self,
        speed: f32,
        turn_rate: f32,
    ) -> Result<(), B::Error> {
        self.base.drive(speed, turn_rate)
    }

    pub fn stop(&mut self) -> Result<(), B::Error> {
        self.base.stop()
    }
}

#[cfg(test)]
mod tests {
    use core::convert::Infallible;

    use embassy_time::Duration;

    use super::*;
    use crate::utils::timing::ManualClock;

    #[derive(Default)]
    struct RecordingBase {
        settings: DriveSettings,
        writes: u32,
        last_drive: Option<(f32, f32)>,
    }

    impl DriveBase for RecordingBase {
        type Error = Infallible;

        fn drive(
            &mut self,
            speed: f32,
            turn_rate: f32,
        ) -> Result<(), Infallible> {
            self.last_drive = Some((speed, turn_rate));
            Ok(())
        }

        fn stop(&mut self) -> Result<(), Infallible> {
            self.last_drive = Some((0.0, 0.0));
            Ok(())
        }

        fn settings(&self) -> DriveSettings {
            self.settings
        }

        fn set_settings(
            &mut self,
            settings: DriveSettings,
        ) {
            self.settings = settings;
            self.writes += 1;
        }
    }

    fn guard() -> DriveGuard<RecordingBase, ManualClock> {
        DriveGuard::new(RecordingBase::default(), ManualClock::new(Duration::from_ticks(0)))
    }

    #[test]
    fn empty_request_reads_without_writing() {
        let mut g = guard();
        let report = g.apply_settings(&SettingsRequest::default()).unwrap();
        assert_eq!(report, SettingsReport::Current(DriveSettings::default()));
        assert_eq!(g.base().writes, 0);
        let (_, delay) = g.into_parts();
        assert_eq!(delay.peek(), Duration::from_ticks(0));
    }

    #[test]
    fn strict_mode_rejects_slow_speed() {
        let mut g = guard();
        let request = SettingsRequest {
            straight_speed: Some(150.0),
            ..SettingsRequest::default()
        };
        let err = g.apply_settings(&request).unwrap_err();
        assert_eq!(
            err,
            ConfigError::SpeedTooLow {
                requested: 150.0,
                minimum: MIN_STRAIGHT_SPEED
            }
        );
        assert_eq!(g.base().settings, DriveSettings::default());
        assert_eq!(g.base().writes, 0);
    }

    #[test]
    fn permissive_mode_applies_with_advisory() {
        let mut g = guard();
        let request = SettingsRequest {
            straight_speed: Some(150.0),
            enforce_minimum: false,
            ..SettingsRequest::default()
        };
        let report = g.apply_settings(&request).unwrap();
        let expected = DriveSettings {
            straight_speed: 150.0,
            ..DriveSettings::default()
        };
        assert_eq!(
            report,
            SettingsReport::Applied {
                settings: expected,
                advisory: Some(Advisory::SpeedBelowMinimum { accepted: 150.0 }),
            }
        );
        assert_eq!(g.base().settings, expected);
    }

    #[test]
    fn permissive_mode_without_speed_warns_generically() {
        let mut g = guard();
        let request = SettingsRequest {
            turn_rate: Some(90.0),
            enforce_minimum: false,
            ..SettingsRequest::default()
        };
        match g.apply_settings(&request).unwrap() {
            SettingsReport::Applied { settings, advisory } => {
                assert_eq!(settings.turn_rate, 90.0);
                assert_eq!(advisory, Some(Advisory::MinimumNotEnforced));
            }
            other => panic!("unexpected report {:?}", other),
        }
    }

    #[test]
    fn strict_apply_merges_and_settles() {
        let mut g = guard();
        let request = SettingsRequest {
            straight_speed: Some(350.0),
            straight_acceleration: Some(500.0),
            ..SettingsRequest::default()
        };
        let report = g.apply_settings(&request).unwrap();
        let expected = DriveSettings {
            straight_speed: 350.0,
            straight_acceleration: 500.0,
            ..DriveSettings::default()
        };
        assert_eq!(
            report,
            SettingsReport::Applied {
                settings: expected,
                advisory: None
            }
        );
        assert_eq!(g.base().writes, 1);
        let (_, delay) = g.into_parts();
        assert_eq!(delay.peek(), Duration::from_millis(u64::from(SETTLE_DELAY_MS)));
    }

    #[test]
    fn strict_mode_checks_the_effective_speed() {
        let mut g = guard();
        g.base_mut().settings.straight_speed = 100.0;
        let request = SettingsRequest {
            turn_rate: Some(90.0),
            ..SettingsRequest::default()
        };
        assert!(matches!(
            g.apply_settings(&request),
            Err(ConfigError::SpeedTooLow { requested, .. }) if requested == 100.0
        ));
    }

    #[test]
    fn drive_delegates_to_base() {
        let mut g = guard();
        g.drive(300.0, -45.0).unwrap();
        assert_eq!(g.base().last_drive, Some((300.0, -45.0)));
        g.stop().unwrap();
        assert_eq!(g.base().last_drive, Some((0.0, 0.0)));
    }

    #[test]
    fn request_parses_with_strict_default() {
        let req: SettingsRequest = serde_json::from_str(r#"{"straight_speed":250.0}"#).unwrap();
        assert!(req.enforce_minimum);
        assert!(!req.is_read());
    }
}
