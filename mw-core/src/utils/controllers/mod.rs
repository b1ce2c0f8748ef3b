//! Module Exports
//!
//! - `supervisor`: bounded supervision of rotary actuator motions.
//! - `drive`: drive-base settings guard.
//! - `i2c`: PCA9685-driven differential drive base.
//!
//! `SystemController` ties a supervisor and a drive guard together and runs
//! `SystemCommand`s received over `COMMAND_CHANNEL`, answering on
//! `REPORT_CHANNEL`.

pub mod drive;
/// Module for the PWM drive base on the I2C bus.
pub mod i2c;
pub mod supervisor;

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};

use crate::utils::timing::MonotonicClock;
use drive::{ConfigError, DriveBase, DriveGuard, SettingsReport, SettingsRequest};
use supervisor::{
    Actuator, MotionRequest, MotionSupervisor, Outcome, OutcomeHandlers, DEFAULT_SPEED,
};

/// Channel used to receive `SystemCommand`s.
pub static COMMAND_CHANNEL: Channel<CriticalSectionRawMutex, SystemCommand, 16> = Channel::new();
/// Channel on which a `CommandReport` is published for every executed command.
pub static REPORT_CHANNEL: Channel<CriticalSectionRawMutex, CommandReport, 16> = Channel::new();

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(tag = "ct", rename_all = "snake_case")] // ct = command type
pub enum SystemCommand {
    /// Supervised actuator motion.
    M(MotionRequest),
    /// Read or update drive settings.
    S(SettingsRequest),
    /// Drive at speed `s` (mm/s) and turn rate `t` (deg/s).
    D { s: f32, t: f32 },
    /// Stop the drive base.
    X,
}

impl SystemCommand {
    /// Parse a JSON-encoded command.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Result of one `SystemCommand`.
#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
#[serde(tag = "r", rename_all = "snake_case")]
pub enum CommandReport {
    Motion { outcome: Outcome },
    Settings { report: SettingsReport },
    Rejected { error: ConfigError },
    Driven,
    DriveFailed,
}

pub struct SystemController<A, C, B, D> {
    supervisor: MotionSupervisor<A, C>,
    drive: DriveGuard<B, D>,
}

impl<A, C, B, D> SystemController<A, C, B, D>
where
    A: Actuator,
    C: MonotonicClock,
    B: DriveBase,
    D: DelayNs,
{
    pub fn new(
        actuator: A,
        clock: C,
        base: B,
        delay: D,
        default_speed: Option<f32>,
    ) -> Self {
        let speed = default_speed.unwrap_or(DEFAULT_SPEED);
        SystemController {
            supervisor: MotionSupervisor::new(actuator, clock, speed),
            drive: DriveGuard::new(base, delay),
        }
    }

    pub fn supervisor(&mut self) -> &mut MotionSupervisor<A, C> {
        &mut self.supervisor
    }

    pub fn drive(&mut self) -> &mut DriveGuard<B, D> {
        &mut self.drive
    }

    /// Run one command to completion.
    pub fn execute(
        &mut self,
        command: SystemCommand,
    ) -> CommandReport {
        match command {
            SystemCommand::M(request) => {
                let handlers = OutcomeHandlers::new()
                    .on_progressed(|| tracing::info!(?request, "motion progressed"))
                    .on_stalled(|| tracing::warn!(?request, "motion stalled, caller must reissue"));
                let outcome = self.supervisor.supervise(&request, handlers);
                CommandReport::Motion { outcome }
            }
            SystemCommand::S(request) => match self.drive.apply_settings(&request) {
                Ok(report) => CommandReport::Settings { report },
                Err(error) => {
                    tracing::error!(%error, "settings rejected");
                    CommandReport::Rejected { error }
                }
            },
            SystemCommand::D { s, t } => self.drive_report(|guard| guard.drive(s, t)),
            SystemCommand::X => self.drive_report(|guard| guard.stop()),
        }
    }

    fn drive_report<F>(
        &mut self,
        f: F,
    ) -> CommandReport
    where
        F: FnOnce(&mut DriveGuard<B, D>) -> Result<(), B::Error>,
    {
        match f(&mut self.drive) {
            Ok(()) => CommandReport::Driven,
            Err(e) => {
                tracing::error!("drive command failed: {:?}", e);
                CommandReport::DriveFailed
            }
        }
    }

    /// Serve `COMMAND_CHANNEL` forever.
    pub async fn command_ch(&mut self) -> ! {
        loop {
            let command = COMMAND_CHANNEL.receiver().receive().await;
            tracing::info!("Received command: {:?}", command);
            let report = self.execute(command);
            REPORT_CHANNEL.sender().send(report).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use embassy_time::Duration;

    use super::*;
    use crate::utils::{sim::SimulatedActuator, timing::ManualClock};

    #[test]
    fn parses_tagged_commands() {
        let m = SystemCommand::from_json(br#"{"ct":"m","kind":"target","speed":90,"budget_ms":250}"#)
            .unwrap();
        match m {
            SystemCommand::M(req) => {
                assert_eq!(req.speed, 90.0);
                assert_eq!(req.budget_ms, Some(250));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            SystemCommand::from_json(br#"{"ct":"d","s":120.5,"t":-30.0}"#).unwrap(),
            SystemCommand::D { s: 120.5, t: -30.0 }
        );
        assert_eq!(SystemCommand::from_json(br#"{"ct":"x"}"#).unwrap(), SystemCommand::X);
        assert!(SystemCommand::from_json(br#"{"ct":"q"}"#).is_err());
    }

    #[test]
    fn settings_rejection_is_reported() {
        struct NullBase(drive::DriveSettings);
        impl DriveBase for NullBase {
            type Error = core::convert::Infallible;
            fn drive(
                &mut self,
                _: f32,
                _: f32,
            ) -> Result<(), Self::Error> {
                Ok(())
            }
            fn stop(&mut self) -> Result<(), Self::Error> {
                Ok(())
            }
            fn settings(&self) -> drive::DriveSettings {
                self.0
            }
            fn set_settings(
                &mut self,
                settings: drive::DriveSettings,
            ) {
                self.0 = settings;
            }
        }

        let clock = ManualClock::new(Duration::from_millis(1));
        let mut ctrl = SystemController::new(
            SimulatedActuator::new(&clock),
            &clock,
            NullBase(drive::DriveSettings::default()),
            ManualClock::new(Duration::from_ticks(0)),
            None,
        );
        let report = ctrl.execute(SystemCommand::S(SettingsRequest {
            straight_speed: Some(150.0),
            ..SettingsRequest::default()
        }));
        assert!(matches!(report, CommandReport::Rejected { .. }));

        let report = ctrl.execute(SystemCommand::M(MotionRequest::target(400.0, 40.0).budget_ms(500)));
        assert_eq!(report, CommandReport::Motion { outcome: Outcome::Completed });
        assert_eq!(ctrl.supervisor().default_speed(), DEFAULT_SPEED);
        assert_eq!(ctrl.execute(SystemCommand::X), CommandReport::Driven);
    }
}
