//! PCA9685-driven differential drive base.
//!
//! This module drives the two wheel motors of a differential base through a
//! PCA9685 PWM controller on a shared I2C bus. Each motor uses a phase
//! (direction) channel and an enable (duty) channel.

use core::cell::RefCell;

use embedded_hal::i2c::I2c;
use embedded_hal_bus::i2c::RefCellDevice;
use pwm_pca9685::{Address as PwmAddress, Channel, Error as PwmError, Pca9685};

use crate::utils::{
    controllers::drive::{DriveBase, DriveSettings},
    dk,
};

/// Default I2C address of the PWM controller.
pub const PWM_ADDRESS: u8 = 0x55;

/// Errors that can occur when interacting with the PWM controller.
#[derive(Debug)]
pub enum DeviceError<E: core::fmt::Debug> {
    PwmError(PwmError<E>),
    PwmNotInitialized,
    /// Full-duty wheel speed must be finite and positive to map speeds to duties.
    InvalidMaxWheelSpeed(f32),
}

/// Differential drive base over a PCA9685 PWM controller.
pub struct PwmDriveBase<'a, I2C: 'static> {
    i2c: &'a RefCell<I2C>,
    pub pwm: Option<Pca9685<RefCellDevice<'a, I2C>>>,
    address: u8,
    /// (phase, enable) for the left and right motor.
    motor_channels: [(Channel, Channel); 2],
    kinematics: dk,
    /// Wheel surface speed reached at full duty (mm/s).
    max_wheel_speed: f32,
    settings: DriveSettings,
}

impl<'a, I2C, E> PwmDriveBase<'a, I2C>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    /// Create a drive base with the given geometry and full-duty wheel speed.
    pub fn new(
        i2c_bus: &'a RefCell<I2C>,
        kinematics: dk,
        max_wheel_speed: f32,
    ) -> Self {
        PwmDriveBase {
            i2c: i2c_bus,
            pwm: None,
            address: PWM_ADDRESS,
            motor_channels: [(Channel::C0, Channel::C1), (Channel::C2, Channel::C3)],
            kinematics,
            max_wheel_speed,
            settings: DriveSettings::default(),
        }
    }

    /// Use a PWM controller at a non-default address.
    pub fn with_address(
        mut self,
        address: u8,
    ) -> Self {
        self.address = address;
        self
    }

    /// Attach the PWM controller on the I2C bus.
    pub fn init_devices(&mut self) -> Result<(), DeviceError<E>> {
        let pwm = Pca9685::new(RefCellDevice::new(self.i2c), PwmAddress::from(self.address))
            .map_err(DeviceError::PwmError)?;
        self.pwm = Some(pwm);
        Ok(())
    }

    /// Scan the I2C bus for devices and log any found addresses.
    pub fn scan_bus(&self) {
        let mut bus = self.i2c.borrow_mut();
        for addr in 0x03..0x78 {
            if bus.write(addr, &[]).is_ok() {
                tracing::warn!("I2C device found at 0x{:02X}", addr);
            }
        }
    }

    /// Configure and enable the PWM controller.
    pub fn configure_pwm(&mut self) -> Result<(), DeviceError<E>> {
        let pca = self.pwm.as_mut().ok_or(DeviceError::PwmNotInitialized)?;
        pca.enable().map_err(DeviceError::PwmError)?;
        tracing::info!("PWM enabled");
        pca.set_prescale(100).map_err(DeviceError::PwmError)?;
        tracing::info!("PWM prescale set to 60Hz");
        Ok(())
    }

    /// Applies normalized wheel duties in [-1, 1] using the PWM driver.
    ///
    /// A non-finite duty stops its wheel.
    pub fn apply_wheel_duties(
        &mut self,
        duties: &[f32; 2],
    ) -> Result<(), DeviceError<E>> {
        const MAX_DUTY: u16 = 4095;

        let pca = self.pwm.as_mut().ok_or(DeviceError::PwmNotInitialized)?;
        for (i, &(phase_channel, enable_channel)) in self.motor_channels.iter().enumerate() {
            let raw = if duties[i].is_finite() { duties[i] } else { 0.0 };
            let duty = libm::fminf(libm::fabsf(raw), 1.0);
            let forward = raw >= 0.0;

            pca.set_channel_on_off(phase_channel, 0, if forward { 0 } else { MAX_DUTY })
                .map_err(DeviceError::PwmError)?;
            pca.set_channel_on_off(enable_channel, 0, (duty * MAX_DUTY as f32) as u16)
                .map_err(DeviceError::PwmError)?;
        }
        Ok(())
    }

    /// Enable the PWM controller.
    pub fn enable(&mut self) -> Result<(), DeviceError<E>> {
        let pca = self.pwm.as_mut().ok_or(DeviceError::PwmNotInitialized)?;
        pca.enable().map_err(DeviceError::PwmError)
    }

    /// Disable the PWM controller outputs.
    pub fn disable(&mut self) -> Result<(), DeviceError<E>> {
        let pca = self.pwm.as_mut().ok_or(DeviceError::PwmNotInitialized)?;
        pca.disable().map_err(DeviceError::PwmError)
    }
}

impl<'a, I2C, E> DriveBase for PwmDriveBase<'a, I2C>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    type Error = DeviceError<E>;

    /// Speed and turn rate are limited to the stored settings before being
    /// mapped to wheel duties.
    fn drive(
        &mut self,
        speed: f32,
        turn_rate: f32,
    ) -> Result<(), Self::Error> {
        if !(self.max_wheel_speed.is_finite() && self.max_wheel_speed > 0.0) {
            return Err(DeviceError::InvalidMaxWheelSpeed(self.max_wheel_speed));
        }
        let speed = clamp(speed, self.settings.straight_speed);
        let turn_rate = clamp(turn_rate, self.settings.turn_rate);
        let [left, right] = self.kinematics.compute_wheel_velocities(speed, turn_rate);
        let duties = [left / self.max_wheel_speed, right / self.max_wheel_speed];
        tracing::debug!(
            speed,
            turn_rate,
            left_rate = self.kinematics.wheel_rate(left),
            right_rate = self.kinematics.wheel_rate(right),
            ?duties,
            "driving"
        );
        self.apply_wheel_duties(&duties)
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        self.apply_wheel_duties(&[0.0, 0.0])
    }

    fn settings(&self) -> DriveSettings {
        self.settings
    }

    fn set_settings(
        &mut self,
        settings: DriveSettings,
    ) {
        self.settings = settings;
    }
}

fn clamp(
    value: f32,
    limit: f32,
) -> f32 {
    let limit = libm::fabsf(limit);
    libm::fmaxf(-limit, libm::fminf(value, limit))
}
