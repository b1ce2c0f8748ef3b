use clap::Parser;
use core::cell::RefCell;
use embassy_executor::{Executor, Spawner};
use embedded_hal::i2c::{ErrorType, I2c, Operation};
use mw_core::mk_static;
use mw_core::utils::controllers::i2c::PwmDriveBase;
use mw_core::utils::controllers::{COMMAND_CHANNEL, REPORT_CHANNEL, SystemCommand};
use mw_core::utils::sim::SimulatedActuator;
use mw_core::utils::timing::EmbassyClock;
use mw_core::utils::{Delay, SystemController, dk};
use static_cell::StaticCell;
use std::convert::Infallible;
use tracing::{error, info};

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// Speed used by motion commands that leave out their target (deg/s)
    #[clap(long)]
    default_speed: Option<f32>,
    /// Angle at which the simulated shaft is blocked
    #[clap(long, allow_hyphen_values = true)]
    obstruction: Option<f32>,
    /// Wheel diameter of the drive base (mm)
    #[clap(long, default_value_t = 56.0)]
    wheel_diameter: f32,
    /// Distance between the wheels (mm)
    #[clap(long, default_value_t = 112.0)]
    axle_track: f32,
    /// Wheel surface speed at full PWM duty (mm/s)
    #[clap(long, default_value_t = 400.0, value_parser = positive_speed)]
    max_wheel_speed: f32,
    /// JSON commands to run in order; a demo script runs when none are given
    commands: Vec<String>,
}

fn positive_speed(raw: &str) -> Result<f32, String> {
    match raw.parse::<f32>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        Ok(v) => Err(format!("{} is not a positive speed", v)),
        Err(e) => Err(e.to_string()),
    }
}

const DEMO_SCRIPT: &[&str] = &[
    r#"{"ct":"s"}"#,
    r#"{"ct":"s","straight_speed":150}"#,
    r#"{"ct":"s","straight_speed":150,"enforce_minimum":false}"#,
    r#"{"ct":"s","straight_speed":300,"turn_rate":90}"#,
    r#"{"ct":"m","kind":"target","speed":360,"target":90,"budget_ms":1000}"#,
    r#"{"ct":"m","kind":"angle","speed":-45,"budget_ms":500}"#,
    r#"{"ct":"m","kind":"target","speed":30,"target":0,"budget_ms":300,"threshold":10}"#,
    r#"{"ct":"d","s":250,"t":30}"#,
    r#"{"ct":"x"}"#,
];

/// I2C bus that accepts every transfer and logs it to the console.
struct LoggingI2c;

impl ErrorType for LoggingI2c {
    type Error = Infallible;
}

impl I2c for LoggingI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        for op in operations {
            match op {
                Operation::Write(bytes) => info!("I2C 0x{:02X} <- {:02X?}", address, bytes),
                Operation::Read(buf) => {
                    buf.fill(0);
                    info!("I2C 0x{:02X} -> {} zero bytes", address, buf.len());
                }
            }
        }
        Ok(())
    }
}

type Controller = SystemController<
    SimulatedActuator<EmbassyClock>,
    EmbassyClock,
    PwmDriveBase<'static, LoggingI2c>,
    Delay,
>;

#[embassy_executor::task]
async fn command_task(mut ctrl: Controller) -> ! {
    ctrl.command_ch().await
}

#[embassy_executor::task]
async fn main_task(commands: Vec<SystemCommand>) {
    for command in commands {
        COMMAND_CHANNEL.send(command).await;
        let report = REPORT_CHANNEL.receive().await;
        match serde_json::to_string(&report) {
            Ok(json) => info!("report: {}", json),
            Err(e) => error!("failed to encode report {:?}: {}", report, e),
        }
    }
    info!("script finished");
    std::process::exit(0);
}

fn parse_commands(raw: &[String]) -> Result<Vec<SystemCommand>, serde_json::Error> {
    if raw.is_empty() {
        DEMO_SCRIPT
            .iter()
            .map(|c| SystemCommand::from_json(c.as_bytes()))
            .collect()
    } else {
        raw.iter()
            .map(|c| SystemCommand::from_json(c.as_bytes()))
            .collect()
    }
}

fn build_controller(opts: &Opts) -> Controller {
    let i2c_bus: &'static RefCell<LoggingI2c> = mk_static!(RefCell<LoggingI2c>, RefCell::new(LoggingI2c));

    let mut base = PwmDriveBase::new(
        i2c_bus,
        dk::new(opts.wheel_diameter, opts.axle_track),
        opts.max_wheel_speed,
    );
    if let Err(e) = base.init_devices().and_then(|()| base.configure_pwm()) {
        error!("PWM init failed, scanning instead: {:?}", e);
        base.scan_bus();
    }

    let clock = EmbassyClock::new();
    let mut actuator = SimulatedActuator::new(clock);
    if let Some(angle) = opts.obstruction {
        actuator = actuator.with_obstruction(angle);
    }

    SystemController::new(actuator, clock, base, Delay, opts.default_speed)
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts: Opts = Opts::parse();
    let commands = match parse_commands(&opts.commands) {
        Ok(commands) => commands,
        Err(e) => {
            error!("invalid command: {}", e);
            std::process::exit(2);
        }
    };
    let ctrl = build_controller(&opts);

    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner: Spawner| {
        spawner.spawn(command_task(ctrl)).unwrap();
        spawner.spawn(main_task(commands)).unwrap();
    });
}
