//! Bounded supervision of rotary actuator motions.
//!
//! A `MotionSupervisor` wraps any `Actuator` and a `MonotonicClock`. It issues
//! a non-blocking command, then either waits for the actuator without
//! supervision or polls it against a time budget and classifies the result:
//!
//! - finished before the budget: `Outcome::Completed`
//! - budget elapsed, final angle within the stall threshold of the expected
//!   position: `Outcome::TimedOutProgressed`
//! - budget elapsed, final angle further away: `Outcome::TimedOutStalled`
//!
//! Absolute (`run_target`) and relative (`run_angle`) motions share the same
//! polling and classification; they only differ in the expected final angle.
//!
//! # Example
//! ```rust
//! use mw_core::utils::controllers::supervisor::{MotionRequest, MotionSupervisor, OutcomeHandlers};
//! use mw_core::utils::sim::SimulatedActuator;
//! use mw_core::utils::timing::ManualClock;
//! use mw_core::utils::Duration;
//!
//! let clock = ManualClock::new(Duration::from_millis(1));
//! let mut sup = MotionSupervisor::new(SimulatedActuator::new(&clock), &clock, 500.0);
//! let request = MotionRequest::target(300.0, 90.0).budget_ms(1_000);
//! let outcome = sup.supervise(&request, OutcomeHandlers::new());
//! assert!(!outcome.is_stalled());
//! ```

use serde::{Deserialize, Serialize};

use crate::utils::timing::{millis_saturating, poll_until, spin_until, MonotonicClock, PollResult};

/// Speed used by the shorthand calling convention when none is configured (deg/s).
pub const DEFAULT_SPEED: f32 = 500.0;
/// Largest deviation from the expected angle still counted as progress (deg).
pub const DEFAULT_STALL_THRESHOLD: f32 = 5.0;

/// What the actuator does once it reaches its goal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Actively hold the final position.
    #[default]
    Hold,
    /// Short the windings and stop.
    Brake,
    /// Let the shaft spin freely.
    Coast,
    /// Keep running at the commanded speed.
    Continue,
}

/// Goal of a resolved motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Motion {
    /// Drive to an absolute angle.
    Absolute(f32),
    /// Rotate by `delta` from the angle read when the command was issued.
    Relative { delta: f32, reference: f32 },
}

/// A motion command as handed to the actuator driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionCommand {
    pub motion: Motion,
    pub speed: f32,
    pub then: StopMode,
}

impl MotionCommand {
    /// Angle the actuator should end at.
    pub fn expected_final(&self) -> f32 {
        match self.motion {
            Motion::Absolute(target) => target,
            Motion::Relative { delta, reference } => reference + delta,
        }
    }
}

/// Capabilities the supervisor needs from a rotary actuator driver.
///
/// Calls are infallible at this layer; hardware faults belong to the driver.
pub trait Actuator {
    /// Start a motion without blocking.
    fn command(
        &mut self,
        command: &MotionCommand,
    );

    /// Whether the last commanded motion has finished.
    fn done(&mut self) -> bool;

    /// Current shaft angle (deg).
    fn angle(&mut self) -> f32;

    /// Stop the shaft actively.
    fn brake(&mut self);
}

/// Absolute or relative motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionKind {
    Target,
    Angle,
}

/// A motion as requested by a caller, before the shorthand convention is
/// resolved.
///
/// When `target` is absent, `speed` is the angle (or rotation) to move by and
/// the supervisor's default speed is used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionRequest {
    pub kind: MotionKind,
    pub speed: f32,
    #[serde(default)]
    pub target: Option<f32>,
    #[serde(default)]
    pub then: StopMode,
    #[serde(default = "default_wait")]
    pub wait: bool,
    #[serde(default)]
    pub budget_ms: Option<u64>,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

fn default_wait() -> bool {
    true
}

fn default_threshold() -> f32 {
    DEFAULT_STALL_THRESHOLD
}

impl MotionRequest {
    fn with(
        kind: MotionKind,
        speed: f32,
        target: Option<f32>,
    ) -> Self {
        Self {
            kind,
            speed,
            target,
            then: StopMode::Hold,
            wait: true,
            budget_ms: None,
            threshold: DEFAULT_STALL_THRESHOLD,
        }
    }

    /// Drive to `angle` at `speed`.
    pub fn target(
        speed: f32,
        angle: f32,
    ) -> Self {
        Self::with(MotionKind::Target, speed, Some(angle))
    }

    /// Rotate by `rotation` at `speed`.
    pub fn angle(
        speed: f32,
        rotation: f32,
    ) -> Self {
        Self::with(MotionKind::Angle, speed, Some(rotation))
    }

    /// Shorthand form: `amount` is the goal, speed comes from the supervisor.
    pub fn shorthand(
        kind: MotionKind,
        amount: f32,
    ) -> Self {
        Self::with(kind, amount, None)
    }

    pub fn then(
        mut self,
        then: StopMode,
    ) -> Self {
        self.then = then;
        self
    }

    pub fn budget_ms(
        mut self,
        budget_ms: u64,
    ) -> Self {
        self.budget_ms = Some(budget_ms);
        self
    }

    pub fn threshold(
        mut self,
        threshold: f32,
    ) -> Self {
        self.threshold = threshold;
        self
    }

    /// Return right after dispatch when no budget is set.
    pub fn no_wait(mut self) -> Self {
        self.wait = false;
        self
    }
}

/// Result of one supervised motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Finished before the budget, or ran unsupervised.
    Completed,
    /// Budget elapsed too far from the expected angle.
    TimedOutStalled,
    /// Budget elapsed close enough to the expected angle.
    TimedOutProgressed,
}

impl Outcome {
    pub fn is_stalled(&self) -> bool {
        matches!(self, Outcome::TimedOutStalled)
    }
}

/// Optional callbacks fired once a budgeted motion is classified.
///
/// Handlers are consumed on firing, so each runs at most once and only one of
/// the two ever runs.
pub struct OutcomeHandlers<P = fn(), S = fn()> {
    on_progressed: Option<P>,
    on_stalled: Option<S>,
}

impl OutcomeHandlers {
    /// No handlers.
    pub fn new() -> Self {
        Self {
            on_progressed: None,
            on_stalled: None,
        }
    }
}

impl Default for OutcomeHandlers {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, S> OutcomeHandlers<P, S>
where
    P: FnOnce(),
    S: FnOnce(),
{
    /// Run `f` on completion or when the motion progressed within the threshold.
    pub fn on_progressed<F: FnOnce()>(
        self,
        f: F,
    ) -> OutcomeHandlers<F, S> {
        OutcomeHandlers {
            on_progressed: Some(f),
            on_stalled: self.on_stalled,
        }
    }

    /// Run `f` when the motion stalled.
    pub fn on_stalled<F: FnOnce()>(
        self,
        f: F,
    ) -> OutcomeHandlers<P, F> {
        OutcomeHandlers {
            on_progressed: self.on_progressed,
            on_stalled: Some(f),
        }
    }

    fn fire(
        self,
        outcome: Outcome,
    ) {
        match outcome {
            Outcome::Completed | Outcome::TimedOutProgressed => {
                if let Some(f) = self.on_progressed {
                    f();
                }
            }
            Outcome::TimedOutStalled => {
                if let Some(f) = self.on_stalled {
                    f();
                }
            }
        }
    }
}

/// Classify the final deviation from the expected angle.
pub fn classify(
    deviation: f32,
    threshold: f32,
) -> Outcome {
    if deviation > threshold {
        Outcome::TimedOutStalled
    } else {
        Outcome::TimedOutProgressed
    }
}

/// Drives one actuator through bounded or unbounded motions.
pub struct MotionSupervisor<A, C> {
    actuator: A,
    clock: C,
    default_speed: f32,
}

impl<A, C> MotionSupervisor<A, C>
where
    A: Actuator,
    C: MonotonicClock,
{
    pub fn new(
        actuator: A,
        clock: C,
        default_speed: f32,
    ) -> Self {
        Self {
            actuator,
            clock,
            default_speed,
        }
    }

    pub fn default_speed(&self) -> f32 {
        self.default_speed
    }

    /// Speed used by requests that leave out their target.
    pub fn set_default_speed(
        &mut self,
        speed: f32,
    ) {
        self.default_speed = speed;
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }

    pub fn into_parts(self) -> (A, C) {
        (self.actuator, self.clock)
    }

    /// Apply the shorthand convention and, for relative motions, sample the
    /// reference angle.
    pub fn resolve(
        &mut self,
        request: &MotionRequest,
    ) -> MotionCommand {
        let (speed, amount) = match request.target {
            Some(target) => (request.speed, target),
            None => (self.default_speed, request.speed),
        };
        let motion = match request.kind {
            MotionKind::Target => Motion::Absolute(amount),
            MotionKind::Angle => Motion::Relative {
                delta: amount,
                reference: self.actuator.angle(),
            },
        };
        MotionCommand {
            motion,
            speed,
            then: request.then,
        }
    }

    /// Issue `request` and, when it carries a budget, classify its outcome.
    ///
    /// Without a budget no handler runs and the actuator is left alone. With a
    /// budget, exactly one handler (if set) runs and the actuator is braked
    /// once afterwards.
    pub fn supervise<P, S>(
        &mut self,
        request: &MotionRequest,
        handlers: OutcomeHandlers<P, S>,
    ) -> Outcome
    where
        P: FnOnce(),
        S: FnOnce(),
    {
        let command = self.resolve(request);
        tracing::debug!(?command, budget_ms = ?request.budget_ms, "issuing motion");
        self.actuator.command(&command);

        let Some(budget_ms) = request.budget_ms else {
            if request.wait {
                spin_until(|| self.actuator.done());
            }
            return Outcome::Completed;
        };

        let budget = millis_saturating(budget_ms);
        let outcome = match poll_until(&self.clock, budget, || self.actuator.done()) {
            PollResult::Satisfied(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis(), "motion completed within budget");
                Outcome::Completed
            }
            PollResult::Expired(_) => {
                let angle = self.actuator.angle();
                let expected = command.expected_final();
                let deviation = libm::fabsf(angle - expected);
                let outcome = classify(deviation, request.threshold);
                if outcome.is_stalled() {
                    tracing::warn!(angle, expected, deviation, "motion stalled");
                } else {
                    tracing::info!(angle, expected, deviation, "budget elapsed, motion progressed");
                }
                outcome
            }
        };

        handlers.fire(outcome);
        self.actuator.brake();
        outcome
    }

    /// Drive to an absolute angle.
    ///
    /// With `angle` left out, `speed` is taken as the target angle and the
    /// default speed is used.
    pub fn run_target<P, S>(
        &mut self,
        speed: f32,
        angle: Option<f32>,
        budget_ms: Option<u64>,
        handlers: OutcomeHandlers<P, S>,
    ) -> Outcome
    where
        P: FnOnce(),
        S: FnOnce(),
    {
        let request = MotionRequest {
            budget_ms,
            ..MotionRequest::with(MotionKind::Target, speed, angle)
        };
        self.supervise(&request, handlers)
    }

    /// Rotate by a relative amount.
    ///
    /// With `rotation` left out, `speed` is taken as the rotation and the
    /// default speed is used.
    pub fn run_angle<P, S>(
        &mut self,
        speed: f32,
        rotation: Option<f32>,
        budget_ms: Option<u64>,
        handlers: OutcomeHandlers<P, S>,
    ) -> Outcome
    where
        P: FnOnce(),
        S: FnOnce(),
    {
        let request = MotionRequest {
            budget_ms,
            ..MotionRequest::with(MotionKind::Angle, speed, rotation)
        };
        self.supervise(&request, handlers)
    }
}
