//! Simulated rotary actuator.
//!
//! Position is a pure function of the time elapsed since the last command:
//! the shaft moves toward its goal at the commanded speed and stops at an
//! optional obstruction angle, which is how stalls are reproduced.
//! Commands ending in `StopMode::Continue` run past their goal and never
//! report done until braked; the other stop modes all settle on the goal.

use embassy_time::Duration;

use crate::utils::{
    controllers::supervisor::{Actuator, Motion, MotionCommand, StopMode},
    timing::MonotonicClock,
};

const ARRIVAL_EPS: f32 = 1e-3;

pub struct SimulatedActuator<C> {
    clock: C,
    origin: f32,
    goal: f32,
    speed: f32,
    issued_at: Duration,
    running: bool,
    continuing: bool,
    held: f32,
    obstruction: Option<f32>,
    brakes: u32,
    done_polls: u32,
    last_command: Option<MotionCommand>,
}

impl<C: MonotonicClock> SimulatedActuator<C> {
    /// Idle actuator at angle zero.
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            origin: 0.0,
            goal: 0.0,
            speed: 0.0,
            issued_at: Duration::from_ticks(0),
            running: false,
            continuing: false,
            held: 0.0,
            obstruction: None,
            brakes: 0,
            done_polls: 0,
            last_command: None,
        }
    }

    pub fn with_angle(
        mut self,
        angle: f32,
    ) -> Self {
        self.held = angle;
        self
    }

    /// Block the shaft at `angle`; motions across it stall there.
    pub fn with_obstruction(
        mut self,
        angle: f32,
    ) -> Self {
        self.obstruction = Some(angle);
        self
    }

    pub fn clear_obstruction(&mut self) {
        self.obstruction = None;
    }

    /// Number of `brake()` calls so far.
    pub fn brakes(&self) -> u32 {
        self.brakes
    }

    /// Number of `done()` samples so far.
    pub fn done_polls(&self) -> u32 {
        self.done_polls
    }

    pub fn last_command(&self) -> Option<MotionCommand> {
        self.last_command
    }

    fn position(&self) -> f32 {
        if !self.running {
            return self.held;
        }
        let elapsed = self
            .clock
            .now()
            .checked_sub(self.issued_at)
            .unwrap_or(Duration::from_ticks(0));
        let travel = self.speed * (elapsed.as_micros() as f32 / 1_000_000.0);
        let span = self.goal - self.origin;
        let reach = if self.continuing {
            travel
        } else {
            libm::fminf(travel, libm::fabsf(span))
        };
        let pos = self.origin + libm::copysignf(reach, span);

        match self.obstruction {
            Some(stop) if span > 0.0 && stop >= self.origin && (self.continuing || stop < self.goal) => {
                libm::fminf(pos, stop)
            }
            Some(stop) if span < 0.0 && stop <= self.origin && (self.continuing || stop > self.goal) => {
                libm::fmaxf(pos, stop)
            }
            _ => pos,
        }
    }
}

impl<C: MonotonicClock> Actuator for SimulatedActuator<C> {
    fn command(
        &mut self,
        command: &MotionCommand,
    ) {
        let origin = self.position();
        self.origin = origin;
        self.goal = match command.motion {
            Motion::Absolute(target) => target,
            Motion::Relative { delta, .. } => origin + delta,
        };
        self.speed = libm::fabsf(command.speed);
        self.issued_at = self.clock.now();
        self.running = true;
        self.continuing = command.then == StopMode::Continue;
        self.last_command = Some(*command);
    }

    fn done(&mut self) -> bool {
        self.done_polls += 1;
        if !self.running {
            return true;
        }
        let pos = self.position();
        if !self.continuing && libm::fabsf(pos - self.goal) <= ARRIVAL_EPS {
            self.running = false;
            self.held = self.goal;
            true
        } else {
            false
        }
    }

    fn angle(&mut self) -> f32 {
        self.position()
    }

    fn brake(&mut self) {
        self.held = self.position();
        self.running = false;
        self.brakes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::timing::ManualClock;

    fn absolute(target: f32, speed: f32) -> MotionCommand {
        MotionCommand {
            motion: Motion::Absolute(target),
            speed,
            then: StopMode::Hold,
        }
    }

    #[test]
    fn moves_at_commanded_speed() {
        let clock = ManualClock::new(Duration::from_ticks(0));
        let mut act = SimulatedActuator::new(&clock);
        act.command(&absolute(90.0, 100.0));
        clock.advance(Duration::from_millis(500));
        assert!(libm::fabsf(act.angle() - 50.0) < 1e-3);
        assert!(!act.done());
        clock.advance(Duration::from_secs(1));
        assert!(act.done());
        assert_eq!(act.angle(), 90.0);
    }

    #[test]
    fn obstruction_stops_motion_in_both_directions() {
        let clock = ManualClock::new(Duration::from_ticks(0));
        let mut act = SimulatedActuator::new(&clock).with_obstruction(-20.0);
        act.command(&absolute(-90.0, 100.0));
        clock.advance(Duration::from_secs(5));
        assert_eq!(act.angle(), -20.0);
        assert!(!act.done());

        act.clear_obstruction();
        act.brake();
        act.command(&absolute(0.0, 100.0));
        clock.advance(Duration::from_secs(5));
        assert!(act.done());
        assert_eq!(act.brakes(), 1);
    }

    #[test]
    fn brake_freezes_position() {
        let clock = ManualClock::new(Duration::from_ticks(0));
        let mut act = SimulatedActuator::new(&clock).with_angle(10.0);
        act.command(&MotionCommand {
            motion: Motion::Relative {
                delta: 100.0,
                reference: 10.0,
            },
            speed: 100.0,
            then: StopMode::Coast,
        });
        clock.advance(Duration::from_millis(250));
        act.brake();
        clock.advance(Duration::from_secs(2));
        assert!(libm::fabsf(act.angle() - 35.0) < 1e-3);
        assert!(act.done());
    }

    #[test]
    fn continue_runs_past_goal_until_braked() {
        let clock = ManualClock::new(Duration::from_ticks(0));
        let mut act = SimulatedActuator::new(&clock);
        act.command(&MotionCommand {
            then: StopMode::Continue,
            ..absolute(90.0, 100.0)
        });
        clock.advance(Duration::from_secs(2));
        assert!(libm::fabsf(act.angle() - 200.0) < 1e-3);
        assert!(!act.done());
        act.brake();
        assert!(act.done());
        assert!(libm::fabsf(act.angle() - 200.0) < 1e-3);
    }
}
