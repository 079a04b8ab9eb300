//! Axis (C4+C5 composite): one motor+encoder pair driven by a nested
//! position-then-velocity PID stack, with attach/idle-detach lifecycle.
//!
//! Grounded in `Axis.cpp`: `read()` converts encoder steps to mm via
//! steps-per-rev and mm-per-rev, `attach`/`detach`/`detachIfIdle` gate
//! whether the motor is driven, and `timeLastMoved` feeds the
//! `axisDetachTime` idle-detach policy (C9).

use crate::control::position::PositionLoop;
use crate::control::velocity::VelocityLoop;
use crate::encoder::Encoder;
use crate::motor::{BridgeVariant, DriveCommand, Motor, TimerConflict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisName {
    Left,
    Right,
    Z,
}

/// One controlled axis: encoder + motor (owned), nested PID stack, and the
/// bookkeeping idle-detach needs.
pub struct Axis {
    pub name: AxisName,
    pub encoder: Encoder,
    pub motor: Motor,
    pub position_loop: PositionLoop,
    pub velocity_loop: VelocityLoop,
    pub steps_per_rev: f64,
    pub mm_per_rev: f64,
    setpoint_mm: f64,
    time_last_moved_ms: u64,
}

impl Axis {
    pub fn new(
        name: AxisName,
        variant: BridgeVariant,
        steps_per_rev: f64,
        mm_per_rev: f64,
        tick_period_s: f64,
    ) -> Self {
        Axis {
            name,
            encoder: Encoder::new(),
            motor: Motor::new(variant),
            position_loop: PositionLoop::new(tick_period_s),
            velocity_loop: VelocityLoop::new(tick_period_s),
            steps_per_rev,
            mm_per_rev,
            setpoint_mm: 0.0,
            time_last_moved_ms: 0,
        }
    }

    /// Current position in mm, derived purely from encoder steps — the
    /// invariant `read() == encoder_steps / steps_per_rev * mm_per_rev`.
    pub fn read_mm(&self) -> f64 {
        (self.encoder.steps() as f64 / self.steps_per_rev) * self.mm_per_rev
    }

    pub fn setpoint_mm(&self) -> f64 {
        self.setpoint_mm
    }

    /// Sets a new position setpoint and marks the axis as having moved,
    /// resetting the idle-detach clock.
    pub fn set_setpoint_mm(&mut self, mm: f64, now_ms: u64) {
        self.setpoint_mm = mm;
        self.time_last_moved_ms = now_ms;
    }

    pub fn attach(&mut self) {
        self.motor.attach();
    }

    pub fn detach(&mut self) {
        self.motor.detach();
    }

    pub fn attached(&self) -> bool {
        self.motor.attached()
    }

    /// Detaches the axis if it has been quiet longer than
    /// `axis_detach_time_ms`, mirroring `motionDetachIfIdle`.
    pub fn detach_if_idle(&mut self, now_ms: u64, axis_detach_time_ms: u32) {
        if self.attached() && now_ms.saturating_sub(self.time_last_moved_ms) >= axis_detach_time_ms as u64 {
            self.detach();
        }
    }

    /// Runs one tick: position loop (C5) produces a commanded RPM from the
    /// mm setpoint, then the velocity loop (C4) drives the motor, per the
    /// realtime supervisor's per-axis ordering (position then velocity).
    pub fn tick(&mut self, now_us: u64, conflict: &impl TimerConflict) -> DriveCommand {
        // Mirrors `Axis.cpp`'s `computePID()` early return when the motor
        // is detached: the whole PID stack (position and velocity,
        // including their integrators) freezes rather than accumulating
        // windup against a setpoint nothing is driving toward.
        if !self.attached() {
            return self.motor.write(self.motor.last_speed(), false, conflict);
        }

        let setpoint_rev = self.setpoint_mm / self.mm_per_rev;
        let current_rev = self.read_mm() / self.mm_per_rev;
        let target_rpm = self.position_loop.tick(setpoint_rev, current_rev);
        self.velocity_loop.tick(&self.encoder, &mut self.motor, self.steps_per_rev, target_rpm, now_us, conflict);
        // `VelocityLoop::tick` issues the additive write internally; the
        // command below reports the latest state for callers/logging.
        let conflict_free = crate::motor::NoConflict;
        self.motor.write(self.motor.last_speed(), self.attached(), &conflict_free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::NoConflict;

    fn test_axis() -> Axis {
        let mut a = Axis::new(AxisName::Left, BridgeVariant::Standard, 8113.73, 63.5, 0.01);
        a.attach();
        a
    }

    #[test]
    fn read_mm_matches_invariant() {
        let mut a = test_axis();
        a.encoder.set_steps(8113);
        let expected = (8113.0 / 8113.73) * 63.5;
        assert!((a.read_mm() - expected).abs() < 1e-9);
    }

    #[test]
    fn idle_detach_fires_after_quiet_period() {
        let mut a = test_axis();
        a.set_setpoint_mm(10.0, 0);
        assert!(a.attached());
        a.detach_if_idle(4_999, 5_000);
        assert!(a.attached());
        a.detach_if_idle(5_000, 5_000);
        assert!(!a.attached());
    }

    #[test]
    fn tick_runs_without_panicking_when_detached() {
        let mut a = Axis::new(AxisName::Z, BridgeVariant::Standard, 8113.73, 3.17, 0.01);
        let _ = a.tick(0, &NoConflict);
    }

    #[test]
    fn detached_axis_does_not_accumulate_position_integrator_windup() {
        let mut a = Axis::new(AxisName::Z, BridgeVariant::Standard, 8113.73, 3.17, 0.01);
        a.position_loop.set_gains(10.0, 5.0, 0.0, 1.0);
        a.set_setpoint_mm(50.0, 0);
        for t in 0..100 {
            let _ = a.tick(t * 10_000, &NoConflict);
        }
        assert_eq!(a.position_loop.pid.integral(), 0.0);
    }
}
