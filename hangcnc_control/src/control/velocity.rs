//! Velocity loop (C4): RPM estimation, PID, and the "additive write" to the
//! H-bridge.
//!
//! Grounded in `MotorGearboxEncoder.cpp`'s `computeSpeed()`/`computePID()`.
//! The RPM estimator is reproduced with its quantization dampening and
//! decay-to-zero branch verbatim; only the measurement clock
//! (`now_us`, supplied by the caller) replaces direct `micros()` calls.

use super::pid::{pid_compute, Direction, Mode, PidGains, PidState};
use crate::encoder::Encoder;
use crate::motor::{Motor, TimerConflict};

/// Per-axis RPM estimator state, mirroring `MotorGearboxEncoder`'s private
/// `_lastPosition`/`_lastTimeStamp`/`_lastDistMoved`/`_RPM` fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeedEstimator {
    last_position: f64,
    last_timestamp_us: u64,
    last_dist_moved: f64,
    rpm: f64,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_rpm(&self) -> f64 {
        self.rpm
    }

    /// Recomputes RPM since the last call, given the encoder's current
    /// reading in revolutions and a steps-to-RPM scale factor
    /// (`60_000_000 / steps_per_rev`).
    pub fn compute(&mut self, encoder: &Encoder, steps_per_rev: f64, now_us: u64) -> f64 {
        let scale = 60_000_000.0 / steps_per_rev;
        let current_position = encoder.steps() as f64;
        let mut dist_moved = current_position - self.last_position;

        if !(-3.0..=3.0).contains(&dist_moved) {
            let save_dist_moved = dist_moved;
            if dist_moved - self.last_dist_moved <= -1.0 {
                dist_moved += 0.5;
            } else if dist_moved - self.last_dist_moved >= 1.0 {
                dist_moved -= 0.5;
            }
            self.last_dist_moved = save_dist_moved;

            let time_elapsed = now_us.saturating_sub(self.last_timestamp_us) as f64;
            self.rpm = if time_elapsed > 0.0 { (scale * dist_moved) / time_elapsed } else { 0.0 };
        } else {
            // Compare the *stored* inter-edge interval (fixed at the last
            // edge) against the *live*, still-growing time since that edge:
            // once the motor has nearly stopped, the stored interval goes
            // stale and the growing live time takes over so RPM keeps
            // decaying toward zero instead of latching at its last value.
            let stored_interval = encoder.signed_interval_us() as f64;
            let last_time = now_us.saturating_sub(encoder.last_edge_us()) as f64;

            let mut elapsed_time = stored_interval;
            if last_time > elapsed_time.abs() {
                elapsed_time = if stored_interval < 0.0 { -last_time } else { last_time };
            }

            self.rpm = if elapsed_time != 0.0 { scale / elapsed_time } else { 0.0 };
        }

        self.rpm *= -1.0;

        self.last_timestamp_us = now_us;
        self.last_position = current_position;
        self.rpm
    }
}

/// The velocity loop for one motor: encoder-derived RPM feeding a PID
/// whose output is added onto the last commanded PWM (C4 steps 1-4).
pub struct VelocityLoop {
    pub estimator: SpeedEstimator,
    pub pid: PidState,
    pub gains: PidGains,
}

impl VelocityLoop {
    pub fn new(sample_time_s: f64) -> Self {
        let gains = PidGains {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            p_on: 1.0,
            out_min: -255.0,
            out_max: 255.0,
            direction: Direction::Direct,
            sample_time_s,
        };
        let mut pid = PidState::default();
        pid.set_mode(Mode::Auto, 0.0, 0.0, &gains);
        VelocityLoop { estimator: SpeedEstimator::new(), pid, gains }
    }

    pub fn set_gains(&mut self, kp: f64, ki: f64, kd: f64, p_on: f64) {
        self.gains.kp = kp;
        self.gains.ki = ki;
        self.gains.kd = kd;
        self.gains.p_on = p_on;
    }

    /// Runs one tick: estimate RPM, run the PID against `target_rpm`, and
    /// apply the additive write to `motor`. Returns the RPM used as input.
    pub fn tick(
        &mut self,
        encoder: &Encoder,
        motor: &mut Motor,
        steps_per_rev: f64,
        target_rpm: f64,
        now_us: u64,
        conflict: &impl TimerConflict,
    ) -> f64 {
        let current_rpm = self.estimator.compute(encoder, steps_per_rev, now_us);
        if let Some(output) = pid_compute(&mut self.pid, &self.gains, target_rpm, current_rpm) {
            motor.additive_write(output.round() as i16, conflict);
        }
        current_rpm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::{BridgeVariant, NoConflict};

    #[test]
    fn stationary_encoder_decays_rpm_toward_zero() {
        let mut est = SpeedEstimator::new();
        let mut enc = Encoder::new();
        enc.on_edge(1, 0);
        est.compute(&enc, 8113.73, 0);

        let r1 = est.compute(&enc, 8113.73, 10_000).abs();
        let r2 = est.compute(&enc, 8113.73, 20_000).abs();
        let r3 = est.compute(&enc, 8113.73, 40_000).abs();
        assert!(r1 >= r2);
        assert!(r2 >= r3);
    }

    #[test]
    fn moving_encoder_reports_nonzero_rpm() {
        let mut est = SpeedEstimator::new();
        let mut enc = Encoder::new();
        for t in (0..=100_000u64).step_by(1_000) {
            enc.on_edge(1, t);
        }
        let rpm = est.compute(&enc, 8113.73, 100_000);
        assert!(rpm.abs() > 0.0);
    }

    #[test]
    fn velocity_loop_drives_motor_toward_target() {
        let mut vloop = VelocityLoop::new(0.01);
        vloop.set_gains(0.5, 0.0, 0.0, 1.0);
        let mut motor = Motor::new(BridgeVariant::Standard);
        motor.attach();
        let mut enc = Encoder::new();
        vloop.tick(&enc, &mut motor, 8113.73, 100.0, 0, &NoConflict);
        enc.on_edge(1, 1_000);
        vloop.tick(&enc, &mut motor, 8113.73, 100.0, 10_000, &NoConflict);
        assert_ne!(motor.last_speed(), 0);
    }
}
