//! Position loop (C5): mm setpoint → commanded RPM, feeding the velocity
//! loop (C4).
//!
//! Grounded in `Axis.cpp`'s position-PID wiring: reverse-direction
//! controller (positive error demands negative RPM, the sign flip coming
//! from the chain/encoder mechanical mapping), output clamped to ±20 RPM.

use super::pid::{pid_compute, Direction, Mode, PidGains, PidState};

/// Output clamp for the position loop's commanded RPM, per spec §4.5.
pub const POSITION_LOOP_OUT_LIMIT: f64 = 20.0;

pub struct PositionLoop {
    pub pid: PidState,
    pub gains: PidGains,
}

impl PositionLoop {
    pub fn new(sample_time_s: f64) -> Self {
        let gains = PidGains {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            p_on: 1.0,
            out_min: -POSITION_LOOP_OUT_LIMIT,
            out_max: POSITION_LOOP_OUT_LIMIT,
            direction: Direction::Reverse,
            sample_time_s,
        };
        let mut pid = PidState::default();
        pid.set_mode(Mode::Auto, 0.0, 0.0, &gains);
        PositionLoop { pid, gains }
    }

    pub fn set_gains(&mut self, kp: f64, ki: f64, kd: f64, p_on: f64) {
        self.gains.kp = kp;
        self.gains.ki = ki;
        self.gains.kd = kd;
        self.gains.p_on = p_on;
    }

    /// One tick: `setpoint_rev`/`input_rev` are motor revolutions. Returns
    /// the commanded RPM to forward to the velocity loop (C4).
    pub fn tick(&mut self, setpoint_rev: f64, input_rev: f64) -> f64 {
        pid_compute(&mut self.pid, &self.gains, setpoint_rev, input_rev).unwrap_or(0.0)
    }
}
