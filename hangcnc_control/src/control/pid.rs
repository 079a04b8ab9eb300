//! PID controller with proportional-on-measurement/error split, direct
//! anti-windup clamping, and bumpless manual-to-auto transfer.
//!
//! Grounded in `PID_v1.cpp` (Brett Beauregard's Arduino PID Library): same
//! `pOn` split, same clamp-then-clamp structure, same `Initialize()`
//! bumpless-transfer rule. Ki/Kd are pre-scaled by the sample time so the
//! per-tick `pid_compute` body stays a plain accumulate-and-clamp, exactly
//! as the source does in `SetTunings`.

/// Direct-acting (+output leads to +input) or reverse-acting controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Direct,
    Reverse,
}

/// Auto/manual mode. Re-entering `Auto` from `Manual` triggers a bumpless
/// transfer via [`PidState::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Manual,
    Auto,
}

/// Tunable gains, as given to the controller (not yet sign-adjusted for
/// direction or scaled by sample time — see [`PidGains::resolve`]).
#[derive(Debug, Clone, Copy)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// `pOn ∈ [0,1]`: 1.0 is pure P-on-error, 0.0 is pure P-on-measurement.
    pub p_on: f64,
    pub out_min: f64,
    pub out_max: f64,
    pub direction: Direction,
    pub sample_time_s: f64,
}

/// Sign- and sample-time-adjusted gains actually used each tick, mirroring
/// the source's `kp`/`ki`/`kd`/`pOnEKp`/`pOnMKp` fields computed once in
/// `SetTunings`.
#[derive(Debug, Clone, Copy)]
struct ResolvedGains {
    kp: f64,
    ki: f64,
    kd: f64,
    p_on_e: bool,
    p_on_m: bool,
    p_on_e_kp: f64,
    p_on_m_kp: f64,
    out_min: f64,
    out_max: f64,
}

impl PidGains {
    fn resolve(&self) -> ResolvedGains {
        let p_on_e = self.p_on > 0.0;
        let p_on_m = self.p_on < 1.0;

        let mut kp = self.kp;
        let mut ki = self.ki * self.sample_time_s;
        let mut kd = if self.sample_time_s > 0.0 { self.kd / self.sample_time_s } else { 0.0 };

        if self.direction == Direction::Reverse {
            kp = -kp;
            ki = -ki;
            kd = -kd;
        }

        ResolvedGains {
            kp,
            ki,
            kd,
            p_on_e,
            p_on_m,
            p_on_e_kp: self.p_on * kp,
            p_on_m_kp: (1.0 - self.p_on) * kp,
            out_min: self.out_min,
            out_max: self.out_max,
        }
    }
}

/// Internal state: the integrator (`outputSum`) and last input, carried
/// across ticks. `mode` gates whether `compute` does anything, mirroring
/// `inAuto`.
#[derive(Debug, Clone, Copy)]
pub struct PidState {
    output_sum: f64,
    last_input: f64,
    mode: Mode,
}

impl Default for PidState {
    fn default() -> Self {
        PidState { output_sum: 0.0, last_input: 0.0, mode: Mode::Manual }
    }
}

impl PidState {
    /// Bumpless transfer: seed the integrator from the current output and
    /// input so switching into auto doesn't produce a step, mirroring
    /// `PID::Initialize()`.
    pub fn initialize(&mut self, current_output: f64, current_input: f64, gains: &PidGains) {
        self.output_sum = current_output.clamp(gains.out_min, gains.out_max);
        self.last_input = current_input;
    }

    /// Mirrors `PID::SetMode`: entering `Auto` from `Manual` re-arms via
    /// `initialize`; leaving auto is a no-op beyond flipping the mode.
    pub fn set_mode(&mut self, mode: Mode, current_output: f64, current_input: f64, gains: &PidGains) {
        if mode == Mode::Auto && self.mode == Mode::Manual {
            self.initialize(current_output, current_input, gains);
        }
        self.mode = mode;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn integral(&self) -> f64 {
        self.output_sum
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One PID evaluation. Returns `None` when in `Manual` mode (mirrors
/// `Compute()` returning `false` and leaving the output untouched).
///
/// `setpoint`/`input` are in the controller's native units (revolutions for
/// the position loop, RPM for the velocity loop per spec §4.4/§4.5).
pub fn pid_compute(state: &mut PidState, gains: &PidGains, setpoint: f64, input: f64) -> Option<f64> {
    if state.mode == Mode::Manual {
        return None;
    }

    let g = gains.resolve();

    let error = setpoint - input;
    let d_input = input - state.last_input;

    state.output_sum += g.ki * error;
    if g.p_on_m {
        state.output_sum -= g.p_on_m_kp * d_input;
    }
    state.output_sum = state.output_sum.clamp(g.out_min, g.out_max);

    let mut output = if g.p_on_e { g.p_on_e_kp * error } else { 0.0 };
    output += state.output_sum - g.kd * d_input;
    output = output.clamp(g.out_min, g.out_max);

    state.last_input = input;
    Some(output)
}
