//! Motion planner (C7): linear moves, circular arcs, and single-axis moves.
//!
//! Grounded in `Motion.cpp`. Each move is broken into fixed-size steps at
//! the tick rate (`computeStepSize`/`calculateFeedrate`), converted through
//! [`crate::kinematics::Kinematics`] into chain-length setpoints each step,
//! and checked against the supervisor's stop flag after every step so a
//! `!` or position-error alarm can cut a move short mid-stroke.

use crate::axis::{Axis, AxisName};
use crate::kinematics::Kinematics;
use crate::motor::TimerConflict;

/// Feed-rate conversion: mm per tick given mm/min, at the supervisor's tick
/// period. Mirrors `computeStepSize`.
pub fn compute_step_size(mm_per_min: f64, tick_period_s: f64) -> f64 {
    tick_period_s * (mm_per_min / 60.0)
}

/// Inverse of [`compute_step_size`]: the mm/min feedrate implied by a given
/// per-tick step size. Mirrors `calculateFeedrate`.
pub fn calculate_feedrate(step_size_mm: f64, tick_period_s: f64) -> f64 {
    (step_size_mm * 60.0) / tick_period_s
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcDirection {
    Clockwise,
    CounterClockwise,
}

/// Outcome of a planned move: either it ran to completion, or the caller's
/// stop flag fired partway through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Completed,
    Cancelled,
}

/// Outcome of [`MotionPlanner::probe_move`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    /// The probe asserted; carries the mm position reached at that point.
    Triggered(f64),
    /// Full travel completed (or the move was cancelled) with no contact.
    NoContact,
}

/// Per-tick callback the planner drives: advance the clock, run every
/// axis's control tick, and report whether a stop has been requested.
/// Isolates the planner from the realtime supervisor's concrete types so
/// it can be unit tested with a simulated clock.
pub trait MotionClock {
    fn now_us(&self) -> u64;
    fn advance_tick(&mut self);
    fn stop_requested(&self) -> bool;
}

pub struct MotionPlanner<'a> {
    pub left: &'a mut Axis,
    pub right: &'a mut Axis,
    pub z: Option<&'a mut Axis>,
    pub kinematics: &'a mut Kinematics,
    pub tick_period_s: f64,
    pub max_feed_mm_per_min: f64,
    pub max_z_rpm: f64,
    pub z_pitch_mm_per_rev: f64,
}

impl<'a> MotionPlanner<'a> {
    /// Coordinated XY(Z) linear move, mirroring `coordinatedMove`: the
    /// cartesian path is subdivided into equal steps sized by feed rate,
    /// each step's (x,y) converted to chain lengths via inverse kinematics
    /// and written to the left/right axes; Z moves in lockstep if attached.
    pub fn linear_move(
        &mut self,
        x_end: f64,
        y_end: f64,
        z_end: f64,
        mm_per_min: f64,
        x_start: f64,
        y_start: f64,
        clock: &mut impl MotionClock,
        conflict: &impl TimerConflict,
    ) -> (MoveOutcome, f64, f64) {
        let z_start = self.z.as_ref().map(|z| z.read_mm()).unwrap_or(z_end);
        let distance = ((x_end - x_start).powi(2) + (y_end - y_start).powi(2) + (z_end - z_start).powi(2)).sqrt();
        let dx = x_end - x_start;
        let dy = y_end - y_start;
        let dz = z_end - z_start;

        let feed = mm_per_min.clamp(1.0, self.max_feed_mm_per_min);
        let step_size = compute_step_size(feed, self.tick_period_s);
        let mut total_steps = (distance / step_size).abs();
        if total_steps < 1.0 {
            total_steps = 1.0;
        }

        let z_feedrate = calculate_feedrate((dz / total_steps).abs(), self.tick_period_s);
        let z_max_feed = self.max_z_rpm * self.z_pitch_mm_per_rev.abs();
        if z_feedrate > z_max_feed && z_max_feed > 0.0 {
            let z_step_size = compute_step_size(z_max_feed, self.tick_period_s);
            total_steps = (dz / z_step_size).abs().max(1.0);
        }

        let x_step = dx / total_steps;
        let y_step = dy / total_steps;
        let z_step = dz / total_steps;

        self.left.attach();
        self.right.attach();
        if let Some(z) = self.z.as_mut() {
            z.attach();
        }

        let mut x = x_start;
        let mut y = y_start;
        let mut z = z_start;
        let mut steps_taken: u64 = 0;

        while (steps_taken as f64) < total_steps {
            x += x_step;
            y += y_step;
            z += z_step;

            let outcome = self.step_to_point(x, y, z, clock, conflict);
            steps_taken += 1;

            if outcome == MoveOutcome::Cancelled {
                return (MoveOutcome::Cancelled, x, y);
            }
        }

        let (chain_a, chain_b) = self.kinematics.inverse(x_end as f32, y_end as f32);
        self.left.set_setpoint_mm(chain_a as f64, clock.now_us() / 1_000);
        self.right.set_setpoint_mm(chain_b as f64, clock.now_us() / 1_000);

        (MoveOutcome::Completed, x_end, y_end)
    }

    /// Advances every axis one tick toward the chain-length setpoints
    /// implied by cartesian point `(x, y)`, leaving Z at `z`. This is the
    /// per-tick primitive `linear_move`'s straight-line walk is built from;
    /// callers that already have a cartesian path to follow one point at a
    /// time (an arc's true circle points, for instance) can drive it
    /// directly instead of re-deriving a straight chord through
    /// `linear_move` for each sub-segment.
    pub fn step_to_point(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        clock: &mut impl MotionClock,
        conflict: &impl TimerConflict,
    ) -> MoveOutcome {
        let (chain_a, chain_b) = self.kinematics.inverse(x as f32, y as f32);
        self.left.set_setpoint_mm(chain_a as f64, clock.now_us() / 1_000);
        self.right.set_setpoint_mm(chain_b as f64, clock.now_us() / 1_000);
        if let Some(axis) = self.z.as_mut() {
            axis.set_setpoint_mm(z, clock.now_us() / 1_000);
        }

        self.tick_axes(clock.now_us(), conflict);
        clock.advance_tick();

        if clock.stop_requested() {
            MoveOutcome::Cancelled
        } else {
            MoveOutcome::Completed
        }
    }

    /// Single-axis move (Z, or L/R maintenance moves), mirroring
    /// `singleAxisMove`.
    pub fn single_axis_move(
        axis: &mut Axis,
        end_pos: f64,
        mm_per_min: f64,
        tick_period_s: f64,
        clock: &mut impl MotionClock,
        conflict: &impl TimerConflict,
    ) -> MoveOutcome {
        let start = axis.read_mm();
        let move_dist = end_pos - start;
        if move_dist == 0.0 {
            return MoveOutcome::Completed;
        }
        let direction = move_dist.signum();
        let step_size = compute_step_size(mm_per_min, tick_period_s) * direction;
        let total_steps = (move_dist / step_size).abs();

        axis.attach();
        let mut pos = start;
        let mut steps_taken: u64 = 0;

        while (steps_taken as f64) < total_steps {
            pos += step_size;
            axis.set_setpoint_mm(pos, clock.now_us() / 1_000);
            let no_conflict_tick = axis.tick(clock.now_us(), conflict);
            let _ = no_conflict_tick;
            clock.advance_tick();
            steps_taken += 1;
            if clock.stop_requested() {
                return MoveOutcome::Cancelled;
            }
        }

        axis.set_setpoint_mm(end_pos, clock.now_us() / 1_000);
        MoveOutcome::Completed
    }

    /// Outcome of a probe move: either the probe asserted partway through
    /// (`Triggered`, at the mm position reached) or the full travel
    /// completed with no contact (mirrors `G38`'s `ALARM_HARD_LIMIT`-free
    /// "no contact" case, left to the caller to turn into
    /// `STATUS_PROBE_NO_CONTACT`).
    ///
    /// Z probe moves, mirroring `G38()`: steps the Z axis toward
    /// `end_pos`, checking `probe_triggered` after every step. On trigger
    /// the Z setpoint is zeroed in place (the probe surface becomes the
    /// new Z origin) and the move stops immediately — no error is raised,
    /// matching the source's contact case.
    pub fn probe_move(
        axis: &mut Axis,
        end_pos: f64,
        mm_per_min: f64,
        tick_period_s: f64,
        clock: &mut impl MotionClock,
        conflict: &impl TimerConflict,
        mut probe_triggered: impl FnMut() -> bool,
    ) -> ProbeOutcome {
        let start = axis.read_mm();
        let move_dist = end_pos - start;
        if move_dist == 0.0 {
            return ProbeOutcome::NoContact;
        }
        let direction = move_dist.signum();
        let step_size = compute_step_size(mm_per_min, tick_period_s) * direction;
        let total_steps = (move_dist / step_size).abs();

        axis.attach();
        let mut pos = start;
        let mut steps_taken: u64 = 0;

        while (steps_taken as f64) < total_steps {
            if probe_triggered() {
                axis.encoder.set_steps(0);
                axis.set_setpoint_mm(0.0, clock.now_us() / 1_000);
                return ProbeOutcome::Triggered(pos);
            }
            pos += step_size;
            axis.set_setpoint_mm(pos, clock.now_us() / 1_000);
            let _ = axis.tick(clock.now_us(), conflict);
            clock.advance_tick();
            steps_taken += 1;
            if clock.stop_requested() {
                return ProbeOutcome::NoContact;
            }
        }

        ProbeOutcome::NoContact
    }

    /// Circular arc from (x1,y1) to (x2,y2) about (center_x,center_y).
    /// Mirrors `arc`'s three-condition substitution rule: arcs whose
    /// direction sign disagrees with the requested winding, whose chord is
    /// degenerate, or whose radius is implausibly large are replaced by a
    /// straight line to the endpoint (the caller is expected to fall back
    /// to [`Self::linear_move`] when this returns `None`).
    pub fn plan_arc(
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        center_x: f64,
        center_y: f64,
        direction: ArcDirection,
    ) -> Option<ArcPlan> {
        let radius = ((center_x - x1).powi(2) + (center_y - y1).powi(2)).sqrt();
        let starting_angle = (y1 - center_y).atan2(x1 - center_x);
        let ending_angle = (y2 - center_y).atan2(x2 - center_x);

        let chord = ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt();
        let tau = (radius.powi(2) - chord / 4.0).sqrt();
        let chord_height = radius - tau;

        let dir_sign = match direction {
            ArcDirection::CounterClockwise => 1.0,
            ArcDirection::Clockwise => -1.0,
        };

        let mut theta = ending_angle - starting_angle;
        match direction {
            ArcDirection::CounterClockwise => {
                if theta <= 0.0 {
                    theta += 2.0 * std::f64::consts::PI;
                }
            }
            ArcDirection::Clockwise => {
                if theta >= 0.0 {
                    theta -= 2.0 * std::f64::consts::PI;
                }
            }
        }

        let degenerate =
            theta.signum() != dir_sign || (chord_height.abs() < 0.01 && theta.abs() < 0.5) || radius > 25_400.0;
        if degenerate {
            return None;
        }

        Some(ArcPlan { radius, starting_angle, theta, direction: dir_sign })
    }

    fn tick_axes(&mut self, now_us: u64, conflict: &impl TimerConflict) {
        let _ = self.left.tick(now_us, conflict);
        let _ = self.right.tick(now_us, conflict);
        if let Some(z) = self.z.as_mut() {
            let _ = z.tick(now_us, conflict);
        }
    }
}

/// A validated arc, ready to be walked step-by-step by the caller.
pub struct ArcPlan {
    pub radius: f64,
    pub starting_angle: f64,
    pub theta: f64,
    pub direction: f64,
}

impl ArcPlan {
    /// Cartesian point at `fraction` (0..=1) of the way around the arc.
    pub fn point_at(&self, fraction: f64, center_x: f64, center_y: f64) -> (f64, f64) {
        let angle = self.starting_angle + self.theta * self.direction * fraction;
        (self.radius * angle.cos() + center_x, self.radius * angle.sin() + center_y)
    }
}

/// Which axis a B09-style direct chain move targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainAxis {
    Left,
    Right,
}

impl From<ChainAxis> for AxisName {
    fn from(c: ChainAxis) -> Self {
        match c {
            ChainAxis::Left => AxisName::Left,
            ChainAxis::Right => AxisName::Right,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeClock {
        now_us: u64,
        tick_us: u64,
        stop: bool,
    }

    impl MotionClock for FakeClock {
        fn now_us(&self) -> u64 {
            self.now_us
        }
        fn advance_tick(&mut self) {
            self.now_us += self.tick_us;
        }
        fn stop_requested(&self) -> bool {
            self.stop
        }
    }

    #[test]
    fn step_size_and_feedrate_are_inverses() {
        let step = compute_step_size(600.0, 0.01);
        let feed = calculate_feedrate(step, 0.01);
        assert!((feed - 600.0).abs() < 1e-6);
    }

    #[test]
    fn large_radius_arc_is_rejected_as_degenerate() {
        let plan = MotionPlanner::plan_arc(0.0, 0.0, 1.0, 0.0, 0.0, 50_000.0, ArcDirection::CounterClockwise);
        assert!(plan.is_none());
    }

    #[test]
    fn valid_quarter_circle_arc_is_accepted() {
        let plan = MotionPlanner::plan_arc(10.0, 0.0, 0.0, 10.0, 0.0, 0.0, ArcDirection::CounterClockwise);
        assert!(plan.is_some());
        let plan = plan.unwrap();
        let (x, y) = plan.point_at(1.0, 0.0, 0.0);
        assert!((x - 0.0).abs() < 1e-3);
        assert!((y - 10.0).abs() < 1e-3);
    }

    #[test]
    fn single_axis_move_reaches_target_when_not_cancelled() {
        use crate::axis::{Axis, AxisName};
        use crate::motor::{BridgeVariant, NoConflict};

        let mut axis = Axis::new(AxisName::Z, BridgeVariant::Standard, 8113.73, 3.17, 0.01);
        axis.attach();
        let mut clock = FakeClock { now_us: 0, tick_us: 10_000, stop: false };
        let outcome = MotionPlanner::single_axis_move(&mut axis, 50.0, 600.0, 0.01, &mut clock, &NoConflict);
        assert_eq!(outcome, MoveOutcome::Completed);
        assert!((axis.setpoint_mm() - 50.0).abs() < 1e-6);
    }

    #[test]
    fn single_axis_move_cancels_on_stop_flag() {
        use crate::axis::{Axis, AxisName};
        use crate::motor::{BridgeVariant, NoConflict};

        let mut axis = Axis::new(AxisName::Z, BridgeVariant::Standard, 8113.73, 3.17, 0.01);
        axis.attach();
        let mut clock = FakeClock { now_us: 0, tick_us: 10_000, stop: true };
        let outcome = MotionPlanner::single_axis_move(&mut axis, 500.0, 600.0, 0.01, &mut clock, &NoConflict);
        assert_eq!(outcome, MoveOutcome::Cancelled);
    }

    #[test]
    fn probe_move_stops_and_zeroes_at_contact() {
        use crate::axis::{Axis, AxisName};
        use crate::motor::{BridgeVariant, NoConflict};

        let mut axis = Axis::new(AxisName::Z, BridgeVariant::Standard, 8113.73, 3.17, 0.01);
        axis.attach();
        let mut clock = FakeClock { now_us: 0, tick_us: 10_000, stop: false };
        let mut steps = 0;
        let outcome = MotionPlanner::probe_move(&mut axis, -10.0, 50.0, 0.01, &mut clock, &NoConflict, || {
            steps += 1;
            steps > 20
        });
        assert!(matches!(outcome, ProbeOutcome::Triggered(_)));
        assert_eq!(axis.encoder.steps(), 0);
    }

    #[test]
    fn probe_move_reports_no_contact_over_full_travel() {
        use crate::axis::{Axis, AxisName};
        use crate::motor::{BridgeVariant, NoConflict};

        let mut axis = Axis::new(AxisName::Z, BridgeVariant::Standard, 8113.73, 3.17, 0.01);
        axis.attach();
        let mut clock = FakeClock { now_us: 0, tick_us: 10_000, stop: false };
        let outcome = MotionPlanner::probe_move(&mut axis, -1.0, 50.0, 0.01, &mut clock, &NoConflict, || false);
        assert_eq!(outcome, ProbeOutcome::NoContact);
    }
}
