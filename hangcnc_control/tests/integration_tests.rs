//! End-to-end scenarios exercising the public API across module
//! boundaries: kinematics round-trips, a coordinated line move, a
//! degenerate arc substitution, a probe hit, and ring-buffer overflow.

use hangcnc_common::config::MachineSettings;
use hangcnc_control::axis::{Axis, AxisName};
use hangcnc_control::gcode::RingBuffer;
use hangcnc_control::kinematics::Kinematics;
use hangcnc_control::motion::{ArcDirection, MotionClock, MotionPlanner, MoveOutcome, ProbeOutcome};
use hangcnc_control::motor::{BridgeVariant, NoConflict};

struct FakeClock {
    now_us: u64,
    tick_us: u64,
}

impl MotionClock for FakeClock {
    fn now_us(&self) -> u64 {
        self.now_us
    }
    fn advance_tick(&mut self) {
        self.now_us += self.tick_us;
    }
    fn stop_requested(&self) -> bool {
        false
    }
}

fn flat_settings() -> MachineSettings {
    let mut s = MachineSettings::default();
    s.chain_over_sprocket = 1;
    s.chain_sag_correction = 0.0;
    s.left_chain_tolerance = 0.0;
    s.right_chain_tolerance = 0.0;
    s.rotation_disk_radius = 0.0;
    s
}

/// Scenario 1: inverse triangular on-axis — both chains equal at (0,0).
#[test]
fn scenario_inverse_triangular_on_axis() {
    let mut settings = flat_settings();
    settings.kinematics_type = hangcnc_common::config::KinematicsType::Triangular;
    let mut k = Kinematics::new(&settings);
    let (left, right) = k.inverse(0.0, 0.0);
    assert!((left - right).abs() < 1e-4);
}

/// Scenario 2: inverse mirror symmetry for the quadrilateral solver.
#[test]
fn scenario_inverse_mirror_symmetry() {
    let mut settings = flat_settings();
    settings.kinematics_type = hangcnc_common::config::KinematicsType::Quadrilateral;
    let mut k = Kinematics::new(&settings);
    let (a, b) = k.inverse(300.0, 100.0);
    k.recompute_geometry(&settings);
    let (b2, a2) = k.inverse(-300.0, 100.0);
    assert!((a - a2).abs() < 0.05, "left chain should mirror: {a} vs {a2}");
    assert!((b - b2).abs() < 0.05, "right chain should mirror: {b} vs {b2}");
}

/// Invariant: forward(inverse(x,y)) round-trips within tolerance.
#[test]
fn forward_inverts_inverse_round_trip() {
    let settings = flat_settings();
    let mut k = Kinematics::new(&settings);
    for (x, y) in [(0.0, 0.0), (500.0, 200.0), (-400.0, -100.0)] {
        let (left, right) = k.inverse(x, y);
        let (fx, fy) = k.forward(left, right, x, y).expect("forward should converge");
        assert!((fx - x).abs() < 0.2, "x mismatch: {fx} vs {x}");
        assert!((fy - y).abs() < 0.2, "y mismatch: {fy} vs {y}");
    }
}

/// Scenario 3: a G1-equivalent coordinated line move from (0,0) to
/// (100,0) at 600 mm/min completes in ~1000 ticks and lands on target.
#[test]
fn scenario_g1_line_move() {
    let settings = flat_settings();
    let mut k = Kinematics::new(&settings);
    let mut left = Axis::new(AxisName::Left, BridgeVariant::Standard, settings.encoder_steps as f64, settings.dist_per_rot as f64, 0.01);
    let mut right = Axis::new(AxisName::Right, BridgeVariant::Standard, settings.encoder_steps as f64, settings.dist_per_rot as f64, 0.01);
    left.attach();
    right.attach();

    let mut planner = MotionPlanner {
        left: &mut left,
        right: &mut right,
        z: None,
        kinematics: &mut k,
        tick_period_s: 0.01,
        max_feed_mm_per_min: settings.max_feed as f64,
        max_z_rpm: settings.max_z_rpm as f64,
        z_pitch_mm_per_rev: settings.z_dist_per_rot as f64,
    };
    let mut clock = FakeClock { now_us: 0, tick_us: 10_000 };
    let (outcome, x, y) = planner.linear_move(100.0, 0.0, 0.0, 600.0, 0.0, 0.0, &mut clock, &NoConflict);

    assert_eq!(outcome, MoveOutcome::Completed);
    assert!((x - 100.0).abs() < 0.5);
    assert!((y - 0.0).abs() < 0.5);

    let expected_ticks = 100.0 / 600.0 * 60.0 / 0.01;
    let ticks_taken = (clock.now_us / 10_000) as f64;
    assert!((ticks_taken - expected_ticks).abs() <= 1.0, "ticks: {ticks_taken} vs {expected_ticks}");
}

/// Scenario 4: a near-zero-chord arc is substituted by a straight line.
#[test]
fn scenario_g2_degenerate_arc_substitutes_line() {
    let plan = MotionPlanner::plan_arc(0.0, 0.0, 0.001, 0.0, 50.0, 0.0, ArcDirection::Clockwise);
    assert!(plan.is_none(), "near-zero-chord arc should be rejected as degenerate");
}

/// Scenario 5: a probe move that contacts partway through zeroes the Z
/// setpoint and terminates without error.
#[test]
fn scenario_probe_hit_zeroes_z_at_contact() {
    let mut z = Axis::new(AxisName::Z, BridgeVariant::Standard, 8113.73, 3.17, 0.01);
    z.attach();
    z.encoder.set_steps((-3.7 / z.mm_per_rev * z.steps_per_rev) as i64);
    let start_steps = z.encoder.steps();

    let mut clock = FakeClock { now_us: 0, tick_us: 10_000 };
    let mut traveled = 0.0;
    let outcome = MotionPlanner::probe_move(&mut z, -10.0, 50.0, 0.01, &mut clock, &NoConflict, || {
        traveled -= 0.1;
        traveled <= -6.3
    });

    assert!(matches!(outcome, ProbeOutcome::Triggered(_)));
    assert_eq!(z.encoder.steps(), 0);
    assert_ne!(start_steps, 0);
}

/// Scenario 6: feeding a 200-byte line with no newline into a 128-byte
/// ring buffer overflows; the buffer is then emptied at the next drain.
#[test]
fn scenario_ring_buffer_overflow_then_drain() {
    let mut rb = RingBuffer::new();
    let mut overflowed = false;
    for _ in 0..200 {
        if rb.write(b'X').is_err() {
            overflowed = true;
        }
    }
    assert!(overflowed, "a 200-byte line with no newline must overflow a 128-byte buffer");
    rb.empty();
    assert_eq!(rb.length(), 0);
}

/// Idle detach: an axis that hasn't moved for `axisDetachTime` ms detaches.
#[test]
fn idle_detach_respects_configured_timeout() {
    let settings = flat_settings();
    let mut axis = Axis::new(AxisName::Z, BridgeVariant::Standard, settings.encoder_steps as f64, settings.z_dist_per_rot as f64, 0.01);
    axis.attach();
    axis.set_setpoint_mm(5.0, 1_000);
    axis.detach_if_idle(1_000 + settings.axis_detach_time_ms as u64 - 1, settings.axis_detach_time_ms);
    assert!(axis.attached());
    axis.detach_if_idle(1_000 + settings.axis_detach_time_ms as u64, settings.axis_detach_time_ms);
    assert!(!axis.attached());
}
