//! CLI entry point (C12): boots the machine from persisted settings,
//! wires up the two (or three) axes, kinematics, and motion planner, and
//! runs the realtime tick loop against line-oriented G-code on stdin.
//!
//! The tick-pacing split (`clock_nanosleep(TIMER_ABSTIME)` under the `rt`
//! feature, `std::thread::sleep` otherwise) is grounded in the control
//! unit's former `cycle.rs` run loop.

use std::io::Read;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use clap::Parser;
use tracing::{error, info, warn};

use hangcnc_common::config::{MachineSettings, StepSnapshot};
use hangcnc_common::consts::{REPORT_MIN_SPACING_MS, TICK_PERIOD_US};
use hangcnc_common::error::SystemState;
use hangcnc_control::axis::{Axis, AxisName};
use hangcnc_control::gcode::{self, Command, MaintenanceHost, ModalState, RingBuffer};
use hangcnc_control::kinematics::Kinematics;
use hangcnc_control::motion::{self, ArcDirection, ChainAxis, MotionClock, MotionPlanner, MoveOutcome, ProbeOutcome};
use hangcnc_control::motor::{BridgeVariant, NoConflict};
use hangcnc_control::report;
use hangcnc_control::system::{self, Supervisor};

#[derive(Parser, Debug)]
#[command(author, version, about = "Realtime motion-control core for a two-chain hanging-sled CNC router")]
struct Cli {
    /// Path to the persisted machine settings TOML file.
    #[arg(long, default_value = "settings.toml")]
    settings: PathBuf,

    /// Path to the persisted encoder step-counter snapshot.
    #[arg(long, default_value = "steps.toml")]
    steps: PathBuf,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut settings = match MachineSettings::load(&cli.settings) {
        Ok(s) => s,
        Err(err) => {
            warn!(%err, path = %cli.settings.display(), "failed to load settings, using defaults");
            MachineSettings::default()
        }
    };
    let old_settings = settings.is_old();

    let steps = StepSnapshot::load(&cli.steps).ok().filter(StepSnapshot::is_valid);

    let tick_period_s = TICK_PERIOD_US as f64 / 1_000_000.0;
    let mut kinematics = Kinematics::new(&settings);

    let mut left = Axis::new(AxisName::Left, BridgeVariant::Standard, settings.encoder_steps as f64, settings.dist_per_rot as f64, tick_period_s);
    let mut right = Axis::new(AxisName::Right, BridgeVariant::Standard, settings.encoder_steps as f64, settings.dist_per_rot as f64, tick_period_s);
    let mut z = settings.z_axis_attached.then(|| {
        Axis::new(AxisName::Z, BridgeVariant::Standard, settings.z_encoder_steps as f64, settings.z_dist_per_rot as f64, tick_period_s)
    });

    let mut supervisor = Supervisor::new();
    if old_settings {
        supervisor.state.insert(SystemState::OLD_SETTINGS);
    }

    if let Some(snapshot) = steps {
        left.encoder.set_steps(snapshot.left_steps);
        right.encoder.set_steps(snapshot.right_steps);
        if let Some(z) = z.as_mut() {
            z.encoder.set_steps(snapshot.z_steps);
        }
    } else {
        supervisor.state.insert(SystemState::ALARM);
        warn!(path = %cli.steps.display(), "no valid step snapshot at boot, position lost");
        println!("{}", report::format_alarm_line(hangcnc_common::error::StatusCode::AlarmPositionLost));
    }
    let mut modal = ModalState::default();
    let mut x_pos = 0.0f64;
    let mut y_pos = 0.0f64;

    let incoming = spawn_stdin_reader();
    let mut line_buf = RingBuffer::new();

    info!(tick_period_us = TICK_PERIOD_US, "hangcnc_control starting");

    loop {
        let now_us = next_tick_count() * TICK_PERIOD_US;
        let now_ms = now_us / 1_000;

        // Mandatory per-tick control work (C9): position loop then velocity
        // loop then PWM write, left -> right -> z, unconditionally every
        // tick period regardless of whether a move is in flight this
        // iteration — this is what holds an attached-but-idle axis against
        // gravity between G-code lines rather than only while a move's own
        // stepping loop is ticking it.
        left.tick(now_us, &NoConflict);
        right.tick(now_us, &NoConflict);
        if let Some(z) = z.as_mut() {
            z.tick(now_us, &NoConflict);
        }

        while let Ok(byte) = incoming.try_recv() {
            if byte == b'!' {
                supervisor.request_stop();
            } else if byte == b'~' {
                supervisor.clear_user_pause();
            } else if line_buf.write(byte).is_err() {
                println!("{}", report::format_status_line(Some(hangcnc_common::error::StatusCode::RingBufferOverflow)));
            }
        }

        if let Some(line) = line_buf.pretty_read_line() {
            let result = execute_line(
                &line,
                &mut modal,
                &mut settings,
                &mut supervisor,
                &mut kinematics,
                &mut left,
                &mut right,
                &mut z,
                &mut x_pos,
                &mut y_pos,
                tick_period_s,
            );
            match result {
                Ok(Some(text)) => println!("{text}"),
                Ok(None) => println!("{}", report::format_status_line(None)),
                Err(code) => println!("{}", report::format_status_line(Some(code))),
            }
        }

        let left_error = (left.setpoint_mm() - left.read_mm()).abs();
        let right_error = (right.setpoint_mm() - right.read_mm()).abs();
        if let Some(alarm) = supervisor.check_position_error(left_error, right_error, settings.position_error_limit as f64) {
            error!(%alarm, "position error exceeded limit, motion stopped");
            println!("{}", report::format_alarm_line(alarm));
        }

        if supervisor.report_due(now_ms, REPORT_MIN_SPACING_MS) {
            let z_mm = z.as_ref().map(|z| z.read_mm()).unwrap_or(0.0);
            println!("{}", report::format_position_report(supervisor.run_state(), x_pos, y_pos, z_mm));
        }

        left.detach_if_idle(now_ms, settings.axis_detach_time_ms);
        right.detach_if_idle(now_ms, settings.axis_detach_time_ms);
        if let Some(z) = z.as_mut() {
            z.detach_if_idle(now_ms, settings.axis_detach_time_ms);
        }

        sleep_one_tick();
    }
}

/// Counts elapsed ticks since boot, giving the report-rate-limiter and the
/// idle-detach check a monotonic millisecond clock.
fn next_tick_count() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static TICKS: AtomicU64 = AtomicU64::new(0);
    TICKS.fetch_add(1, Ordering::Relaxed)
}

#[cfg(feature = "rt")]
fn sleep_one_tick() {
    use nix::sys::time::TimeSpec;
    use nix::time::{clock_nanosleep, ClockId, ClockNanosleepFlags};
    let secs = (TICK_PERIOD_US / 1_000_000) as i64;
    let nsecs = ((TICK_PERIOD_US % 1_000_000) * 1_000) as i64;
    let ts = TimeSpec::new(secs, nsecs);
    let _ = clock_nanosleep(ClockId::CLOCK_MONOTONIC, ClockNanosleepFlags::empty(), &ts);
}

#[cfg(not(feature = "rt"))]
fn sleep_one_tick() {
    std::thread::sleep(std::time::Duration::from_micros(TICK_PERIOD_US));
}

fn spawn_stdin_reader() -> mpsc::Receiver<u8> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut lock = stdin.lock();
        let mut byte = [0u8; 1];
        loop {
            match lock.read(&mut byte) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(byte[0]).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Wall clock for [`MotionClock`], backed by a per-move tick counter and
/// the supervisor's stop flag. Advancing the clock is also what paces the
/// loop: each simulated tick sleeps for one real tick period.
struct SupervisorClock<'a> {
    now_us: u64,
    stop: &'a bool,
}

impl MotionClock for SupervisorClock<'_> {
    fn now_us(&self) -> u64 {
        self.now_us
    }
    fn advance_tick(&mut self) {
        self.now_us += TICK_PERIOD_US;
        sleep_one_tick();
    }
    fn stop_requested(&self) -> bool {
        *self.stop
    }
}

/// Blocks the tick loop under a user pause until `~` clears it or `!`
/// stops the machine, mirroring `pause()`'s busy-wait. Shared by `M0`/`M1`
/// and the `M6` tool-change prompt.
fn pause_until_resumed(supervisor: &mut Supervisor) {
    supervisor.pause.insert(hangcnc_common::error::PauseFlags::USER_PAUSE);
    while supervisor.pause.contains(hangcnc_common::error::PauseFlags::USER_PAUSE) && !supervisor.stop {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
}

/// Sets an axis's position instantly (encoder steps and setpoint both),
/// with no motion — mirrors `Axis::set`, the primitive `B06`/`B08` use to
/// tell the firmware "the chain is already this long" rather than driving
/// it there.
fn set_axis_mm(axis: &mut Axis, mm: f64, now_ms: u64) {
    axis.encoder.set_steps((mm / axis.mm_per_rev * axis.steps_per_rev) as i64);
    axis.set_setpoint_mm(mm, now_ms);
}

/// Backs [`MaintenanceHost`] with the CLI's own axes, kinematics, and
/// settings, so B-code maintenance lines actually move chains and update
/// position rather than only being parsed. Grounded in `GCode.cpp`'s
/// `executeBcodeLine` and `System.cpp`'s `calibrateChainLengths`.
struct CliMaintenanceHost<'a> {
    left: &'a mut Axis,
    right: &'a mut Axis,
    kinematics: &'a mut Kinematics,
    settings: &'a MachineSettings,
    x_pos: &'a mut f64,
    y_pos: &'a mut f64,
    tick_period_s: f64,
    stop: bool,
}

impl CliMaintenanceHost<'_> {
    /// Recomputes (x,y) from the chains' current lengths via forward
    /// kinematics. On non-convergence, resets position to (0,0) and
    /// returns a calibration-required message, matching
    /// `Kinematics.cpp`'s give-up case exactly (spec.md's forward
    /// kinematics is specified to return (0,0) on failure to converge,
    /// not leave the previous position in place).
    fn recompute_position(&mut self) -> Option<String> {
        match self.kinematics.forward(self.left.read_mm() as f32, self.right.read_mm() as f32, *self.x_pos as f32, *self.y_pos as f32) {
            Ok((x, y)) => {
                *self.x_pos = x as f64;
                *self.y_pos = y as f64;
                None
            }
            Err(err) => {
                warn!(?err, "forward kinematics did not converge after maintenance move");
                *self.x_pos = 0.0;
                *self.y_pos = 0.0;
                Some("error: recalibration required, forward kinematics did not converge".to_string())
            }
        }
    }
}

impl MaintenanceHost for CliMaintenanceHost<'_> {
    fn calibrate_motors(&mut self) {
        info!("motor calibration not needed");
    }

    fn calibrate_chain_length(&mut self, axis: ChainAxis) -> Option<String> {
        let target = self.settings.original_chain_length as f64;
        let feed = self.settings.max_feed as f64 * 0.9;
        let tick_period_s = self.tick_period_s;
        let stop = self.stop;
        let axis_ref: &mut Axis = match axis {
            ChainAxis::Left => &mut *self.left,
            ChainAxis::Right => &mut *self.right,
        };
        let mut clock = SupervisorClock { now_us: 0, stop: &stop };
        MotionPlanner::single_axis_move(axis_ref, target, feed, tick_period_s, &mut clock, &NoConflict);
        axis_ref.detach();
        info!(?axis, length_mm = axis_ref.read_mm(), "chain measured out");
        self.recompute_position()
    }

    fn set_chain_lengths(&mut self, left_mm: f64, right_mm: f64) {
        set_axis_mm(self.left, left_mm, 0);
        set_axis_mm(self.right, right_mm, 0);
        info!(left_mm, right_mm, "chain lengths set");
    }

    fn restore_chain_lengths(&mut self) -> Option<String> {
        let target = self.settings.original_chain_length as f64;
        set_axis_mm(self.left, target, 0);
        set_axis_mm(self.right, target, 0);
        let message = self.recompute_position();
        info!("chain lengths manually re-calibrated");
        message
    }

    fn jog_chains(&mut self, left_mm: f64, right_mm: f64, feed_mm_per_min: f64) {
        let tick_period_s = self.tick_period_s;
        let stop = self.stop;
        let mut clock = SupervisorClock { now_us: 0, stop: &stop };
        MotionPlanner::single_axis_move(self.left, left_mm, feed_mm_per_min, tick_period_s, &mut clock, &NoConflict);
        let mut clock = SupervisorClock { now_us: 0, stop: &stop };
        MotionPlanner::single_axis_move(self.right, right_mm, feed_mm_per_min, tick_period_s, &mut clock, &NoConflict);
    }

    fn measure(&mut self, axis: ChainAxis) -> f64 {
        match axis {
            ChainAxis::Left => self.left.read_mm(),
            ChainAxis::Right => self.right.read_mm(),
        }
    }

    fn center_sled(&mut self) -> Option<String> {
        let (mid_a, _) = self.kinematics.inverse(0.0, 0.0);
        let tick_period_s = self.tick_period_s;
        let stop = self.stop;
        let mut clock = SupervisorClock { now_us: 0, stop: &stop };
        MotionPlanner::single_axis_move(self.left, mid_a as f64, 800.0, tick_period_s, &mut clock, &NoConflict);
        let mut clock = SupervisorClock { now_us: 0, stop: &stop };
        MotionPlanner::single_axis_move(self.right, mid_a as f64, 800.0, tick_period_s, &mut clock, &NoConflict);
        self.recompute_position()
    }
}

#[allow(clippy::too_many_arguments)]
fn execute_line(
    line: &str,
    modal: &mut ModalState,
    settings: &mut MachineSettings,
    supervisor: &mut Supervisor,
    kinematics: &mut Kinematics,
    left: &mut Axis,
    right: &mut Axis,
    z: &mut Option<Axis>,
    x_pos: &mut f64,
    y_pos: &mut f64,
    tick_period_s: f64,
) -> Result<Option<String>, hangcnc_common::error::StatusCode> {
    if line.is_empty() {
        return Ok(None);
    }

    let commands = hangcnc_control::gcode::parse_line(line)?;
    let mut reply = None;
    let stop = supervisor.stop;

    for command in commands {
        match command {
            Command::System(body) => {
                let parsed = system::parse_settings_command(&body)?;
                reply = system::apply_settings_command(settings, parsed, &mut supervisor.state)
                    .map_err(|_| hangcnc_common::error::StatusCode::SettingReadFail)?;
                kinematics.recompute_geometry(settings);
            }
            Command::Maintenance(line) => match gcode::parse_b(&line) {
                Some(mut cmd) => {
                    if let gcode::MaintenanceCommand::JogChains { left_mm, right_mm, .. } = &mut cmd {
                        if modal.use_relative_units {
                            let (l, r) = (*left_mm, *right_mm);
                            *left_mm = if l != 0.0 { left.read_mm() + l } else { left.read_mm() };
                            *right_mm = if r != 0.0 { right.read_mm() + r } else { right.read_mm() };
                        }
                    }
                    let mut host = CliMaintenanceHost {
                        left: &mut *left,
                        right: &mut *right,
                        kinematics: &mut *kinematics,
                        settings: &*settings,
                        x_pos: &mut *x_pos,
                        y_pos: &mut *y_pos,
                        tick_period_s,
                        stop,
                    };
                    if let Some(text) = gcode::dispatch_maintenance(cmd, &mut host) {
                        reply = Some(text);
                    }
                }
                None => warn!(%line, "unrecognized maintenance command"),
            },
            Command::Linear { x, y, z: z_target, feed, .. } => {
                let convert = |v: f64| v * modal.inches_to_mm;
                let x_end = match x.map(convert) {
                    Some(v) if modal.use_relative_units => *x_pos + v,
                    Some(v) => v,
                    None => *x_pos,
                };
                let y_end = match y.map(convert) {
                    Some(v) if modal.use_relative_units => *y_pos + v,
                    Some(v) => v,
                    None => *y_pos,
                };
                let z_start = z.as_ref().map(|z| z.read_mm()).unwrap_or(0.0);
                let z_end = match z_target.map(convert) {
                    Some(v) if modal.use_relative_units => z_start + v,
                    Some(v) => v,
                    None => z_start,
                };
                if let Some(f) = feed {
                    modal.feedrate_mm_per_min = convert(f);
                }

                let mut clock = SupervisorClock { now_us: 0, stop: &stop };
                let mut planner = MotionPlanner {
                    left: &mut *left,
                    right: &mut *right,
                    z: z.as_mut(),
                    kinematics,
                    tick_period_s,
                    max_feed_mm_per_min: settings.max_feed as f64,
                    max_z_rpm: settings.max_z_rpm as f64,
                    z_pitch_mm_per_rev: settings.z_dist_per_rot as f64,
                };
                let (outcome, new_x, new_y) =
                    planner.linear_move(x_end, y_end, z_end, modal.feedrate_mm_per_min, *x_pos, *y_pos, &mut clock, &NoConflict);
                *x_pos = new_x;
                *y_pos = new_y;
                if outcome == MoveOutcome::Cancelled {
                    info!("move cancelled by stop request");
                }
            }
            Command::Arc { clockwise, x, y, z: z_target, i, j, feed } => {
                let convert = |v: f64| v * modal.inches_to_mm;
                let x_end = x.map(convert).unwrap_or(*x_pos);
                let y_end = y.map(convert).unwrap_or(*y_pos);
                let z_start = z.as_ref().map(|z| z.read_mm()).unwrap_or(0.0);
                let z_end = match z_target.map(convert) {
                    Some(v) if modal.use_relative_units => z_start + v,
                    Some(v) => v,
                    None => z_start,
                };
                let center_x = *x_pos + i * modal.inches_to_mm;
                let center_y = *y_pos + j * modal.inches_to_mm;
                if let Some(f) = feed {
                    modal.feedrate_mm_per_min = f * modal.inches_to_mm;
                }
                let direction = if clockwise { ArcDirection::Clockwise } else { ArcDirection::CounterClockwise };

                match MotionPlanner::plan_arc(*x_pos, *y_pos, x_end, y_end, center_x, center_y, direction) {
                    Some(plan) => {
                        // Segment by arc length at the same per-tick step size
                        // linear moves use, rather than a fixed facet count, so
                        // the walk stays a true circle at any feed/radius.
                        let feed = modal.feedrate_mm_per_min.clamp(1.0, settings.max_feed as f64);
                        let step_size = motion::compute_step_size(feed, tick_period_s);
                        let arc_length = plan.radius * plan.theta.abs();
                        let total_steps = (arc_length / step_size).max(1.0).round() as u32;

                        let mut clock = SupervisorClock { now_us: 0, stop: &stop };
                        let mut planner = MotionPlanner {
                            left: &mut *left,
                            right: &mut *right,
                            z: z.as_mut(),
                            kinematics,
                            tick_period_s,
                            max_feed_mm_per_min: settings.max_feed as f64,
                            max_z_rpm: settings.max_z_rpm as f64,
                            z_pitch_mm_per_rev: settings.z_dist_per_rot as f64,
                        };
                        planner.left.attach();
                        planner.right.attach();
                        if let Some(axis) = planner.z.as_mut() {
                            axis.attach();
                        }

                        'arc: for step in 1..=total_steps {
                            let fraction = step as f64 / total_steps as f64;
                            let (px, py) = plan.point_at(fraction, center_x, center_y);
                            let pz = z_start + (z_end - z_start) * fraction;
                            let outcome = planner.step_to_point(px, py, pz, &mut clock, &NoConflict);
                            *x_pos = px;
                            *y_pos = py;
                            if outcome == MoveOutcome::Cancelled {
                                break 'arc;
                            }
                        }
                    }
                    None => {
                        info!("arc degenerate, substituting a straight line");
                        let mut clock = SupervisorClock { now_us: 0, stop: &stop };
                        let mut planner = MotionPlanner {
                            left: &mut *left,
                            right: &mut *right,
                            z: z.as_mut(),
                            kinematics,
                            tick_period_s,
                            max_feed_mm_per_min: settings.max_feed as f64,
                            max_z_rpm: settings.max_z_rpm as f64,
                            z_pitch_mm_per_rev: settings.z_dist_per_rot as f64,
                        };
                        let (_, new_x, new_y) =
                            planner.linear_move(x_end, y_end, z_end, modal.feedrate_mm_per_min, *x_pos, *y_pos, &mut clock, &NoConflict);
                        *x_pos = new_x;
                        *y_pos = new_y;
                    }
                }
            }
            Command::Dwell { ms } => {
                std::thread::sleep(std::time::Duration::from_millis(ms as u64));
            }
            Command::ZeroZ { z: z_target } => {
                if let Some(axis) = z.as_mut() {
                    let target = z_target.unwrap_or(0.0);
                    axis.encoder.set_steps((target / axis.mm_per_rev * axis.steps_per_rev) as i64);
                }
            }
            Command::Probe { z: z_target, feed } => {
                if let Some(axis) = z.as_mut() {
                    let target = z_target.map(|v| v * modal.inches_to_mm).unwrap_or(axis.read_mm());
                    let feed = feed.map(|f| f * modal.inches_to_mm).unwrap_or(modal.feedrate_mm_per_min);
                    let mut clock = SupervisorClock { now_us: 0, stop: &stop };
                    // No touch-plate input is wired up at this CLI layer; a
                    // platform build supplies the real contact sensor here.
                    let outcome =
                        MotionPlanner::probe_move(axis, target, feed, tick_period_s, &mut clock, &NoConflict, || false);
                    if matches!(outcome, ProbeOutcome::NoContact) {
                        reply = Some(report::format_status_line(Some(hangcnc_common::error::StatusCode::ProbeNoContact)));
                    }
                }
            }
            Command::SetUnitsInches => modal.inches_to_mm = 25.4,
            Command::SetUnitsMillimeters => modal.inches_to_mm = 1.0,
            Command::SetAbsolute => modal.use_relative_units = false,
            Command::SetRelative => modal.use_relative_units = true,
            Command::ToolChange(n) => modal.next_tool = n,
            Command::ToolChangeCommit => {
                if modal.next_tool != modal.last_tool {
                    info!(tool = modal.next_tool, "tool change: please insert tool");
                    modal.last_tool = modal.next_tool;
                    pause_until_resumed(supervisor);
                }
            }
            Command::SpindleOn | Command::SpindleOff | Command::LaserOn | Command::LaserOff => {
                warn!("spindle/laser automation is outside this front end's scope");
            }
            Command::Pause => pause_until_resumed(supervisor),
            Command::Unsupported(letter, n) => {
                warn!(%letter, %n, "unsupported command ignored");
            }
        }
    }

    Ok(reply)
}
