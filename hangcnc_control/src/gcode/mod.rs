//! G-code front end (C8): a fixed-capacity ring buffer for incoming serial
//! bytes, a line tokenizer/sanitizer, and the G/M/B-code dispatcher.
//!
//! Grounded in `RingBuffer.cpp` (buffer), `GCode.cpp` (sanitizing,
//! tokenizing, G/M dispatch), and the B-code maintenance block of
//! `GCode.cpp`'s `executeBcodeLine`.

pub mod ring_buffer;
pub mod tokenizer;

pub use ring_buffer::RingBuffer;
pub use tokenizer::{extract_value, find_next_gm, sanitize_line};

use hangcnc_common::error::StatusCode;

use crate::motion::ChainAxis;

/// Modal state carried between lines: units, relative/absolute mode, last
/// motion command, tool numbers — mirrors the scalar fields of `system_t`
/// that the gcode front end reads and writes directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModalState {
    pub inches_to_mm: f64,
    pub use_relative_units: bool,
    pub last_g_command: i32,
    pub last_tool: i32,
    pub next_tool: i32,
    pub feedrate_mm_per_min: f64,
}

impl Default for ModalState {
    fn default() -> Self {
        ModalState {
            inches_to_mm: 1.0,
            use_relative_units: false,
            last_g_command: 0,
            last_tool: 0,
            next_tool: 0,
            feedrate_mm_per_min: 600.0,
        }
    }
}

/// One parsed, ready-to-execute command extracted from an incoming line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `$...` machine-settings command; the numeric body after the `$`.
    System(String),
    /// A `B..` maintenance line, verbatim.
    Maintenance(String),
    /// `G0`/`G1` rapid or linear move.
    Linear { rapid: bool, x: Option<f64>, y: Option<f64>, z: Option<f64>, feed: Option<f64> },
    /// `G2`/`G3` arc move.
    Arc { clockwise: bool, x: Option<f64>, y: Option<f64>, z: Option<f64>, i: f64, j: f64, feed: Option<f64> },
    /// `G4` dwell, milliseconds.
    Dwell { ms: f64 },
    /// `G10` zero one or more axes.
    ZeroZ { z: Option<f64> },
    /// `G38.2` probe move.
    Probe { z: Option<f64>, feed: Option<f64> },
    SetUnitsInches,
    SetUnitsMillimeters,
    SetAbsolute,
    SetRelative,
    ToolChange(i32),
    /// `M6` — commit the pending tool change: pause if `next_tool` differs
    /// from the modal state's `last_tool`, then latch it.
    ToolChangeCommit,
    SpindleOn,
    SpindleOff,
    LaserOn,
    LaserOff,
    Pause,
    /// Recognized but intentionally not implemented (e.g. unsupported G/M
    /// number); carries the code letter and number for logging.
    Unsupported(char, i32),
}

/// Splits a sanitized line into zero or more [`Command`]s, mirroring
/// `interpretCommandString`'s `$`/`B`/G-or-M-segment dispatch.
pub fn parse_line(line: &str) -> Result<Vec<Command>, StatusCode> {
    if line.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(rest) = line.strip_prefix('$') {
        return Ok(vec![Command::System(rest.to_string())]);
    }
    if line.starts_with('B') {
        return Ok(vec![Command::Maintenance(line.to_string())]);
    }

    let mut commands = Vec::new();
    let mut remainder = line;
    while !remainder.is_empty() {
        let first = find_next_gm(remainder, 0);
        let second = find_next_gm(remainder, first + 1);
        let first = if first == remainder.len() { 0 } else { first };

        if first > 0 {
            let prefix = &remainder[..first];
            if let Some(tool) = prefix.strip_prefix('T') {
                let n: i32 = tool.trim().parse().unwrap_or(0);
                commands.push(Command::ToolChange(n));
            }
        }

        let segment = &remainder[first..second.min(remainder.len())];
        if !segment.is_empty() {
            match segment.chars().next() {
                Some('M') => commands.push(parse_m(segment)),
                Some('G') => commands.push(parse_g(segment)?),
                _ => {}
            }
        }

        remainder = &remainder[second.min(remainder.len())..];
    }
    Ok(commands)
}

fn parse_m(segment: &str) -> Command {
    let m = extract_value(segment, 'M', -1.0) as i32;
    match m {
        0 | 1 => Command::Pause,
        2 | 5 | 30 => Command::SpindleOff,
        3 | 4 => Command::SpindleOn,
        6 => Command::ToolChangeCommit,
        106 => Command::LaserOn,
        107 => Command::LaserOff,
        other => Command::Unsupported('M', other),
    }
}

/// A parsed `B..` maintenance/calibration line, mirroring
/// `executeBcodeLine`'s B01/B02/B06/B08/B09/B10/B15 dispatch. Other B
/// numbers (B04 axis self-test, B11/B13/B14/B16 bench diagnostics) are
/// calibration-bench tooling outside this front end's maintenance surface
/// and are left unrecognized, matching the source's
/// `STATUS_INVALID_STATEMENT` fallthrough.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaintenanceCommand {
    /// B01 — motor calibration self-test; informational only in source
    /// ("Motor Calibration Not Needed").
    CalibrateMotors,
    /// B02 — measure out whichever chain carries a nonzero `L`/`R` value to
    /// `original_chain_length` at 90% of max feed, then detach it.
    CalibrateChainLength { axis: ChainAxis },
    /// B06 — set both chain lengths directly, in mm.
    SetChainLengths { left_mm: f64, right_mm: f64 },
    /// B08 — restore both chains to `original_chain_length` and recompute
    /// position from the result.
    RestoreChainLengths,
    /// B09 — jog one or both chains by/to the given lengths at `feed`.
    JogChains { left_mm: f64, right_mm: f64, feed_mm_per_min: f64 },
    /// B10 — report the measured length of one chain.
    Measure { axis: ChainAxis },
    /// B15 — move both chains to the length that centers the sled, then
    /// recompute position.
    CenterSled,
}

/// Parses a `B..` maintenance line, mirroring `executeBcodeLine`'s
/// `substring(0, 3)` code dispatch. Returns `None` for any B-number this
/// front end doesn't maintain.
pub fn parse_b(line: &str) -> Option<MaintenanceCommand> {
    let code = &line[..line.len().min(3)];
    match code {
        "B01" => Some(MaintenanceCommand::CalibrateMotors),
        "B02" => Some(MaintenanceCommand::CalibrateChainLength {
            axis: if extract_value(line, 'L', 0.0) != 0.0 { ChainAxis::Left } else { ChainAxis::Right },
        }),
        "B06" => Some(MaintenanceCommand::SetChainLengths {
            left_mm: extract_value(line, 'L', 0.0),
            right_mm: extract_value(line, 'R', 0.0),
        }),
        "B08" => Some(MaintenanceCommand::RestoreChainLengths),
        "B09" => Some(MaintenanceCommand::JogChains {
            left_mm: extract_value(line, 'L', 0.0),
            right_mm: extract_value(line, 'R', 0.0),
            feed_mm_per_min: extract_value(line, 'F', 800.0),
        }),
        "B10" => Some(MaintenanceCommand::Measure {
            axis: if line.contains('L') { ChainAxis::Left } else { ChainAxis::Right },
        }),
        "B15" => Some(MaintenanceCommand::CenterSled),
        _ => None,
    }
}

/// Host surface the `maintenance` dispatch table calls through for
/// B-code execution, keeping actual chain-length/calibration persistence
/// (and the motion primitives it takes to get there) behind whatever the
/// caller wires up — the CLI binary backs this directly with its axes,
/// kinematics, and settings; a calibration-bench front end could back it
/// with a different persistence layer entirely.
pub trait MaintenanceHost {
    fn calibrate_motors(&mut self);
    /// Returns a calibration-required message when the chain move leaves
    /// forward kinematics unable to converge.
    fn calibrate_chain_length(&mut self, axis: ChainAxis) -> Option<String>;
    fn set_chain_lengths(&mut self, left_mm: f64, right_mm: f64);
    /// Returns a calibration-required message when the chain move leaves
    /// forward kinematics unable to converge.
    fn restore_chain_lengths(&mut self) -> Option<String>;
    fn jog_chains(&mut self, left_mm: f64, right_mm: f64, feed_mm_per_min: f64);
    fn measure(&mut self, axis: ChainAxis) -> f64;
    /// Returns a calibration-required message when the chain move leaves
    /// forward kinematics unable to converge.
    fn center_sled(&mut self) -> Option<String>;
}

/// Runs a parsed maintenance command against a [`MaintenanceHost`],
/// mirroring `executeBcodeLine`'s body once the code has been identified.
/// Returns the `B10` measurement reply text, if any.
pub fn dispatch_maintenance(cmd: MaintenanceCommand, host: &mut impl MaintenanceHost) -> Option<String> {
    match cmd {
        MaintenanceCommand::CalibrateMotors => {
            host.calibrate_motors();
            None
        }
        MaintenanceCommand::CalibrateChainLength { axis } => host.calibrate_chain_length(axis),
        MaintenanceCommand::SetChainLengths { left_mm, right_mm } => {
            host.set_chain_lengths(left_mm, right_mm);
            None
        }
        MaintenanceCommand::RestoreChainLengths => host.restore_chain_lengths(),
        MaintenanceCommand::JogChains { left_mm, right_mm, feed_mm_per_min } => {
            host.jog_chains(left_mm, right_mm, feed_mm_per_min);
            None
        }
        MaintenanceCommand::Measure { axis } => Some(format!("[Measure: {}]", host.measure(axis))),
        MaintenanceCommand::CenterSled => host.center_sled(),
    }
}

fn parse_g(segment: &str) -> Result<Command, StatusCode> {
    let g = extract_value(segment, 'G', -1.0) as i32;
    let x = if segment.contains('X') { Some(extract_value(segment, 'X', 0.0)) } else { None };
    let y = if segment.contains('Y') { Some(extract_value(segment, 'Y', 0.0)) } else { None };
    let z = if segment.contains('Z') { Some(extract_value(segment, 'Z', 0.0)) } else { None };
    let feed = if segment.contains('F') { Some(extract_value(segment, 'F', 0.0)) } else { None };

    Ok(match g {
        0 => Command::Linear { rapid: true, x, y, z, feed },
        1 => Command::Linear { rapid: false, x, y, z, feed },
        2 | 3 => {
            let i = extract_value(segment, 'I', 0.0);
            let j = extract_value(segment, 'J', 0.0);
            Command::Arc { clockwise: g == 2, x, y, z, i, j, feed }
        }
        4 => {
            let ms = extract_value(segment, 'P', 0.0).abs();
            let s = extract_value(segment, 'S', 0.0).abs();
            let ms = if ms == 0.0 { s * 1000.0 } else { ms };
            Command::Dwell { ms }
        }
        10 => Command::ZeroZ { z },
        20 => Command::SetUnitsInches,
        21 => Command::SetUnitsMillimeters,
        38 => Command::Probe { z, feed },
        40 => Command::Unsupported('G', 40),
        90 => Command::SetAbsolute,
        91 => Command::SetRelative,
        -1 => return Err(StatusCode::InvalidStatement),
        other => Command::Unsupported('G', other),
    })
}
