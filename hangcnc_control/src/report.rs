//! Status/report line formatting (C11).
//!
//! Grounded in `Report.cpp`: `reportStatusMessage`, `reportAlarmMessage`,
//! `returnPoz`/`returnError`'s bracketed wire format, and
//! `reportMaslowHelp`'s `$`-command help text.

use crate::system::RunState;
use hangcnc_common::config::MachineSettings;
use hangcnc_common::error::StatusCode;

/// Human-readable text for a status/alarm code, mirroring the switch
/// statements in `reportStatusMessage`/`reportAlarmMessage`.
pub fn message_for(code: StatusCode) -> &'static str {
    match code {
        StatusCode::BadNumberFormat => "Bad number format",
        StatusCode::InvalidStatement => "Invalid statement",
        StatusCode::SettingReadFail => "Failed to read settings, using defaults",
        StatusCode::OldSettings => "Settings version mismatch, using defaults",
        StatusCode::RingBufferOverflow => "Serial ring buffer overflow",
        StatusCode::ProbeNoContact => "Probe did not make contact",
        StatusCode::AlarmPositionLimitError => "Axis position error exceeded limit, motion stopped",
        StatusCode::AlarmPositionLost => "Position lost, recalibration required",
    }
}

/// Renders a per-line acknowledgement, mirroring `reportStatusMessage`:
/// `"ok"` on success, `"error: <message>"` otherwise.
pub fn format_status_line(code: Option<StatusCode>) -> String {
    match code {
        None => "ok".to_string(),
        Some(code) => format!("error: {}", message_for(code)),
    }
}

/// Renders an alarm line, mirroring `reportAlarmMessage`.
pub fn format_alarm_line(code: StatusCode) -> String {
    format!("ALARM: {}", message_for(code))
}

/// Renders the position status line, mirroring `returnPoz`:
/// `<State,MPos:x,y,z,WPos:0.000,0.000,0.000>`. Work coordinates are
/// always reported as zero, matching the source (no work-offset support).
pub fn format_position_report(state: RunState, x: f64, y: f64, z: f64) -> String {
    format!(
        "<{},MPos:{:.3},{:.3},{:.3},WPos:0.000,0.000,0.000>",
        state.as_str(),
        x,
        y,
        z
    )
}

/// Renders the position-error line, mirroring `returnError`'s
/// `[PE:left,right,space]`.
pub fn format_position_error(left_error_mm: f64, right_error_mm: f64, ring_space_available: usize) -> String {
    format!("[PE:{:.3},{:.3},{}]", left_error_mm, right_error_mm, ring_space_available)
}

/// Renders the `$$` settings listing.
pub fn format_settings(settings: &MachineSettings) -> String {
    hangcnc_common::config::format_all(settings)
}

/// Static help text for the `$`-command family, mirroring
/// `reportMaslowHelp`.
pub const HELP_TEXT: &str = "\
$$ (view Maslow settings)
$x=value (set Maslow setting)
$# (view status)
~ (cycle start)
! (feed hold / stop)
$RST=$ (restore tuning settings to defaults)
$RST=# (restore machine geometry to defaults)
$RST=* (restore everything to defaults, including calibration)";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_status_line_has_no_code() {
        assert_eq!(format_status_line(None), "ok");
    }

    #[test]
    fn error_status_line_includes_message() {
        let line = format_status_line(Some(StatusCode::BadNumberFormat));
        assert!(line.starts_with("error: "));
        assert!(line.contains("Bad number format"));
    }

    #[test]
    fn alarm_line_is_prefixed() {
        let line = format_alarm_line(StatusCode::AlarmPositionLost);
        assert!(line.starts_with("ALARM: "));
    }

    #[test]
    fn position_report_matches_wire_format() {
        let line = format_position_report(RunState::Idle, 1.0, 2.5, 0.0);
        assert_eq!(line, "<Idle,MPos:1.000,2.500,0.000,WPos:0.000,0.000,0.000>");
    }

    #[test]
    fn position_error_line_matches_wire_format() {
        let line = format_position_error(0.1, -0.2, 64);
        assert_eq!(line, "[PE:0.100,-0.200,64]");
    }

    #[test]
    fn settings_listing_has_one_line_per_index() {
        let settings = MachineSettings::default();
        assert_eq!(format_settings(&settings).lines().count(), 42);
    }
}
