//! Realtime supervisor (C9): run-state bookkeeping, the `$`-command
//! dispatch, the position-error watchdog, and report rate limiting.
//!
//! Grounded in `System.cpp`: `execSystemRealtime` (read serial, report
//! position, save steps if idle, detach if idle — the per-tick worklist
//! callers assemble from this module plus [`crate::gcode`] and
//! [`crate::report`]), `systemExecuteCmdstring` (`$`/`$RST=`/`$n=v`
//! dispatch), and `returnError`'s position-error alarm half.

use hangcnc_common::config::{index_for, format_all, ConfigError, MachineSettings, ResetScope};
use hangcnc_common::error::{PauseFlags, StatusCode, SystemState};

/// Parsed form of a `$...` line, mirroring `systemExecuteCmdstring`.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsCommand {
    /// Bare `$` (`body` empty) — prints `$`-command help text.
    Help,
    /// `$$` (`body == "$"`) — list every setting.
    List,
    /// `$RST=$` / `$RST=#` / `$RST=*`.
    Reset(ResetScope),
    /// `$n=v`.
    Write(u8, f32),
    /// `$n` — read back one field.
    Read(u8),
}

pub fn parse_settings_command(body: &str) -> Result<SettingsCommand, StatusCode> {
    if body.is_empty() {
        return Ok(SettingsCommand::Help);
    }
    if body == "$" {
        return Ok(SettingsCommand::List);
    }
    if let Some(scope) = body.strip_prefix("RST=") {
        return Ok(SettingsCommand::Reset(match scope {
            "$" => ResetScope::Settings,
            "#" => ResetScope::Machine,
            "*" => ResetScope::All,
            _ => return Err(StatusCode::InvalidStatement),
        }));
    }
    if let Some((idx, val)) = body.split_once('=') {
        let idx: u8 = idx.parse().map_err(|_| StatusCode::BadNumberFormat)?;
        let val: f32 = val.parse().map_err(|_| StatusCode::BadNumberFormat)?;
        return Ok(SettingsCommand::Write(idx, val));
    }
    let idx: u8 = body.parse().map_err(|_| StatusCode::BadNumberFormat)?;
    Ok(SettingsCommand::Read(idx))
}

/// Applies a parsed settings command, clearing `OLD_SETTINGS` when the
/// written index is one of `MachineSettings::unlocks_old_settings`'s keys
/// — mirrors `settingsStoreGlobalSetting`'s unlock side effect.
pub fn apply_settings_command(
    settings: &mut MachineSettings,
    cmd: SettingsCommand,
    state: &mut SystemState,
) -> Result<Option<String>, ConfigError> {
    match cmd {
        SettingsCommand::Help => Ok(Some(crate::report::HELP_TEXT.to_string())),
        SettingsCommand::List => Ok(Some(format_all(settings))),
        SettingsCommand::Reset(scope) => {
            settings.reset(scope);
            state.remove(SystemState::OLD_SETTINGS);
            Ok(None)
        }
        SettingsCommand::Write(idx, val) => {
            let field = index_for(idx)?;
            (field.set)(settings, val);
            if MachineSettings::unlocks_old_settings(idx) {
                state.remove(SystemState::OLD_SETTINGS);
            }
            Ok(None)
        }
        SettingsCommand::Read(idx) => {
            let field = index_for(idx)?;
            Ok(Some(format!("${}={}", idx, (field.get)(settings))))
        }
    }
}

/// The four run states reported in the status line, mirroring the
/// `Stop`/`Pause`/`Idle` (plus an implicit running state) strings
/// `returnPoz` emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stop,
    Pause,
    Idle,
    Cycle,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Stop => "Stop",
            RunState::Pause => "Pause",
            RunState::Idle => "Idle",
            RunState::Cycle => "Cycle",
        }
    }
}

/// Run-state and pause/stop bookkeeping carried across ticks.
pub struct Supervisor {
    pub state: SystemState,
    pub pause: PauseFlags,
    pub stop: bool,
    last_report_ms: u64,
}

impl Default for Supervisor {
    fn default() -> Self {
        Supervisor {
            state: SystemState::default(),
            pause: PauseFlags::default(),
            stop: false,
            last_report_ms: 0,
        }
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_state(&self) -> RunState {
        if self.stop {
            RunState::Stop
        } else if !self.pause.is_empty() {
            RunState::Pause
        } else if self.state.contains(SystemState::CYCLE) {
            RunState::Cycle
        } else {
            RunState::Idle
        }
    }

    /// `!` — immediate stop, mirroring `readSerialCommands`'s quick-command
    /// handling.
    pub fn request_stop(&mut self) {
        self.stop = true;
        self.pause.remove(PauseFlags::USER_PAUSE);
    }

    /// `~` — clears a user pause, mirroring the other quick command.
    pub fn clear_user_pause(&mut self) {
        self.pause.remove(PauseFlags::USER_PAUSE);
    }

    pub fn reset(&mut self) {
        self.stop = false;
        self.pause = PauseFlags::empty();
        self.state = SystemState::default();
    }

    /// Position-error watchdog: raises `ALARM_POSITION_LIMIT_ERROR` and
    /// latches `stop` once either chain's error exceeds `limit_mm`, unless
    /// already stopped or `POS_ERR_IGNORE` is set (self-test/calibration
    /// moves set this). Mirrors the alarm half of `returnError`.
    pub fn check_position_error(
        &mut self,
        left_error_mm: f64,
        right_error_mm: f64,
        limit_mm: f64,
    ) -> Option<StatusCode> {
        if self.stop || self.state.contains(SystemState::POS_ERR_IGNORE) {
            return None;
        }
        if left_error_mm.abs() > limit_mm || right_error_mm.abs() > limit_mm {
            self.stop = true;
            self.state.insert(SystemState::ALARM);
            Some(StatusCode::AlarmPositionLimitError)
        } else {
            None
        }
    }

    /// Rate-limits status reports, mirroring `returnPoz`'s
    /// `lastRan`/`POSITIONTIMEOUT` check. Advances the internal clock as a
    /// side effect when it returns `true`.
    pub fn report_due(&mut self, now_ms: u64, min_spacing_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_report_ms) >= min_spacing_ms {
            self.last_report_ms = now_ms;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_reset_write_and_read() {
        assert_eq!(parse_settings_command("").unwrap(), SettingsCommand::Help);
        assert_eq!(parse_settings_command("$").unwrap(), SettingsCommand::List);
        assert_eq!(
            parse_settings_command("RST=$").unwrap(),
            SettingsCommand::Reset(ResetScope::Settings)
        );
        assert_eq!(parse_settings_command("12=1").unwrap(), SettingsCommand::Write(12, 1.0));
        assert_eq!(parse_settings_command("12").unwrap(), SettingsCommand::Read(12));
    }

    #[test]
    fn write_unlocks_old_settings_for_listed_keys() {
        let mut settings = MachineSettings::default();
        let mut state = SystemState::default() | SystemState::OLD_SETTINGS;
        apply_settings_command(&mut settings, SettingsCommand::Write(12, 1.0), &mut state).unwrap();
        assert!(!state.contains(SystemState::OLD_SETTINGS));
    }

    #[test]
    fn write_to_non_unlock_key_leaves_old_settings_set() {
        let mut settings = MachineSettings::default();
        let mut state = SystemState::default() | SystemState::OLD_SETTINGS;
        apply_settings_command(&mut settings, SettingsCommand::Write(0, 100.0), &mut state).unwrap();
        assert!(state.contains(SystemState::OLD_SETTINGS));
        assert_eq!(settings.machine_width, 100.0);
    }

    #[test]
    fn position_error_over_limit_stops_and_alarms() {
        let mut sup = Supervisor::new();
        let code = sup.check_position_error(25.0, 0.0, 20.0);
        assert_eq!(code, Some(StatusCode::AlarmPositionLimitError));
        assert!(sup.stop);
        assert_eq!(sup.run_state(), RunState::Stop);
    }

    #[test]
    fn position_error_ignored_when_flag_set() {
        let mut sup = Supervisor::new();
        sup.state.insert(SystemState::POS_ERR_IGNORE);
        assert_eq!(sup.check_position_error(999.0, 0.0, 20.0), None);
        assert!(!sup.stop);
    }

    #[test]
    fn report_due_rate_limits() {
        let mut sup = Supervisor::new();
        assert!(sup.report_due(0, 200));
        assert!(!sup.report_due(150, 200));
        assert!(sup.report_due(200, 200));
    }

    #[test]
    fn stop_then_clear_returns_to_idle() {
        let mut sup = Supervisor::new();
        sup.request_stop();
        assert_eq!(sup.run_state(), RunState::Stop);
        sup.reset();
        assert_eq!(sup.run_state(), RunState::Idle);
    }
}
