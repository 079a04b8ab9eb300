//! Machine settings: the `$`-indexed struct, its TOML persistence, and the
//! version/valid-magic scheme that replaces the source's raw EEPROM layout.
//!
//! Grounded in `Settings.h`/`Settings.cpp`: same field set, same
//! `SETTINGSVERSION`/`EEPROMVALIDDATA` constants, same `$RST=` semantics.
//! Unlike the source, fields are named Rust-style and persisted as TOML
//! rather than a packed byte struct; the versioning *scheme* is preserved
//! as explicit struct fields rather than byte offsets, per SPEC_FULL.md.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current settings schema version. Bumping this invalidates any
/// on-disk file with a different value, mirroring `SETTINGSVERSION`.
pub const SETTINGS_VERSION: u8 = 5;

/// Magic byte confirming a settings file was written by this software,
/// mirroring `EEPROMVALIDDATA`.
pub const SETTINGS_VALID_MAGIC: u8 = 56;

/// Spindle/laser automation style, mirroring `SpindleAutomationType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpindleAutomationType {
    None,
    Servo,
    RelayActiveHigh,
    RelayActiveLow,
}

impl Default for SpindleAutomationType {
    fn default() -> Self {
        SpindleAutomationType::None
    }
}

/// Which kinematics model the machine uses, mirroring `kinematicsType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KinematicsType {
    Triangular,
    Quadrilateral,
}

impl Default for KinematicsType {
    fn default() -> Self {
        KinematicsType::Quadrilateral
    }
}

/// Reset scope for `$RST=`, mirroring `SETTINGS_RESTORE_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    /// `$RST=$` — tuning/settings only.
    Settings,
    /// `$RST=#` — machine geometry (maslow-specific).
    Machine,
    /// `$RST=*` — everything, including calibration data.
    All,
}

/// One PID gain set as carried in settings (position or velocity loop,
/// main or Z axis).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainSet {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub prop_weight: f32,
}

impl Default for GainSet {
    fn default() -> Self {
        GainSet { kp: 0.0, ki: 0.0, kd: 0.0, prop_weight: 1.0 }
    }
}

/// The full machine settings struct, field-for-field with `settings_t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineSettings {
    pub settings_version: u8,
    pub eeprom_valid_data: u8,

    pub machine_width: f32,
    pub machine_height: f32,
    pub dist_between_motors: f32,
    pub motor_offset_y: f32,
    pub sled_width: f32,
    pub sled_height: f32,
    pub sled_cg: f32,
    pub kinematics_type: KinematicsType,
    pub rotation_disk_radius: f32,
    pub axis_detach_time_ms: u32,
    pub chain_length: u32,
    pub original_chain_length: u32,
    pub encoder_steps: f32,
    pub dist_per_rot: f32,
    pub max_feed: u32,
    pub z_axis_attached: bool,
    pub spindle_automate_type: SpindleAutomationType,
    pub max_z_rpm: f32,
    pub z_dist_per_rot: f32,
    pub z_encoder_steps: f32,

    pub position_gains: GainSet,
    pub velocity_gains: GainSet,
    pub z_position_gains: GainSet,
    pub z_velocity_gains: GainSet,

    pub chain_sag_correction: f32,
    pub chain_over_sprocket: u8,
    pub f_pwm: u8,
    pub left_chain_tolerance: f32,
    pub right_chain_tolerance: f32,
    pub position_error_limit: f32,
}

impl Default for MachineSettings {
    fn default() -> Self {
        MachineSettings {
            settings_version: SETTINGS_VERSION,
            eeprom_valid_data: SETTINGS_VALID_MAGIC,
            machine_width: 2438.4,
            machine_height: 1219.2,
            dist_between_motors: 2978.4,
            motor_offset_y: 463.0,
            sled_width: 310.0,
            sled_height: 139.0,
            sled_cg: 79.0,
            kinematics_type: KinematicsType::Quadrilateral,
            rotation_disk_radius: 0.0,
            axis_detach_time_ms: 5000,
            chain_length: 1650,
            original_chain_length: 1650,
            encoder_steps: 8113.73,
            dist_per_rot: 63.5,
            max_feed: 600,
            z_axis_attached: false,
            spindle_automate_type: SpindleAutomationType::None,
            max_z_rpm: 12.0,
            z_dist_per_rot: 3.17,
            z_encoder_steps: 8113.73,
            position_gains: GainSet { kp: 5.0, ki: 0.0, kd: 0.0, prop_weight: 1.0 },
            velocity_gains: GainSet { kp: 0.1, ki: 0.0, kd: 0.0, prop_weight: 1.0 },
            z_position_gains: GainSet { kp: 5.0, ki: 0.0, kd: 0.0, prop_weight: 1.0 },
            z_velocity_gains: GainSet { kp: 0.1, ki: 0.0, kd: 0.0, prop_weight: 1.0 },
            chain_sag_correction: 0.0,
            chain_over_sprocket: 1,
            f_pwm: 0,
            left_chain_tolerance: 0.0,
            right_chain_tolerance: 0.0,
            position_error_limit: 20.0,
        }
    }
}

/// `$`-index keys whose rewrite clears `STATUS_OLD_SETTINGS` lockout, per
/// `Settings.cpp`'s `settingsStoreGlobalSetting`: Z-attach flag, spindle
/// automation type, chain length, original chain length.
pub const OLD_SETTINGS_UNLOCK_KEYS: [u8; 4] = [12, 13, 19, 20];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write settings file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize settings TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("unknown settings index ${0}")]
    UnknownIndex(u8),
    #[error("settings file failed validation: {0}")]
    Invalid(String),
}

/// One entry of the `$`-index table: a human name plus accessor closures,
/// so `$$` and `$n=v` are table-driven rather than an if-chain.
pub struct SettingField {
    pub index: u8,
    pub name: &'static str,
    pub get: fn(&MachineSettings) -> f32,
    pub set: fn(&mut MachineSettings, f32),
}

macro_rules! field {
    ($idx:expr, $name:expr, $get:expr, $set:expr) => {
        SettingField { index: $idx, name: $name, get: $get, set: $set }
    };
}

/// Builds the full `$0`..`$42` index table described in spec §6.
pub fn settings_table() -> Vec<SettingField> {
    vec![
        field!(0, "machineWidth", |s| s.machine_width, |s, v| s.machine_width = v),
        field!(1, "machineHeight", |s| s.machine_height, |s, v| s.machine_height = v),
        field!(2, "distBetweenMotors", |s| s.dist_between_motors, |s, v| s.dist_between_motors = v),
        field!(3, "motorOffsetY", |s| s.motor_offset_y, |s, v| s.motor_offset_y = v),
        field!(4, "sledWidth", |s| s.sled_width, |s, v| s.sled_width = v),
        field!(5, "sledHeight", |s| s.sled_height, |s, v| s.sled_height = v),
        field!(6, "sledCG", |s| s.sled_cg, |s, v| s.sled_cg = v),
        field!(
            7,
            "kinematicsType",
            |s| matches!(s.kinematics_type, KinematicsType::Quadrilateral) as u8 as f32,
            |s, v| {
                s.kinematics_type = if v == 0.0 {
                    KinematicsType::Triangular
                } else {
                    KinematicsType::Quadrilateral
                }
            }
        ),
        field!(8, "rotationDiskRadius", |s| s.rotation_disk_radius, |s, v| s.rotation_disk_radius = v),
        field!(9, "axisDetachTime", |s| s.axis_detach_time_ms as f32, |s, v| s.axis_detach_time_ms = v as u32),
        field!(10, "chainLength", |s| s.chain_length as f32, |s, v| s.chain_length = v as u32),
        field!(11, "originalChainLength", |s| s.original_chain_length as f32, |s, v| s.original_chain_length = v as u32),
        field!(12, "zAxisAttached", |s| s.z_axis_attached as u8 as f32, |s, v| s.z_axis_attached = v != 0.0),
        field!(
            13,
            "spindleAutomateType",
            |s| s.spindle_automate_type as i32 as f32,
            |s, v| {
                s.spindle_automate_type = match v as i32 {
                    1 => SpindleAutomationType::Servo,
                    2 => SpindleAutomationType::RelayActiveHigh,
                    3 => SpindleAutomationType::RelayActiveLow,
                    _ => SpindleAutomationType::None,
                }
            }
        ),
        field!(14, "encoderSteps", |s| s.encoder_steps, |s, v| s.encoder_steps = v),
        field!(15, "distPerRot", |s| s.dist_per_rot, |s, v| s.dist_per_rot = v),
        field!(16, "maxFeed", |s| s.max_feed as f32, |s, v| s.max_feed = v as u32),
        field!(17, "maxZRPM", |s| s.max_z_rpm, |s, v| s.max_z_rpm = v),
        field!(18, "zDistPerRot", |s| s.z_dist_per_rot, |s, v| s.z_dist_per_rot = v),
        field!(19, "zEncoderSteps", |s| s.z_encoder_steps, |s, v| s.z_encoder_steps = v),
        field!(20, "KpPos", |s| s.position_gains.kp, |s, v| s.position_gains.kp = v),
        field!(21, "KiPos", |s| s.position_gains.ki, |s, v| s.position_gains.ki = v),
        field!(22, "KdPos", |s| s.position_gains.kd, |s, v| s.position_gains.kd = v),
        field!(23, "propWeightPos", |s| s.position_gains.prop_weight, |s, v| s.position_gains.prop_weight = v),
        field!(24, "KpV", |s| s.velocity_gains.kp, |s, v| s.velocity_gains.kp = v),
        field!(25, "KiV", |s| s.velocity_gains.ki, |s, v| s.velocity_gains.ki = v),
        field!(26, "KdV", |s| s.velocity_gains.kd, |s, v| s.velocity_gains.kd = v),
        field!(27, "propWeightV", |s| s.velocity_gains.prop_weight, |s, v| s.velocity_gains.prop_weight = v),
        field!(28, "zKpPos", |s| s.z_position_gains.kp, |s, v| s.z_position_gains.kp = v),
        field!(29, "zKiPos", |s| s.z_position_gains.ki, |s, v| s.z_position_gains.ki = v),
        field!(30, "zKdPos", |s| s.z_position_gains.kd, |s, v| s.z_position_gains.kd = v),
        field!(31, "zPropWeightPos", |s| s.z_position_gains.prop_weight, |s, v| s.z_position_gains.prop_weight = v),
        field!(32, "zKpV", |s| s.z_velocity_gains.kp, |s, v| s.z_velocity_gains.kp = v),
        field!(33, "zKiV", |s| s.z_velocity_gains.ki, |s, v| s.z_velocity_gains.ki = v),
        field!(34, "zKdV", |s| s.z_velocity_gains.kd, |s, v| s.z_velocity_gains.kd = v),
        field!(35, "zPropWeightV", |s| s.z_velocity_gains.prop_weight, |s, v| s.z_velocity_gains.prop_weight = v),
        field!(36, "chainSagCorrection", |s| s.chain_sag_correction, |s, v| s.chain_sag_correction = v),
        field!(37, "chainOverSprocket", |s| s.chain_over_sprocket as f32, |s, v| s.chain_over_sprocket = v as u8),
        field!(38, "fPWM", |s| s.f_pwm as f32, |s, v| s.f_pwm = v as u8),
        field!(39, "leftChainTolerance", |s| s.left_chain_tolerance, |s, v| s.left_chain_tolerance = v),
        field!(40, "rightChainTolerance", |s| s.right_chain_tolerance, |s, v| s.right_chain_tolerance = v),
        field!(41, "positionErrorLimit", |s| s.position_error_limit, |s, v| s.position_error_limit = v),
    ]
}

/// Looks up a `$`-index entry, as used by `$n=v` and `$n` read-back.
pub fn index_for(n: u8) -> Result<SettingField, ConfigError> {
    settings_table()
        .into_iter()
        .find(|f| f.index == n)
        .ok_or(ConfigError::UnknownIndex(n))
}

/// Renders the `$$` listing: one `$<n>=<value>` line per indexed field.
pub fn format_all(settings: &MachineSettings) -> String {
    settings_table()
        .iter()
        .map(|f| format!("${}={}", f.index, (f.get)(settings)))
        .collect::<Vec<_>>()
        .join("\n")
}

impl MachineSettings {
    /// Loads settings from a TOML file, validating the version/magic and
    /// falling back to defaults (with `STATUS_SETTING_READ_FAIL` semantics
    /// left to the caller) on any read error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let settings: MachineSettings = toml::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// True when this settings file predates the current schema — the
    /// `STATUS_OLD_SETTINGS` condition, which locks the machine to
    /// settings-only mode until the unlock keys are rewritten.
    pub fn is_old(&self) -> bool {
        self.settings_version != SETTINGS_VERSION || self.eeprom_valid_data != SETTINGS_VALID_MAGIC
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.machine_width <= 0.0 || self.machine_height <= 0.0 {
            return Err(ConfigError::Invalid("machine dimensions must be positive".into()));
        }
        if self.encoder_steps <= 0.0 || self.dist_per_rot <= 0.0 {
            return Err(ConfigError::Invalid("encoder/distPerRot must be positive".into()));
        }
        Ok(())
    }

    /// Applies a reset scope, mirroring `settingsWipe`/`settingsReset`.
    pub fn reset(&mut self, scope: ResetScope) {
        match scope {
            ResetScope::Settings => {
                let chain = self.chain_length;
                let orig = self.original_chain_length;
                *self = MachineSettings::default();
                self.chain_length = chain;
                self.original_chain_length = orig;
            }
            ResetScope::Machine | ResetScope::All => {
                *self = MachineSettings::default();
            }
        }
        self.settings_version = SETTINGS_VERSION;
        self.eeprom_valid_data = SETTINGS_VALID_MAGIC;
    }

    /// Whether writing `$<key>=` unlocks an old-settings lockout, per
    /// `Settings.cpp`.
    pub fn unlocks_old_settings(key: u8) -> bool {
        OLD_SETTINGS_UNLOCK_KEYS.contains(&key)
    }
}

/// Persisted step-counter snapshot, mirroring `settingsStepsV1_t`: the
/// signed encoder counts for all three axes plus a valid-data byte.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub left_steps: i64,
    pub right_steps: i64,
    pub z_steps: i64,
    pub eeprom_valid_data: u8,
}

impl StepSnapshot {
    pub fn new(left: i64, right: i64, z: i64) -> Self {
        StepSnapshot { left_steps: left, right_steps: right, z_steps: z, eeprom_valid_data: SETTINGS_VALID_MAGIC }
    }

    pub fn is_valid(&self) -> bool {
        self.eeprom_valid_data == SETTINGS_VALID_MAGIC
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_settings_pass_validation() {
        let s = MachineSettings::default();
        assert!(s.validate().is_ok());
        assert!(!s.is_old());
    }

    #[test]
    fn round_trip_through_toml() {
        let file = NamedTempFile::new().unwrap();
        let mut s = MachineSettings::default();
        s.machine_width = 3000.0;
        s.save(file.path()).unwrap();
        let loaded = MachineSettings::load(file.path()).unwrap();
        assert_eq!(loaded.machine_width, 3000.0);
    }

    #[test]
    fn old_version_is_flagged() {
        let mut s = MachineSettings::default();
        s.settings_version = 1;
        assert!(s.is_old());
    }

    #[test]
    fn setting_index_round_trips() {
        let mut s = MachineSettings::default();
        let f = index_for(0).unwrap();
        (f.set)(&mut s, 1234.5);
        assert_eq!((f.get)(&s), 1234.5);
        assert_eq!(s.machine_width, 1234.5);
    }

    #[test]
    fn unknown_index_errors() {
        assert!(index_for(200).is_err());
    }

    #[test]
    fn format_all_lists_every_index() {
        let s = MachineSettings::default();
        let text = format_all(&s);
        assert_eq!(text.lines().count(), 42);
        assert!(text.starts_with("$0="));
    }

    #[test]
    fn reset_settings_preserves_calibration() {
        let mut s = MachineSettings::default();
        s.chain_length = 1700;
        s.machine_width = 1.0;
        s.reset(ResetScope::Settings);
        assert_eq!(s.chain_length, 1700);
        assert_ne!(s.machine_width, 1.0);
    }

    #[test]
    fn reset_all_clears_calibration() {
        let mut s = MachineSettings::default();
        s.chain_length = 1700;
        s.reset(ResetScope::All);
        assert_eq!(s.chain_length, MachineSettings::default().chain_length);
    }

    #[test]
    fn unlock_keys_match_spec() {
        assert!(MachineSettings::unlocks_old_settings(12));
        assert!(MachineSettings::unlocks_old_settings(13));
        assert!(MachineSettings::unlocks_old_settings(19));
        assert!(MachineSettings::unlocks_old_settings(20));
        assert!(!MachineSettings::unlocks_old_settings(0));
    }

    #[test]
    fn step_snapshot_round_trips() {
        let file = NamedTempFile::new().unwrap();
        let snap = StepSnapshot::new(100, -200, 0);
        snap.save(file.path()).unwrap();
        let loaded = StepSnapshot::load(file.path()).unwrap();
        assert_eq!(loaded, snap);
        assert!(loaded.is_valid());
    }
}
