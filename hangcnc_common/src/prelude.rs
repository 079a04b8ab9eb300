//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use hangcnc_common::prelude::*;` and get
//! the most important types without listing individual paths.
//!
//! # Usage
//!
//! ```rust
//! use hangcnc_common::prelude::*;
//! ```

// ─── Settings ───────────────────────────────────────────────────────
pub use crate::config::{
    ConfigError, GainSet, KinematicsType, MachineSettings, ResetScope, SettingField,
    SpindleAutomationType, StepSnapshot, SETTINGS_VALID_MAGIC, SETTINGS_VERSION,
};

// ─── Status / state ─────────────────────────────────────────────────
pub use crate::error::{PauseFlags, StatusCode, SystemState};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{AXIS_COUNT, TICK_PERIOD_US};
