//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files,
//! plus the pool configuration describing controllers, elements and engine
//! timings.
//!
//! # Usage
//!
//! ```rust,no_run
//! use pool_common::config::{ConfigError, PoolConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = PoolConfig::load_validated(Path::new("pool.toml"))?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use crate::consts::*;
use crate::element::{Axis, ControllerId, ElementId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "pool-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_service_name() -> String {
    POOL_SERVICE_NAME.to_string()
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Engine timings ─────────────────────────────────────────────────

fn default_motion_loop_sleep_ms() -> u64 {
    DEFAULT_MOTION_LOOP_SLEEP_MS
}
fn default_motion_loop_states_per_position() -> u32 {
    DEFAULT_MOTION_LOOP_STATES_PER_POSITION
}
fn default_acq_loop_sleep_ms() -> u64 {
    DEFAULT_ACQ_LOOP_SLEEP_MS
}
fn default_acq_loop_states_per_value() -> u32 {
    DEFAULT_ACQ_LOOP_STATES_PER_VALUE
}

/// Polling rates of the operation engine.
///
/// ```toml
/// [engine]
/// motion_loop_sleep_ms = 10
/// motion_loop_states_per_position = 10
/// acq_loop_sleep_ms = 10
/// acq_loop_states_per_value = 10
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_motion_loop_sleep_ms")]
    pub motion_loop_sleep_ms: u64,
    /// A position read happens every N state reads.
    #[serde(default = "default_motion_loop_states_per_position")]
    pub motion_loop_states_per_position: u32,
    #[serde(default = "default_acq_loop_sleep_ms")]
    pub acq_loop_sleep_ms: u64,
    /// A value read happens every N state reads.
    #[serde(default = "default_acq_loop_states_per_value")]
    pub acq_loop_states_per_value: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            motion_loop_sleep_ms: DEFAULT_MOTION_LOOP_SLEEP_MS,
            motion_loop_states_per_position: DEFAULT_MOTION_LOOP_STATES_PER_POSITION,
            acq_loop_sleep_ms: DEFAULT_ACQ_LOOP_SLEEP_MS,
            acq_loop_states_per_value: DEFAULT_ACQ_LOOP_STATES_PER_VALUE,
        }
    }
}

impl EngineConfig {
    pub fn motion_sleep(&self) -> Duration {
        Duration::from_millis(self.motion_loop_sleep_ms)
    }

    pub fn acq_sleep(&self) -> Duration {
        Duration::from_millis(self.acq_loop_sleep_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if a states-per-value ratio is
    /// zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.motion_loop_states_per_position == 0 {
            return Err(ConfigError::ValidationError(
                "motion_loop_states_per_position must be > 0".to_string(),
            ));
        }
        if self.acq_loop_states_per_value == 0 {
            return Err(ConfigError::ValidationError(
                "acq_loop_states_per_value must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── Controllers and elements ───────────────────────────────────────

/// One controller instance.
///
/// ```toml
/// [[controllers]]
/// id = 100
/// name = "motctrl01"
/// class = "SimMotorController"
/// [controllers.properties]
/// velocity = 20.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub id: ControllerId,
    pub name: String,
    /// Registered controller class (driver) name.
    pub class: String,
    /// Class specific properties.
    #[serde(default)]
    pub properties: toml::Table,
}

impl ControllerConfig {
    /// Numeric property, accepting TOML integers and floats.
    pub fn property_f64(&self, key: &str) -> Option<f64> {
        match self.properties.get(key)? {
            toml::Value::Float(v) => Some(*v),
            toml::Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn property_bool(&self, key: &str) -> Option<bool> {
        self.properties.get(key)?.as_bool()
    }
}

fn default_sign() -> i8 {
    1
}
fn default_step_per_unit() -> f64 {
    1.0
}

/// One motor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorConfig {
    pub id: ElementId,
    pub name: String,
    pub controller: ControllerId,
    pub axis: Axis,
    /// Signed backlash in motor steps; `0` disables backlash correction.
    #[serde(default)]
    pub backlash: f64,
    /// `1` or `-1`.
    #[serde(default = "default_sign")]
    pub sign: i8,
    #[serde(default)]
    pub offset: f64,
    #[serde(default = "default_step_per_unit")]
    pub step_per_unit: f64,
    /// Settling time after the hardware reports a stop.
    #[serde(default)]
    pub instability_time_ms: u64,
}

/// One counter/timer channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: ElementId,
    pub name: String,
    pub controller: ControllerId,
    pub axis: Axis,
}

/// A motor group or measurement group.
///
/// The group kind is derived from its members; mixing motors and channels is
/// rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub id: ElementId,
    pub name: String,
    pub members: Vec<ElementId>,
    /// Designated master channel (measurement groups only).
    #[serde(default)]
    pub master: Option<ElementId>,
}

/// Complete pool configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
    #[serde(default)]
    pub motors: Vec<MotorConfig>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

impl PoolConfig {
    /// Load and validate a pool configuration file.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        debug!(
            "Loaded pool config {}: {} controllers, {} motors, {} channels, {} groups",
            path.display(),
            config.controllers.len(),
            config.motors.len(),
            config.channels.len(),
            config.groups.len()
        );
        Ok(config)
    }

    /// Validate cross references and parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.engine.validate()?;

        let mut ctrl_ids = HashSet::new();
        for ctrl in &self.controllers {
            if !ctrl_ids.insert(ctrl.id) {
                return Err(invalid(format!("duplicate controller id {}", ctrl.id)));
            }
        }

        let mut element_ids = HashSet::new();
        let mut axes = HashSet::new();
        for (id, name, ctrl, axis) in self
            .motors
            .iter()
            .map(|m| (m.id, &m.name, m.controller, m.axis))
            .chain(self.channels.iter().map(|c| (c.id, &c.name, c.controller, c.axis)))
        {
            if !element_ids.insert(id) {
                return Err(invalid(format!("duplicate element id {id}")));
            }
            if !ctrl_ids.contains(&ctrl) {
                return Err(invalid(format!(
                    "element '{name}' references unknown controller {ctrl}"
                )));
            }
            if !axes.insert((ctrl, axis)) {
                return Err(invalid(format!(
                    "element '{name}': axis {axis} of {ctrl} already used"
                )));
            }
        }

        for motor in &self.motors {
            if motor.sign != 1 && motor.sign != -1 {
                return Err(invalid(format!("motor '{}': sign must be 1 or -1", motor.name)));
            }
            if motor.step_per_unit <= 0.0 || !motor.step_per_unit.is_finite() {
                return Err(invalid(format!(
                    "motor '{}': step_per_unit must be > 0",
                    motor.name
                )));
            }
        }

        let motor_ids: HashSet<_> = self.motors.iter().map(|m| m.id).collect();
        for group in &self.groups {
            if !element_ids.insert(group.id) {
                return Err(invalid(format!("duplicate element id {}", group.id)));
            }
            if group.members.is_empty() {
                return Err(invalid(format!("group '{}' has no members", group.name)));
            }
            let mut seen = HashSet::new();
            for member in &group.members {
                if !seen.insert(*member) {
                    return Err(invalid(format!(
                        "group '{}' lists member {member} twice",
                        group.name
                    )));
                }
            }
            let motors = group.members.iter().filter(|m| motor_ids.contains(m)).count();
            let channels = group
                .members
                .iter()
                .filter(|m| self.channels.iter().any(|c| c.id == **m))
                .count();
            if motors + channels != group.members.len() {
                return Err(invalid(format!(
                    "group '{}' references an unknown member",
                    group.name
                )));
            }
            if motors != 0 && channels != 0 {
                return Err(invalid(format!(
                    "group '{}' mixes motors and channels",
                    group.name
                )));
            }
            if let Some(master) = group.master {
                if motors != 0 {
                    return Err(invalid(format!(
                        "motor group '{}' cannot have a master",
                        group.name
                    )));
                }
                if !group.members.contains(&master) {
                    return Err(invalid(format!(
                        "master {master} is not a member of group '{}'",
                        group.name
                    )));
                }
            }
        }

        Ok(())
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::ValidationError(msg)
}

// ─── Tests ──────────────────────────────────────────────────────────
