//! Controller plugin trait and error types.
//!
//! This module defines:
//! - `Controller` trait - Interface implemented by every hardware controller plugin
//! - `CtrlError` enum - Errors raised by plugins
//! - `CtrlCapabilities` bitflags - Optional behaviour a controller declares once
//! - `CtrlCall` enum - Names of the life-cycle calls, used in error reports
//! - `StateInfo` / `ExtraValue` - Values exchanged with plugins

use crate::element::{Axis, ElementState};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error types raised by controller plugins.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CtrlError {
    /// Communication with the hardware failed
    #[error("Hardware communication error: {0}")]
    Communication(String),

    /// Hardware reported a failure
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Axis was never added to this controller
    #[error("Unknown axis {0}")]
    UnknownAxis(Axis),

    /// Operation or attribute not supported by this controller
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Value rejected by the controller
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

bitflags! {
    /// Optional behaviour declared by a controller.
    ///
    /// Queried once when the controller is registered and cached by the pool.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CtrlCapabilities: u16 {
        /// Drives motors.
        const MOTOR          = 0x0001;
        /// Drives counter/timer channels.
        const COUNTER_TIMER  = 0x0002;
        /// Accepts the PreLoad/Load steps before an acquisition.
        const LOADABLE       = 0x0004;
        /// Applies backlash correction itself.
        const HW_BACKLASH    = 0x0008;
        /// Wants motor targets rounded to a whole number of steps.
        const WANTS_ROUNDING = 0x0010;
    }
}

impl Default for CtrlCapabilities {
    fn default() -> Self {
        Self::empty()
    }
}

/// Life-cycle call names, in the spelling used in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CtrlCall {
    AddDevice,
    DeleteDevice,
    PreLoadAll,
    PreLoadOne,
    LoadOne,
    LoadAll,
    PreStartAll,
    PreStartOne,
    StartOne,
    StartAll,
    PreStateAll,
    PreStateOne,
    StateAll,
    StateOne,
    PreReadAll,
    PreReadOne,
    ReadAll,
    ReadOne,
    AbortOne,
    StopOne,
    GetExtraAttribute,
    SetExtraAttribute,
}

impl CtrlCall {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddDevice => "AddDevice",
            Self::DeleteDevice => "DeleteDevice",
            Self::PreLoadAll => "PreLoadAll",
            Self::PreLoadOne => "PreLoadOne",
            Self::LoadOne => "LoadOne",
            Self::LoadAll => "LoadAll",
            Self::PreStartAll => "PreStartAll",
            Self::PreStartOne => "PreStartOne",
            Self::StartOne => "StartOne",
            Self::StartAll => "StartAll",
            Self::PreStateAll => "PreStateAll",
            Self::PreStateOne => "PreStateOne",
            Self::StateAll => "StateAll",
            Self::StateOne => "StateOne",
            Self::PreReadAll => "PreReadAll",
            Self::PreReadOne => "PreReadOne",
            Self::ReadAll => "ReadAll",
            Self::ReadOne => "ReadOne",
            Self::AbortOne => "AbortOne",
            Self::StopOne => "StopOne",
            Self::GetExtraAttribute => "GetExtraAttribute",
            Self::SetExtraAttribute => "SetExtraAttribute",
        }
    }
}

impl fmt::Display for CtrlCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State reported by `Controller::state_one`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateInfo {
    pub state: ElementState,
    /// Free text status, empty when the controller has nothing to add.
    pub status: String,
}

impl StateInfo {
    pub fn new(state: ElementState) -> Self {
        Self {
            state,
            status: String::new(),
        }
    }

    pub fn with_status(state: ElementState, status: impl Into<String>) -> Self {
        Self {
            state,
            status: status.into(),
        }
    }
}

/// Value of a controller specific ("extra") attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

impl ExtraValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ExtraValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

/// Trait implemented by hardware controller plugins.
///
/// A controller drives one or more axes. The pool wraps every controller in
/// its own lock; all methods are called by the lock holder only, so
/// implementations never need internal synchronisation.
///
/// # Start sequence
///
/// For one operation the engine issues, with the controller locked:
///
/// 1. `pre_load_all` / `pre_load_one` / `load_one` / `load_all` (acquisitions on
///    `LOADABLE` controllers, master channel only)
/// 2. `pre_start_all`
/// 3. `pre_start_one` + `start_one` for each involved axis
/// 4. `start_all`
///
/// # Polling
///
/// `pre_state_all`, `pre_state_one` (per axis), `state_all`, `state_one`
/// (per axis), and likewise `pre_read_all` .. `read_one` for values.
///
/// Every hook with a default implementation is optional.
pub trait Controller: Send {
    /// Returns the controller instance name.
    fn name(&self) -> &str;

    /// Optional behaviour of this controller. Queried once at registration.
    fn capabilities(&self) -> CtrlCapabilities {
        CtrlCapabilities::empty()
    }

    /// Register an axis with the controller.
    fn add_device(&mut self, axis: Axis) -> Result<(), CtrlError>;

    /// Forget an axis.
    fn delete_device(&mut self, axis: Axis) -> Result<(), CtrlError>;

    fn pre_load_all(&mut self) -> Result<(), CtrlError> {
        Ok(())
    }

    /// Returns `false` to refuse the load value.
    fn pre_load_one(&mut self, _axis: Axis, _value: f64) -> Result<bool, CtrlError> {
        Ok(true)
    }

    fn load_one(&mut self, _axis: Axis, _value: f64) -> Result<(), CtrlError> {
        Ok(())
    }

    fn load_all(&mut self) -> Result<(), CtrlError> {
        Ok(())
    }

    fn pre_start_all(&mut self) -> Result<(), CtrlError> {
        Ok(())
    }

    /// Returns `false` to refuse starting `axis` towards `target`.
    fn pre_start_one(&mut self, _axis: Axis, _target: f64) -> Result<bool, CtrlError> {
        Ok(true)
    }

    /// Start (or arm) one axis.
    fn start_one(&mut self, axis: Axis, target: f64) -> Result<(), CtrlError>;

    fn start_all(&mut self) -> Result<(), CtrlError> {
        Ok(())
    }

    fn pre_state_all(&mut self) -> Result<(), CtrlError> {
        Ok(())
    }

    fn pre_state_one(&mut self, _axis: Axis) -> Result<(), CtrlError> {
        Ok(())
    }

    fn state_all(&mut self) -> Result<(), CtrlError> {
        Ok(())
    }

    /// Current state of one axis.
    fn state_one(&mut self, axis: Axis) -> Result<StateInfo, CtrlError>;

    fn pre_read_all(&mut self) -> Result<(), CtrlError> {
        Ok(())
    }

    fn pre_read_one(&mut self, _axis: Axis) -> Result<(), CtrlError> {
        Ok(())
    }

    fn read_all(&mut self) -> Result<(), CtrlError> {
        Ok(())
    }

    /// Current raw value of one axis (dial position or counts).
    fn read_one(&mut self, axis: Axis) -> Result<f64, CtrlError>;

    /// Stop one axis as fast as possible.
    fn abort_one(&mut self, axis: Axis) -> Result<(), CtrlError>;

    /// Stop one axis gracefully. Defaults to `abort_one`.
    fn stop_one(&mut self, axis: Axis) -> Result<(), CtrlError> {
        self.abort_one(axis)
    }

    fn get_extra_attribute(&self, _axis: Axis, name: &str) -> Result<ExtraValue, CtrlError> {
        Err(CtrlError::NotSupported(format!("extra attribute '{name}'")))
    }

    fn set_extra_attribute(
        &mut self,
        _axis: Axis,
        name: &str,
        _value: ExtraValue,
    ) -> Result<(), CtrlError> {
        Err(CtrlError::NotSupported(format!("extra attribute '{name}'")))
    }
}

/// Factory function type for creating controller instances.
pub type ControllerFactory =
    fn(&crate::config::ControllerConfig) -> Result<Box<dyn Controller>, CtrlError>;

// ─── Tests ──────────────────────────────────────────────────────────
