//! Element identities, kinds and lifecycle states.
//!
//! All enums use `#[repr(u8)]` so they can be published as compact raw
//! values, and round-trip through `from_u8`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis number of an element inside its owning controller.
pub type Axis = u32;

/// Pool-wide element identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub u32);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pool-wide controller identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControllerId(pub u32);

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctrl#{}", self.0)
    }
}

/// Identifier of one running operation. `0` is reserved for "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

// ─── Kinds ──────────────────────────────────────────────────────────

/// What an element is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ElementKind {
    /// Single motion axis.
    Motor = 0,
    /// Counter or timer channel.
    CounterTimer = 1,
    /// Pseudo element moving several motors together.
    MotorGroup = 2,
    /// Pseudo element acquiring several channels under one master.
    MeasurementGroup = 3,
}

impl ElementKind {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Motor),
            1 => Some(Self::CounterTimer),
            2 => Some(Self::MotorGroup),
            3 => Some(Self::MeasurementGroup),
            _ => None,
        }
    }

    /// True for the pseudo elements aggregating members.
    #[inline]
    pub const fn is_group(self) -> bool {
        matches!(self, Self::MotorGroup | Self::MeasurementGroup)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Motor => "motor",
            Self::CounterTimer => "counter/timer",
            Self::MotorGroup => "motor group",
            Self::MeasurementGroup => "measurement group",
        };
        f.write_str(s)
    }
}

// ─── Lifecycle state ────────────────────────────────────────────────

/// Lifecycle state of an element.
///
/// `InProgress` means an operation is driving the element; every other
/// value is a definitive stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ElementState {
    /// Ready, no operation running ("on").
    Idle = 0,
    /// Moving or acquiring.
    InProgress = 1,
    /// Stopped on a limit or a recoverable condition.
    Alarm = 2,
    /// Hardware or communication fault.
    Fault = 3,
    /// State could not be determined.
    Unknown = 4,
}

impl ElementState {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::InProgress),
            2 => Some(Self::Alarm),
            3 => Some(Self::Fault),
            4 => Some(Self::Unknown),
            _ => None,
        }
    }

    #[inline]
    pub const fn is_in_progress(self) -> bool {
        matches!(self, Self::InProgress)
    }

    /// True for the states reported after an unsuccessful stop.
    #[inline]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::Alarm | Self::Fault | Self::Unknown)
    }

    /// Combine member states into the state of a group without a master.
    ///
    /// Any member in progress keeps the group in progress; otherwise the
    /// most severe stop wins (`Fault` > `Unknown` > `Alarm` > `Idle`).
    pub fn aggregate<I: IntoIterator<Item = ElementState>>(states: I) -> ElementState {
        let mut result = ElementState::Idle;
        for state in states {
            if state.is_in_progress() {
                return ElementState::InProgress;
            }
            if state.severity() > result.severity() {
                result = state;
            }
        }
        result
    }

    const fn severity(self) -> u8 {
        match self {
            Self::Idle | Self::InProgress => 0,
            Self::Alarm => 1,
            Self::Unknown => 2,
            Self::Fault => 3,
        }
    }
}

impl Default for ElementState {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "on",
            Self::InProgress => "moving",
            Self::Alarm => "alarm",
            Self::Fault => "fault",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
