//! Common re-exports for convenience.
//!
//! ```rust
//! use pool_common::prelude::*;
//! ```

pub use crate::config::{
    ChannelConfig, ConfigError, ConfigLoader, ControllerConfig, EngineConfig, GroupConfig,
    LogLevel, MotorConfig, PoolConfig, SharedConfig,
};
pub use crate::controller::{
    Controller, ControllerFactory, CtrlCall, CtrlCapabilities, CtrlError, ExtraValue, StateInfo,
};
pub use crate::element::{Axis, ControllerId, ElementId, ElementKind, ElementState, OperationId};
pub use crate::event::{ElementEvent, EventKind};
