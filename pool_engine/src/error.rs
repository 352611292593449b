//! Engine error types.
//!
//! Failures are classified as follows:
//!
//! | Situation                              | Variant                                   |
//! |----------------------------------------|-------------------------------------------|
//! | `pre_start_one`/`pre_load_one` refused | `Lifecycle { cause: Rejected }`           |
//! | Plugin returned an error               | `Lifecycle { cause: Controller(_) }`      |
//! | Plugin panicked                        | `Lifecycle { cause: Unexpected(_) }`      |
//! | Read failure while polling             | recorded on the element, not an error     |
//!
//! Nothing is retried.

use pool_common::config::ConfigError;
use pool_common::controller::{CtrlCall, CtrlError};
use pool_common::element::{ControllerId, ElementId};
use thiserror::Error;

/// Why a life-cycle call failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureCause {
    /// The controller refused the request.
    #[error("controller refused the request")]
    Rejected,

    /// The controller returned an error.
    #[error(transparent)]
    Controller(#[from] CtrlError),

    /// The controller failed in an unclassified way (panic inside the plugin).
    #[error("controller has sent an unknown exception: {0}")]
    Unexpected(String),
}

/// Errors returned by the operation engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A life-cycle call failed while starting an operation.
    ///
    /// `element` is the first element the call failed for.
    #[error("Impossible to start '{element}': {call}() failed: {cause}")]
    Lifecycle {
        /// Call that failed.
        call: CtrlCall,
        /// Name of the element.
        element: String,
        /// Rejection, controller error or panic.
        cause: FailureCause,
    },

    /// Malformed operation request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No element with this id.
    #[error("Unknown element {0}")]
    UnknownElement(ElementId),

    /// No controller with this id.
    #[error("Unknown controller {0}")]
    UnknownController(ControllerId),

    /// Element already driven by another operation.
    #[error("Element '{0}' is already in operation")]
    Busy(String),

    /// Duplicate id or name on registration.
    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    /// External state proxy failed with something other than "unavailable".
    #[error("State proxy error: {0}")]
    Proxy(String),

    /// Direct controller access outside an operation failed.
    #[error("{call}() failed for '{element}': {source}")]
    Controller {
        /// Call that failed.
        call: CtrlCall,
        /// Name of the element.
        element: String,
        /// Error returned by the plugin.
        source: CtrlError,
    },

    /// Invalid pool configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No controller class registered under that name.
    #[error("Controller class not found: {0}")]
    DriverNotFound(String),

    /// The controller factory failed.
    #[error("Failed to create controller of class '{class}': {source}")]
    Driver {
        /// Name of the controller class.
        class: String,
        /// Error returned by the factory.
        source: CtrlError,
    },

    /// The worker thread could not be spawned.
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    /// The worker thread panicked.
    #[error("Operation worker panicked")]
    WorkerPanicked,

    /// The worker ended without signalling dispatch completion.
    #[error("Operation worker exited before dispatch completed")]
    DispatchLost,
}

impl EngineError {
    /// Call name carried by a `Lifecycle` error.
    pub fn failed_call(&self) -> Option<CtrlCall> {
        match self {
            Self::Lifecycle { call, .. } => Some(*call),
            _ => None,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
