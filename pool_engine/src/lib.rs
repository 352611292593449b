//! # Pool Engine
//!
//! Coordinated multi-axis operation engine of the device pool.
//!
//! A motion or acquisition may span several elements hosted by several
//! controllers. The engine starts them together through the controller
//! life-cycle calls, polls them to completion on a worker thread, rolls back
//! cleanly when a start fails, and publishes element events to listeners.
//!
//! # Module Structure
//!
//! - [`pool`] - `Pool` facade: registration, move, acquire, abort
//! - [`dispatch`] - Request resolution and the start sequence
//! - [`poll`] - Polling state machine and completion events
//! - [`recovery`] - Rollback of a failed start
//! - [`motion`] / [`acquisition`] - Operation specializations
//! - [`worker`] - Operation threads and handles
//! - [`lockset`] - Ordered lock sets over controllers and elements
//! - [`outbox`] - Event queue and notification sinks
//! - [`registry`] - Element and controller registries
//! - [`driver_registry`] / [`drivers`] - Controller classes
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  caller ──► Pool ──► Worker thread (one per operation)           │
//! │                        │                                         │
//! │                        ▼                                         │
//! │              ┌───────────────────┐     ┌──────────────────────┐  │
//! │              │ OperationDispatcher│◄───►│ Element / Controller │  │
//! │              │ (start sequence)   │     │ registries           │  │
//! │              └─────────┬─────────┘     └──────────────────────┘  │
//! │                        ▼                                         │
//! │              ┌───────────────────┐     ┌──────────────────────┐  │
//! │              │ PollingStateMachine│───►│ Outbox ──► sinks     │  │
//! │              └─────────┬─────────┘     └──────────────────────┘  │
//! │                        ▼                                         │
//! │                 Controller (trait object, behind its own lock)   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod acquisition;
pub mod controller;
pub mod dispatch;
pub mod driver_registry;
pub mod drivers;
pub mod element;
pub mod error;
pub mod hooks;
pub mod lockset;
pub mod motion;
pub mod operation;
pub mod outbox;
pub mod poll;
pub mod pool;
pub mod recovery;
pub mod registry;
pub mod worker;

pub use crate::acquisition::{AcquisitionMode, AcquisitionRequest};
pub use crate::driver_registry::DriverRegistry;
pub use crate::error::EngineError;
pub use crate::outbox::{EventLog, NotificationSink};
pub use crate::poll::{OperationOutcome, ProxyError, StateProxy};
pub use crate::pool::Pool;
pub use crate::worker::OperationHandle;
