//! Pool Common Library
//!
//! This crate provides the types shared by every device pool crate: element
//! identities and lifecycle states, the controller plugin interface, the
//! notification events produced by running operations, and TOML configuration
//! loading.
//!
//! # Module Structure
//!
//! - [`element`] - Element/controller identifiers, kinds and lifecycle states
//! - [`controller`] - `Controller` plugin trait, capabilities and errors
//! - [`event`] - Notification events queued by operations
//! - [`config`] - Configuration loading traits and pool configuration
//! - [`consts`] - Engine defaults
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use pool_common::prelude::*;
//!
//! let state = ElementState::InProgress;
//! assert!(state.is_in_progress());
//! ```

pub mod config;
pub mod consts;
pub mod controller;
pub mod element;
pub mod event;
pub mod prelude;
