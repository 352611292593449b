//! Runtime controller wrapper and plugin call helpers.
//!
//! `PoolController` owns one plugin instance behind its own mutex. Every
//! life-cycle call goes through [`guarded`], which turns a panicking plugin
//! into a classified failure instead of tearing down the worker.

use crate::error::FailureCause;
use parking_lot::{Mutex, MutexGuard};
use pool_common::controller::{Controller, CtrlCapabilities, CtrlError, StateInfo};
use pool_common::element::{Axis, ControllerId};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Exclusive access to a controller plugin.
pub type ControllerGuard<'a> = MutexGuard<'a, Box<dyn Controller>>;

/// A registered controller instance.
pub struct PoolController {
    id: ControllerId,
    name: String,
    class: String,
    capabilities: CtrlCapabilities,
    plugin: Mutex<Box<dyn Controller>>,
}

impl PoolController {
    /// Wrap a plugin. Capabilities are queried once, here.
    pub fn new(id: ControllerId, class: &str, plugin: Box<dyn Controller>) -> Self {
        let capabilities = plugin.capabilities();
        let name = plugin.name().to_string();
        Self {
            id,
            name,
            class: class.to_string(),
            capabilities,
            plugin: Mutex::new(plugin),
        }
    }

    /// Pool-wide id.
    pub fn id(&self) -> ControllerId {
        self.id
    }

    /// Name reported by the plugin.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class the plugin was created from.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Capabilities queried when the plugin was registered.
    pub fn capabilities(&self) -> CtrlCapabilities {
        self.capabilities
    }

    /// Block until the controller lock is acquired.
    pub fn lock(&self) -> ControllerGuard<'_> {
        self.plugin.lock()
    }

    /// True while some thread holds the controller lock.
    pub fn is_locked(&self) -> bool {
        self.plugin.is_locked()
    }
}

impl std::fmt::Debug for PoolController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolController")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("class", &self.class)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Run one plugin call.
///
/// A plugin error maps to `FailureCause::Controller`, a panic to
/// `FailureCause::Unexpected`.
pub fn guarded<T>(call: impl FnOnce() -> Result<T, CtrlError>) -> Result<T, FailureCause> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(FailureCause::Controller(e)),
        Err(payload) => Err(FailureCause::Unexpected(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Read the state of `axes` with the full PreStateAll .. StateOne sequence.
///
/// Failures are reported per axis as text; a failing `*_all` call fails
/// every axis of the controller.
pub fn read_states(ctrl: &mut dyn Controller, axes: &[Axis]) -> Vec<Result<StateInfo, String>> {
    if let Err(e) = guarded(|| ctrl.pre_state_all()) {
        return vec![Err(format!("PreStateAll: {e}")); axes.len()];
    }
    let mut failed: Vec<Option<String>> = vec![None; axes.len()];
    for (slot, &axis) in failed.iter_mut().zip(axes) {
        if let Err(e) = guarded(|| ctrl.pre_state_one(axis)) {
            *slot = Some(format!("PreStateOne: {e}"));
        }
    }
    if let Err(e) = guarded(|| ctrl.state_all()) {
        return vec![Err(format!("StateAll: {e}")); axes.len()];
    }
    axes.iter()
        .zip(failed)
        .map(|(&axis, failure)| match failure {
            Some(msg) => Err(msg),
            None => guarded(|| ctrl.state_one(axis)).map_err(|e| format!("StateOne: {e}")),
        })
        .collect()
}

/// Read the raw value of `axes` with the full PreReadAll .. ReadOne sequence.
pub fn read_values(ctrl: &mut dyn Controller, axes: &[Axis]) -> Vec<Result<f64, String>> {
    if let Err(e) = guarded(|| ctrl.pre_read_all()) {
        return vec![Err(format!("PreReadAll: {e}")); axes.len()];
    }
    let mut failed: Vec<Option<String>> = vec![None; axes.len()];
    for (slot, &axis) in failed.iter_mut().zip(axes) {
        if let Err(e) = guarded(|| ctrl.pre_read_one(axis)) {
            *slot = Some(format!("PreReadOne: {e}"));
        }
    }
    if let Err(e) = guarded(|| ctrl.read_all()) {
        return vec![Err(format!("ReadAll: {e}")); axes.len()];
    }
    axes.iter()
        .zip(failed)
        .map(|(&axis, failure)| match failure {
            Some(msg) => Err(msg),
            None => guarded(|| ctrl.read_one(axis)).map_err(|e| format!("ReadOne: {e}")),
        })
        .collect()
}

// ─── Tests ──────────────────────────────────────────────────────────
