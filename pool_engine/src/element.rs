//! Runtime elements.
//!
//! An `Element` carries the mutable lifecycle data of one motor, channel or
//! group. Three independent pieces of synchronisation live on it:
//!
//! - the operation lock, held by whoever is starting or polling an
//!   operation on the element;
//! - the data mutex, held only for the duration of a field update;
//! - atomics for the abort flag and the id of the driving operation.

use parking_lot::{Mutex, MutexGuard};
use pool_common::config::{ChannelConfig, GroupConfig, MotorConfig};
use pool_common::consts::NO_OPERATION;
use pool_common::controller::CtrlCapabilities;
use pool_common::element::{Axis, ControllerId, ElementId, ElementKind, ElementState, OperationId};
use pool_common::event::ElementEvent;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Conversion and correction parameters of a motor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorParams {
    /// `1.0` or `-1.0`.
    pub sign: f64,
    /// Added to the signed dial position.
    pub offset: f64,
    /// Motor steps per user unit.
    pub step_per_unit: f64,
    /// Signed, in motor steps. `0.0` disables backlash correction.
    pub backlash: f64,
    /// Time the motor stays `InProgress` after the hardware stops.
    pub instability_time: Option<Duration>,
}

impl Default for MotorParams {
    fn default() -> Self {
        Self {
            sign: 1.0,
            offset: 0.0,
            step_per_unit: 1.0,
            backlash: 0.0,
            instability_time: None,
        }
    }
}

impl MotorParams {
    /// Parameters of a configured motor.
    pub fn from_config(cfg: &MotorConfig) -> Self {
        Self {
            sign: f64::from(cfg.sign),
            offset: cfg.offset,
            step_per_unit: cfg.step_per_unit,
            backlash: cfg.backlash,
            instability_time: (cfg.instability_time_ms > 0)
                .then(|| Duration::from_millis(cfg.instability_time_ms)),
        }
    }

    /// User position of a dial position.
    #[inline]
    pub fn to_user(&self, dial: f64) -> f64 {
        self.sign * dial + self.offset
    }

    /// Dial position of a user position.
    #[inline]
    pub fn to_dial(&self, position: f64) -> f64 {
        (position - self.offset) / self.sign
    }

    /// True when backlash correction is configured.
    #[inline]
    pub fn has_backlash(&self) -> bool {
        self.backlash != 0.0
    }
}

/// How a value read is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuePublish {
    /// Only when the value differs from the last published one.
    Changed,
    /// Always, as a normal event.
    Forced,
    /// Always, as a priority event. Last value event of an operation.
    Final,
}

#[derive(Debug, Default)]
struct ElementData {
    state: ElementState,
    status: String,
    value: Option<f64>,
    value_error: Option<String>,
    backlash_target: Option<f64>,
}

/// A motor, channel or group known to the pool.
pub struct Element {
    id: ElementId,
    name: String,
    kind: ElementKind,
    controller: Option<ControllerId>,
    axis: Option<Axis>,
    capabilities: CtrlCapabilities,
    members: Vec<ElementId>,
    master: Option<ElementId>,
    motor: Option<MotorParams>,
    op_lock: Mutex<()>,
    data: Mutex<ElementData>,
    abort: AtomicBool,
    operation: AtomicU64,
}

impl Element {
    fn new(id: ElementId, name: &str, kind: ElementKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            controller: None,
            axis: None,
            capabilities: CtrlCapabilities::empty(),
            members: Vec::new(),
            master: None,
            motor: None,
            op_lock: Mutex::new(()),
            data: Mutex::new(ElementData::default()),
            abort: AtomicBool::new(false),
            operation: AtomicU64::new(NO_OPERATION),
        }
    }

    /// A motor on `axis` of `controller`.
    pub fn motor(
        id: ElementId,
        name: &str,
        controller: ControllerId,
        axis: Axis,
        capabilities: CtrlCapabilities,
        params: MotorParams,
    ) -> Self {
        Self {
            controller: Some(controller),
            axis: Some(axis),
            capabilities,
            motor: Some(params),
            ..Self::new(id, name, ElementKind::Motor)
        }
    }

    /// Runtime motor for a configured axis.
    pub fn from_motor_config(cfg: &MotorConfig, capabilities: CtrlCapabilities) -> Self {
        Self::motor(
            cfg.id,
            &cfg.name,
            cfg.controller,
            cfg.axis,
            capabilities,
            MotorParams::from_config(cfg),
        )
    }

    /// A counter/timer channel on `axis` of `controller`.
    pub fn channel(
        id: ElementId,
        name: &str,
        controller: ControllerId,
        axis: Axis,
        capabilities: CtrlCapabilities,
    ) -> Self {
        Self {
            controller: Some(controller),
            axis: Some(axis),
            capabilities,
            ..Self::new(id, name, ElementKind::CounterTimer)
        }
    }

    /// Runtime counter/timer channel for a configured axis.
    pub fn from_channel_config(cfg: &ChannelConfig, capabilities: CtrlCapabilities) -> Self {
        Self::channel(cfg.id, &cfg.name, cfg.controller, cfg.axis, capabilities)
    }

    /// A motor group or measurement group.
    pub fn group(
        id: ElementId,
        name: &str,
        kind: ElementKind,
        members: Vec<ElementId>,
        master: Option<ElementId>,
    ) -> Self {
        debug_assert!(kind.is_group());
        Self {
            members,
            master,
            ..Self::new(id, name, kind)
        }
    }

    /// Runtime group; `kind` follows its members.
    pub fn from_group_config(cfg: &GroupConfig, kind: ElementKind) -> Self {
        Self::group(cfg.id, &cfg.name, kind, cfg.members.clone(), cfg.master)
    }

    // ─── Identity ───────────────────────────────────────────────────

    /// Pool-wide id.
    pub fn id(&self) -> ElementId {
        self.id
    }

    /// Unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of element.
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// True for motor groups and measurement groups.
    pub fn is_group(&self) -> bool {
        self.kind.is_group()
    }

    /// Controller of a physical element.
    pub fn controller(&self) -> Option<ControllerId> {
        self.controller
    }

    /// Axis of a physical element.
    pub fn axis(&self) -> Option<Axis> {
        self.axis
    }

    /// Capabilities of the owning controller, cached at registration.
    pub fn capabilities(&self) -> CtrlCapabilities {
        self.capabilities
    }

    /// Group members, in configuration order. Empty for physical elements.
    pub fn members(&self) -> &[ElementId] {
        &self.members
    }

    /// Configured master of a measurement group.
    pub fn master(&self) -> Option<ElementId> {
        self.master
    }

    /// Conversion parameters of a motor.
    pub fn motor_params(&self) -> Option<&MotorParams> {
        self.motor.as_ref()
    }

    // ─── Operation lock ─────────────────────────────────────────────

    /// Block until the operation lock is acquired.
    pub fn lock_operation(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock()
    }

    /// True while the operation lock is held.
    pub fn is_locked(&self) -> bool {
        self.op_lock.is_locked()
    }

    // ─── Lifecycle state ────────────────────────────────────────────

    /// Current state.
    pub fn state(&self) -> ElementState {
        self.data.lock().state
    }

    /// Status text of the last state update.
    pub fn status(&self) -> String {
        self.data.lock().status.clone()
    }

    /// Change the lifecycle state.
    ///
    /// Returns the event describing the transition, or `None` when the state
    /// did not change.
    pub fn set_state(&self, state: ElementState, status: Option<String>) -> Option<ElementEvent> {
        let mut data = self.data.lock();
        data.status = status.clone().unwrap_or_default();
        let old = data.state;
        if old == state {
            return None;
        }
        data.state = state;
        Some(ElementEvent::state(self.id, &self.name, old, state, status))
    }

    // ─── Value ──────────────────────────────────────────────────────

    /// Last published value, in user units.
    pub fn value(&self) -> Option<f64> {
        self.data.lock().value
    }

    /// Convert a raw controller value to user units.
    pub fn to_user_value(&self, raw: f64) -> f64 {
        match &self.motor {
            Some(params) => params.to_user(raw),
            None => raw,
        }
    }

    /// Publish a raw controller reading.
    pub fn publish_value(
        &self,
        reading: Result<f64, String>,
        mode: ValuePublish,
    ) -> Option<ElementEvent> {
        let reading = reading.map(|raw| self.to_user_value(raw));
        let mut data = self.data.lock();
        let old = data.value;
        let unchanged = match &reading {
            Ok(v) => data.value_error.is_none() && old == Some(*v),
            Err(e) => data.value_error.as_deref() == Some(e.as_str()),
        };
        if mode == ValuePublish::Changed && unchanged {
            return None;
        }
        match &reading {
            Ok(v) => {
                data.value = Some(*v);
                data.value_error = None;
            }
            Err(e) => data.value_error = Some(e.clone()),
        }
        Some(ElementEvent::value(
            self.id,
            &self.name,
            old,
            reading,
            mode == ValuePublish::Final,
        ))
    }

    // ─── Abort flag ─────────────────────────────────────────────────

    /// Ask the driving operation to stop.
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// True if an abort was requested and not yet cleared.
    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Drop a pending abort request.
    pub fn clear_abort(&self) {
        self.abort.store(false, Ordering::SeqCst);
    }

    // ─── Driving operation ──────────────────────────────────────────

    /// Operation currently driving the element.
    pub fn operation(&self) -> Option<OperationId> {
        match self.operation.load(Ordering::Acquire) {
            NO_OPERATION => None,
            id => Some(OperationId(id)),
        }
    }

    /// True while an operation drives the element.
    pub fn is_driven(&self) -> bool {
        self.operation().is_some()
    }

    /// True when an operation other than `op` drives the element.
    pub fn is_driven_by_other(&self, op: OperationId) -> bool {
        matches!(self.operation(), Some(current) if current != op)
    }

    /// Mark the element as driven by `op`. Returns `true` if it was free.
    pub fn claim(&self, op: OperationId) -> bool {
        self.operation
            .compare_exchange(NO_OPERATION, op.0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Drop the claim of `op`. No effect if another operation owns it.
    pub fn release(&self, op: OperationId) {
        let _ = self.operation.compare_exchange(
            op.0,
            NO_OPERATION,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    // ─── Backlash ───────────────────────────────────────────────────

    /// Dial target of the backlash correction still to do.
    pub fn set_pending_backlash(&self, target: Option<f64>) {
        self.data.lock().backlash_target = target;
    }

    /// True while a backlash correction is pending.
    pub fn has_pending_backlash(&self) -> bool {
        self.data.lock().backlash_target.is_some()
    }

    /// Take the pending backlash dial target, clearing the flag.
    pub fn take_pending_backlash(&self) -> Option<f64> {
        self.data.lock().backlash_target.take()
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("controller", &self.controller)
            .field("axis", &self.axis)
            .field("state", &self.state())
            .finish()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
