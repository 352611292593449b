//! The device pool.
//!
//! `Pool` is the entry point of the engine: it owns the registries, the
//! listener set and the engine configuration, and turns user requests (move,
//! acquire, abort) into operations running on worker threads.

use crate::acquisition::{AcquisitionHooks, AcquisitionMode, AcquisitionRequest};
use crate::controller::{self, PoolController, guarded};
use crate::dispatch::OperationDispatcher;
use crate::driver_registry::DriverRegistry;
use crate::element::Element;
use crate::error::{EngineError, FailureCause};
use crate::hooks::OperationHooks;
use crate::motion::{MotionCalc, MotionHooks, calc_motion};
use crate::operation::{OperationKind, OperationRequest, Target};
use crate::outbox::{Listeners, NotificationSink};
use crate::poll::StateProxy;
use crate::registry::{ControllerRegistry, ElementRegistry};
use crate::worker::{OperationHandle, Worker};
use parking_lot::RwLock;
use pool_common::config::{ChannelConfig, EngineConfig, GroupConfig, MotorConfig, PoolConfig};
use pool_common::controller::{Controller, CtrlCall, CtrlCapabilities, CtrlError, ExtraValue};
use pool_common::element::{Axis, ControllerId, ElementId, ElementKind, OperationId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Device pool: registries, listeners and running operations.
pub struct Pool {
    config: EngineConfig,
    elements: ElementRegistry,
    controllers: ControllerRegistry,
    listeners: Listeners,
    proxy: RwLock<Option<Arc<dyn StateProxy>>>,
    next_operation: AtomicU64,
}

impl Pool {
    /// Empty pool.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            elements: ElementRegistry::new(),
            controllers: ControllerRegistry::new(),
            listeners: Listeners::new(),
            proxy: RwLock::new(None),
            next_operation: AtomicU64::new(1),
        }
    }

    /// Build a pool from a validated configuration.
    ///
    /// Controllers are created through `drivers`, then motors, channels and
    /// groups are added in that order.
    pub fn from_config(config: &PoolConfig, drivers: &DriverRegistry) -> Result<Self, EngineError> {
        config.validate()?;
        let pool = Self::new(config.engine);
        for c in &config.controllers {
            let plugin = drivers.create_controller(c)?;
            pool.add_controller(c.id, &c.class, plugin)?;
        }
        for m in &config.motors {
            pool.add_motor(m)?;
        }
        for c in &config.channels {
            pool.add_channel(c)?;
        }
        for g in &config.groups {
            pool.add_group(g)?;
        }
        info!(
            "Pool '{}' ready: {} controller(s), {} element(s)",
            config.shared.service_name,
            config.controllers.len(),
            config.motors.len() + config.channels.len() + config.groups.len()
        );
        Ok(pool)
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─── Registration ───────────────────────────────────────────────

    /// Register a controller plugin under `id`.
    pub fn add_controller(
        &self,
        id: ControllerId,
        class: &str,
        plugin: Box<dyn Controller>,
    ) -> Result<Arc<PoolController>, EngineError> {
        let ctrl = self.controllers.register(PoolController::new(id, class, plugin))?;
        info!(
            "Controller '{}' ({}) registered as {} [{:?}]",
            ctrl.name(),
            class,
            id,
            ctrl.capabilities()
        );
        Ok(ctrl)
    }

    /// Add a motor on an axis of its controller.
    pub fn add_motor(&self, cfg: &MotorConfig) -> Result<Arc<Element>, EngineError> {
        let ctrl = self.physical_controller(cfg.controller, cfg.axis, CtrlCapabilities::MOTOR)?;
        self.add_physical(&ctrl, Element::from_motor_config(cfg, ctrl.capabilities()))
    }

    /// Add a counter/timer channel on an axis of its controller.
    pub fn add_channel(&self, cfg: &ChannelConfig) -> Result<Arc<Element>, EngineError> {
        let ctrl =
            self.physical_controller(cfg.controller, cfg.axis, CtrlCapabilities::COUNTER_TIMER)?;
        self.add_physical(&ctrl, Element::from_channel_config(cfg, ctrl.capabilities()))
    }

    /// Add a motor group or measurement group, depending on its members.
    pub fn add_group(&self, cfg: &GroupConfig) -> Result<Arc<Element>, EngineError> {
        let members = cfg
            .members
            .iter()
            .map(|id| self.elements.get(*id))
            .collect::<Result<Vec<_>, _>>()?;
        let kind = match members.first().map(|m| m.kind()) {
            Some(ElementKind::Motor) => ElementKind::MotorGroup,
            Some(ElementKind::CounterTimer) => ElementKind::MeasurementGroup,
            _ => {
                return Err(EngineError::InvalidRequest(format!(
                    "group '{}' needs motors or channels as members",
                    cfg.name
                )));
            }
        };
        let expected = members[0].kind();
        if let Some(odd) = members.iter().find(|m| m.kind() != expected) {
            return Err(EngineError::InvalidRequest(format!(
                "group '{}' mixes {} and {} ('{}')",
                cfg.name,
                expected,
                odd.kind(),
                odd.name()
            )));
        }
        if let Some(master) = cfg.master {
            if kind != ElementKind::MeasurementGroup || !cfg.members.contains(&master) {
                return Err(EngineError::InvalidRequest(format!(
                    "invalid master {} for group '{}'",
                    master, cfg.name
                )));
            }
        }
        let group = self.elements.register(Element::from_group_config(cfg, kind))?;
        info!("{} '{}' added with {} member(s)", kind, group.name(), members.len());
        Ok(group)
    }

    /// Remove an element. Physical elements are removed from their
    /// controller; elements still driven or grouped are refused.
    pub fn delete_element(&self, id: ElementId) -> Result<(), EngineError> {
        let element = self.elements.get(id)?;
        if element.is_driven() {
            return Err(EngineError::Busy(element.name().to_string()));
        }
        if let Some(group) = self.elements.groups_containing(id).first() {
            return Err(EngineError::InvalidRequest(format!(
                "'{}' is a member of '{}'",
                element.name(),
                group.name()
            )));
        }
        if let (Some(ctrl_id), Some(axis)) = (element.controller(), element.axis()) {
            let ctrl = self.controllers.get(ctrl_id)?;
            let mut plugin = ctrl.lock();
            guarded(|| plugin.delete_device(axis))
                .map_err(|cause| direct_failure(CtrlCall::DeleteDevice, &element, cause))?;
        }
        self.elements.remove(id);
        info!("Element '{}' deleted", element.name());
        Ok(())
    }

    fn physical_controller(
        &self,
        id: ControllerId,
        axis: Axis,
        needs: CtrlCapabilities,
    ) -> Result<Arc<PoolController>, EngineError> {
        let ctrl = self.controllers.get(id)?;
        if !ctrl.capabilities().contains(needs) {
            return Err(EngineError::InvalidRequest(format!(
                "controller '{}' does not drive {:?} elements",
                ctrl.name(),
                needs
            )));
        }
        if let Some(taken) = self
            .elements
            .all()
            .into_iter()
            .find(|e| e.controller() == Some(id) && e.axis() == Some(axis))
        {
            return Err(EngineError::AlreadyRegistered(format!(
                "axis {} of '{}' (used by '{}')",
                axis,
                ctrl.name(),
                taken.name()
            )));
        }
        Ok(ctrl)
    }

    fn add_physical(
        &self,
        ctrl: &PoolController,
        element: Element,
    ) -> Result<Arc<Element>, EngineError> {
        let axis = element.axis().unwrap_or_default();
        {
            let mut plugin = ctrl.lock();
            guarded(|| plugin.add_device(axis))
                .map_err(|cause| direct_failure(CtrlCall::AddDevice, &element, cause))?;
        }
        match self.elements.register(element) {
            Ok(element) => {
                info!(
                    "{} '{}' added on '{}' axis {}",
                    element.kind(),
                    element.name(),
                    ctrl.name(),
                    axis
                );
                Ok(element)
            }
            Err(e) => {
                let mut plugin = ctrl.lock();
                if let Err(cause) = guarded(|| plugin.delete_device(axis)) {
                    warn!("DeleteDevice() failed on '{}' axis {}: {}", ctrl.name(), axis, cause);
                }
                Err(e)
            }
        }
    }

    // ─── Lookup ─────────────────────────────────────────────────────

    /// Element by id.
    pub fn element(&self, id: ElementId) -> Result<Arc<Element>, EngineError> {
        self.elements.get(id)
    }

    /// Element by name.
    pub fn find(&self, name: &str) -> Option<Arc<Element>> {
        self.elements.find(name)
    }

    /// Every registered element.
    pub fn elements(&self) -> Vec<Arc<Element>> {
        self.elements.all()
    }

    /// Controller by id.
    pub fn controller(&self, id: ControllerId) -> Result<Arc<PoolController>, EngineError> {
        self.controllers.get(id)
    }

    /// Every registered controller.
    pub fn controllers(&self) -> Vec<Arc<PoolController>> {
        self.controllers.all()
    }

    // ─── Notifications ──────────────────────────────────────────────

    /// Register a notification sink.
    pub fn subscribe(&self, sink: Arc<dyn NotificationSink>) {
        self.listeners.subscribe(sink);
    }

    /// Install (or remove) the external state source used while polling.
    pub fn set_state_proxy(&self, proxy: Option<Arc<dyn StateProxy>>) {
        *self.proxy.write() = proxy;
    }

    // ─── Operations ─────────────────────────────────────────────────

    /// Move one motor to a user position.
    pub fn move_motor(&self, id: ElementId, position: f64) -> Result<OperationHandle, EngineError> {
        let motor = self.elements.get(id)?;
        let calc = self.calc_move(&motor, position)?;
        debug!(
            "'{}': user {} -> dial {} (backlash {:?})",
            motor.name(),
            calc.position,
            calc.dial,
            calc.backlash
        );
        let hooks = MotionHooks::from_calcs([(id, &calc)]);
        self.start(
            OperationRequest::single(OperationKind::Motion, id, calc.dial),
            Box::new(hooks),
        )
    }

    /// Move every motor of a group, `positions` in member order.
    pub fn move_group(
        &self,
        id: ElementId,
        positions: &[f64],
    ) -> Result<OperationHandle, EngineError> {
        let group = self.elements.get(id)?;
        if group.kind() != ElementKind::MotorGroup {
            return Err(EngineError::InvalidRequest(format!(
                "'{}' is not a motor group",
                group.name()
            )));
        }
        if positions.len() != group.members().len() {
            return Err(EngineError::InvalidRequest(format!(
                "'{}' has {} member(s), got {} position(s)",
                group.name(),
                group.members().len(),
                positions.len()
            )));
        }

        let mut calcs = Vec::with_capacity(positions.len());
        for (member, &position) in group.members().iter().zip(positions) {
            let motor = self.elements.get(*member)?;
            calcs.push((*member, self.calc_move(&motor, position)?));
        }
        let targets = calcs.iter().map(|(id, c)| Target::new(*id, c.dial)).collect();
        let hooks = MotionHooks::from_calcs(calcs.iter().map(|(id, c)| (*id, c)));
        self.start(
            OperationRequest::group(OperationKind::Motion, id, targets),
            Box::new(hooks),
        )
    }

    /// Count on a channel or measurement group.
    pub fn acquire(
        &self,
        id: ElementId,
        request: AcquisitionRequest,
    ) -> Result<OperationHandle, EngineError> {
        request.mode.validate()?;
        let element = self.elements.get(id)?;
        let value = request.mode.master_value();

        let op_request = match element.kind() {
            ElementKind::CounterTimer => {
                if request.master.is_some_and(|m| m != id) {
                    return Err(EngineError::InvalidRequest(format!(
                        "a single channel acquisition is its own master ('{}')",
                        element.name()
                    )));
                }
                OperationRequest::single(OperationKind::Acquisition, id, value).with_master(id)
            }
            ElementKind::MeasurementGroup => {
                let targets = element.members().iter().map(|m| Target::new(*m, value)).collect();
                let req = OperationRequest::group(OperationKind::Acquisition, id, targets);
                match request.master.or(element.master()) {
                    Some(master) => req.with_master(master),
                    None if matches!(request.mode, AcquisitionMode::Monitor { .. }) => {
                        return Err(EngineError::InvalidRequest(format!(
                            "monitor acquisition on '{}' needs a master",
                            element.name()
                        )));
                    }
                    None => req,
                }
            }
            other => {
                return Err(EngineError::InvalidRequest(format!(
                    "cannot acquire on a {other} ('{}')",
                    element.name()
                )));
            }
        };

        self.start(op_request, Box::new(AcquisitionHooks::new(request.mode)))
    }

    /// Start an operation with custom hooks.
    ///
    /// Blocks until the start sequence is over; polling continues on the
    /// worker thread.
    pub fn start(
        &self,
        request: OperationRequest,
        hooks: Box<dyn OperationHooks>,
    ) -> Result<OperationHandle, EngineError> {
        request.validate()?;
        if !request.wait {
            return Err(EngineError::InvalidRequest(
                "operations started from outside the engine are always polled".to_string(),
            ));
        }
        if hooks.kind() != request.kind {
            return Err(EngineError::InvalidRequest(format!(
                "{:?} hooks for a {:?} request",
                hooks.kind(),
                request.kind
            )));
        }

        let running = self.elements.get(request.source.element())?;
        let guard = running.lock_operation();
        if running.is_driven() {
            return Err(EngineError::Busy(running.name().to_string()));
        }
        running.clear_abort();
        for target in &request.targets {
            if let Ok(member) = self.elements.get(target.element) {
                if !member.is_driven() {
                    member.clear_abort();
                }
            }
        }

        let operation = OperationId(self.next_operation.fetch_add(1, Ordering::Relaxed));
        info!(
            "{}: {:?} requested on '{}' ({} element(s))",
            operation,
            request.kind,
            running.name(),
            request.targets.len()
        );

        let worker = Worker::new(
            OperationDispatcher::new(self.elements.clone(), self.controllers.clone()),
            self.listeners.clone(),
            self.proxy.read().clone(),
            self.config,
            request,
            operation,
            hooks,
        );
        worker.spawn(Arc::clone(&running), guard)
    }

    /// Abort whatever operation drives `id` (or its members).
    ///
    /// Sets the abort flags and stops the hardware right away; the worker
    /// then publishes the final events.
    pub fn abort(&self, id: ElementId) -> Result<(), EngineError> {
        let element = self.elements.get(id)?;
        info!("Abort requested on '{}'", element.name());
        element.request_abort();

        let physical = if element.is_group() {
            element.members().to_vec()
        } else {
            vec![id]
        };
        let mut first_error = None;
        for member in physical {
            let resolved = self.elements.resolve(member)?;
            if !resolved.element.is_driven() {
                continue;
            }
            resolved.element.request_abort();
            let ctrl = self.controllers.get(resolved.controller)?;
            let mut plugin = ctrl.lock();
            if let Err(cause) = guarded(|| plugin.abort_one(resolved.axis)) {
                warn!("AbortOne() failed for '{}': {}", resolved.element.name(), cause);
                first_error.get_or_insert(direct_failure(
                    CtrlCall::AbortOne,
                    &resolved.element,
                    cause,
                ));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ─── Direct access ──────────────────────────────────────────────

    /// Read the current value of a physical element, in user units.
    pub fn read_value(&self, id: ElementId) -> Result<f64, EngineError> {
        let resolved = self.elements.resolve(id)?;
        let raw = self.read_raw(&resolved.element, resolved.controller, resolved.axis)?;
        Ok(resolved.element.to_user_value(raw))
    }

    /// Read a controller-specific attribute of an axis.
    pub fn get_extra_attribute(&self, id: ElementId, name: &str) -> Result<ExtraValue, EngineError> {
        let resolved = self.elements.resolve(id)?;
        let ctrl = self.controllers.get(resolved.controller)?;
        let plugin = ctrl.lock();
        guarded(|| plugin.get_extra_attribute(resolved.axis, name))
            .map_err(|cause| direct_failure(CtrlCall::GetExtraAttribute, &resolved.element, cause))
    }

    /// Write a controller-specific attribute of an axis.
    pub fn set_extra_attribute(
        &self,
        id: ElementId,
        name: &str,
        value: ExtraValue,
    ) -> Result<(), EngineError> {
        let resolved = self.elements.resolve(id)?;
        let ctrl = self.controllers.get(resolved.controller)?;
        let mut plugin = ctrl.lock();
        guarded(|| plugin.set_extra_attribute(resolved.axis, name, value))
            .map_err(|cause| direct_failure(CtrlCall::SetExtraAttribute, &resolved.element, cause))
    }

    fn read_raw(
        &self,
        element: &Element,
        ctrl_id: ControllerId,
        axis: Axis,
    ) -> Result<f64, EngineError> {
        let ctrl = self.controllers.get(ctrl_id)?;
        let mut plugin = ctrl.lock();
        let reading = controller::read_values(&mut **plugin, &[axis]).pop();
        match reading {
            Some(Ok(raw)) => Ok(raw),
            Some(Err(msg)) => Err(EngineError::Controller {
                call: CtrlCall::ReadOne,
                element: element.name().to_string(),
                source: CtrlError::Hardware(msg),
            }),
            None => Err(EngineError::Controller {
                call: CtrlCall::ReadOne,
                element: element.name().to_string(),
                source: CtrlError::UnknownAxis(axis),
            }),
        }
    }

    fn calc_move(&self, motor: &Element, position: f64) -> Result<MotionCalc, EngineError> {
        let params = *motor.motor_params().ok_or_else(|| {
            EngineError::InvalidRequest(format!("'{}' is not a motor", motor.name()))
        })?;
        if !position.is_finite() {
            return Err(EngineError::InvalidRequest(format!(
                "target of '{}' is not a finite number",
                motor.name()
            )));
        }
        let resolved = self.elements.resolve(motor.id())?;
        let dial = self.read_raw(motor, resolved.controller, resolved.axis)?;
        Ok(calc_motion(&params, motor.capabilities(), dial, position))
    }
}

/// Error of a controller call made outside an operation.
fn direct_failure(call: CtrlCall, element: &Element, cause: FailureCause) -> EngineError {
    let source = match cause {
        FailureCause::Controller(e) => e,
        other => CtrlError::Hardware(other.to_string()),
    };
    EngineError::Controller {
        call,
        element: element.name().to_string(),
        source,
    }
}
