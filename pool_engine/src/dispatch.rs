//! Operation dispatcher.
//!
//! Turns a request into a plan, then runs the start sequence:
//!
//! ```text
//! lock members (group only) ─► lock controllers ─► [hook: load step]
//!   ─► PreStartAll (each ctrl) ─► PreStartOne/StartOne (each non-master)
//!   ─► StartAll (each ctrl) ─► PreStartOne/StartOne/StartAll (master)
//!   ─► group InProgress ─► unlock controllers ─► unlock members
//! ```
//!
//! Each element flips to `InProgress` as soon as its `start_one` returns.
//! Any failure hands over to [`FailureRecovery`].

use crate::controller::guarded;
use crate::error::{EngineError, FailureCause};
use crate::hooks::OperationHooks;
use crate::lockset::{ControllerLockSet, ElementLockSet, LockTrace};
use crate::operation::{DispatchPlan, ImpliedController, ImpliedElement, OperationRequest};
use crate::outbox::Outbox;
use crate::recovery::{FailureRecovery, StartProgress, StepFailure};
use crate::registry::{ControllerRegistry, ElementRegistry};
use pool_common::controller::CtrlCall;
use pool_common::element::{ControllerId, ElementId, ElementState, OperationId};
use tracing::debug;

/// Resolves requests and drives the start sequence.
#[derive(Clone)]
pub struct OperationDispatcher {
    elements: ElementRegistry,
    controllers: ControllerRegistry,
}

impl OperationDispatcher {
    /// Dispatcher over the pool registries.
    pub fn new(elements: ElementRegistry, controllers: ControllerRegistry) -> Self {
        Self {
            elements,
            controllers,
        }
    }

    /// Resolve a request into a plan.
    pub fn plan(
        &self,
        request: &OperationRequest,
        operation: OperationId,
    ) -> Result<DispatchPlan, EngineError> {
        request.validate()?;
        let running = self.elements.get(request.source.element())?;

        if request.source.is_group() {
            if !running.is_group() {
                return Err(EngineError::InvalidRequest(format!(
                    "'{}' is not a group",
                    running.name()
                )));
            }
            if let Some(t) = request
                .targets
                .iter()
                .find(|t| !running.members().contains(&t.element))
            {
                return Err(EngineError::InvalidRequest(format!(
                    "element {} is not a member of '{}'",
                    t.element,
                    running.name()
                )));
            }
        }

        let ids: Vec<ElementId> = request.targets.iter().map(|t| t.element).collect();
        let resolved = self.elements.resolve_many(&ids)?;

        let mut ctrl_ids: Vec<_> = resolved.iter().map(|r| r.controller).collect();
        ctrl_ids.sort();
        ctrl_ids.dedup();

        let mut controllers = ctrl_ids
            .iter()
            .map(|id| {
                Ok(ImpliedController {
                    controller: self.controllers.get(*id)?,
                    members: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        let mut elements = Vec::with_capacity(resolved.len());
        for (i, (target, r)) in request.targets.iter().zip(resolved).enumerate() {
            let ci = ctrl_ids
                .binary_search(&r.controller)
                .map_err(|_| EngineError::UnknownController(r.controller))?;
            controllers[ci].members.push(i);
            elements.push(ImpliedElement {
                element: r.element,
                controller: ci,
                axis: r.axis,
                target: target.value,
                is_master: request.master == Some(target.element),
            });
        }
        let master = elements.iter().position(|e| e.is_master);

        Ok(DispatchPlan {
            operation,
            kind: request.kind,
            source: request.source,
            wait: request.wait,
            running,
            controllers,
            elements,
            master,
        })
    }

    /// Lock, start, flip states and unlock.
    ///
    /// Events are queued into `outbox`; the caller flushes it once it holds no
    /// engine lock. Returns the order in which the controllers were locked
    /// and unlocked.
    pub fn send_to_controllers(
        &self,
        plan: &DispatchPlan,
        hooks: &mut dyn OperationHooks,
        outbox: &mut Outbox,
    ) -> Result<LockTrace<ControllerId>, EngineError> {
        let op = plan.operation;
        let element_locks = if plan.source.is_group() {
            ElementLockSet::acquire(plan.elements_by_id())
        } else {
            ElementLockSet::empty()
        };
        let mut ctrl_locks = ControllerLockSet::acquire(plan.controller_refs());
        debug!(
            "{}: locked {} element(s), {} controller(s)",
            op,
            element_locks.len(),
            ctrl_locks.len()
        );

        if let Some(busy) = plan.elements.iter().find(|e| e.element.is_driven_by_other(op)) {
            let name = busy.element.name().to_string();
            ctrl_locks.release();
            element_locks.release();
            return Err(EngineError::Busy(name));
        }

        let mut progress = StartProgress::new(plan.elements.len());
        match start_sequence(plan, hooks, &mut ctrl_locks, &mut progress, outbox) {
            Ok(()) => {
                if let Some(group) = plan.group() {
                    group.claim(op);
                    outbox.push(group.set_state(ElementState::InProgress, None));
                }
                let trace = ctrl_locks.release();
                element_locks.release();
                debug!(
                    "{}: started {} element(s)",
                    op,
                    progress.started_count()
                );
                Ok(trace)
            }
            Err(failure) => Err(FailureRecovery::recover(
                plan,
                &progress,
                failure,
                ctrl_locks,
                element_locks,
                outbox,
            )),
        }
    }
}

fn start_sequence(
    plan: &DispatchPlan,
    hooks: &mut dyn OperationHooks,
    locks: &mut ControllerLockSet<'_>,
    progress: &mut StartProgress,
    outbox: &mut Outbox,
) -> Result<(), StepFailure> {
    hooks.before_start(plan, locks)?;

    for (ci, ic) in plan.controllers.iter().enumerate() {
        debug!("{}: PreStartAll on '{}'", plan.operation, ic.controller.name());
        let ctrl = locks.get_mut(ci);
        guarded(|| ctrl.pre_start_all())
            .map_err(|cause| StepFailure::new(CtrlCall::PreStartAll, ic.members[0], cause))?;
    }

    for i in plan.non_master() {
        start_element(plan, i, locks, progress, outbox)?;
    }

    // A controller owning only the master is started with the master.
    for (ci, ic) in plan.controllers.iter().enumerate() {
        if plan.master.is_some() && ic.members.iter().all(|&i| Some(i) == plan.master) {
            continue;
        }
        start_all(plan, ci, ic.members[0], locks)?;
    }

    if let Some(m) = plan.master {
        start_element(plan, m, locks, progress, outbox)?;
        start_all(plan, plan.elements[m].controller, m, locks)?;
    }

    Ok(())
}

fn start_element(
    plan: &DispatchPlan,
    i: usize,
    locks: &mut ControllerLockSet<'_>,
    progress: &mut StartProgress,
    outbox: &mut Outbox,
) -> Result<(), StepFailure> {
    let ie = &plan.elements[i];
    if plan.abort_requested() {
        debug!(
            "{}: abort requested, not starting '{}'",
            plan.operation,
            ie.element.name()
        );
        return Ok(());
    }

    let ctrl = locks.get_mut(ie.controller);
    let accepted = guarded(|| ctrl.pre_start_one(ie.axis, ie.target))
        .map_err(|cause| StepFailure::new(CtrlCall::PreStartOne, i, cause))?;
    if !accepted {
        return Err(StepFailure::new(CtrlCall::PreStartOne, i, FailureCause::Rejected));
    }
    guarded(|| ctrl.start_one(ie.axis, ie.target))
        .map_err(|cause| StepFailure::new(CtrlCall::StartOne, i, cause))?;

    debug!(
        "{}: started '{}' towards {}",
        plan.operation,
        ie.element.name(),
        ie.target
    );
    progress.started[i] = true;
    progress.claimed[i] = ie.element.claim(plan.operation);
    progress.previous[i] = Some(ie.element.state());
    outbox.push(ie.element.set_state(ElementState::InProgress, None));
    Ok(())
}

fn start_all(
    plan: &DispatchPlan,
    ci: usize,
    first: usize,
    locks: &mut ControllerLockSet<'_>,
) -> Result<(), StepFailure> {
    debug!(
        "{}: StartAll on '{}'",
        plan.operation,
        plan.controllers[ci].controller.name()
    );
    let ctrl = locks.get_mut(ci);
    guarded(|| ctrl.start_all()).map_err(|cause| StepFailure::new(CtrlCall::StartAll, first, cause))
}
