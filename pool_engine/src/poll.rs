//! Polling state machine.
//!
//! After a successful start sequence the worker polls the hardware until the
//! operation is over:
//!
//! ```text
//!  ┌──────────────────────────── tick ─────────────────────────────┐
//!  │ lock running element                                           │
//!  │ read member states ─► member stopped? ─► follow-up / report    │
//!  │ overall state (proxy or direct) ─► abort convergence           │
//!  │ every Nth tick: read values ─► hook may abort all              │
//!  │ unlock ─► flush events ─► sleep                                │
//!  └────────────────────────────────────────────────────────────────┘
//!  overall state != InProgress ─► final value read (priority)
//!    ─► final state events ─► "operation ended"
//! ```

use crate::controller::{self, guarded};
use crate::dispatch::OperationDispatcher;
use crate::element::{Element, ValuePublish};
use crate::error::EngineError;
use crate::hooks::{LoopTiming, OperationHooks, TickDecision};
use crate::lockset::{ControllerLockSet, ElementLockSet};
use crate::operation::{DispatchPlan, OperationRequest, Target};
use crate::outbox::{Listeners, Outbox};
use pool_common::controller::StateInfo;
use pool_common::element::{ElementId, ElementState, OperationId};
use pool_common::event::ElementEvent;
use std::thread;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// External view of an element's state, preferred over direct reads.
pub trait StateProxy: Send + Sync {
    /// Overall state of `element` (a group or a single element).
    fn state(&self, element: &Element) -> Result<ElementState, ProxyError>;
}

/// Failure of a state proxy query.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProxyError {
    /// The proxy cannot serve this element right now. The engine switches to
    /// direct reads for the rest of the operation.
    #[error("'{0}' temporarily unavailable")]
    Unavailable(String),

    /// Any other failure. Ends the operation.
    #[error("{0}")]
    Failed(String),
}

/// Final report of one member.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberOutcome {
    /// Element id.
    pub element: ElementId,
    /// Element name.
    pub name: String,
    /// Final state.
    pub state: ElementState,
    /// Last published value, in user units.
    pub value: Option<f64>,
    /// Status text of the final state, if any.
    pub status: Option<String>,
}

/// Final report of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    /// Operation id.
    pub operation: OperationId,
    /// Element id.
    pub element: ElementId,
    /// Final state.
    pub state: ElementState,
    /// In request order.
    pub members: Vec<MemberOutcome>,
    /// The operation was aborted from outside.
    pub aborted: bool,
    /// Number of follow-up sub-operations started (backlash).
    pub followups: usize,
    /// Polling iterations run.
    pub ticks: u64,
}

impl OperationOutcome {
    /// Report of member `id`.
    pub fn member(&self, id: ElementId) -> Option<&MemberOutcome> {
        self.members.iter().find(|m| m.element == id)
    }
}

#[derive(Debug, Clone)]
struct MemberTrack {
    state: ElementState,
    status: Option<String>,
    /// Definitive stop seen; no longer polled.
    stopped: bool,
    /// Own state event already queued.
    reported: bool,
    abort_sent: bool,
}

struct PollState {
    members: Vec<MemberTrack>,
    by_proxy: bool,
    aborted: bool,
    tick: u64,
    followups: usize,
}

enum Tick {
    Continue,
    Followup,
    Done,
}

/// Polls one dispatched operation to completion.
pub struct PollingStateMachine<'a> {
    dispatcher: &'a OperationDispatcher,
    listeners: &'a Listeners,
    proxy: Option<&'a dyn StateProxy>,
    timing: LoopTiming,
}

impl<'a> PollingStateMachine<'a> {
    /// Polling loop over the given dispatcher and listeners.
    pub fn new(
        dispatcher: &'a OperationDispatcher,
        listeners: &'a Listeners,
        proxy: Option<&'a dyn StateProxy>,
        timing: LoopTiming,
    ) -> Self {
        Self {
            dispatcher,
            listeners,
            proxy,
            timing,
        }
    }

    /// Poll until the overall state leaves `InProgress`, then publish the
    /// final events.
    pub fn run(
        &self,
        plan: &DispatchPlan,
        hooks: &mut dyn OperationHooks,
    ) -> Result<OperationOutcome, EngineError> {
        let mut st = PollState {
            members: vec![
                MemberTrack {
                    state: ElementState::InProgress,
                    status: None,
                    stopped: false,
                    reported: false,
                    abort_sent: false,
                };
                plan.elements.len()
            ],
            by_proxy: self.proxy.is_some(),
            aborted: false,
            tick: 0,
            followups: 0,
        };
        debug!(
            "{}: polling '{}' every {:?}",
            plan.operation,
            plan.running.name(),
            self.timing.sleep
        );

        let fatal = loop {
            let mut outbox = Outbox::new();
            let step = self.tick(plan, hooks, &mut st, &mut outbox);
            outbox.flush(self.listeners);
            match step {
                Ok(Tick::Continue) => {
                    st.tick += 1;
                    thread::sleep(self.timing.sleep);
                }
                Ok(Tick::Followup) => st.tick += 1,
                Ok(Tick::Done) => break None,
                Err(e) => break Some(e),
            }
        };

        self.finish(plan, &mut st, fatal)
    }

    fn tick(
        &self,
        plan: &DispatchPlan,
        hooks: &mut dyn OperationHooks,
        st: &mut PollState,
        outbox: &mut Outbox,
    ) -> Result<Tick, EngineError> {
        let _running = ElementLockSet::acquire([&*plan.running]);
        let n = plan.elements.len();

        if !st.aborted && plan.abort_requested() {
            warn!("{}: abort requested on '{}'", plan.operation, plan.running.name());
            st.aborted = true;
        }

        let live: Vec<usize> = (0..n).filter(|&i| !st.members[i].stopped).collect();
        let mut states = self.read_states(plan, &live);
        let now = Instant::now();
        let aborted = st.aborted;
        let mut followups = Vec::new();
        let mut member_error = false;

        for &i in &live {
            let ie = &plan.elements[i];
            let (raw, status, read_failed) = match states[i].take() {
                Some(Ok(info)) => {
                    let (state, status) = split_info(info);
                    (state, status, false)
                }
                Some(Err(msg)) => {
                    warn!("{}: state read of '{}' failed: {}", plan.operation, ie.element.name(), msg);
                    (ElementState::Fault, Some(msg), true)
                }
                None => continue,
            };
            let state = hooks.member_state(ie, raw, now);
            let track = &mut st.members[i];
            track.state = state;
            track.status = status;
            if state.is_in_progress() {
                continue;
            }

            if let Some(target) = hooks.on_member_stopped(ie, state, aborted) {
                followups.push(Target::new(ie.element.id(), target));
                track.state = ElementState::InProgress;
                continue;
            }

            track.stopped = true;
            // A failed read only ends that member.
            member_error |= state.is_error() && !read_failed;
            debug!("{}: '{}' stopped ({})", plan.operation, ie.element.name(), state);
            if plan.source.is_group() && Some(i) != plan.master {
                outbox.push(ie.element.set_state(state, track.status.clone()));
                track.reported = true;
            }
        }

        if !followups.is_empty() {
            self.start_followups(plan, hooks, st, followups, outbox)?;
            return Ok(Tick::Followup);
        }

        let overall = self.overall_state(plan, st)?;
        trace!("{}: tick {} overall {}", plan.operation, st.tick, overall);

        if member_error && overall.is_in_progress() && !st.aborted {
            warn!(
                "{}: a member of '{}' stopped in error, aborting the others",
                plan.operation,
                plan.running.name()
            );
            st.aborted = true;
        }

        if st.aborted {
            let pending = pending_aborts(st);
            self.abort_members(plan, st, &pending);
        }

        if !overall.is_in_progress() {
            return Ok(Tick::Done);
        }

        if st.tick % u64::from(self.timing.states_per_value.max(1)) == 0 {
            let live: Vec<usize> = (0..n).filter(|&i| !st.members[i].stopped).collect();
            let values = self.read_values(plan, &live);
            for &i in &live {
                if let Some(reading) = values[i].clone() {
                    outbox.push(plan.elements[i].element.publish_value(reading, ValuePublish::Changed));
                }
            }
            if hooks.on_values(plan, &values) == TickDecision::AbortAll {
                info!("{}: stop condition reached, aborting all members", plan.operation);
                let pending = pending_aborts(st);
                self.abort_members(plan, st, &pending);
            }
        }

        Ok(Tick::Continue)
    }

    fn start_followups(
        &self,
        plan: &DispatchPlan,
        hooks: &mut dyn OperationHooks,
        st: &mut PollState,
        targets: Vec<Target>,
        outbox: &mut Outbox,
    ) -> Result<(), EngineError> {
        let indices: Vec<usize> = targets
            .iter()
            .filter_map(|t| plan.index_of(t.element))
            .collect();
        let values = self.read_values(plan, &indices);
        for &i in &indices {
            if let Some(reading) = values[i].clone() {
                outbox.push(plan.elements[i].element.publish_value(reading, ValuePublish::Forced));
            }
        }

        info!(
            "{}: starting follow-up on {} element(s)",
            plan.operation,
            targets.len()
        );
        let request = OperationRequest::followup(plan.kind, plan.source, targets);
        let sub = self.dispatcher.plan(&request, plan.operation)?;
        self.dispatcher.send_to_controllers(&sub, hooks, outbox)?;
        st.followups += 1;
        Ok(())
    }

    fn overall_state(
        &self,
        plan: &DispatchPlan,
        st: &mut PollState,
    ) -> Result<ElementState, EngineError> {
        if st.by_proxy {
            if let Some(proxy) = self.proxy {
                match proxy.state(&plan.running) {
                    Ok(state) => return Ok(state),
                    Err(ProxyError::Unavailable(msg)) => {
                        info!(
                            "{}: {}; switching to direct state reads",
                            plan.operation, msg
                        );
                        st.by_proxy = false;
                    }
                    Err(ProxyError::Failed(msg)) => return Err(EngineError::Proxy(msg)),
                }
            }
        }
        Ok(derived_state(plan, st))
    }

    fn finish(
        &self,
        plan: &DispatchPlan,
        st: &mut PollState,
        fatal: Option<EngineError>,
    ) -> Result<OperationOutcome, EngineError> {
        let op = plan.operation;
        if let Some(e) = &fatal {
            error!("{}: polling failed: {}; stopping all members", op, e);
            st.aborted = true;
        }

        let moving: Vec<usize> = (0..plan.elements.len())
            .filter(|&i| st.members[i].state.is_in_progress())
            .collect();
        if !moving.is_empty() {
            warn!(
                "{}: {} member(s) still moving at completion, aborting",
                op,
                moving.len()
            );
            let pending = pending_aborts(st);
            self.abort_members(plan, st, &pending);
            let states = self.read_states(plan, &moving);
            for &i in &moving {
                let track = &mut st.members[i];
                let (state, status) = match states[i].clone() {
                    Some(Ok(info)) if !info.state.is_in_progress() => split_info(info),
                    Some(Ok(_)) | None => (
                        ElementState::Unknown,
                        Some("still moving after abort".to_string()),
                    ),
                    Some(Err(msg)) => (ElementState::Fault, Some(msg)),
                };
                track.state = state;
                track.status = status;
                track.stopped = true;
            }
        }

        let mut outbox = Outbox::new();
        let order = plan.start_order();
        let values = self.read_values(plan, &order);
        for &i in &order {
            if let Some(reading) = values[i].clone() {
                outbox.push(plan.elements[i].element.publish_value(reading, ValuePublish::Final));
            }
        }
        for &i in &order {
            let track = &mut st.members[i];
            if !track.reported {
                outbox.push(plan.elements[i].element.set_state(track.state, track.status.clone()));
                track.reported = true;
            }
        }

        let state = derived_state(plan, st);
        if let Some(group) = plan.group() {
            outbox.push(group.set_state(state, None));
        }

        for ie in &plan.elements {
            ie.element.release(op);
            ie.element.clear_abort();
        }
        plan.running.release(op);
        plan.running.clear_abort();

        outbox.enqueue(ElementEvent::operation_ended(
            plan.running.id(),
            plan.running.name(),
            op,
            state,
        ));
        outbox.flush(self.listeners);

        info!(
            "{}: '{}' finished ({}) after {} tick(s)",
            op,
            plan.running.name(),
            state,
            st.tick
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(OperationOutcome {
                operation: op,
                element: plan.running.id(),
                state,
                members: plan
                    .elements
                    .iter()
                    .zip(&st.members)
                    .map(|(ie, track)| MemberOutcome {
                        element: ie.element.id(),
                        name: ie.element.name().to_string(),
                        state: track.state,
                        value: ie.element.value(),
                        status: track.status.clone(),
                    })
                    .collect(),
                aborted: st.aborted,
                followups: st.followups,
                ticks: st.tick,
            }),
        }
    }

    // ─── Hardware access ────────────────────────────────────────────

    fn read_states(
        &self,
        plan: &DispatchPlan,
        indices: &[usize],
    ) -> Vec<Option<Result<StateInfo, String>>> {
        let mut out = vec![None; plan.elements.len()];
        let batches = by_controller(plan, indices);
        let mut locks =
            ControllerLockSet::acquire(batches.iter().map(|(ci, _)| &*plan.controllers[*ci].controller));
        for (k, (_, members)) in batches.iter().enumerate() {
            let axes: Vec<_> = members.iter().map(|&i| plan.elements[i].axis).collect();
            let results = controller::read_states(locks.get_mut(k), &axes);
            for (&i, r) in members.iter().zip(results) {
                out[i] = Some(r);
            }
        }
        locks.release();
        out
    }

    fn read_values(&self, plan: &DispatchPlan, indices: &[usize]) -> Vec<Option<Result<f64, String>>> {
        let mut out = vec![None; plan.elements.len()];
        let batches = by_controller(plan, indices);
        let mut locks =
            ControllerLockSet::acquire(batches.iter().map(|(ci, _)| &*plan.controllers[*ci].controller));
        for (k, (_, members)) in batches.iter().enumerate() {
            let axes: Vec<_> = members.iter().map(|&i| plan.elements[i].axis).collect();
            let results = controller::read_values(locks.get_mut(k), &axes);
            for (&i, r) in members.iter().zip(results) {
                out[i] = Some(r);
            }
        }
        locks.release();
        out
    }

    fn abort_members(&self, plan: &DispatchPlan, st: &mut PollState, indices: &[usize]) {
        if indices.is_empty() {
            return;
        }
        let batches = by_controller(plan, indices);
        let mut locks =
            ControllerLockSet::acquire(batches.iter().map(|(ci, _)| &*plan.controllers[*ci].controller));
        for (k, (_, members)) in batches.iter().enumerate() {
            let ctrl = locks.get_mut(k);
            for &i in members {
                let ie = &plan.elements[i];
                debug!("{}: AbortOne on '{}'", plan.operation, ie.element.name());
                if let Err(e) = guarded(|| ctrl.abort_one(ie.axis)) {
                    warn!("{}: AbortOne() failed for '{}': {}", plan.operation, ie.element.name(), e);
                }
                st.members[i].abort_sent = true;
            }
        }
        locks.release();
    }
}

fn split_info(info: StateInfo) -> (ElementState, Option<String>) {
    let status = (!info.status.is_empty()).then_some(info.status);
    (info.state, status)
}

/// Members still in progress that were not sent an abort yet.
fn pending_aborts(st: &PollState) -> Vec<usize> {
    st.members
        .iter()
        .enumerate()
        .filter(|(_, m)| m.state.is_in_progress() && !m.abort_sent)
        .map(|(i, _)| i)
        .collect()
}

/// State of the running element computed from its members: the master's
/// if there is one, the aggregate otherwise.
fn derived_state(plan: &DispatchPlan, st: &PollState) -> ElementState {
    match plan.master {
        Some(m) => st.members[m].state,
        None => ElementState::aggregate(st.members.iter().map(|m| m.state)),
    }
}

/// Group element indices by controller, in lock order.
fn by_controller(plan: &DispatchPlan, indices: &[usize]) -> Vec<(usize, Vec<usize>)> {
    plan.controllers
        .iter()
        .enumerate()
        .filter_map(|(ci, ic)| {
            let members: Vec<usize> = ic
                .members
                .iter()
                .copied()
                .filter(|i| indices.contains(i))
                .collect();
            (!members.is_empty()).then_some((ci, members))
        })
        .collect()
}
