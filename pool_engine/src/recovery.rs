//! Rollback of a failed start sequence.
//!
//! When any life-cycle call fails while an operation is being started, the
//! elements already started are aborted, every element already flipped to
//! `InProgress` returns to its previous state (with a compensating event),
//! and all locks are released in reverse order. The caller receives a single
//! error naming the failing call and the element it failed for.

use crate::controller::guarded;
use crate::error::{EngineError, FailureCause};
use crate::lockset::{ControllerLockSet, ElementLockSet};
use crate::operation::DispatchPlan;
use crate::outbox::Outbox;
use pool_common::controller::CtrlCall;
use pool_common::element::ElementState;
use tracing::{debug, error, warn};

/// A life-cycle call that failed during the start sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    /// Call that failed.
    pub call: CtrlCall,
    /// Index into `DispatchPlan::elements` of the first element concerned.
    pub element: usize,
    /// Why it failed.
    pub cause: FailureCause,
}

impl StepFailure {
    /// Failure of `call` for the element at index `element`.
    pub fn new(call: CtrlCall, element: usize, cause: FailureCause) -> Self {
        Self {
            call,
            element,
            cause,
        }
    }
}

/// What the start sequence did so far, per element of the plan.
#[derive(Debug, Clone, Default)]
pub struct StartProgress {
    /// `start_one` returned for the element.
    pub started: Vec<bool>,
    /// State before the flip to `InProgress`.
    pub previous: Vec<Option<ElementState>>,
    /// The element was claimed by this start sequence (not by an outer one).
    pub claimed: Vec<bool>,
}

impl StartProgress {
    /// Nothing started yet, for `len` elements.
    pub fn new(len: usize) -> Self {
        Self {
            started: vec![false; len],
            previous: vec![None; len],
            claimed: vec![false; len],
        }
    }

    /// Number of elements started so far.
    pub fn started_count(&self) -> usize {
        self.started.iter().filter(|s| **s).count()
    }
}

/// Rollback of a start sequence.
pub struct FailureRecovery;

impl FailureRecovery {
    /// Roll back and release. Consumes the lock sets.
    pub fn recover(
        plan: &DispatchPlan,
        progress: &StartProgress,
        failure: StepFailure,
        mut ctrl_locks: ControllerLockSet<'_>,
        element_locks: ElementLockSet<'_>,
        outbox: &mut Outbox,
    ) -> EngineError {
        let element = plan.elements[failure.element].element.name().to_string();
        error!(
            "{}: {}() failed for '{}': {}; rolling back {} started element(s)",
            plan.operation,
            failure.call,
            element,
            failure.cause,
            progress.started_count()
        );

        let order = plan.start_order();

        for &i in order.iter().rev().filter(|&&i| progress.started[i]) {
            let ie = &plan.elements[i];
            let ctrl = ctrl_locks.get_mut(ie.controller);
            if let Err(e) = guarded(|| ctrl.abort_one(ie.axis)) {
                warn!("{}: AbortOne() failed for '{}': {}", plan.operation, ie.element.name(), e);
            }
        }

        for &i in order.iter().rev() {
            let ie = &plan.elements[i];
            if let Some(previous) = progress.previous[i] {
                outbox.push(ie.element.set_state(previous, None));
            }
            if progress.claimed[i] {
                ie.element.release(plan.operation);
            }
        }

        let ctrl_trace = ctrl_locks.release();
        let element_trace = element_locks.release();
        debug!(
            "{}: rollback released {} controller lock(s), {} element lock(s)",
            plan.operation,
            ctrl_trace.released.len(),
            element_trace.released.len()
        );

        EngineError::Lifecycle {
            call: failure.call,
            element,
            cause: failure.cause,
        }
    }
}
