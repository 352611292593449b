//! Specialization points of the generic operation engine.
//!
//! The dispatcher and the polling loop are shared by every operation kind.
//! What differs between motion and acquisition is expressed through
//! [`OperationHooks`], implemented by `MotionHooks` and `AcquisitionHooks`.

use crate::lockset::ControllerLockSet;
use crate::operation::{DispatchPlan, ImpliedElement, OperationKind};
use crate::recovery::StepFailure;
use pool_common::config::EngineConfig;
use pool_common::element::ElementState;
use std::time::{Duration, Instant};

/// Polling cadence of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    /// Sleep between two state reads.
    pub sleep: Duration,
    /// A value read happens every N state reads.
    pub states_per_value: u32,
}

/// Decision taken after a value read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Keep polling.
    Continue,
    /// Stop every member now.
    AbortAll,
}

/// Raw value readings aligned with `DispatchPlan::elements`; `None` for
/// elements that were not read.
pub type ValueReadings = [Option<Result<f64, String>>];

/// Behavior specific to one operation kind.
pub trait OperationHooks: Send {
    /// Kind of operation these hooks drive.
    fn kind(&self) -> OperationKind;

    /// Loop cadence, from the engine settings.
    fn timing(&self, config: &EngineConfig) -> LoopTiming;

    /// Extra life-cycle calls issued with every implied controller locked,
    /// before `pre_start_all`.
    fn before_start(
        &mut self,
        _plan: &DispatchPlan,
        _locks: &mut ControllerLockSet<'_>,
    ) -> Result<(), StepFailure> {
        Ok(())
    }

    /// Map the hardware state of a member to the state the engine tracks.
    fn member_state(
        &mut self,
        _member: &ImpliedElement,
        raw: ElementState,
        _now: Instant,
    ) -> ElementState {
        raw
    }

    /// Called once when a member reports a definitive stop.
    ///
    /// Returning a target starts a follow-up sub-operation on that member;
    /// the member stays in progress until the follow-up finishes.
    fn on_member_stopped(
        &mut self,
        _member: &ImpliedElement,
        _state: ElementState,
        _aborted: bool,
    ) -> Option<f64> {
        None
    }

    /// Called after every value read.
    fn on_values(&mut self, _plan: &DispatchPlan, _values: &ValueReadings) -> TickDecision {
        TickDecision::Continue
    }
}
