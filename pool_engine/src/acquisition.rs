//! Acquisition specialization.
//!
//! Channels are started with the master value: the integration time in timer
//! mode, or the negated monitor count in monitor mode. The master's
//! controller is loaded first when it supports it, and in monitor mode the
//! whole group is aborted as soon as the master crosses the count.

use crate::controller::guarded;
use crate::error::{EngineError, FailureCause};
use crate::hooks::{LoopTiming, OperationHooks, TickDecision, ValueReadings};
use crate::lockset::ControllerLockSet;
use crate::operation::{DispatchPlan, OperationKind};
use crate::recovery::StepFailure;
use pool_common::config::EngineConfig;
use pool_common::controller::{CtrlCall, CtrlCapabilities};
use pool_common::element::ElementId;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How an acquisition ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Count for a fixed time, in seconds.
    Timer {
        /// Seconds.
        integration_time: f64,
    },
    /// Count until the master reaches `count`.
    Monitor {
        /// Master count to reach.
        count: f64,
    },
}

impl AcquisitionMode {
    /// Value sent to every channel.
    pub fn master_value(&self) -> f64 {
        match *self {
            Self::Timer { integration_time } => integration_time,
            Self::Monitor { count } => -count,
        }
    }

    /// Refuse non-positive or non-finite values.
    pub fn validate(&self) -> Result<(), EngineError> {
        let (what, value) = match *self {
            Self::Timer { integration_time } => ("integration time", integration_time),
            Self::Monitor { count } => ("monitor count", count),
        };
        if !value.is_finite() || value <= 0.0 {
            return Err(EngineError::InvalidRequest(format!(
                "{what} must be a positive number, got {value}"
            )));
        }
        Ok(())
    }
}

/// Acquisition request on a channel or measurement group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionRequest {
    /// How the acquisition ends.
    pub mode: AcquisitionMode,
    /// Overrides the group's configured master.
    pub master: Option<ElementId>,
}

impl AcquisitionRequest {
    /// Timer mode acquisition.
    pub fn timer(integration_time: f64) -> Self {
        Self {
            mode: AcquisitionMode::Timer { integration_time },
            master: None,
        }
    }

    /// Monitor mode acquisition.
    pub fn monitor(count: f64) -> Self {
        Self {
            mode: AcquisitionMode::Monitor { count },
            master: None,
        }
    }

    /// Count with `master` as the master channel.
    pub fn with_master(mut self, master: ElementId) -> Self {
        self.master = Some(master);
        self
    }
}

/// Hooks of an acquisition operation.
#[derive(Debug, Clone)]
pub struct AcquisitionHooks {
    mode: AcquisitionMode,
    /// Last master reading, for threshold crossing.
    last_master: Option<f64>,
}

impl AcquisitionHooks {
    /// Hooks for one acquisition in `mode`.
    pub fn new(mode: AcquisitionMode) -> Self {
        Self {
            mode,
            last_master: None,
        }
    }
}

impl OperationHooks for AcquisitionHooks {
    fn kind(&self) -> OperationKind {
        OperationKind::Acquisition
    }

    fn timing(&self, config: &EngineConfig) -> LoopTiming {
        LoopTiming {
            sleep: config.acq_sleep(),
            states_per_value: config.acq_loop_states_per_value,
        }
    }

    fn before_start(
        &mut self,
        plan: &DispatchPlan,
        locks: &mut ControllerLockSet<'_>,
    ) -> Result<(), StepFailure> {
        let Some(m) = plan.master else {
            return Ok(());
        };
        let master = &plan.elements[m];
        let ic = &plan.controllers[master.controller];
        if !ic.controller.capabilities().contains(CtrlCapabilities::LOADABLE) {
            return Ok(());
        }

        let value = self.mode.master_value();
        debug!(
            "{}: loading '{}' with {}",
            plan.operation,
            master.element.name(),
            value
        );
        let ctrl = locks.get_mut(master.controller);
        guarded(|| ctrl.pre_load_all())
            .map_err(|cause| StepFailure::new(CtrlCall::PreLoadAll, m, cause))?;
        let accepted = guarded(|| ctrl.pre_load_one(master.axis, value))
            .map_err(|cause| StepFailure::new(CtrlCall::PreLoadOne, m, cause))?;
        if !accepted {
            return Err(StepFailure::new(CtrlCall::PreLoadOne, m, FailureCause::Rejected));
        }
        guarded(|| ctrl.load_one(master.axis, value))
            .map_err(|cause| StepFailure::new(CtrlCall::LoadOne, m, cause))?;
        guarded(|| ctrl.load_all()).map_err(|cause| StepFailure::new(CtrlCall::LoadAll, m, cause))
    }

    fn on_values(&mut self, plan: &DispatchPlan, values: &ValueReadings) -> TickDecision {
        let AcquisitionMode::Monitor { count } = self.mode else {
            return TickDecision::Continue;
        };
        let Some(Some(Ok(latest))) = plan.master.map(|m| values[m].clone()) else {
            return TickDecision::Continue;
        };
        let previous = self.last_master.replace(latest);
        let crossed = latest >= count && previous.is_none_or(|p| p < count);
        if crossed {
            debug!(
                "{}: monitor reached {} (threshold {})",
                plan.operation, latest, count
            );
            TickDecision::AbortAll
        } else {
            TickDecision::Continue
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
