//! Motion specialization.
//!
//! Computes dial targets for user positions (sign, offset, backlash and step
//! rounding) and plugs motor-specific behavior into the polling loop:
//! instability time and backlash correction.

use crate::element::MotorParams;
use crate::hooks::{LoopTiming, OperationHooks};
use crate::lockset::ControllerLockSet;
use crate::operation::{DispatchPlan, ImpliedElement, OperationKind};
use crate::recovery::StepFailure;
use pool_common::config::EngineConfig;
use pool_common::controller::CtrlCapabilities;
use pool_common::element::{ElementId, ElementState};
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Displacements at or below this are not moves.
pub const DISPLACEMENT_EPSILON: f64 = 1e-16;

/// Result of [`calc_motion`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionCalc {
    /// Requested user position.
    pub position: f64,
    /// Dial target sent to the controller.
    pub dial: f64,
    /// Final dial target of the backlash correction, if one is needed.
    pub backlash: Option<f64>,
}

/// Compute the dial target of a move to `position`.
///
/// When the move goes against the backlash direction, the motor overshoots by
/// `backlash` steps and approaches the target again from the backlash side.
pub fn calc_motion(
    params: &MotorParams,
    capabilities: CtrlCapabilities,
    current_dial: f64,
    position: f64,
) -> MotionCalc {
    let spu = params.step_per_unit;
    let mut dial = params.to_dial(position);

    let mut do_backlash = false;
    if params.has_backlash() && !capabilities.contains(CtrlCapabilities::HW_BACKLASH) {
        let displacement = dial - current_dial;
        if displacement.abs() > DISPLACEMENT_EPSILON {
            do_backlash = (params.backlash > 0.0) != (displacement > 0.0);
            if do_backlash {
                dial -= params.backlash / spu;
            }
        }
    }

    if capabilities.contains(CtrlCapabilities::WANTS_ROUNDING) {
        dial = (dial * spu).round() / spu;
    }

    MotionCalc {
        position,
        dial,
        backlash: do_backlash.then(|| dial + params.backlash / spu),
    }
}

/// Hooks of a motion operation.
#[derive(Debug, Default)]
pub struct MotionHooks {
    /// Backlash dial targets, per motor.
    backlash: HashMap<ElementId, f64>,
    /// Start of the settle window of members that reported a stop.
    settle: HashMap<ElementId, Instant>,
}

impl MotionHooks {
    /// Hooks with no backlash correction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks for a set of computed moves.
    pub fn from_calcs<'a>(calcs: impl IntoIterator<Item = (ElementId, &'a MotionCalc)>) -> Self {
        Self {
            backlash: calcs
                .into_iter()
                .filter_map(|(id, calc)| calc.backlash.map(|b| (id, b)))
                .collect(),
            settle: HashMap::new(),
        }
    }

    /// Correct `element` to `dial_target` once it stops.
    pub fn with_backlash(mut self, element: ElementId, dial_target: f64) -> Self {
        self.backlash.insert(element, dial_target);
        self
    }
}

impl OperationHooks for MotionHooks {
    fn kind(&self) -> OperationKind {
        OperationKind::Motion
    }

    fn timing(&self, config: &EngineConfig) -> LoopTiming {
        LoopTiming {
            sleep: config.motion_sleep(),
            states_per_value: config.motion_loop_states_per_position,
        }
    }

    fn before_start(
        &mut self,
        plan: &DispatchPlan,
        _locks: &mut ControllerLockSet<'_>,
    ) -> Result<(), StepFailure> {
        // Follow-up moves must not re-arm the correction.
        if plan.wait {
            for ie in &plan.elements {
                let target = self.backlash.get(&ie.element.id()).copied();
                ie.element.set_pending_backlash(target);
            }
        }
        Ok(())
    }

    fn member_state(
        &mut self,
        member: &ImpliedElement,
        raw: ElementState,
        now: Instant,
    ) -> ElementState {
        let id = member.element.id();
        if raw != ElementState::Idle {
            self.settle.remove(&id);
            return raw;
        }
        if member.element.has_pending_backlash() {
            return raw;
        }
        let Some(settle) = member.element.motor_params().and_then(|p| p.instability_time) else {
            return raw;
        };
        let since = *self.settle.entry(id).or_insert(now);
        if now.duration_since(since) < settle {
            ElementState::InProgress
        } else {
            self.settle.remove(&id);
            raw
        }
    }

    fn on_member_stopped(
        &mut self,
        member: &ImpliedElement,
        state: ElementState,
        aborted: bool,
    ) -> Option<f64> {
        let target = member.element.take_pending_backlash()?;
        if state == ElementState::Idle && !aborted {
            debug!("'{}': backlash correction to dial {}", member.element.name(), target);
            Some(target)
        } else {
            debug!(
                "'{}': stopped in {}{}, backlash discarded",
                member.element.name(),
                state,
                if aborted { " after abort" } else { "" }
            );
            None
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
