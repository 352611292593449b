//! Simulated motor controller.
//!
//! Each axis follows a trapezoidal velocity profile towards its target,
//! limited by its velocity and acceleration. Optional soft limits stop the
//! axis and report `Alarm`.

use pool_common::config::ControllerConfig;
use pool_common::controller::{Controller, CtrlCapabilities, CtrlError, ExtraValue, StateInfo};
use pool_common::element::{Axis, ElementState};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const DEFAULT_VELOCITY: f64 = 10.0;
const DEFAULT_ACCELERATION: f64 = 100.0;
/// Integration step.
const MAX_STEP: Duration = Duration::from_millis(1);

/// Kinematic state of one simulated axis.
#[derive(Debug, Clone)]
struct SimAxis {
    /// Dial position.
    position: f64,
    velocity: f64,
    target: f64,
    max_velocity: f64,
    max_acceleration: f64,
    moving: bool,
    /// Limit switch hit during the last move.
    limit: Option<&'static str>,
    last_update: Instant,
}

impl SimAxis {
    fn new(max_velocity: f64, max_acceleration: f64) -> Self {
        Self {
            position: 0.0,
            velocity: 0.0,
            target: 0.0,
            max_velocity,
            max_acceleration,
            moving: false,
            limit: None,
            last_update: Instant::now(),
        }
    }

    /// Advance to `now` in steps of at most `MAX_STEP`.
    fn advance(&mut self, now: Instant, limits: (Option<f64>, Option<f64>)) {
        let mut remaining = now.saturating_duration_since(self.last_update);
        self.last_update = now;
        while self.moving && !remaining.is_zero() {
            let dt = remaining.min(MAX_STEP);
            remaining -= dt;
            self.step(dt.as_secs_f64(), limits);
        }
    }

    fn step(&mut self, dt: f64, (lower, upper): (Option<f64>, Option<f64>)) {
        let position_error = self.target - self.position;
        let max_vel = self.max_velocity;
        let max_acc = self.max_acceleration;

        let stopping_distance = self.velocity * self.velocity / (2.0 * max_acc);
        let desired_velocity = if position_error.abs() <= stopping_distance {
            position_error.signum() * (2.0 * max_acc * position_error.abs()).sqrt().min(max_vel)
        } else {
            position_error.signum() * max_vel
        };

        let max_vel_change = max_acc * dt;
        let vel_change = (desired_velocity - self.velocity).clamp(-max_vel_change, max_vel_change);
        self.velocity = (self.velocity + vel_change).clamp(-max_vel, max_vel);

        let delta = self.velocity * dt;
        if position_error.abs() <= delta.abs() || position_error.abs() < 1e-12 {
            self.position = self.target;
            self.stop();
        } else {
            self.position += delta;
        }

        if let Some(low) = lower.filter(|l| self.position < *l) {
            self.position = low;
            self.limit = Some("lower limit reached");
            self.stop();
        }
        if let Some(high) = upper.filter(|h| self.position > *h) {
            self.position = high;
            self.limit = Some("upper limit reached");
            self.stop();
        }

        trace!(
            "sim axis: pos={:.4}, vel={:.4}, target={:.4}",
            self.position, self.velocity, self.target
        );
    }

    fn stop(&mut self) {
        self.velocity = 0.0;
        self.moving = false;
    }
}

/// Simulated motor controller.
///
/// Properties: `velocity`, `acceleration` (defaults for new axes),
/// `lower_limit`, `upper_limit` (dial units, shared by every axis).
pub struct SimMotorController {
    name: String,
    velocity: f64,
    acceleration: f64,
    lower_limit: Option<f64>,
    upper_limit: Option<f64>,
    axes: HashMap<Axis, SimAxis>,
}

impl SimMotorController {
    /// Controller with default motion parameters and no limits.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            velocity: DEFAULT_VELOCITY,
            acceleration: DEFAULT_ACCELERATION,
            lower_limit: None,
            upper_limit: None,
            axes: HashMap::new(),
        }
    }

    /// Controller built from its configuration properties.
    pub fn from_config(config: &ControllerConfig) -> Result<Self, CtrlError> {
        let mut ctrl = Self::new(&config.name);
        if let Some(v) = config.property_f64("velocity") {
            ctrl.velocity = positive("velocity", v)?;
        }
        if let Some(a) = config.property_f64("acceleration") {
            ctrl.acceleration = positive("acceleration", a)?;
        }
        ctrl.lower_limit = config.property_f64("lower_limit");
        ctrl.upper_limit = config.property_f64("upper_limit");
        if let (Some(low), Some(high)) = (ctrl.lower_limit, ctrl.upper_limit) {
            if low >= high {
                return Err(CtrlError::InvalidValue(format!(
                    "lower_limit {low} must be below upper_limit {high}"
                )));
            }
        }
        Ok(ctrl)
    }

    fn axis_mut(&mut self, axis: Axis) -> Result<&mut SimAxis, CtrlError> {
        let limits = (self.lower_limit, self.upper_limit);
        let sim = self.axes.get_mut(&axis).ok_or(CtrlError::UnknownAxis(axis))?;
        sim.advance(Instant::now(), limits);
        Ok(sim)
    }
}

fn positive(what: &str, value: f64) -> Result<f64, CtrlError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(CtrlError::InvalidValue(format!("{what} must be positive, got {value}")))
    }
}

impl Controller for SimMotorController {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> CtrlCapabilities {
        CtrlCapabilities::MOTOR
    }

    fn add_device(&mut self, axis: Axis) -> Result<(), CtrlError> {
        debug!("{}: add axis {}", self.name, axis);
        self.axes.insert(axis, SimAxis::new(self.velocity, self.acceleration));
        Ok(())
    }

    fn delete_device(&mut self, axis: Axis) -> Result<(), CtrlError> {
        self.axes.remove(&axis).map(|_| ()).ok_or(CtrlError::UnknownAxis(axis))
    }

    fn pre_start_one(&mut self, axis: Axis, target: f64) -> Result<bool, CtrlError> {
        Ok(self.axes.contains_key(&axis) && target.is_finite())
    }

    fn start_one(&mut self, axis: Axis, target: f64) -> Result<(), CtrlError> {
        let sim = self.axis_mut(axis)?;
        sim.target = target;
        sim.limit = None;
        sim.moving = (target - sim.position).abs() > 0.0;
        debug!("sim axis {}: {} -> {}", axis, sim.position, target);
        Ok(())
    }

    fn state_one(&mut self, axis: Axis) -> Result<StateInfo, CtrlError> {
        let sim = self.axis_mut(axis)?;
        Ok(if sim.moving {
            StateInfo::with_status(ElementState::InProgress, "moving")
        } else if let Some(limit) = sim.limit {
            StateInfo::with_status(ElementState::Alarm, limit)
        } else {
            StateInfo::new(ElementState::Idle)
        })
    }

    fn read_one(&mut self, axis: Axis) -> Result<f64, CtrlError> {
        Ok(self.axis_mut(axis)?.position)
    }

    fn abort_one(&mut self, axis: Axis) -> Result<(), CtrlError> {
        let sim = self.axis_mut(axis)?;
        sim.target = sim.position;
        sim.stop();
        Ok(())
    }

    fn get_extra_attribute(&self, axis: Axis, name: &str) -> Result<ExtraValue, CtrlError> {
        let sim = self.axes.get(&axis).ok_or(CtrlError::UnknownAxis(axis))?;
        match name.to_ascii_lowercase().as_str() {
            "velocity" => Ok(ExtraValue::Double(sim.max_velocity)),
            "acceleration" => Ok(ExtraValue::Double(sim.max_acceleration)),
            _ => Err(CtrlError::NotSupported(format!("extra attribute '{name}'"))),
        }
    }

    fn set_extra_attribute(
        &mut self,
        axis: Axis,
        name: &str,
        value: ExtraValue,
    ) -> Result<(), CtrlError> {
        let v = value
            .as_f64()
            .ok_or_else(|| CtrlError::InvalidValue(format!("{name} must be numeric")))?;
        let sim = self.axis_mut(axis)?;
        match name.to_ascii_lowercase().as_str() {
            "velocity" => sim.max_velocity = positive(name, v)?,
            "acceleration" => sim.max_acceleration = positive(name, v)?,
            _ => return Err(CtrlError::NotSupported(format!("extra attribute '{name}'"))),
        }
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
